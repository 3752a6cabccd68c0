//! Centralized store-key construction.
//!
//! Every entity the pipeline persists lives under its own prefix.  Key
//! strings are built here and nowhere else — call sites never format
//! prefixes inline, so the store namespace is auditable in one file.

/// Server-side session record, keyed by the opaque session id.
pub fn session(session_id: &str) -> String {
    format!("session:{}", session_id)
}

/// Revocation marker for a single token id.  Existence means dead.
pub fn revoked(jti: &str) -> String {
    format!("revoked:{}", jti)
}

/// Per-user index of outstanding token ids, for bulk revocation.
pub fn user_tokens(user_id: i64) -> String {
    format!("user-tokens:{}", user_id)
}

/// Per-user set of assigned role names.
pub fn user_roles(user_id: i64) -> String {
    format!("user-roles:{}", user_id)
}

/// Sliding-window marker set for one limiter class + key.
pub fn rate_window(class: &str, key: &str) -> String {
    format!("rate:{}:{}", class, key)
}

/// Penalty block entry for one limiter class + key.
pub fn block(class: &str, key: &str) -> String {
    format!("block:{}:{}", class, key)
}

/// Secondary burst-detector window, keyed by client only.
pub fn burst_window(key: &str) -> String {
    format!("burst:{}", key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_do_not_collide() {
        let keys = [
            session("x"),
            revoked("x"),
            user_tokens(1),
            user_roles(1),
            rate_window("per_ip", "x"),
            block("per_ip", "x"),
            burst_window("x"),
        ];
        for (i, a) in keys.iter().enumerate() {
            for (j, b) in keys.iter().enumerate() {
                if i != j {
                    assert_ne!(a, b);
                }
            }
        }
    }

    #[test]
    fn class_is_part_of_the_window_key() {
        assert_ne!(rate_window("per_ip", "k"), rate_window("auth", "k"));
        assert_ne!(block("per_ip", "k"), block("auth", "k"));
    }
}
