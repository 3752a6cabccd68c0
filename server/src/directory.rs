//! User lookup for the login path.
//!
//! The pipeline only needs enough of a user model to authenticate: id,
//! email, password hash, role names.  Everything else about users lives
//! in the application layer behind the same trait.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub roles: Vec<String>,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<UserRecord>>;
}

/// In-memory directory, used standalone and in tests.
pub struct MemoryDirectory {
    users: RwLock<HashMap<String, UserRecord>>,
    next_id: RwLock<i64>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            next_id: RwLock::new(1),
        }
    }

    /// Register a user, hashing the password with Argon2id.
    pub async fn add_user(
        &self,
        email: &str,
        password: &str,
        roles: &[&str],
    ) -> anyhow::Result<i64> {
        let hash = hash_password(password)?;
        let mut next_id = self.next_id.write().await;
        let id = *next_id;
        *next_id += 1;
        self.users.write().await.insert(
            email.to_string(),
            UserRecord {
                id,
                email: email.to_string(),
                password_hash: hash,
                roles: roles.iter().map(|r| r.to_string()).collect(),
            },
        );
        Ok(id)
    }
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<UserRecord>> {
        Ok(self.users.read().await.get(email).cloned())
    }
}

/// Hash a password using Argon2id
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    use argon2::{
        Argon2,
        password_hash::{PasswordHasher, SaltString},
    };
    use rand::rngs::OsRng;

    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow::anyhow!("Password hashing failed: {}", e))
}

/// Verify a password against its hash
pub fn verify_password(hash: &str, password: &str) -> anyhow::Result<bool> {
    use argon2::{
        Argon2,
        password_hash::{PasswordHash, PasswordVerifier},
    };

    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| anyhow::anyhow!("Failed to parse password hash: {}", e))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hashing() {
        let password = "test_password_123";
        let hash = hash_password(password).unwrap();
        assert!(verify_password(&hash, password).unwrap());
        assert!(!verify_password(&hash, "wrong_password").unwrap());
    }

    #[tokio::test]
    async fn lookup_roundtrip() {
        let dir = MemoryDirectory::new();
        let id = dir.add_user("alice@example.com", "hunter2-ok", &["user"]).await.unwrap();

        let found = dir.find_by_email("alice@example.com").await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.roles, vec!["user"]);
        assert!(verify_password(&found.password_hash, "hunter2-ok").unwrap());

        assert!(dir.find_by_email("nobody@example.com").await.unwrap().is_none());
    }
}
