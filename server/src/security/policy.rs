use shared::types::SecurityConfig;

use super::rate_limiter::LimiterClass;

/// How important the guarded operation is when a dependency fails.
///
/// Derived from the HTTP method: anything state-changing is privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criticality {
    Privileged,
    ReadOnly,
}

impl Criticality {
    pub fn of_method(method: &hyper::Method) -> Self {
        match *method {
            hyper::Method::GET | hyper::Method::HEAD | hyper::Method::OPTIONS => {
                Criticality::ReadOnly
            }
            _ => Criticality::Privileged,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Log + allow.
    Open,
    /// Deny with `StoreUnavailable`.
    Closed,
}

/// The single place fail-open vs fail-closed is decided.
///
/// Components never branch on store failures themselves; they ask this
/// table, keyed by (what was being checked, how critical the operation is).
/// The whole security posture is therefore auditable here instead of being
/// implied by conditionals at every call site.
#[derive(Debug, Clone, Copy)]
pub struct PolicyTable {
    fail_open_reads: bool,
}

impl PolicyTable {
    pub fn new(config: &SecurityConfig) -> Self {
        Self {
            fail_open_reads: config.fail_open_reads,
        }
    }

    /// Store outage while checking a revocation marker.
    ///
    /// Privileged operations always fail closed — an unverifiable
    /// credential must not mutate state.  Read paths fail open only when
    /// the operator explicitly opted in.
    pub fn on_revocation_outage(&self, criticality: Criticality) -> FailureAction {
        match criticality {
            Criticality::Privileged => FailureAction::Closed,
            Criticality::ReadOnly if self.fail_open_reads => FailureAction::Open,
            Criticality::ReadOnly => FailureAction::Closed,
        }
    }

    /// Store outage while checking a session record.
    ///
    /// Sessions are the single authority for "is this login still valid",
    /// so there is no open option.
    pub fn on_session_outage(&self) -> FailureAction {
        FailureAction::Closed
    }

    /// Store outage during a rate-limit admission check.
    ///
    /// A store hiccup must not blanket-deny the system, so ordinary
    /// classes fail open.  The auth class keeps failing closed: it exists
    /// to blunt brute force, and an outage is exactly when an attacker
    /// would want it gone.
    pub fn on_rate_outage(&self, class: LimiterClass) -> FailureAction {
        match class {
            LimiterClass::Auth => FailureAction::Closed,
            _ => FailureAction::Open,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(fail_open_reads: bool) -> PolicyTable {
        PolicyTable { fail_open_reads }
    }

    #[test]
    fn privileged_revocation_checks_never_fail_open() {
        for reads_open in [false, true] {
            assert_eq!(
                table(reads_open).on_revocation_outage(Criticality::Privileged),
                FailureAction::Closed
            );
        }
    }

    #[test]
    fn read_paths_fail_open_only_when_configured() {
        assert_eq!(
            table(false).on_revocation_outage(Criticality::ReadOnly),
            FailureAction::Closed
        );
        assert_eq!(
            table(true).on_revocation_outage(Criticality::ReadOnly),
            FailureAction::Open
        );
    }

    #[test]
    fn rate_outage_opens_everything_but_auth() {
        let t = table(false);
        assert_eq!(t.on_rate_outage(LimiterClass::Global), FailureAction::Open);
        assert_eq!(t.on_rate_outage(LimiterClass::PerIp), FailureAction::Open);
        assert_eq!(t.on_rate_outage(LimiterClass::Auth), FailureAction::Closed);
    }

    #[test]
    fn criticality_follows_the_method() {
        assert_eq!(
            Criticality::of_method(&hyper::Method::GET),
            Criticality::ReadOnly
        );
        assert_eq!(
            Criticality::of_method(&hyper::Method::POST),
            Criticality::Privileged
        );
        assert_eq!(
            Criticality::of_method(&hyper::Method::DELETE),
            Criticality::Privileged
        );
    }
}
