//! Shared-store adapter.
//!
//! All mutable security state — sessions, revocation markers, rate windows,
//! role assignments — lives behind [`SecurityStore`].  No component keeps a
//! local cache of any of it across requests; the store is the single source
//! of truth, and the sliding-window update is one atomic batch so two
//! concurrent requests on the same key can never both observe the last
//! remaining slot.

pub mod keys;
pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call timed out")]
    Timeout,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// TTL'd key/value + set-index + atomic window operations.
///
/// Implementations must make [`window_slide`](SecurityStore::window_slide)
/// atomic with respect to concurrent calls on the same key — that is the
/// only multi-step operation the pipeline relies on.
#[async_trait]
pub trait SecurityStore: Send + Sync {
    /// Write `value` under `key`, replacing any previous value.  A `ttl` of
    /// `None` means the entry does not expire.
    async fn put_value(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Read the live value under `key`.  Expired entries read as absent.
    async fn get_value(&self, key: &str) -> StoreResult<Option<String>>;

    async fn delete_value(&self, key: &str) -> StoreResult<()>;

    /// Add `member` to the set under `key`, refreshing the set's TTL.
    async fn index_add(&self, key: &str, member: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// All live members of the set under `key`.
    async fn index_members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Remove a single member, leaving the rest of the set untouched.
    async fn index_remove(&self, key: &str, member: &str) -> StoreResult<()>;

    async fn index_clear(&self, key: &str) -> StoreResult<()>;

    /// The rate limiter's atomic batch: prune markers older than
    /// `now_ms - window_ms`, count what remains, insert a marker at
    /// `now_ms`, and refresh the key's retention to `2 × window_ms` — all
    /// in one step.  Returns the count *before* the insert, which is what
    /// admission decisions and `X-RateLimit-Remaining` are computed from.
    ///
    /// Pruning is lazy (here, on the write path) — markers are never swept
    /// proactively.
    async fn window_slide(&self, key: &str, now_ms: u64, window_ms: u64) -> StoreResult<u64>;
}

/// Bound a store call.  Every call the pipeline makes goes through this so
/// a hung store surfaces as [`StoreError::Timeout`] instead of a stalled
/// request; the policy table decides what a timeout means per call site.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout),
    }
}
