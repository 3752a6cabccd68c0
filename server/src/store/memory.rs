use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{SecurityStore, StoreResult};

/// In-process store backend.
///
/// One mutex guards all three maps, which is what makes `window_slide`
/// atomic here: the prune/count/insert sequence runs under a single lock
/// acquisition.  Expiry is checked lazily on access, never swept.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    kv: HashMap<String, ValueEntry>,
    sets: HashMap<String, SetEntry>,
    windows: HashMap<String, WindowEntry>,
}

#[derive(Debug)]
struct ValueEntry {
    value: String,
    expires_at: Option<Instant>,
}

#[derive(Debug)]
struct SetEntry {
    members: HashSet<String>,
    expires_at: Option<Instant>,
}

#[derive(Debug)]
struct WindowEntry {
    /// Timestamped request markers, milliseconds.
    markers: VecDeque<u64>,
    /// Marker-time retention horizon (2× the window at last write).
    retain_until_ms: u64,
}

impl ValueEntry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

impl SetEntry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryInner::default())),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecurityStore for MemoryStore {
    async fn put_value(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.kv.insert(
            key.to_string(),
            ValueEntry {
                value: value.to_string(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn get_value(&self, key: &str) -> StoreResult<Option<String>> {
        let mut inner = self.inner.lock().await;
        match inner.kv.get(key) {
            Some(entry) if entry.expired() => {
                inner.kv.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn delete_value(&self, key: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.kv.remove(key);
        Ok(())
    }

    async fn index_add(&self, key: &str, member: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let entry = inner.sets.entry(key.to_string()).or_insert_with(|| SetEntry {
            members: HashSet::new(),
            expires_at: None,
        });
        if entry.expired() {
            entry.members.clear();
        }
        entry.members.insert(member.to_string());
        entry.expires_at = ttl.map(|t| Instant::now() + t);
        Ok(())
    }

    async fn index_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut inner = self.inner.lock().await;
        match inner.sets.get(key) {
            Some(entry) if entry.expired() => {
                inner.sets.remove(key);
                Ok(Vec::new())
            }
            Some(entry) => Ok(entry.members.iter().cloned().collect()),
            None => Ok(Vec::new()),
        }
    }

    async fn index_remove(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.sets.get_mut(key) {
            entry.members.remove(member);
        }
        Ok(())
    }

    async fn index_clear(&self, key: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.sets.remove(key);
        Ok(())
    }

    async fn window_slide(&self, key: &str, now_ms: u64, window_ms: u64) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .windows
            .entry(key.to_string())
            .or_insert_with(|| WindowEntry {
                markers: VecDeque::new(),
                retain_until_ms: 0,
            });

        // Whole-key expiry: if nothing touched this key within its retention
        // horizon, it starts fresh.
        if entry.retain_until_ms != 0 && now_ms > entry.retain_until_ms {
            entry.markers.clear();
        }

        let floor = now_ms.saturating_sub(window_ms);
        entry.markers.retain(|&ts| ts >= floor);

        let count_before = entry.markers.len() as u64;
        entry.markers.push_back(now_ms);
        entry.retain_until_ms = now_ms + 2 * window_ms;

        Ok(count_before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn values_roundtrip_and_expire() {
        let store = MemoryStore::new();
        store
            .put_value("k", "v", Some(Duration::from_millis(40)))
            .await
            .unwrap();
        assert_eq!(store.get_value("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.get_value("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn index_accumulates_and_clears() {
        let store = MemoryStore::new();
        store.index_add("s", "a", None).await.unwrap();
        store.index_add("s", "b", None).await.unwrap();
        store.index_add("s", "a", None).await.unwrap();

        let mut members = store.index_members("s").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["a", "b"]);

        store.index_clear("s").await.unwrap();
        assert!(store.index_members("s").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn window_counts_only_markers_inside_the_window() {
        let store = MemoryStore::new();
        let w = 1_000u64;

        // Three markers at t=0ms, 100ms, 200ms.
        assert_eq!(store.window_slide("k", 10_000, w).await.unwrap(), 0);
        assert_eq!(store.window_slide("k", 10_100, w).await.unwrap(), 1);
        assert_eq!(store.window_slide("k", 10_200, w).await.unwrap(), 2);

        // At t=11_050 the first marker (10_000) has left the window.
        assert_eq!(store.window_slide("k", 11_050, w).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn window_resets_after_the_retention_horizon() {
        let store = MemoryStore::new();
        let w = 1_000u64;
        store.window_slide("k", 10_000, w).await.unwrap();

        // Far beyond 2× the window: key starts fresh.
        assert_eq!(store.window_slide("k", 50_000, w).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn windows_for_different_keys_are_independent() {
        let store = MemoryStore::new();
        store.window_slide("a", 10_000, 1_000).await.unwrap();
        assert_eq!(store.window_slide("b", 10_000, 1_000).await.unwrap(), 0);
    }
}
