//! TTL key/value storage backing the response cache.

use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::debug;

/// A key/value store whose entries expire.
///
/// Expired entries must never be returned by [`get`](Self::get); when they
/// are physically removed is up to the implementation.
pub trait TtlStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Bytes>;

    /// Stores `value` under `key` for `ttl`, replacing any previous value.
    fn put(&self, key: String, value: Bytes, ttl: Duration);
}

#[derive(Debug)]
struct Entry {
    value: Bytes,
    /// `None` when the TTL reaches past what an `Instant` can represent.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-memory [`TtlStore`].
///
/// Entries expire individually; a background task purges expired entries
/// every `cleanup_interval`. The task is started only when the store is
/// created inside a Tokio runtime with a non-zero interval, and stops when
/// the store is dropped. Without it, expired entries linger in memory until
/// overwritten or purged with [`purge_expired`](Self::purge_expired), but are
/// still never served.
///
/// A TTL too large to add to the current time keeps the entry until it is
/// overwritten; so does a cleanup interval that large for the sweep.
#[derive(Debug)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Entry>>,
    sweeper: Option<JoinHandle<()>>,
}

impl MemoryStore {
    pub fn new(cleanup_interval: Duration) -> Self {
        let entries = Arc::new(DashMap::new());

        let sweeper = match tokio::runtime::Handle::try_current() {
            Ok(handle) if !cleanup_interval.is_zero() => {
                Instant::now().checked_add(cleanup_interval).map(|start| {
                    let weak = Arc::downgrade(&entries);
                    handle.spawn(sweep(weak, start, cleanup_interval))
                })
            }
            Ok(_) => None,
            Err(_) => {
                debug!("no tokio runtime; expired cache entries are purged on demand only");
                None
            }
        };

        Self { entries, sweeper }
    }

    /// Removes every expired entry now and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        purge(&self.entries, Instant::now())
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TtlStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Bytes> {
        let entry = self.entries.get(key)?;
        if entry.is_expired(Instant::now()) {
            return None;
        }
        Some(entry.value.clone())
    }

    fn put(&self, key: String, value: Bytes, ttl: Duration) {
        let expires_at = Instant::now().checked_add(ttl);
        self.entries.insert(key, Entry { value, expires_at });
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
    }
}

fn purge(entries: &DashMap<String, Entry>, now: Instant) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(now));
    before.saturating_sub(entries.len())
}

async fn sweep(entries: Weak<DashMap<String, Entry>>, start: Instant, every: Duration) {
    let mut ticker = interval_at(start, every);
    loop {
        ticker.tick().await;
        let Some(entries) = entries.upgrade() else {
            break;
        };
        let removed = purge(&entries, Instant::now());
        if removed > 0 {
            debug!(removed, "purged expired cache entries");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let store = MemoryStore::new(Duration::ZERO);
        store.put("k".into(), Bytes::from_static(b"v"), Duration::from_secs(5));
        assert_eq!(store.get("k"), Some(Bytes::from_static(b"v")));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(store.get("k").is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.get("k").is_none());
        // Still resident until purged.
        assert_eq!(store.len(), 1);
        assert_eq!(store.purge_expired(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn put_overwrites_and_resets_ttl() {
        let store = MemoryStore::new(Duration::ZERO);
        store.put("k".into(), Bytes::from_static(b"old"), Duration::from_secs(1));
        tokio::time::advance(Duration::from_millis(900)).await;
        store.put("k".into(), Bytes::from_static(b"new"), Duration::from_secs(1));
        tokio::time::advance(Duration::from_millis(900)).await;
        assert_eq!(store.get("k"), Some(Bytes::from_static(b"new")));
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_ttl_never_expires() {
        let store = MemoryStore::new(Duration::MAX);
        store.put("forever".into(), Bytes::from_static(b"v"), Duration::MAX);
        store.put(
            "u64-secs".into(),
            Bytes::from_static(b"w"),
            Duration::from_secs(u64::MAX),
        );

        tokio::time::advance(Duration::from_secs(10 * 365 * 24 * 3600)).await;
        assert_eq!(store.get("forever"), Some(Bytes::from_static(b"v")));
        assert_eq!(store.get("u64-secs"), Some(Bytes::from_static(b"w")));
        assert_eq!(store.purge_expired(), 0);

        // A later finite TTL still applies.
        store.put("forever".into(), Bytes::from_static(b"x"), Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get("forever").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweep_purges() {
        let store = MemoryStore::new(Duration::from_secs(10));
        store.put("short".into(), Bytes::new(), Duration::from_secs(1));
        store.put("long".into(), Bytes::new(), Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(11)).await;
        // Let the sweeper run after its tick.
        tokio::task::yield_now().await;

        assert_eq!(store.len(), 1);
        assert!(store.get("long").is_some());
    }

    #[test]
    fn works_without_a_runtime() {
        let store = MemoryStore::new(Duration::from_secs(1));
        store.put("k".into(), Bytes::from_static(b"v"), Duration::from_secs(60));
        assert!(store.get("k").is_some());
    }
}
