//! Lease-backed subscription rings.
//!
//! A ring holds the ordered set of agent names subscribed to one
//! `(namespace, subscription)` key. [`Ring::next`] atomically rotates
//! the head to the tail, so each scheduled check fires on exactly one
//! agent, round-robin across the fleet. Each member's presence is tied
//! to a TTL lease in the backing [`KvStore`]: a member whose session
//! stops renewing disappears on its own, and `next` skips it.
//!
//! Ring layout in the key/value store:
//!
//! ```text
//! /rings/<ns>/<subscription>/items/<seq>  ->  <agent name>  (leased)
//! ```
//!
//! Sequence keys are zero-padded so a key-ordered range yields FIFO
//! order; rotation re-appends the popped member under a fresh sequence
//! with its lease intact.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::store::kv::KvStore;
use crate::store::StoreError;

/// Upper bound on the delay between watch attempts after an error.
const MAX_WATCH_BACKOFF: Duration = Duration::from_secs(60);

/// Errors surfaced by ring operations.
#[derive(Debug, Clone, Error)]
pub enum RingError {
    /// The backing store failed; ring operations are retriable.
    #[error("ring store error: {0}")]
    Store(#[from] StoreError),

    /// An item key under the ring prefix does not parse as a sequence.
    #[error("malformed ring item key: {0}")]
    MalformedKey(String),
}

/// Result type for ring operations.
pub type RingResult<T> = Result<T, RingError>;

/// Escapes a path segment so namespaces and subscriptions containing
/// `/` or `%` cannot collide with the ring key layout.
#[must_use]
pub fn escape(segment: &str) -> String {
    segment.replace('%', "%25").replace('/', "%2F")
}

/// Key path of the ring for a `(namespace, subscription)` pair.
#[must_use]
pub fn ring_path(namespace: &str, subscription: &str) -> String {
    format!("/rings/{}/{}", escape(namespace), escape(subscription))
}

/// An event emitted by [`Ring::watch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RingEvent {
    /// The member whose turn came up this tick.
    Next(String),

    /// The ring had no live members this tick.
    Empty,

    /// The tick failed; the watch retries with backoff.
    Error(String),
}

/// Handle to an interval-driven watch on a ring. Dropping the handle
/// cancels the underlying task.
pub struct RingWatch {
    rx: mpsc::Receiver<RingEvent>,
    cancel: CancellationToken,
}

impl RingWatch {
    /// Receives the next watch event; `None` after cancellation.
    pub async fn recv(&mut self) -> Option<RingEvent> {
        self.rx.recv().await
    }
}

impl Drop for RingWatch {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// An ordered, lease-backed rotation of members for one ring key.
///
/// Handles are cheap to share; every operation runs its own store
/// transaction, linearized per key by an internal mutex plus
/// compare-and-delete on the popped entry.
pub struct Ring {
    store: Arc<dyn KvStore>,
    path: String,
    lease_ttl: Duration,
    /// Linearizes rotation and membership changes on this handle.
    lock: Mutex<()>,
}

impl Ring {
    fn new(store: Arc<dyn KvStore>, path: String, lease_ttl: Duration) -> Self {
        Self {
            store,
            path,
            lease_ttl,
            lock: Mutex::new(()),
        }
    }

    /// The ring's key path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    fn items_prefix(&self) -> String {
        format!("{}/items/", self.path)
    }

    fn item_key(&self, seq: u64) -> String {
        // Zero-padded so a key-ordered range yields insertion order.
        format!("{}/items/{seq:020}", self.path)
    }

    fn parse_seq(&self, key: &str) -> RingResult<u64> {
        key.strip_prefix(&self.items_prefix())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| RingError::MalformedKey(key.to_string()))
    }

    /// Inserts `value` with a fresh lease. If the value is already a
    /// member, its lease is refreshed and its position is unchanged.
    ///
    /// # Errors
    ///
    /// Returns a [`RingError`] when the backing store fails.
    pub async fn add(&self, value: &str) -> RingResult<()> {
        let _guard = self.lock.lock().await;
        let items = self.store.range(&self.items_prefix()).await?;

        if let Some(existing) = items.iter().find(|kv| kv.value == value.as_bytes()) {
            if let Some(lease) = existing.lease {
                match self.store.keep_alive(lease).await {
                    Ok(()) => return Ok(()),
                    // The lease died between range and refresh; fall
                    // through and re-insert.
                    Err(StoreError::LeaseNotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        let next_seq = match items.last() {
            Some(kv) => self.parse_seq(&kv.key)? + 1,
            None => 0,
        };
        let lease = self.store.grant_lease(self.lease_ttl).await?;
        self.store
            .put(&self.item_key(next_seq), value.as_bytes(), Some(lease))
            .await?;
        Ok(())
    }

    /// Removes `value` and revokes its lease. Removing a value that is
    /// not a member is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a [`RingError`] when the backing store fails.
    pub async fn remove(&self, value: &str) -> RingResult<()> {
        let _guard = self.lock.lock().await;
        let items = self.store.range(&self.items_prefix()).await?;
        for kv in items.iter().filter(|kv| kv.value == value.as_bytes()) {
            self.store.delete(&kv.key).await?;
            if let Some(lease) = kv.lease {
                self.store.revoke_lease(lease).await?;
            }
        }
        Ok(())
    }

    /// Pops the head member, re-appends it at the tail with its lease
    /// intact, and returns it. Members whose lease died are dropped and
    /// skipped, up to the current size of the ring. Returns `None` when
    /// no live member remains.
    ///
    /// # Errors
    ///
    /// Returns a [`RingError`] when the backing store fails.
    pub async fn next(&self) -> RingResult<Option<String>> {
        let _guard = self.lock.lock().await;
        let items = self.store.range(&self.items_prefix()).await?;
        let mut tail_seq = match items.last() {
            Some(kv) => self.parse_seq(&kv.key)? + 1,
            None => return Ok(None),
        };

        for kv in items {
            // Another handle may have rotated or evicted this entry
            // since the range; skip it if the delete loses.
            if !self.store.compare_and_delete(&kv.key, &kv.value).await? {
                continue;
            }
            match self.store.put(&self.item_key(tail_seq), &kv.value, kv.lease).await {
                Ok(()) => {
                    let value = String::from_utf8_lossy(&kv.value).into_owned();
                    return Ok(Some(value));
                }
                // The member's lease expired mid-rotation: it stays
                // evicted, try the next entry.
                Err(StoreError::LeaseNotFound(_)) => {
                    debug!(path = %self.path, "dropping ring member with dead lease");
                    tail_seq += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    /// Starts an interval-driven watch: every `interval`, one
    /// [`RingEvent`] is emitted with the member whose turn came up (or
    /// [`RingEvent::Empty`]). Store errors are reported and retried
    /// with exponential backoff. The watch ends when the returned
    /// handle is dropped.
    #[must_use]
    pub fn watch(self: &Arc<Self>, interval: Duration) -> RingWatch {
        let ring = Arc::clone(self);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            let mut delay = interval;
            loop {
                tokio::select! {
                    () = task_cancel.cancelled() => return,
                    () = tokio::time::sleep(delay) => {}
                }
                let event = match ring.next().await {
                    Ok(Some(value)) => {
                        delay = interval;
                        RingEvent::Next(value)
                    }
                    Ok(None) => {
                        delay = interval;
                        RingEvent::Empty
                    }
                    Err(e) => {
                        warn!(path = %ring.path, error = %e, "ring watch tick failed");
                        delay = (delay * 2).min(MAX_WATCH_BACKOFF);
                        RingEvent::Error(e.to_string())
                    }
                };
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });

        RingWatch { rx, cancel }
    }
}

/// Caches [`Ring`] handles per key path over one backing store.
///
/// Handles returned by [`Pool::get`] are shared across sessions;
/// dropping the pool invalidates nothing that is still referenced, but
/// new lookups require the pool.
pub struct Pool {
    store: Arc<dyn KvStore>,
    lease_ttl: Duration,
    rings: std::sync::Mutex<HashMap<String, Arc<Ring>>>,
}

impl Pool {
    /// Creates a pool over the given store. `lease_ttl` applies to
    /// every membership lease granted through the pool's rings.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>, lease_ttl: Duration) -> Self {
        Self {
            store,
            lease_ttl,
            rings: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Returns the (cached) ring handle for a key path.
    #[must_use]
    pub fn get(&self, path: &str) -> Arc<Ring> {
        let mut rings = match self.rings.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(rings.entry(path.to_string()).or_insert_with(|| {
            Arc::new(Ring::new(
                Arc::clone(&self.store),
                path.to_string(),
                self.lease_ttl,
            ))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::kv::MemoryKv;

    fn pool() -> Pool {
        Pool::new(Arc::new(MemoryKv::new()), Duration::from_secs(120))
    }

    #[test]
    fn paths_escape_separator_characters() {
        assert_eq!(ring_path("default", "web"), "/rings/default/web");
        assert_eq!(ring_path("a/b", "c%d"), "/rings/a%2Fb/c%25d");
    }

    #[tokio::test]
    async fn next_rotates_members_fifo() {
        let pool = pool();
        let ring = pool.get(&ring_path("default", "web"));
        ring.add("a").await.unwrap();
        ring.add("b").await.unwrap();
        ring.add("c").await.unwrap();

        // Each member is visited exactly k times over k full turns.
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(ring.next().await.unwrap().unwrap());
        }
        assert_eq!(seen, ["a", "b", "c", "a", "b", "c"]);
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let pool = pool();
        let ring = pool.get(&ring_path("default", "web"));
        ring.add("a").await.unwrap();
        ring.add("b").await.unwrap();
        ring.add("a").await.unwrap();

        assert_eq!(ring.next().await.unwrap().as_deref(), Some("a"));
        assert_eq!(ring.next().await.unwrap().as_deref(), Some("b"));
        assert_eq!(ring.next().await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let pool = pool();
        let ring = pool.get(&ring_path("default", "web"));
        ring.add("a").await.unwrap();
        ring.remove("a").await.unwrap();
        ring.remove("a").await.unwrap();
        assert_eq!(ring.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn empty_ring_yields_none() {
        let pool = pool();
        let ring = pool.get(&ring_path("default", "web"));
        assert_eq!(ring.next().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_members_are_skipped() {
        let kv = Arc::new(MemoryKv::new());
        let pool = Pool::new(kv, Duration::from_secs(30));
        let ring = pool.get(&ring_path("default", "web"));
        ring.add("a").await.unwrap();

        tokio::time::advance(Duration::from_secs(20)).await;
        ring.add("b").await.unwrap();

        // `a` was never refreshed and expires first.
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(ring.next().await.unwrap().as_deref(), Some("b"));
        assert_eq!(ring.next().await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_keeps_members_alive() {
        let pool = Pool::new(Arc::new(MemoryKv::new()), Duration::from_secs(30));
        let ring = pool.get(&ring_path("default", "web"));
        ring.add("a").await.unwrap();

        for _ in 0..4 {
            tokio::time::advance(Duration::from_secs(10)).await;
            ring.add("a").await.unwrap();
        }
        assert_eq!(ring.next().await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn watch_emits_rotation_ticks() {
        let pool = pool();
        let ring = pool.get(&ring_path("default", "web"));
        ring.add("a").await.unwrap();
        ring.add("b").await.unwrap();

        let mut watch = ring.watch(Duration::from_secs(5));
        assert_eq!(watch.recv().await, Some(RingEvent::Next("a".into())));
        assert_eq!(watch.recv().await, Some(RingEvent::Next("b".into())));
        assert_eq!(watch.recv().await, Some(RingEvent::Next("a".into())));

        ring.remove("a").await.unwrap();
        ring.remove("b").await.unwrap();
        assert_eq!(watch.recv().await, Some(RingEvent::Empty));
    }

    #[tokio::test]
    async fn pool_caches_handles() {
        let pool = pool();
        let a = pool.get("/rings/default/web");
        let b = pool.get("/rings/default/web");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
