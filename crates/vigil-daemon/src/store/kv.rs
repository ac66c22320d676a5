//! Lease-backed key/value store interface backing subscription rings.
//!
//! The interface mirrors the primitives of a strongly-consistent KV
//! store: leases with a TTL, puts bound to a lease, compare-and-delete,
//! ordered prefix ranges, and prefix watches. Only [`MemoryKv`] ships
//! in-process; a clustered deployment backs the same trait with a
//! consensus store.
//!
//! # Lease liveness
//!
//! A key bound to a lease is visible only while the lease is live.
//! [`MemoryKv`] evaluates liveness lazily against
//! [`tokio::time::Instant`], so tests drive expiry with
//! `tokio::time::{pause, advance}` instead of sleeping.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{StoreError, StoreResult};

/// Capacity of each watch channel; events beyond it are dropped for
/// that watcher.
const WATCH_CHANNEL_CAPACITY: usize = 64;

/// Identifier of a granted lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseId(u64);

impl LeaseId {
    /// Raw lease id.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A key/value pair returned by [`KvStore::range`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// Full key.
    pub key: String,

    /// Stored value.
    pub value: Vec<u8>,

    /// Lease the key is bound to, when any.
    pub lease: Option<LeaseId>,
}

/// A change observed through [`KvStore::watch_prefix`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvWatchEvent {
    /// A key was created or overwritten.
    Put {
        /// Full key.
        key: String,
        /// New value.
        value: Vec<u8>,
    },

    /// A key was deleted (explicitly or by lease expiry).
    Delete {
        /// Full key.
        key: String,
    },
}

/// Lease-backed key/value store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Grants a lease with the given TTL.
    async fn grant_lease(&self, ttl: Duration) -> StoreResult<LeaseId>;

    /// Refreshes a lease, restarting its TTL.
    ///
    /// # Errors
    ///
    /// [`StoreError::LeaseNotFound`] when the lease is unknown or has
    /// already expired.
    async fn keep_alive(&self, lease: LeaseId) -> StoreResult<()>;

    /// Revokes a lease, deleting every key bound to it. Revoking an
    /// unknown lease is a no-op.
    async fn revoke_lease(&self, lease: LeaseId) -> StoreResult<()>;

    /// Stores a value, optionally bound to a lease.
    ///
    /// # Errors
    ///
    /// [`StoreError::LeaseNotFound`] when the lease is dead.
    async fn put(&self, key: &str, value: &[u8], lease: Option<LeaseId>) -> StoreResult<()>;

    /// Deletes a key if its current value equals `expected`. Returns
    /// whether the delete happened; a missing or dead key compares as
    /// absent.
    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> StoreResult<bool>;

    /// Deletes a key unconditionally. Deleting a missing key is a
    /// no-op.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Returns all live keys under `prefix`, ordered by key.
    async fn range(&self, prefix: &str) -> StoreResult<Vec<KeyValue>>;

    /// Streams changes to keys under `prefix`. The stream ends when the
    /// store drops the watcher (e.g. the receiver falls behind and is
    /// closed, or the store shuts down).
    async fn watch_prefix(&self, prefix: &str) -> StoreResult<mpsc::Receiver<KvWatchEvent>>;
}

#[derive(Debug)]
struct KvEntry {
    value: Vec<u8>,
    lease: Option<LeaseId>,
}

#[derive(Debug)]
struct LeaseState {
    expires_at: Instant,
    ttl: Duration,
}

struct Watcher {
    prefix: String,
    tx: mpsc::Sender<KvWatchEvent>,
}

#[derive(Default)]
struct KvState {
    entries: BTreeMap<String, KvEntry>,
    leases: HashMap<LeaseId, LeaseState>,
    watchers: Vec<Watcher>,
    next_lease: u64,
}

impl KvState {
    fn lease_live(&self, lease: LeaseId, now: Instant) -> bool {
        self.leases
            .get(&lease)
            .is_some_and(|state| state.expires_at > now)
    }

    fn entry_live(&self, entry: &KvEntry, now: Instant) -> bool {
        entry.lease.is_none_or(|lease| self.lease_live(lease, now))
    }

    /// Drops expired leases and their keys, notifying watchers of the
    /// implied deletes.
    fn compact(&mut self, now: Instant) {
        let dead: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, state)| state.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();
        if dead.is_empty() {
            return;
        }
        for lease in dead {
            self.leases.remove(&lease);
            let keys: Vec<String> = self
                .entries
                .iter()
                .filter(|(_, e)| e.lease == Some(lease))
                .map(|(k, _)| k.clone())
                .collect();
            for key in keys {
                self.entries.remove(&key);
                self.notify(&KvWatchEvent::Delete { key });
            }
        }
    }

    fn notify(&mut self, event: &KvWatchEvent) {
        let key = match event {
            KvWatchEvent::Put { key, .. } | KvWatchEvent::Delete { key } => key.as_str(),
        };
        self.watchers
            .retain(|w| !key.starts_with(&w.prefix) || w.tx.try_send(event.clone()).is_ok());
    }
}

/// In-memory [`KvStore`] with TTL leases.
#[derive(Default)]
pub struct MemoryKv {
    state: Mutex<KvState>,
}

impl MemoryKv {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> StoreResult<std::sync::MutexGuard<'_, KvState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Internal("kv state poisoned".to_string()))
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn grant_lease(&self, ttl: Duration) -> StoreResult<LeaseId> {
        let mut state = self.locked()?;
        state.next_lease += 1;
        let id = LeaseId(state.next_lease);
        state.leases.insert(
            id,
            LeaseState {
                expires_at: Instant::now() + ttl,
                ttl,
            },
        );
        Ok(id)
    }

    async fn keep_alive(&self, lease: LeaseId) -> StoreResult<()> {
        let now = Instant::now();
        let mut state = self.locked()?;
        state.compact(now);
        let entry = state
            .leases
            .get_mut(&lease)
            .ok_or(StoreError::LeaseNotFound(lease.id()))?;
        entry.expires_at = now + entry.ttl;
        Ok(())
    }

    async fn revoke_lease(&self, lease: LeaseId) -> StoreResult<()> {
        let mut state = self.locked()?;
        if state.leases.remove(&lease).is_some() {
            let keys: Vec<String> = state
                .entries
                .iter()
                .filter(|(_, e)| e.lease == Some(lease))
                .map(|(k, _)| k.clone())
                .collect();
            for key in keys {
                state.entries.remove(&key);
                state.notify(&KvWatchEvent::Delete { key });
            }
        }
        Ok(())
    }

    async fn put(&self, key: &str, value: &[u8], lease: Option<LeaseId>) -> StoreResult<()> {
        let now = Instant::now();
        let mut state = self.locked()?;
        state.compact(now);
        if let Some(lease) = lease {
            if !state.lease_live(lease, now) {
                return Err(StoreError::LeaseNotFound(lease.id()));
            }
        }
        state.entries.insert(
            key.to_string(),
            KvEntry {
                value: value.to_vec(),
                lease,
            },
        );
        state.notify(&KvWatchEvent::Put {
            key: key.to_string(),
            value: value.to_vec(),
        });
        Ok(())
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> StoreResult<bool> {
        let now = Instant::now();
        let mut state = self.locked()?;
        state.compact(now);
        let matches = state
            .entries
            .get(key)
            .is_some_and(|e| state.entry_live(e, now) && e.value == expected);
        if matches {
            state.entries.remove(key);
            state.notify(&KvWatchEvent::Delete {
                key: key.to_string(),
            });
        }
        Ok(matches)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut state = self.locked()?;
        if state.entries.remove(key).is_some() {
            state.notify(&KvWatchEvent::Delete {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    async fn range(&self, prefix: &str) -> StoreResult<Vec<KeyValue>> {
        let now = Instant::now();
        let mut state = self.locked()?;
        state.compact(now);
        Ok(state
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| KeyValue {
                key: k.clone(),
                value: e.value.clone(),
                lease: e.lease,
            })
            .collect())
    }

    async fn watch_prefix(&self, prefix: &str) -> StoreResult<mpsc::Receiver<KvWatchEvent>> {
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let mut state = self.locked()?;
        state.watchers.push(Watcher {
            prefix: prefix.to_string(),
            tx,
        });
        Ok(rx)
    }
}
