//! Finite-state-machine storage.
//!
//! Every conversation slot, identified by an [`FsmKey`] (`chat_id`, `user_id`),
//! owns at most one [`FsmRecord`]: the current state name (or `None` for the
//! idle state) plus a JSON data bag. Records live in an [`FsmStorage`]
//! backend and expire after a TTL of inactivity. Every write refreshes the
//! TTL; reads never do.
//!
//! [`FsmStore`] is the contract the dispatcher talks to. It wraps a backend
//! with the configured TTL and turns an absent record into the idle default,
//! so `get` never fails for a missing key.
//!
//! # Atomicity
//!
//! Each backend operation is atomic as a whole for its key. Concurrent writes
//! to the same key serialize; writes to different keys never interfere.
//! [`MemoryStorage`] achieves this with a single lock held for the whole
//! read-modify-write of an operation.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::trace;

use crate::error::{StorageError, StorageResult};
use crate::event::{ChatId, UserId};

// =============================================================================
// Keys and state names
// =============================================================================

/// Identifies one conversation slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FsmKey {
    pub chat_id: ChatId,
    pub user_id: UserId,
}

impl FsmKey {
    pub const fn new(chat_id: ChatId, user_id: UserId) -> Self {
        Self { chat_id, user_id }
    }

    /// The composite key used by key-value backends: `fsm:{chat_id}:{user_id}`.
    pub fn storage_key(&self) -> String {
        format!("fsm:{}:{}", self.chat_id, self.user_id)
    }
}

impl fmt::Display for FsmKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chat_id, self.user_id)
    }
}

/// The name of a non-idle FSM state as it is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateName(String);

impl StateName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StateName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for StateName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// A typed group of FSM states, usually a fieldless enum.
///
/// Implementors should also provide `From<Self> for StateName` (typically
/// via [`FsmState::state_name`]) so that typed states can be passed wherever
/// an `impl Into<StateName>` is accepted.
///
/// ```rust,ignore
/// #[derive(Clone, Copy)]
/// enum TaskState { AwaitingText, AwaitingPerson }
///
/// impl FsmState for TaskState {
///     fn name(&self) -> &'static str {
///         match self {
///             Self::AwaitingText => "task:awaiting_text",
///             Self::AwaitingPerson => "task:awaiting_person",
///         }
///     }
///     fn from_name(name: &str) -> Option<Self> { /* ... */ }
/// }
/// ```
pub trait FsmState: Sized + Send + Sync + 'static {
    /// The persisted name of this state.
    fn name(&self) -> &'static str;

    /// Parses a persisted name back into a typed state.
    fn from_name(name: &str) -> Option<Self>;

    fn state_name(&self) -> StateName {
        StateName::new(self.name())
    }
}

// =============================================================================
// Records
// =============================================================================

/// The persisted state of one conversation slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FsmRecord {
    /// `None` is the idle state.
    #[serde(default)]
    pub state: Option<StateName>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl FsmRecord {
    /// An idle record with no data.
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn is_idle(&self) -> bool {
        self.state.is_none()
    }

    /// Returns `true` if the record is in the given state.
    pub fn is_in(&self, state: &StateName) -> bool {
        self.state.as_ref() == Some(state)
    }

    /// Deserializes one data field.
    pub fn field<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.data
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Parses the state into a typed [`FsmState`].
    pub fn state_as<S: FsmState>(&self) -> Option<S> {
        self.state.as_ref().and_then(|s| S::from_name(s.as_str()))
    }
}

// =============================================================================
// Storage backend
// =============================================================================

/// Key-value backend for FSM records.
///
/// Implementations must make every method atomic for its key and must apply
/// `ttl` on every write. A backend that cannot reach its storage returns
/// [`StorageError::Unavailable`]; it never drops a write silently.
#[async_trait]
pub trait FsmStorage: Send + Sync + 'static {
    /// Returns the live record for `key`, or `None` if absent or expired.
    async fn get(&self, key: &FsmKey) -> StorageResult<Option<FsmRecord>>;

    /// Replaces the state, keeping the data.
    async fn set_state(
        &self,
        key: &FsmKey,
        state: Option<StateName>,
        ttl: Duration,
    ) -> StorageResult<()>;

    /// Merges `patch` into the data (last write wins per field) and returns
    /// the resulting record.
    async fn update_data(
        &self,
        key: &FsmKey,
        patch: Map<String, Value>,
        ttl: Duration,
    ) -> StorageResult<FsmRecord>;

    /// Replaces the whole record.
    async fn set_record(&self, key: &FsmKey, record: FsmRecord, ttl: Duration)
    -> StorageResult<()>;

    /// Removes the record, returning the slot to idle.
    async fn clear(&self, key: &FsmKey) -> StorageResult<()>;

    /// Drops every expired record, returning how many were removed.
    async fn purge_expired(&self) -> StorageResult<usize>;
}

/// Shared FSM backend.
pub type BoxedStorage = Arc<dyn FsmStorage>;

struct Entry {
    record: FsmRecord,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-process [`FsmStorage`] backed by a locked hash map.
///
/// Expired entries are invisible to reads immediately and are physically
/// removed on the next write to the same key or by
/// [`purge_expired`](FsmStorage::purge_expired). The clock is tokio's, so
/// tests can drive expiry with a paused runtime.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, Entry>>,
    offline: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a backend outage: while offline every operation fails with
    /// [`StorageError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_online(&self) -> StorageResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("memory storage is offline".into()))
        } else {
            Ok(())
        }
    }

    /// Runs `f` on the live record for `key` (idle if absent or expired) and
    /// stores the result with a fresh TTL, all under one lock.
    fn write_with<F>(&self, key: &FsmKey, ttl: Duration, f: F) -> StorageResult<FsmRecord>
    where
        F: FnOnce(&mut FsmRecord),
    {
        self.ensure_online()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let mut record = entries
            .remove(&key.storage_key())
            .filter(|e| e.is_live(now))
            .map(|e| e.record)
            .unwrap_or_default();
        f(&mut record);
        entries.insert(
            key.storage_key(),
            Entry {
                record: record.clone(),
                expires_at: now + ttl,
            },
        );
        Ok(record)
    }
}

#[async_trait]
impl FsmStorage for MemoryStorage {
    async fn get(&self, key: &FsmKey) -> StorageResult<Option<FsmRecord>> {
        self.ensure_online()?;
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .get(&key.storage_key())
            .filter(|e| e.is_live(now))
            .map(|e| e.record.clone()))
    }

    async fn set_state(
        &self,
        key: &FsmKey,
        state: Option<StateName>,
        ttl: Duration,
    ) -> StorageResult<()> {
        self.write_with(key, ttl, |record| record.state = state)?;
        Ok(())
    }

    async fn update_data(
        &self,
        key: &FsmKey,
        patch: Map<String, Value>,
        ttl: Duration,
    ) -> StorageResult<FsmRecord> {
        self.write_with(key, ttl, |record| record.data.extend(patch))
    }

    async fn set_record(
        &self,
        key: &FsmKey,
        record: FsmRecord,
        ttl: Duration,
    ) -> StorageResult<()> {
        self.write_with(key, ttl, |current| *current = record)?;
        Ok(())
    }

    async fn clear(&self, key: &FsmKey) -> StorageResult<()> {
        self.ensure_online()?;
        self.entries.lock().remove(&key.storage_key());
        Ok(())
    }

    async fn purge_expired(&self) -> StorageResult<usize> {
        self.ensure_online()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        let removed = before - entries.len();
        if removed > 0 {
            trace!(removed, "Purged expired FSM records");
        }
        Ok(removed)
    }
}

// =============================================================================
// FsmStore
// =============================================================================

/// The FSM store contract used by the dispatcher: a backend plus its TTL.
#[derive(Clone)]
pub struct FsmStore {
    storage: BoxedStorage,
    ttl: Duration,
}

impl FsmStore {
    pub fn new(storage: BoxedStorage, ttl: Duration) -> Self {
        Self { storage, ttl }
    }

    /// A store backed by a fresh [`MemoryStorage`].
    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryStorage::new()), ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn storage(&self) -> &BoxedStorage {
        &self.storage
    }

    /// Returns the record for `key`, or the idle record if there is none.
    pub async fn get(&self, key: &FsmKey) -> StorageResult<FsmRecord> {
        Ok(self.storage.get(key).await?.unwrap_or_default())
    }

    pub async fn set_state(&self, key: &FsmKey, state: Option<StateName>) -> StorageResult<()> {
        self.storage.set_state(key, state, self.ttl).await
    }

    pub async fn update_data(
        &self,
        key: &FsmKey,
        patch: Map<String, Value>,
    ) -> StorageResult<FsmRecord> {
        self.storage.update_data(key, patch, self.ttl).await
    }

    pub async fn clear(&self, key: &FsmKey) -> StorageResult<()> {
        self.storage.clear(key).await
    }

    /// Restores `key` to a previously read record.
    ///
    /// An idle record with no data is restored by clearing the slot so that
    /// no empty entry is left behind.
    pub async fn restore(&self, key: &FsmKey, record: FsmRecord) -> StorageResult<()> {
        if record == FsmRecord::idle() {
            self.storage.clear(key).await
        } else {
            self.storage.set_record(key, record, self.ttl).await
        }
    }

    pub async fn purge_expired(&self) -> StorageResult<usize> {
        self.storage.purge_expired().await
    }
}

impl fmt::Debug for FsmStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsmStore")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
