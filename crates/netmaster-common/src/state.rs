//! State store - key/value persistence abstraction
//!
//! The store is path-scoped and crash-consistent per key only; nothing here is
//! transactional across keys. Typed records go through [`read_record`],
//! [`write_record`] and [`clear_record`], which encode records as JSON.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{StateError, StateResult};

/// Key/value state store capability
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read raw bytes stored under `key`; [`StateError::NotFound`] if absent
    async fn read(&self, key: &str) -> StateResult<Vec<u8>>;

    /// Store `value` under `key`, replacing any previous value
    async fn write(&self, key: &str, value: Vec<u8>) -> StateResult<()>;

    /// Remove `key`; [`StateError::NotFound`] if absent
    async fn clear(&self, key: &str) -> StateResult<()>;
}

/// Record persisted under a fixed key
pub trait StateRecord: Serialize + DeserializeOwned + Send + Sync {
    /// Store key for this record kind
    const KEY: &'static str;
}

/// Read and decode a record
pub async fn read_record<R: StateRecord>(store: &dyn StateStore) -> StateResult<R> {
    let bytes = store.read(R::KEY).await?;
    serde_json::from_slice(&bytes).map_err(|e| StateError::Codec {
        key: R::KEY.to_string(),
        reason: e.to_string(),
    })
}

/// Read a record, mapping "not found" to `None`
pub async fn probe_record<R: StateRecord>(store: &dyn StateStore) -> StateResult<Option<R>> {
    match read_record::<R>(store).await {
        Ok(record) => Ok(Some(record)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Encode and write a record
pub async fn write_record<R: StateRecord>(store: &dyn StateStore, record: &R) -> StateResult<()> {
    let bytes = serde_json::to_vec(record).map_err(|e| StateError::Codec {
        key: R::KEY.to_string(),
        reason: e.to_string(),
    })?;
    store.write(R::KEY, bytes).await
}

/// Clear a record
pub async fn clear_record<R: StateRecord>(store: &dyn StateStore) -> StateResult<()> {
    store.clear(R::KEY).await
}

/// In-memory state store (for testing and single-node development)
pub struct InMemoryStateStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Stored keys in order
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Copy of the whole store, for before/after comparisons
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.entries.read().clone()
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn read(&self, key: &str) -> StateResult<Vec<u8>> {
        self.entries
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StateError::NotFound(key.to_string()))
    }

    async fn write(&self, key: &str, value: Vec<u8>) -> StateResult<()> {
        tracing::trace!(key, bytes = value.len(), "state write");
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn clear(&self, key: &str) -> StateResult<()> {
        self.entries
            .write()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StateError::NotFound(key.to_string()))
    }
}
