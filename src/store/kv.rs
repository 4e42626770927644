//! Durable key-value seam.
//!
//! The device's storage engine (object store, embedded DB, whatever the host
//! platform provides) is consumed through this trait. Values are JSON bytes;
//! typed stores do the (de)serialization. Secondary indexes are expressed as
//! key prefixes plus `scan_prefix`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::error::{Effect, Transience};

/// Errors crossing the storage seam.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("storage backend failure: {reason}")]
    Backend { reason: String },

    #[error("corrupt record at `{key}`: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    pub fn transience(&self) -> Transience {
        match self {
            // A backend hiccup may clear; corruption will not.
            StoreError::Backend { .. } => Transience::Retryable,
            StoreError::Corrupt { .. } => Transience::Permanent,
            StoreError::LockPoisoned => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            StoreError::Backend { .. } => Effect::Unknown,
            StoreError::Corrupt { .. } | StoreError::LockPoisoned => Effect::None,
        }
    }
}

/// Generic durable store: string keys, JSON-byte values.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
    /// All (key, value) pairs whose key starts with `prefix`, key-ordered.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;
}

/// In-process store backed by a BTreeMap.
///
/// Used by tests and as the default backing when the host platform wires no
/// engine of its own. Cheap to clone: clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryKv {
    inner: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.lock()?.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let map = self.lock()?;
        Ok(map
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// Decode one record, attributing parse failures to the key that held them.
pub(crate) fn decode<T: serde::de::DeserializeOwned>(
    key: &str,
    bytes: &[u8],
) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|source| StoreError::Corrupt {
        key: key.to_string(),
        source,
    })
}

/// Encode one record. Serialization of our own types cannot fail for the
/// shapes we persist; surface it as a backend error if it ever does.
pub(crate) fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(|e| StoreError::Backend {
        reason: format!("encode: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_remove_roundtrip() {
        let kv = MemoryKv::new();
        kv.put("a/1", b"one".to_vec()).unwrap();
        assert_eq!(kv.get("a/1").unwrap(), Some(b"one".to_vec()));

        kv.remove("a/1").unwrap();
        assert_eq!(kv.get("a/1").unwrap(), None);
    }

    #[test]
    fn scan_prefix_is_bounded_and_ordered() {
        let kv = MemoryKv::new();
        kv.put("plan/b", b"2".to_vec()).unwrap();
        kv.put("plan/a", b"1".to_vec()).unwrap();
        kv.put("queue/x", b"3".to_vec()).unwrap();

        let rows = kv.scan_prefix("plan/").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, "plan/a");
        assert_eq!(rows[1].0, "plan/b");
    }

    #[test]
    fn clones_share_state() {
        let kv = MemoryKv::new();
        let other = kv.clone();
        kv.put("k", b"v".to_vec()).unwrap();
        assert_eq!(other.get("k").unwrap(), Some(b"v".to_vec()));
    }
}
