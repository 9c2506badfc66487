//! The shared persistent key-value log.
//!
//! One RocksDB database holds every persistent namespace, keyed by a flat
//! path-like layout (all values JSON-encoded):
//!
//! ```text
//! <namespace>/granularity                → int
//! <namespace>/cardinality                → int
//! <namespace>/len_windows                → int
//! <namespace>/current_time               → int (unix seconds)
//! <namespace>/window/<idx>               → string (window id)
//! <namespace>/<id>/current_bucket_group  → int
//! <namespace>/<id>/<bucket_index>        → state or null
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("RocksDB error: {0}")]
    Rocks(#[from] rocksdb::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ── Log handle ───────────────────────────────────────────────────────

/// An open key-value log.
pub struct PersistentLog {
    db: rocksdb::DB,
}

impl PersistentLog {
    pub fn open(path: &Path) -> Result<Self, PersistError> {
        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(true);
        let db = rocksdb::DB::open(&opts, path)?;
        Ok(Self { db })
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>, PersistError> {
        match self.db.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_json<T: Serialize>(&self, key: &[u8], value: &T) -> Result<(), PersistError> {
        self.db.put(key, serde_json::to_vec(value)?)?;
        Ok(())
    }

    /// Apply a batch atomically.
    pub fn commit(&self, batch: rocksdb::WriteBatch) -> Result<(), PersistError> {
        self.db.write(batch)?;
        Ok(())
    }
}

/// JSON-encode a value into a batch put.
pub fn batch_put_json<T: Serialize>(
    batch: &mut rocksdb::WriteBatch,
    key: &[u8],
    value: &T,
) -> Result<(), PersistError> {
    batch.put(key, serde_json::to_vec(value)?);
    Ok(())
}

// ── Lazily-opened shared handle ──────────────────────────────────────

/// The process-wide log, opened on first use.
///
/// The composition root owns one of these and threads it into every
/// persistent store; nothing else reaches for the database directly.
pub struct SharedLog {
    path: PathBuf,
    handle: Mutex<Option<Arc<PersistentLog>>>,
}

impl SharedLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            handle: Mutex::new(None),
        }
    }

    /// Open the log, or reuse the already-open handle.
    pub fn open(&self) -> Result<Arc<PersistentLog>, PersistError> {
        let mut guard = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(log) = guard.as_ref() {
            return Ok(log.clone());
        }
        let log = Arc::new(PersistentLog::open(&self.path)?);
        *guard = Some(log.clone());
        Ok(log)
    }
}

// ── Key layout ───────────────────────────────────────────────────────

/// Store-level keys for one namespace.
pub(crate) struct NamespaceKeys {
    namespace: String,
}

impl NamespaceKeys {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
        }
    }

    pub fn granularity(&self) -> Vec<u8> {
        format!("{}/granularity", self.namespace).into_bytes()
    }

    pub fn cardinality(&self) -> Vec<u8> {
        format!("{}/cardinality", self.namespace).into_bytes()
    }

    pub fn len_windows(&self) -> Vec<u8> {
        format!("{}/len_windows", self.namespace).into_bytes()
    }

    pub fn current_time(&self) -> Vec<u8> {
        format!("{}/current_time", self.namespace).into_bytes()
    }

    pub fn window_idx(&self, idx: usize) -> Vec<u8> {
        format!("{}/window/{}", self.namespace, idx).into_bytes()
    }
}

/// Window-level keys, precomputed once per window.
pub(crate) struct WindowKeys {
    pub current_group: Vec<u8>,
    pub buckets: Vec<Vec<u8>>,
}

impl WindowKeys {
    pub fn new(namespace: &str, id: &str, ring_len: usize) -> Self {
        Self {
            current_group: format!("{namespace}/{id}/current_bucket_group").into_bytes(),
            buckets: (0..ring_len)
                .map(|i| format!("{namespace}/{id}/{i}").into_bytes())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let log = PersistentLog::open(dir.path()).unwrap();
        log.put_json(b"ns/granularity", &10i64).unwrap();
        assert_eq!(log.get_json::<i64>(b"ns/granularity").unwrap(), Some(10));
        assert_eq!(log.get_json::<i64>(b"ns/missing").unwrap(), None);
    }

    #[test]
    fn shared_log_opens_once() {
        let dir = tempfile::tempdir().unwrap();
        let shared = SharedLog::new(dir.path());
        let a = shared.open().unwrap();
        let b = shared.open().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn batch_is_atomic_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let log = PersistentLog::open(dir.path()).unwrap();
        let mut batch = rocksdb::WriteBatch::default();
        batch_put_json(&mut batch, b"k", &1i64).unwrap();
        // A later delete of the same key wins within the batch.
        batch.delete(b"k");
        batch_put_json(&mut batch, b"other", &2i64).unwrap();
        log.commit(batch).unwrap();
        assert_eq!(log.get_json::<i64>(b"k").unwrap(), None);
        assert_eq!(log.get_json::<i64>(b"other").unwrap(), Some(2));
    }

    #[test]
    fn key_layout() {
        let keys = NamespaceKeys::new("acme/latency");
        assert_eq!(keys.len_windows(), b"acme/latency/len_windows".to_vec());
        assert_eq!(keys.window_idx(3), b"acme/latency/window/3".to_vec());

        let wkeys = WindowKeys::new("acme/latency", "gw-1", 4);
        assert_eq!(
            wkeys.current_group,
            b"acme/latency/gw-1/current_bucket_group".to_vec()
        );
        assert_eq!(wkeys.buckets.len(), 4);
        assert_eq!(wkeys.buckets[2], b"acme/latency/gw-1/2".to_vec());
    }
}
