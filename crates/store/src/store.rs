//! The per-namespace store: identifier → window, with create-on-first-push,
//! periodic tick, and unused-window eviction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{Map, Value};
use streamwatch_program::Program;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::persist::{batch_put_json, NamespaceKeys, PersistError, PersistentLog, SharedLog};
use crate::window::Window;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid store config for {namespace}: {reason}")]
    InvalidConfig { namespace: String, reason: String },

    #[error("persistent log: {0}")]
    Persist(#[from] PersistError),
}

pub struct Store {
    namespace: String,
    granularity: i64,
    cardinality: i64,
    include_current: bool,
    current_time: AtomicI64,
    state: RwLock<StoreState>,
    persist: Option<StorePersist>,
}

#[derive(Default)]
struct StoreState {
    windows: HashMap<String, Arc<Window>>,
    /// id → idx and idx → id, kept dense over `[0, len)` so windows can be
    /// enumerated on reload.
    windows_idx: HashMap<String, usize>,
    idx_windows: HashMap<usize, String>,
}

struct StorePersist {
    log: Arc<PersistentLog>,
    keys: NamespaceKeys,
}

impl Store {
    /// A purely in-memory store.
    pub fn memory(
        namespace: &str,
        granularity: i64,
        cardinality: i64,
        include_current: bool,
    ) -> Result<Self, StoreError> {
        validate(namespace, granularity, cardinality)?;
        Ok(Self {
            namespace: namespace.to_string(),
            granularity,
            cardinality,
            include_current,
            current_time: AtomicI64::new(0),
            state: RwLock::new(StoreState::default()),
            persist: None,
        })
    }

    /// A store mirrored into the shared persistent log.
    ///
    /// Reloads the namespace from the log when the persisted geometry
    /// matches the configured one; otherwise reinitialises the namespace's
    /// keys. A failed reinitialisation commit downgrades the store to pure
    /// in-memory.
    pub fn cached_persistent(
        namespace: &str,
        granularity: i64,
        cardinality: i64,
        include_current: bool,
        shared: &SharedLog,
    ) -> Result<Self, StoreError> {
        validate(namespace, granularity, cardinality)?;
        let log = shared.open()?;
        let mut store = Self {
            namespace: namespace.to_string(),
            granularity,
            cardinality,
            include_current,
            current_time: AtomicI64::new(0),
            state: RwLock::new(StoreState::default()),
            persist: Some(StorePersist {
                log,
                keys: NamespaceKeys::new(namespace),
            }),
        };
        match store.try_load() {
            Ok(true) => {}
            Ok(false) => store.activate_fresh(),
            Err(e) => {
                error!(namespace, "store reload: {e}");
                store.activate_fresh();
            }
        }
        Ok(store)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Fold a metric into `id`'s window, creating the window on first push.
    pub fn push(&self, id: &str, t: i64, metric: Value, lambda: &Program) {
        {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(window) = state.windows.get(id) {
                window.push(t, metric, lambda);
                return;
            }
        }

        // Window creation, including its persistence registration, commits
        // under the write lock; readers see the index entry and the window
        // together.
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if !state.windows.contains_key(id) {
                if let Some(persist) = &self.persist {
                    let idx = state.windows.len();
                    if let Err(e) = self.register_window(persist, idx, id) {
                        error!(namespace = %self.namespace, id, "window registration commit: {e}");
                    }
                    state.windows_idx.insert(id.to_string(), idx);
                    state.idx_windows.insert(idx, id.to_string());
                }
                let window = Arc::new(Window::new(
                    &self.namespace,
                    id,
                    self.granularity,
                    self.cardinality,
                    self.include_current,
                    self.persist.as_ref().map(|p| p.log.clone()),
                ));
                state.windows.insert(id.to_string(), window);
            }
        }

        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(window) = state.windows.get(id) {
            window.push(t, metric, lambda);
        }
    }

    fn register_window(
        &self,
        persist: &StorePersist,
        idx: usize,
        id: &str,
    ) -> Result<(), PersistError> {
        let mut batch = rocksdb::WriteBatch::default();
        batch_put_json(&mut batch, &persist.keys.len_windows(), &(idx + 1))?;
        batch_put_json(&mut batch, &persist.keys.window_idx(idx), &id)?;
        persist.log.commit(batch)
    }

    /// Advance every window to `t` (when `t` moves the store clock forward),
    /// then sweep unused windows.
    pub fn tick(&self, t: i64) {
        {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if self.current_time.load(Ordering::Relaxed) < t {
                for window in state.windows.values() {
                    window.update_time(t);
                }
                self.current_time.store(t, Ordering::Relaxed);
                if let Some(persist) = &self.persist {
                    if let Err(e) = persist.log.put_json(&persist.keys.current_time(), &t) {
                        error!(namespace = %self.namespace, "tick persist current_time: {e}");
                    }
                }
            }
        }

        self.check_and_remove_unused_windows();
    }

    /// Snapshot of every window plus the store clock.
    pub fn get_representation(&self) -> (Map<String, Value>, i64) {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut rep = Map::new();
        for (id, window) in &state.windows {
            rep.insert(id.clone(), Value::Array(window.get_representation()));
        }
        (rep, self.current_time.load(Ordering::Relaxed))
    }

    fn check_and_remove_unused_windows(&self) {
        let candidates: Vec<String> = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            state
                .windows
                .iter()
                .filter(|(_, window)| window.check_unused())
                .map(|(id, _)| id.clone())
                .collect()
        };
        if candidates.is_empty() {
            return;
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut batch = rocksdb::WriteBatch::default();
        for id in candidates {
            let Some(window) = state.windows.get(&id).cloned() else {
                continue;
            };
            // Re-check under the write lock: a racing push may have revived
            // the window.
            if !window.check_unused() {
                continue;
            }

            if let Some(persist) = &self.persist {
                if let Err(e) = Self::compact_index(persist, &mut state, &id, &mut batch) {
                    error!(namespace = %self.namespace, id, "eviction batch: {e}");
                }
                window.append_delete(&mut batch);
            }
            state.windows.remove(&id);
            debug!(namespace = %self.namespace, id, "evicted unused window");
        }

        if let Some(persist) = &self.persist {
            if let Err(e) = persist.log.commit(batch) {
                error!(namespace = %self.namespace, "eviction commit: {e}");
            }
        }
    }

    /// Swap-with-last removal keeping the idx range dense over `[0, len)`.
    fn compact_index(
        persist: &StorePersist,
        state: &mut StoreState,
        id: &str,
        batch: &mut rocksdb::WriteBatch,
    ) -> Result<(), PersistError> {
        let len = state.windows.len();
        let last_idx = len - 1;
        let (Some(&del_idx), Some(last_id)) = (
            state.windows_idx.get(id),
            state.idx_windows.get(&last_idx).cloned(),
        ) else {
            return Ok(());
        };

        batch_put_json(batch, &persist.keys.window_idx(del_idx), &last_id)?;
        batch.delete(persist.keys.window_idx(last_idx));
        batch_put_json(batch, &persist.keys.len_windows(), &(len - 1))?;

        state.idx_windows.insert(del_idx, last_id.clone());
        state.windows_idx.insert(last_id, del_idx);
        state.idx_windows.remove(&last_idx);
        state.windows_idx.remove(id);
        Ok(())
    }

    // ── Reload / activation ──────────────────────────────────────────

    /// Reload this namespace from the log. Only proceeds when the persisted
    /// granularity and cardinality match the configured ones.
    fn try_load(&self) -> Result<bool, PersistError> {
        let Some(persist) = &self.persist else {
            return Ok(false);
        };

        let granularity = persist.log.get_json::<i64>(&persist.keys.granularity())?;
        let cardinality = persist.log.get_json::<i64>(&persist.keys.cardinality())?;
        let (Some(granularity), Some(cardinality)) = (granularity, cardinality) else {
            debug!(namespace = %self.namespace, "namespace not persisted yet");
            return Ok(false);
        };
        if granularity != self.granularity || cardinality != self.cardinality {
            error!(
                namespace = %self.namespace,
                "persisted geometry {{granularity:{granularity}, cardinality:{cardinality}}} \
                 does not match config {{granularity:{}, cardinality:{}}}",
                self.granularity, self.cardinality
            );
            return Ok(false);
        }

        let Some(current_time) = persist.log.get_json::<i64>(&persist.keys.current_time())?
        else {
            return Ok(false);
        };
        let Some(len) = persist.log.get_json::<usize>(&persist.keys.len_windows())? else {
            return Ok(false);
        };

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        for idx in 0..len {
            let id = match persist.log.get_json::<String>(&persist.keys.window_idx(idx)) {
                Ok(Some(id)) => id,
                Ok(None) | Err(_) => {
                    error!(namespace = %self.namespace, idx, "window index missing on reload");
                    *state = StoreState::default();
                    return Ok(false);
                }
            };
            let window = Arc::new(Window::new(
                &self.namespace,
                &id,
                self.granularity,
                self.cardinality,
                self.include_current,
                Some(persist.log.clone()),
            ));
            state.windows_idx.insert(id.clone(), idx);
            state.idx_windows.insert(idx, id.clone());
            state.windows.insert(id, window);
        }
        drop(state);

        self.current_time.store(current_time, Ordering::Relaxed);
        info!(
            namespace = %self.namespace,
            windows = len,
            current_time,
            "reloaded namespace from persistent log"
        );
        Ok(true)
    }

    /// Persist a fresh namespace record. A failed commit nulls the
    /// persistence handle and the store continues purely in memory.
    fn activate_fresh(&mut self) {
        let Some(persist) = &self.persist else {
            return;
        };
        info!(namespace = %self.namespace, "persisting fresh namespace");
        let commit = (|| {
            let mut batch = rocksdb::WriteBatch::default();
            batch_put_json(&mut batch, &persist.keys.granularity(), &self.granularity)?;
            batch_put_json(&mut batch, &persist.keys.cardinality(), &self.cardinality)?;
            batch_put_json(&mut batch, &persist.keys.len_windows(), &0usize)?;
            batch_put_json(&mut batch, &persist.keys.current_time(), &0i64)?;
            persist.log.commit(batch)
        })();
        if let Err(e) = commit {
            error!(
                namespace = %self.namespace,
                "activate commit failed (using only memory): {e}"
            );
            self.persist = None;
        }
    }

    #[cfg(test)]
    fn index_is_dense(&self) -> bool {
        let state = self.state.read().unwrap();
        let len = state.windows.len();
        state.windows_idx.len() == len
            && state.idx_windows.len() == len
            && (0..len).all(|idx| {
                state
                    .idx_windows
                    .get(&idx)
                    .and_then(|id| state.windows_idx.get(id))
                    == Some(&idx)
            })
    }
}

fn validate(namespace: &str, granularity: i64, cardinality: i64) -> Result<(), StoreError> {
    let reason = if namespace.is_empty() {
        Some("namespace name is empty")
    } else if granularity < 1 {
        Some("granularity must be >= 1")
    } else if cardinality < 1 {
        Some("cardinality must be >= 1")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(StoreError::InvalidConfig {
            namespace: namespace.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}
