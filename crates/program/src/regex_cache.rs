//! Concurrent cache of compiled regex matchers, shared by every expression
//! program in the process.

use std::sync::{Arc, PoisonError, RwLock};

use indexmap::IndexMap;
use regex::Regex;
use thiserror::Error;

/// Soft capacity of the cache. The default capacity rule never shrinks
/// below the current size, so this is a floor, not a hard bound.
const SOFT_CAPACITY: usize = 10_000;

/// Given the current capacity and the current length, returns the number of
/// entries the cache may hold. Entries beyond it are evicted oldest-first.
pub type CapacityRule = fn(capacity: usize, len: usize) -> usize;

fn keep_current_size(capacity: usize, len: usize) -> usize {
    capacity.max(len)
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid regular expression {pattern:?}: {reason}")]
pub struct RegexCompile {
    pub pattern: String,
    pub reason: String,
}

struct CacheInner {
    capacity: usize,
    map: IndexMap<String, Arc<Regex>>,
}

/// Insertion-ordered pattern → matcher cache.
///
/// Reads share the read lock; a miss upgrades to the write lock and
/// re-checks the slot before compiling, so a pattern is compiled at most
/// once no matter how many programs race on it.
pub struct RegexCache {
    rule: CapacityRule,
    inner: RwLock<CacheInner>,
}

impl Default for RegexCache {
    fn default() -> Self {
        Self::new(SOFT_CAPACITY, keep_current_size)
    }
}

impl RegexCache {
    pub fn new(capacity: usize, rule: CapacityRule) -> Self {
        Self {
            rule,
            inner: RwLock::new(CacheInner {
                capacity,
                map: IndexMap::new(),
            }),
        }
    }

    /// Look up a compiled matcher, compiling and inserting on a miss.
    pub fn get(&self, pattern: &str) -> Result<Arc<Regex>, RegexCompile> {
        {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(re) = inner.map.get(pattern) {
                return Ok(re.clone());
            }
        }

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(re) = inner.map.get(pattern) {
            return Ok(re.clone());
        }

        let compiled = Arc::new(compile_pattern(pattern)?);
        inner.map.insert(pattern.to_string(), compiled.clone());

        let allowed = (self.rule)(inner.capacity, inner.map.len());
        inner.capacity = allowed;
        while inner.map.len() > allowed {
            inner.map.shift_remove_index(0);
        }

        Ok(compiled)
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .map
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Accept both named-capture dialects: `(?<name>…)` is rewritten to the
/// `(?P<name>…)` form before compilation.
fn compile_pattern(pattern: &str) -> Result<Regex, RegexCompile> {
    let rewritten = pattern.replace("(?<", "(?P<");
    Regex::new(&rewritten).map_err(|e| RegexCompile {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}
