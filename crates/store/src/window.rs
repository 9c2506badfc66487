//! The per-identifier circular time-bucket window.
//!
//! A window owns `capacity + 1` buckets: `capacity` fully-formed historical
//! groups plus the current, partially-filled one. Bucket group `g` covers
//! unix seconds `[g * granularity, (g + 1) * granularity)` and lives at ring
//! index `g % (capacity + 1)`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use streamwatch_program::Program;
use tracing::error;

use crate::bucket::Bucket;
use crate::persist::{batch_put_json, PersistError, PersistentLog, WindowKeys};

pub struct Window {
    namespace: String,
    id: String,
    granularity: i64,
    capacity: i64,
    include_current: bool,
    /// Count of non-null buckets, maintained under the mutex, read without
    /// it by `check_unused`. A racing reader can only see a stale non-zero.
    live_buckets: AtomicUsize,
    inner: Mutex<WindowInner>,
}

struct WindowInner {
    current_group: i64,
    buckets: Vec<Bucket>,
    persist: Option<WindowPersist>,
}

struct WindowPersist {
    log: Arc<PersistentLog>,
    keys: WindowKeys,
}

impl Window {
    pub(crate) fn new(
        namespace: &str,
        id: &str,
        granularity: i64,
        capacity: i64,
        include_current: bool,
        log: Option<Arc<PersistentLog>>,
    ) -> Self {
        let ring_len = (capacity + 1) as usize;
        let mut current_group = 0;
        let mut buckets = vec![Bucket::default(); ring_len];
        let mut persist = None;

        if let Some(log) = log {
            let candidate = WindowPersist {
                log,
                keys: WindowKeys::new(namespace, id, ring_len),
            };
            match candidate.try_load(ring_len) {
                Ok(Some((group, states))) => {
                    current_group = group;
                    for (bucket, state) in buckets.iter_mut().zip(states) {
                        bucket.load(state);
                    }
                    persist = Some(candidate);
                }
                Ok(None) => persist = candidate.activate(namespace, id),
                Err(e) => {
                    error!(namespace, id, "window load: {e}");
                    persist = candidate.activate(namespace, id);
                }
            }
        }

        let live = buckets.iter().filter(|b| !b.is_null()).count();
        Self {
            namespace: namespace.to_string(),
            id: id.to_string(),
            granularity,
            capacity,
            include_current,
            live_buckets: AtomicUsize::new(live),
            inner: Mutex::new(WindowInner {
                current_group,
                buckets,
                persist,
            }),
        }
    }

    fn ring_len(&self) -> i64 {
        self.capacity + 1
    }

    fn group_of(&self, t: i64) -> i64 {
        t / self.granularity
    }

    fn index_of(&self, group: i64) -> usize {
        (group % self.ring_len()) as usize
    }

    fn first_group(&self, current_group: i64) -> i64 {
        (current_group - self.capacity).max(0)
    }

    /// Fold a metric into the bucket for `t`'s group, advancing time first.
    /// Metrics older than the window retains are dropped silently.
    pub fn push(&self, t: i64, metric: Value, lambda: &Program) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        self.advance(&mut inner, t);

        let group = self.group_of(t);
        if group < self.first_group(inner.current_group) {
            return;
        }

        let index = self.index_of(group);
        let was_null = inner.buckets[index].is_null();
        inner.buckets[index].push(metric, lambda);
        match (was_null, inner.buckets[index].is_null()) {
            (true, false) => {
                self.live_buckets.fetch_add(1, Ordering::Relaxed);
            }
            (false, true) => {
                self.live_buckets.fetch_sub(1, Ordering::Relaxed);
            }
            _ => {}
        }

        if let Some(persist) = &inner.persist {
            let key = &persist.keys.buckets[index];
            if let Err(e) = persist.log.put_json(key, inner.buckets[index].state()) {
                error!(
                    namespace = %self.namespace,
                    id = %self.id,
                    "window push: unable to persist new state: {e}"
                );
            }
        }
    }

    /// Advance the window clock to `t`, clearing buckets that age out.
    pub fn update_time(&self, t: i64) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        self.advance(&mut inner, t);
    }

    /// Caller holds the window mutex.
    fn advance(&self, inner: &mut WindowInner, t: i64) {
        let group = self.group_of(t);
        if group <= inner.current_group {
            return;
        }

        // The floor caps the clear loop at ring_len iterations no matter
        // how far the clock jumps, and covers every slot that re-enters the
        // live range.
        let floor = inner.current_group.max(group - self.ring_len());
        for g in (floor + 1)..=group {
            let index = self.index_of(g);
            if !inner.buckets[index].is_null() {
                inner.buckets[index].clear();
                self.live_buckets.fetch_sub(1, Ordering::Relaxed);
            }
        }
        inner.current_group = group;

        if let Some(persist) = &inner.persist {
            if let Err(e) = Self::persist_advance(persist, floor, group, self.ring_len()) {
                error!(
                    namespace = %self.namespace,
                    id = %self.id,
                    "window advance commit: {e}"
                );
            }
        }
    }

    fn persist_advance(
        persist: &WindowPersist,
        floor: i64,
        group: i64,
        ring_len: i64,
    ) -> Result<(), PersistError> {
        let mut batch = rocksdb::WriteBatch::default();
        for g in (floor + 1)..=group {
            let index = (g % ring_len) as usize;
            batch_put_json(&mut batch, &persist.keys.buckets[index], &Value::Null)?;
        }
        batch_put_json(&mut batch, &persist.keys.current_group, &group)?;
        persist.log.commit(batch)
    }

    /// True iff every bucket is null. Runs without the mutex; a write that
    /// races it can only make the answer a safe false-negative.
    pub fn check_unused(&self) -> bool {
        self.live_buckets.load(Ordering::Relaxed) == 0
    }

    /// Ordered bucket snapshots, oldest to newest: groups
    /// `first_group() .. current_group - 1`, plus the current group iff
    /// `include_current`.
    pub fn get_representation(&self) -> Vec<Value> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut rep = Vec::with_capacity(self.ring_len() as usize);
        for g in self.first_group(inner.current_group)..inner.current_group {
            rep.push(inner.buckets[self.index_of(g)].snapshot());
        }
        if self.include_current {
            rep.push(inner.buckets[self.index_of(inner.current_group)].snapshot());
        }
        rep
    }

    /// Queue this window's keys for deletion as part of a store batch.
    pub(crate) fn append_delete(&self, batch: &mut rocksdb::WriteBatch) {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(persist) = &inner.persist {
            batch.delete(&persist.keys.current_group);
            for key in &persist.keys.buckets {
                batch.delete(key);
            }
        }
    }
}

impl WindowPersist {
    /// Load `(current_group, bucket states)` if every key is present.
    fn try_load(&self, ring_len: usize) -> Result<Option<(i64, Vec<Value>)>, PersistError> {
        let Some(current_group) = self.log.get_json::<i64>(&self.keys.current_group)? else {
            return Ok(None);
        };
        let mut states = Vec::with_capacity(ring_len);
        for key in &self.keys.buckets {
            match self.log.get_json::<Value>(key)? {
                Some(state) => states.push(state),
                None => return Ok(None),
            }
        }
        Ok(Some((current_group, states)))
    }

    /// Initialise this window's keys (group 0, all buckets null) in one
    /// batch. A failed commit downgrades the window to memory-only.
    fn activate(self, namespace: &str, id: &str) -> Option<Self> {
        let commit = (|| {
            let mut batch = rocksdb::WriteBatch::default();
            batch_put_json(&mut batch, &self.keys.current_group, &0i64)?;
            for key in &self.keys.buckets {
                batch_put_json(&mut batch, key, &Value::Null)?;
            }
            self.log.commit(batch)
        })();
        match commit {
            Ok(()) => Some(self),
            Err(e) => {
                error!(namespace, id, "window activate commit failed (using only memory): {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use streamwatch_program::ProgramKind;

    fn sum_lambda() -> Program {
        Program::compile("($state // 0) + $metric", ProgramKind::Lambda).unwrap()
    }

    fn window(capacity: i64, granularity: i64, include_current: bool) -> Window {
        Window::new("ns", "id", granularity, capacity, include_current, None)
    }

    #[test]
    fn snapshot_after_three_pushes_and_one_group_advance() {
        let lambda = sum_lambda();
        let w = window(3, 10, false);
        w.push(0, json!(1), &lambda);
        w.push(10, json!(1), &lambda);
        w.push(20, json!(1), &lambda);
        w.update_time(30);
        assert_eq!(w.get_representation(), vec![json!(1), json!(1), json!(1)]);
    }

    #[test]
    fn oldest_bucket_ages_out_one_group_later() {
        let lambda = sum_lambda();
        let w = window(3, 10, false);
        w.push(0, json!(1), &lambda);
        w.push(10, json!(1), &lambda);
        w.push(20, json!(1), &lambda);
        w.update_time(40);
        // current_group = 4, retained groups 1..=3; group 0's value fell
        // off when group 4 reused its slot.
        assert_eq!(
            w.get_representation(),
            vec![json!(1), json!(1), Value::Null]
        );
    }

    #[test]
    fn include_current_appends_the_open_bucket() {
        let lambda = sum_lambda();
        let w = window(3, 10, true);
        w.push(0, json!(1), &lambda);
        w.push(10, json!(1), &lambda);
        w.push(20, json!(1), &lambda);
        w.push(35, json!(5), &lambda);
        assert_eq!(
            w.get_representation(),
            vec![json!(1), json!(1), json!(1), json!(5)]
        );
    }

    #[test]
    fn old_push_is_dropped() {
        let lambda = sum_lambda();
        let w = window(2, 10, true);
        w.push(0, json!(1), &lambda);
        w.update_time(50);
        let before = w.get_representation();
        // Group 0 is far below first_group() = 3 by now.
        w.push(5, json!(100), &lambda);
        assert_eq!(w.get_representation(), before);
    }

    #[test]
    fn update_time_is_idempotent() {
        let lambda = sum_lambda();
        let w = window(3, 10, false);
        w.push(0, json!(1), &lambda);
        w.push(10, json!(2), &lambda);
        w.update_time(45);
        let first = w.get_representation();
        w.update_time(45);
        assert_eq!(w.get_representation(), first);
    }

    #[test]
    fn far_jump_clears_everything() {
        let lambda = sum_lambda();
        let w = window(3, 10, false);
        w.push(0, json!(1), &lambda);
        w.push(10, json!(1), &lambda);
        w.push(30, json!(1), &lambda);
        assert!(!w.check_unused());
        w.update_time(10_000);
        assert!(w.check_unused());
        assert_eq!(
            w.get_representation(),
            vec![Value::Null, Value::Null, Value::Null]
        );
    }

    #[test]
    fn unused_window_becomes_active_again_on_push() {
        let lambda = sum_lambda();
        let w = window(2, 10, false);
        w.push(0, json!(1), &lambda);
        w.update_time(1_000);
        assert!(w.check_unused());
        w.push(1_000, json!(7), &lambda);
        assert!(!w.check_unused());
    }

    #[test]
    fn nulling_lambda_marks_bucket_unused() {
        let null_lambda = Program::compile("null", ProgramKind::Lambda).unwrap();
        let sum = sum_lambda();
        let w = window(2, 10, false);
        w.push(0, json!(1), &sum);
        assert!(!w.check_unused());
        w.push(0, json!(1), &null_lambda);
        assert!(w.check_unused());
    }

    #[test]
    fn snapshot_counts_match_include_current() {
        let lambda = sum_lambda();
        let excl = window(3, 10, false);
        let incl = window(3, 10, true);
        for w in [&excl, &incl] {
            w.push(100, json!(1), &lambda);
            w.update_time(200);
        }
        assert_eq!(excl.get_representation().len(), 3);
        assert_eq!(incl.get_representation().len(), 4);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Push(i64, i64),
            UpdateTime(i64),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0i64..2_000, 1i64..100).prop_map(|(t, v)| Op::Push(t, v)),
                (0i64..2_000).prop_map(Op::UpdateTime),
            ]
        }

        proptest! {
            #[test]
            fn snapshot_length_is_bounded_by_geometry(
                ops in proptest::collection::vec(op(), 0..40),
                capacity in 1i64..6,
                include_current in proptest::bool::ANY,
            ) {
                let lambda = sum_lambda();
                let w = Window::new("ns", "id", 10, capacity, include_current, None);
                for operation in ops {
                    match operation {
                        Op::Push(t, v) => w.push(t, json!(v), &lambda),
                        Op::UpdateTime(t) => w.update_time(t),
                    }
                }
                let rep = w.get_representation();
                let max = if include_current { capacity + 1 } else { capacity };
                prop_assert!(rep.len() as i64 <= max);
            }

            #[test]
            fn old_pushes_never_change_the_snapshot(
                t_old in 0i64..100,
                t_now in 5_000i64..6_000,
                v in 1i64..100,
            ) {
                let lambda = sum_lambda();
                let w = Window::new("ns", "id", 10, 3, true, None);
                w.update_time(t_now);
                let before = w.get_representation();
                w.push(t_old, json!(v), &lambda);
                prop_assert_eq!(w.get_representation(), before);
            }

            #[test]
            fn update_time_twice_equals_once(
                pushes in proptest::collection::vec((0i64..500, 1i64..50), 0..20),
                t in 0i64..2_000,
            ) {
                let lambda = sum_lambda();
                let a = Window::new("ns", "id", 10, 4, true, None);
                let b = Window::new("ns", "id", 10, 4, true, None);
                for (pt, v) in &pushes {
                    a.push(*pt, json!(*v), &lambda);
                    b.push(*pt, json!(*v), &lambda);
                }
                a.update_time(t);
                b.update_time(t);
                b.update_time(t);
                prop_assert_eq!(a.get_representation(), b.get_representation());
            }

            #[test]
            fn far_advance_leaves_no_live_bucket(
                pushes in proptest::collection::vec((0i64..500, 1i64..50), 1..20),
                capacity in 1i64..6,
            ) {
                let lambda = sum_lambda();
                let w = Window::new("ns", "id", 10, capacity, false, None);
                for (t, v) in pushes {
                    w.push(t, json!(v), &lambda);
                }
                // Jump at least capacity groups past everything pushed.
                w.update_time(500 + (capacity + 1) * 10);
                prop_assert!(w.check_unused());
            }
        }
    }
}
