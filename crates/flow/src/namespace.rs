//! A namespace: immutable configuration bound to a store and its two
//! programs.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use streamwatch_core::{config::StoreKind, time::parse_rfc3339_unix, Metric, NamespaceConfig};
use streamwatch_program::{Output, Program};
use streamwatch_store::{SharedLog, Store, StoreError};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum NamespaceError {
    #[error(transparent)]
    Config(#[from] streamwatch_core::ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct Namespace {
    config: NamespaceConfig,
    store: Store,
    lambda: Program,
    monitor: Program,
}

impl Namespace {
    /// Validate the config and create the backing store.
    pub fn new(
        config: NamespaceConfig,
        lambda: Program,
        monitor: Program,
        shared_log: &SharedLog,
    ) -> Result<Self, NamespaceError> {
        config.validate()?;
        let store = match config.store_type {
            StoreKind::Memory => Store::memory(
                &config.namespace,
                config.granularity,
                config.cardinality,
                config.current,
            )?,
            StoreKind::CachedPersistent => Store::cached_persistent(
                &config.namespace,
                config.granularity,
                config.cardinality,
                config.current,
                shared_log,
            )?,
        };
        Ok(Self {
            config,
            store,
            lambda,
            monitor,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.namespace
    }

    pub fn group(&self) -> &str {
        &self.config.group
    }

    /// Fold one metric into the store. Metrics addressed to some other
    /// namespace or carrying an unparseable timestamp are dropped.
    pub fn push(&self, metric: &Metric) {
        if metric.namespace != self.config.namespace {
            return;
        }
        let t = match parse_rfc3339_unix(&metric.time) {
            Ok(t) => t,
            Err(e) => {
                warn!(namespace = %self.config.namespace, "push: {e}");
                return;
            }
        };
        self.store
            .push(&metric.id, t, metric.value.clone(), &self.lambda);
    }

    pub fn tick(&self, t: DateTime<Utc>) {
        self.store.tick(t.timestamp());
    }

    /// The cadence at which this namespace's monitor fires.
    pub fn interval(&self) -> Duration {
        Duration::from_secs((self.config.granularity * self.config.snapshot) as u64)
    }

    /// The full snapshot handed to the monitor program.
    pub fn monitor_input(&self) -> Value {
        let (windows, current_time) = self.store.get_representation();
        json!({
            "namespace": self.config.namespace,
            "granularity": self.config.granularity,
            "cardinality": self.config.cardinality,
            "snapshot": self.config.snapshot,
            "current": self.config.current,
            "windows": windows,
            "time": current_time,
        })
    }

    /// Run the monitor against the current snapshot, draining its stream.
    pub fn run_monitor(&self) -> Vec<Output> {
        self.monitor.collect(self.monitor_input(), Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use streamwatch_program::ProgramKind;

    fn config(store_type: StoreKind) -> NamespaceConfig {
        NamespaceConfig {
            group: "edge".to_string(),
            namespace: "edge/errors".to_string(),
            granularity: 10,
            cardinality: 3,
            snapshot: 6,
            current: false,
            store_type,
        }
    }

    fn namespace() -> (Namespace, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let shared = SharedLog::new(dir.path());
        let lambda =
            Program::compile("($state // 0) + $metric", ProgramKind::Lambda).unwrap();
        let monitor = Program::compile(".", ProgramKind::Monitor).unwrap();
        (
            Namespace::new(config(StoreKind::Memory), lambda, monitor, &shared).unwrap(),
            dir,
        )
    }

    fn metric(namespace: &str, id: &str, time: &str, value: Value) -> Metric {
        Metric {
            namespace: namespace.to_string(),
            id: id.to_string(),
            time: time.to_string(),
            value,
        }
    }

    #[test]
    fn interval_is_granularity_times_snapshot() {
        let (ns, _dir) = namespace();
        assert_eq!(ns.interval(), Duration::from_secs(60));
    }

    #[test]
    fn push_parses_rfc3339_into_buckets() {
        let (ns, _dir) = namespace();
        ns.push(&metric(
            "edge/errors",
            "gw",
            "1970-01-01T00:00:05Z",
            json!(2),
        ));
        ns.push(&metric(
            "edge/errors",
            "gw",
            "1970-01-01T00:00:25Z",
            json!(3),
        ));

        let input = ns.monitor_input();
        assert_eq!(input["namespace"], json!("edge/errors"));
        assert_eq!(input["windows"]["gw"], json!([2, null]));
    }

    #[test]
    fn push_ignores_other_namespaces() {
        let (ns, _dir) = namespace();
        ns.push(&metric("other", "gw", "1970-01-01T00:00:05Z", json!(2)));
        assert_eq!(ns.monitor_input()["windows"], json!({}));
    }

    #[test]
    fn push_drops_bad_timestamps() {
        let (ns, _dir) = namespace();
        ns.push(&metric("edge/errors", "gw", "not a time", json!(2)));
        assert_eq!(ns.monitor_input()["windows"], json!({}));
    }

    #[test]
    fn tick_sets_snapshot_time() {
        let (ns, _dir) = namespace();
        ns.tick(DateTime::<Utc>::from_timestamp(40, 0).unwrap());
        assert_eq!(ns.monitor_input()["time"], json!(40));
    }

    #[test]
    fn monitor_sees_the_full_snapshot_shape() {
        let (ns, _dir) = namespace();
        ns.push(&metric(
            "edge/errors",
            "gw",
            "1970-01-01T00:00:05Z",
            json!(1),
        ));
        let outputs = ns.run_monitor();
        assert_eq!(outputs.len(), 1);
        match &outputs[0] {
            Output::Value(v) => {
                assert_eq!(v["granularity"], json!(10));
                assert_eq!(v["cardinality"], json!(3));
                assert_eq!(v["snapshot"], json!(6));
                assert_eq!(v["current"], json!(false));
                assert!(v["windows"].is_object());
            }
            other => panic!("expected value, got {other:?}"),
        }
    }

    #[test]
    fn rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let shared = SharedLog::new(dir.path());
        let lambda = Program::compile("$metric", ProgramKind::Lambda).unwrap();
        let monitor = Program::compile(".", ProgramKind::Monitor).unwrap();
        let mut bad = config(StoreKind::Memory);
        bad.granularity = 0;
        assert!(Namespace::new(bad, lambda, monitor, &shared).is_err());
    }
}
