//! Two-level message dispatch: a group program names the group, then each
//! of the group's leaf filters may extract one metric.
//!
//! "Not for me" is an error value in the program's output stream
//! (`filter_error(...)` in the programs); it costs a trace line, nothing
//! more.

use std::collections::HashMap;

use serde_json::Value;
use streamwatch_core::Metric;
use streamwatch_program::{Output, Program};
use tracing::{error, trace};

pub struct FilterTree {
    group_program: Program,
    groups: HashMap<String, Vec<Program>>,
}

impl FilterTree {
    pub fn new(group_program: Program) -> Self {
        Self {
            group_program,
            groups: HashMap::new(),
        }
    }

    /// Register a namespace's leaf filter under its group.
    pub fn add_leaf(&mut self, group: &str, leaf: Program) {
        self.groups.entry(group.to_string()).or_default().push(leaf);
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }

    /// Run one raw message through the tree, yielding zero or more metrics.
    pub fn filter(&self, payload: &[u8]) -> Vec<Metric> {
        let mut metrics = Vec::new();

        let msg: Value = match serde_json::from_slice(payload) {
            Ok(msg) => msg,
            Err(e) => {
                error!("filter unmarshal msg: {e}");
                return metrics;
            }
        };

        let group = match self.group_program.first(msg.clone(), Vec::new()) {
            None => return metrics,
            Some(Output::Error(e)) => {
                trace!("group filter: {e}");
                return metrics;
            }
            Some(Output::Value(Value::String(group))) => group,
            Some(Output::Value(other)) => {
                error!("group filter did not return a string: {other}");
                return metrics;
            }
        };

        let Some(leaves) = self.groups.get(&group) else {
            error!("group does not exist: {group}");
            return metrics;
        };

        for leaf in leaves {
            match leaf.first(msg.clone(), Vec::new()) {
                None => continue,
                Some(Output::Error(e)) => trace!("filter: {e}"),
                Some(Output::Value(value)) => match Metric::from_value(value) {
                    Ok(metric) => metrics.push(metric),
                    Err(e) => error!("filter output: {e}"),
                },
            }
        }

        metrics
    }
}
