//! One cell of aggregated state for a contiguous time interval.

use serde_json::Value;
use streamwatch_program::{Output, Program};
use tracing::{error, warn};

/// A bucket's state is opaque JSON; `null` means unused.
#[derive(Debug, Clone, Default)]
pub struct Bucket {
    state: Value,
}

impl Bucket {
    /// Fold a metric into the state through the lambda.
    ///
    /// The lambda sees `$state` and `$metric`; its first yielded value
    /// becomes the new state. An error value or an empty stream leaves the
    /// state untouched.
    pub fn push(&mut self, metric: Value, lambda: &Program) {
        match lambda.first(Value::Null, vec![self.state.clone(), metric]) {
            Some(Output::Value(state)) => self.state = state,
            Some(Output::Error(e)) => error!("bucket push: {e}"),
            None => warn!("bucket push: lambda did not return new state"),
        }
    }

    /// A copy safe to hand downstream: `Value` clones structurally, so the
    /// caller can mutate or serialise it without aliasing the bucket.
    pub fn snapshot(&self) -> Value {
        self.state.clone()
    }

    pub fn clear(&mut self) {
        self.state = Value::Null;
    }

    pub fn is_null(&self) -> bool {
        self.state.is_null()
    }

    pub(crate) fn state(&self) -> &Value {
        &self.state
    }

    pub(crate) fn load(&mut self, state: Value) {
        self.state = state;
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

    #[test]
    fn push_folds_from_null() {
        let lambda = sum_lambda();
        let mut bucket = Bucket::default();
        assert!(bucket.is_null());

        bucket.push(json!(3), &lambda);
        assert_eq!(bucket.snapshot(), json!(3));

        bucket.push(json!(4), &lambda);
        assert_eq!(bucket.snapshot(), json!(7));
        assert!(!bucket.is_null());
    }

    #[test]
    fn lambda_error_keeps_state() {
        let lambda = Program::compile("error(\"nope\")", ProgramKind::Lambda).unwrap();
        let mut bucket = Bucket::default();
        bucket.load(json!(9));
        bucket.push(json!(1), &lambda);
        assert_eq!(bucket.snapshot(), json!(9));
    }

    #[test]
    fn empty_lambda_output_keeps_state() {
        let lambda = Program::compile("empty", ProgramKind::Lambda).unwrap();
        let mut bucket = Bucket::default();
        bucket.load(json!(9));
        bucket.push(json!(1), &lambda);
        assert_eq!(bucket.snapshot(), json!(9));
    }

    #[test]
    fn lambda_may_null_the_state() {
        let lambda = Program::compile("null", ProgramKind::Lambda).unwrap();
        let mut bucket = Bucket::default();
        bucket.load(json!(9));
        bucket.push(json!(1), &lambda);
        assert!(bucket.is_null());
    }

    #[test]
    fn snapshot_does_not_alias() {
        let mut bucket = Bucket::default();
        bucket.load(json!({"n": 1}));
        let mut snap = bucket.snapshot();
        snap["n"] = json!(99);
        assert_eq!(bucket.snapshot(), json!({"n": 1}));
    }

    #[test]
    fn clear_nulls_the_state() {
        let mut bucket = Bucket::default();
        bucket.load(json!(1));
        bucket.clear();
        assert!(bucket.is_null());
    }
}
