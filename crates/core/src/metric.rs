//! The metric record produced by the filter tree.

use serde_json::Value;
use thiserror::Error;

/// One extracted metric event, ready to be folded into a window.
///
/// `time` stays a string here; it is parsed as RFC3339 at the push site so
/// a malformed timestamp only costs the one event.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub namespace: String,
    pub id: String,
    pub time: String,
    pub value: Value,
}

#[derive(Error, Debug)]
pub enum MetricError {
    #[error("filter did not return an object: {0}")]
    NotAnObject(Value),

    #[error("missing field from filter output - status: namespace({namespace}) id({id}) time({time}) metric({metric})")]
    MissingFields {
        namespace: bool,
        id: bool,
        time: bool,
        metric: bool,
    },
}

impl Metric {
    /// Coerce a filter-program output into a metric record.
    ///
    /// Requires a JSON object with string `namespace`, `id`, `time` fields
    /// and any `metric` value.
    pub fn from_value(value: Value) -> Result<Self, MetricError> {
        let mut map = match value {
            Value::Object(map) => map,
            other => return Err(MetricError::NotAnObject(other)),
        };

        let namespace = match map.get("namespace") {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        };
        let id = match map.get("id") {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        };
        let time = match map.get("time") {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        };
        let metric = map.remove("metric");

        match (namespace, id, time, metric) {
            (Some(namespace), Some(id), Some(time), Some(value)) => Ok(Self {
                namespace,
                id,
                time,
                value,
            }),
            (namespace, id, time, metric) => Err(MetricError::MissingFields {
                namespace: namespace.is_some(),
                id: id.is_some(),
                time: time.is_some(),
                metric: metric.is_some(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coerces_complete_object() {
        let metric = Metric::from_value(json!({
            "namespace": "payments/latency",
            "id": "gateway-1",
            "time": "2024-05-01T10:00:00Z",
            "metric": {"ms": 12},
        }))
        .unwrap();
        assert_eq!(metric.namespace, "payments/latency");
        assert_eq!(metric.id, "gateway-1");
        assert_eq!(metric.value, json!({"ms": 12}));
    }

    #[test]
    fn null_metric_value_is_still_present() {
        let metric = Metric::from_value(json!({
            "namespace": "n",
            "id": "i",
            "time": "2024-05-01T10:00:00Z",
            "metric": null,
        }))
        .unwrap();
        assert_eq!(metric.value, Value::Null);
    }

    #[test]
    fn rejects_missing_id() {
        let err = Metric::from_value(json!({
            "namespace": "n",
            "time": "2024-05-01T10:00:00Z",
            "metric": 1,
        }))
        .unwrap_err();
        assert!(matches!(err, MetricError::MissingFields { id: false, .. }));
    }

    #[test]
    fn rejects_non_string_time() {
        let err = Metric::from_value(json!({
            "namespace": "n",
            "id": "i",
            "time": 1714557600,
            "metric": 1,
        }))
        .unwrap_err();
        assert!(matches!(err, MetricError::MissingFields { time: false, .. }));
    }

    #[test]
    fn rejects_scalar() {
        assert!(matches!(
            Metric::from_value(json!(42)),
            Err(MetricError::NotAnObject(_))
        ));
    }
}
