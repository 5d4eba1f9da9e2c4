//! Tagged metric emission consumed from the host's telemetry stack.

/// One `key=value` tag attached to a metric sample.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetricTag {
    /// Tag name, e.g. `"map_id"`.
    pub key: &'static str,
    /// Tag value rendered as text.
    pub value: String,
}

impl MetricTag {
    /// Build a tag from anything displayable.
    pub fn new(key: &'static str, value: impl ToString) -> Self {
        Self {
            key,
            value: value.to_string(),
        }
    }
}

/// Sink for counters and gauges.
///
/// Implementations must be cheap to call from worker threads; the fabric
/// never holds one of its own locks while emitting.
pub trait MetricsSink: Send + Sync {
    /// Record a gauge-style sample.
    fn value(&self, name: &'static str, value: f64, tags: &[MetricTag]);

    /// Add `delta` to a counter.
    fn counter(&self, name: &'static str, delta: u64, tags: &[MetricTag]);
}

/// Sink that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn value(&self, _name: &'static str, _value: f64, _tags: &[MetricTag]) {}

    fn counter(&self, _name: &'static str, _delta: u64, _tags: &[MetricTag]) {}
}
