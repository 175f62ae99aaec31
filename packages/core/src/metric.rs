//! Execution metrics.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the per-job execution time metric.
pub const DURATION_METRIC: &str = "duration";

/// Elapsed time in milliseconds, floored to two decimals.
pub fn duration_millis(elapsed: Duration) -> f64 {
    (elapsed.as_nanos() / 10_000) as f64 / 100.0
}

/// A single metric sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    /// Name of the node the sample belongs to.
    pub label: String,
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
}

impl Metric {
    pub fn new(name: impl Into<String>, label: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            value,
            recorded_at: Utc::now(),
        }
    }

    /// The `duration` sample for one script execution.
    pub fn duration(label: impl Into<String>, elapsed: Duration) -> Self {
        Self::new(DURATION_METRIC, label, duration_millis(elapsed))
    }
}
