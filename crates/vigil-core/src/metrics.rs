//! Metric payloads carried by events.

use serde::{Deserialize, Serialize};

/// A dimension attached to a metric point.
#[derive(Clone, PartialEq, Eq, ::prost::Message, Serialize, Deserialize)]
pub struct MetricTag {
    /// Tag name.
    #[prost(string, tag = "1")]
    pub name: String,

    /// Tag value.
    #[prost(string, tag = "2")]
    pub value: String,
}

/// A single measured value.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Metric name, e.g. `system.cpu.idle`.
    #[prost(string, tag = "1")]
    pub name: String,

    /// Measured value.
    #[prost(double, tag = "2")]
    pub value: f64,

    /// Unix timestamp of the measurement.
    #[prost(int64, tag = "3")]
    pub timestamp: i64,

    /// Dimensions of the measurement.
    #[prost(message, repeated, tag = "4")]
    pub tags: Vec<MetricTag>,
}

/// Metrics collected alongside (or instead of) a check result.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
pub struct Metrics {
    /// Handlers the metrics are routed to downstream.
    #[prost(string, repeated, tag = "1")]
    pub handlers: Vec<String>,

    /// The measured points.
    #[prost(message, repeated, tag = "2")]
    pub points: Vec<MetricPoint>,
}
