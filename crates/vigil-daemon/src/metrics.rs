//! Prometheus metrics for backend health observability.
//!
//! # Metric Families
//!
//! | Metric | Type | Description | Labels |
//! |--------|------|-------------|--------|
//! | `vigil_agent_sessions` | Gauge | Active agent sessions on this backend | `namespace` |
//! | `vigil_session_events_total` | Counter | Messages ingested by sessions | `type` |
//! | `vigil_checks_routed_total` | Counter | Check requests routed through rings | |
//!
//! The registry is shared: the daemon binary exposes it at `/metrics`
//! in Prometheus text format, and tests read gauge values directly.

use std::sync::Arc;

use prometheus::{Encoder, GaugeVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Failed to register a metric with Prometheus.
    #[error("failed to register metric: {0}")]
    RegistrationFailed(#[from] prometheus::Error),

    /// Failed to encode metrics output.
    #[error("failed to encode metrics: {0}")]
    EncodingFailed(String),
}

/// Result type for metrics operations.
pub type MetricsResult<T> = Result<T, MetricsError>;

/// Backend health metrics.
///
/// All metrics use interior mutability and are safe to share across
/// threads. The struct is `Clone`, `Send`, and `Sync`.
#[derive(Clone)]
pub struct BackendMetrics {
    /// Number of active agent sessions, labeled by namespace.
    agent_sessions: GaugeVec,

    /// Total messages ingested by sessions, labeled by message type.
    session_events_total: IntCounterVec,

    /// Total check requests routed through subscription rings.
    checks_routed_total: IntCounter,
}

impl BackendMetrics {
    /// Creates backend metrics and registers them with the given
    /// registry.
    ///
    /// # Errors
    ///
    /// Returns an error if any metric fails to register (e.g. duplicate
    /// name).
    pub fn new(registry: &Registry) -> MetricsResult<Self> {
        let agent_sessions = GaugeVec::new(
            Opts::new(
                "vigil_agent_sessions",
                "Number of active agent sessions on this backend",
            ),
            &["namespace"],
        )?;
        let session_events_total = IntCounterVec::new(
            Opts::new(
                "vigil_session_events_total",
                "Messages ingested by agent sessions",
            ),
            &["type"],
        )?;
        let checks_routed_total = IntCounter::new(
            "vigil_checks_routed_total",
            "Check requests routed through subscription rings",
        )?;

        registry.register(Box::new(agent_sessions.clone()))?;
        registry.register(Box::new(session_events_total.clone()))?;
        registry.register(Box::new(checks_routed_total.clone()))?;

        Ok(Self {
            agent_sessions,
            session_events_total,
            checks_routed_total,
        })
    }

    /// Records a session start for a namespace.
    pub fn session_started(&self, namespace: &str) {
        self.agent_sessions.with_label_values(&[namespace]).inc();
    }

    /// Records a session stop for a namespace.
    pub fn session_stopped(&self, namespace: &str) {
        self.agent_sessions.with_label_values(&[namespace]).dec();
    }

    /// Current session gauge value for a namespace.
    #[must_use]
    pub fn active_sessions(&self, namespace: &str) -> f64 {
        self.agent_sessions.with_label_values(&[namespace]).get()
    }

    /// Records an ingested session message of the given type.
    pub fn session_event(&self, message_type: &str) {
        self.session_events_total
            .with_label_values(&[message_type])
            .inc();
    }

    /// Records a check request routed through a ring.
    pub fn check_routed(&self) {
        self.checks_routed_total.inc();
    }
}

/// A Prometheus registry paired with the backend metric families
/// registered on it.
pub struct MetricsRegistry {
    registry: Registry,
    metrics: Arc<BackendMetrics>,
}

impl MetricsRegistry {
    /// Creates a fresh registry with all backend metrics registered.
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails.
    pub fn new() -> MetricsResult<Self> {
        let registry = Registry::new();
        let metrics = Arc::new(BackendMetrics::new(&registry)?);
        Ok(Self { registry, metrics })
    }

    /// Shared handle to the backend metric families.
    #[must_use]
    pub fn backend_metrics(&self) -> Arc<BackendMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Encodes all registered metrics in Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::EncodingFailed`] if encoding fails.
    pub fn encode_text(&self) -> MetricsResult<String> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        encoder
            .encode(&self.registry.gather(), &mut buf)
            .map_err(|e| MetricsError::EncodingFailed(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| MetricsError::EncodingFailed(e.to_string()))
    }
}
