//! Prometheus metrics for the ledger runtime
//!
//! # Metrics
//!
//! - `agri_ledger_operations_total{operation,outcome}` - Submitted operations by outcome
//! - `agri_ledger_operation_duration_seconds{operation}` - Execute + commit latency
//! - `agri_ledger_events_published_total{event}` - Events handed to subscribers
//!
//! Every ledger owns its own registry, so several ledgers (or tests) can
//! live in one process.

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Outcome label for a committed operation
pub const OUTCOME_COMMITTED: &str = "committed";

/// Metrics collector
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Operations by `operation` and `outcome`
    pub operations_total: IntCounterVec,

    /// Operation latency by `operation`
    pub operation_duration: HistogramVec,

    /// Published events by `event`
    pub events_published: IntCounterVec,

    registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let operations_total = IntCounterVec::new(
            Opts::new(
                "agri_ledger_operations_total",
                "Submitted operations by outcome",
            ),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "agri_ledger_operation_duration_seconds",
                "Time to execute and commit one operation",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        let events_published = IntCounterVec::new(
            Opts::new(
                "agri_ledger_events_published_total",
                "Events published after commit",
            ),
            &["event"],
        )?;
        registry.register(Box::new(events_published.clone()))?;

        Ok(Self {
            operations_total,
            operation_duration,
            events_published,
            registry,
        })
    }

    /// Record one finished operation; `outcome` is `committed` or an error kind
    pub fn record_operation(&self, operation: &str, outcome: &str, duration_seconds: f64) {
        self.operations_total
            .with_label_values(&[operation, outcome])
            .inc();
        self.operation_duration
            .with_label_values(&[operation])
            .observe(duration_seconds);
    }

    /// Record a published event
    pub fn record_event_published(&self, event: &str) {
        self.events_published.with_label_values(&[event]).inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition of every metric
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(
            metrics
                .operations_total
                .with_label_values(&["createBatch", OUTCOME_COMMITTED])
                .get(),
            0
        );
    }

    #[test]
    fn test_record_operation() {
        let metrics = Metrics::new().unwrap();
        metrics.record_operation("createBatch", OUTCOME_COMMITTED, 0.002);
        metrics.record_operation("createBatch", OUTCOME_COMMITTED, 0.001);
        metrics.record_operation("createBatch", "already_exists", 0.001);

        let committed = metrics
            .operations_total
            .with_label_values(&["createBatch", OUTCOME_COMMITTED]);
        assert_eq!(committed.get(), 2);
        assert_eq!(
            metrics
                .operation_duration
                .with_label_values(&["createBatch"])
                .get_sample_count(),
            3
        );
    }

    #[test]
    fn test_independent_registries() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_event_published("BatchCreated");
        assert_eq!(a.events_published.with_label_values(&["BatchCreated"]).get(), 1);
        assert_eq!(b.events_published.with_label_values(&["BatchCreated"]).get(), 0);
    }

    #[test]
    fn test_render_contains_metric_names() {
        let metrics = Metrics::new().unwrap();
        metrics.record_operation("lockPayment", OUTCOME_COMMITTED, 0.003);
        metrics.record_event_published("PaymentLocked");
        let text = metrics.render();
        assert!(text.contains("agri_ledger_operations_total"));
        assert!(text.contains("agri_ledger_events_published_total"));
    }
}
