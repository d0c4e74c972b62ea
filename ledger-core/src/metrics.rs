//! Transaction metrics
//!
//! # Metrics
//!
//! - `ledger_transaction_attempts_total` - bodies executed, retries included
//! - `ledger_transaction_conflicts_total` - commits rejected by a watched key
//! - `ledger_transaction_commits_total` - transactions committed
//! - `ledger_transaction_failures_total` - transactions that gave up
//! - `ledger_transaction_duration_seconds` - wall time including retries
//!
//! Collectors live on the registry owned by [`Metrics`], never the
//! process-global default registry.

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Transaction bodies executed
    pub attempts_total: IntCounter,

    /// Watched-key conflicts
    pub conflicts_total: IntCounter,

    /// Successful commits
    pub commits_total: IntCounter,

    /// Transactions that returned an error
    pub failures_total: IntCounter,

    /// Transaction duration histogram
    pub duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector on a fresh registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let attempts_total = IntCounter::new(
            "ledger_transaction_attempts_total",
            "Transaction bodies executed, retries included",
        )?;
        registry.register(Box::new(attempts_total.clone()))?;

        let conflicts_total = IntCounter::new(
            "ledger_transaction_conflicts_total",
            "Commits rejected because a watched key changed",
        )?;
        registry.register(Box::new(conflicts_total.clone()))?;

        let commits_total = IntCounter::new(
            "ledger_transaction_commits_total",
            "Transactions committed",
        )?;
        registry.register(Box::new(commits_total.clone()))?;

        let failures_total = IntCounter::new(
            "ledger_transaction_failures_total",
            "Transactions that returned an error",
        )?;
        registry.register(Box::new(failures_total.clone()))?;

        let duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_transaction_duration_seconds",
                "Transaction wall time including retries",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.500, 1.0]),
        )?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            attempts_total,
            conflicts_total,
            commits_total,
            failures_total,
            duration,
            registry,
        })
    }

    /// Record a body execution
    pub fn record_attempt(&self) {
        self.attempts_total.inc();
    }

    /// Record a conflict that will be retried or surfaced
    pub fn record_conflict(&self) {
        self.conflicts_total.inc();
    }

    /// Record a finished transaction
    pub fn record_outcome(&self, committed: bool, duration_seconds: f64) {
        if committed {
            self.commits_total.inc();
        } else {
            self.failures_total.inc();
        }
        self.duration.observe(duration_seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.attempts_total.get(), 0);
        assert_eq!(metrics.commits_total.get(), 0);
        // Two collectors on separate registries must not clash
        assert!(Metrics::new().is_ok());
    }

    #[test]
    fn test_record_outcome() {
        let metrics = Metrics::new().unwrap();
        metrics.record_attempt();
        metrics.record_conflict();
        metrics.record_attempt();
        metrics.record_outcome(true, 0.002);
        metrics.record_outcome(false, 0.5);

        assert_eq!(metrics.attempts_total.get(), 2);
        assert_eq!(metrics.conflicts_total.get(), 1);
        assert_eq!(metrics.commits_total.get(), 1);
        assert_eq!(metrics.failures_total.get(), 1);
        assert_eq!(metrics.duration.get_sample_count(), 2);
    }

    #[test]
    fn test_registry_gathers() {
        let metrics = Metrics::new().unwrap();
        metrics.record_attempt();
        let families = metrics.registry().gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "ledger_transaction_attempts_total"));
    }
}
