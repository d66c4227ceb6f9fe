//! Metrics collection for observability
//!
//! Prometheus metrics on a registry owned by each ledger instance.
//!
//! # Metrics
//!
//! - `ledger_operations_total` - Committed operations, by operation
//! - `ledger_operation_failures_total` - Rolled-back operations, by operation and error
//! - `ledger_operation_duration_seconds` - Histogram of operation latencies
//! - `ledger_interest_paid_total` - Interest realized into balances
//! - `ledger_rewards_collected_total` - Rewards claimed from the strategy
//! - `ledger_accounts` - Accounts ever touched

use prometheus::{
    Counter, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Committed operations
    pub operations_total: IntCounterVec,

    /// Rolled-back operations
    pub failures_total: IntCounterVec,

    /// Operation duration histogram
    pub operation_duration: Histogram,

    /// Interest paid
    pub interest_paid: Counter,

    /// Rewards collected
    pub rewards_collected: Counter,

    /// Known accounts
    pub accounts: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let operations_total = IntCounterVec::new(
            Opts::new("ledger_operations_total", "Committed ledger operations"),
            &["operation"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let failures_total = IntCounterVec::new(
            Opts::new(
                "ledger_operation_failures_total",
                "Ledger operations rolled back",
            ),
            &["operation", "error"],
        )?;
        registry.register(Box::new(failures_total.clone()))?;

        let operation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_operation_duration_seconds",
                "Histogram of operation latencies",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.010, 0.050, 0.100, 0.500]),
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        let interest_paid = Counter::new(
            "ledger_interest_paid_total",
            "Interest realized into balances",
        )?;
        registry.register(Box::new(interest_paid.clone()))?;

        let rewards_collected = Counter::new(
            "ledger_rewards_collected_total",
            "Rewards claimed from the strategy",
        )?;
        registry.register(Box::new(rewards_collected.clone()))?;

        let accounts = IntGauge::new("ledger_accounts", "Accounts ever touched")?;
        registry.register(Box::new(accounts.clone()))?;

        Ok(Self {
            operations_total,
            failures_total,
            operation_duration,
            interest_paid,
            rewards_collected,
            accounts,
            registry,
        })
    }

    /// Record a committed operation
    pub fn record_operation(&self, operation: &str, duration_seconds: f64) {
        self.operations_total.with_label_values(&[operation]).inc();
        self.operation_duration.observe(duration_seconds);
    }

    /// Record a rolled-back operation
    pub fn record_failure(&self, operation: &str, error: &str) {
        self.failures_total
            .with_label_values(&[operation, error])
            .inc();
    }

    /// Record realized interest
    pub fn record_interest(&self, amount: Decimal) {
        if let Some(value) = amount.to_f64() {
            self.interest_paid.inc_by(value);
        }
    }

    /// Record collected rewards
    pub fn record_rewards(&self, amount: Decimal) {
        if let Some(value) = amount.to_f64() {
            self.rewards_collected.inc_by(value);
        }
    }

    /// Update account count
    pub fn set_accounts(&self, count: usize) {
        self.accounts.set(count as i64);
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

        metrics.record_operation("mint", 0.001);
        metrics.record_operation("mint", 0.002);
        metrics.record_failure("redeem", "insufficient_balance");
        metrics.record_interest(Decimal::new(15, 1));

        assert_eq!(metrics.operations_total.with_label_values(&["mint"]).get(), 2);
        assert_eq!(
            metrics
                .failures_total
                .with_label_values(&["redeem", "insufficient_balance"])
                .get(),
            1
        );
        assert!((metrics.interest_paid.get() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_instances_are_independent() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();
        first.record_operation("transfer", 0.0);
        assert_eq!(second.operations_total.with_label_values(&["transfer"]).get(), 0);
        assert!(!first.registry().gather().is_empty());
    }
}
