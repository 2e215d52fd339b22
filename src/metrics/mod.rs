//! Prometheus metrics for the delivery engine:
//! - Campaign run metrics (runs started, completed, failed)
//! - Recipient metrics (sent, failed)
//! - Batch metrics (dispatched, transport failures)
//! - Subscriber retirement metrics

use lazy_static::lazy_static;
use prometheus::{register_int_counter, IntCounter};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "pushcast";

lazy_static! {
    /// Total campaign send runs started
    pub static ref RUNS_STARTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_runs_started_total", METRIC_PREFIX),
        "Total campaign send runs started"
    ).unwrap();

    /// Total campaign send runs completed (including partial-failure runs)
    pub static ref RUNS_COMPLETED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_runs_completed_total", METRIC_PREFIX),
        "Total campaign send runs that reached SENT"
    ).unwrap();

    /// Total campaign send runs that ended in FAILED
    pub static ref RUNS_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_runs_failed_total", METRIC_PREFIX),
        "Total campaign send runs that ended in FAILED"
    ).unwrap();

    /// Total recipients the gateway accepted
    pub static ref RECIPIENTS_SENT_TOTAL: IntCounter = register_int_counter!(
        format!("{}_recipients_sent_total", METRIC_PREFIX),
        "Total recipients accepted by the push gateway"
    ).unwrap();

    /// Total per-recipient delivery failures
    pub static ref RECIPIENTS_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_recipients_failed_total", METRIC_PREFIX),
        "Total per-recipient delivery failures"
    ).unwrap();

    /// Total multicast batches dispatched
    pub static ref BATCHES_DISPATCHED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_batches_dispatched_total", METRIC_PREFIX),
        "Total multicast batches dispatched to the gateway"
    ).unwrap();

    /// Total batch-level transport failures
    pub static ref BATCHES_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_batches_failed_total", METRIC_PREFIX),
        "Total multicast calls that failed wholesale"
    ).unwrap();

    /// Total subscribers retired after permanent token failures
    pub static ref SUBSCRIBERS_RETIRED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_subscribers_retired_total", METRIC_PREFIX),
        "Total subscribers marked inactive after permanent token failures"
    ).unwrap();
}

/// Helper for delivery metrics
pub struct DeliveryMetrics;

impl DeliveryMetrics {
    pub fn record_run_started() {
        RUNS_STARTED_TOTAL.inc();
    }

    pub fn record_run_completed() {
        RUNS_COMPLETED_TOTAL.inc();
    }

    pub fn record_run_failed() {
        RUNS_FAILED_TOTAL.inc();
    }

    pub fn record_sent(count: u64) {
        RECIPIENTS_SENT_TOTAL.inc_by(count);
    }

    pub fn record_failed(count: u64) {
        RECIPIENTS_FAILED_TOTAL.inc_by(count);
    }

    pub fn record_batch() {
        BATCHES_DISPATCHED_TOTAL.inc();
    }

    pub fn record_batch_failure() {
        BATCHES_FAILED_TOTAL.inc();
    }

    pub fn record_retirement() {
        SUBSCRIBERS_RETIRED_TOTAL.inc();
    }
}
