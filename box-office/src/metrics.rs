//! Business metrics for the box office.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `box_office_orders_submitted_total{kind}` - Orders submitted, `paid` or `free`
//! - `box_office_payment_confirmations_total{outcome}` - Confirmation signals by outcome
//!   (`applied`, `duplicate`, `ignored`)
//! - `box_office_issuance_attempts_total{outcome}` - Issuance attempts by outcome
//!   (`issued`, `failed`, `timed_out`)
//! - `box_office_orders_failed_permanent_total` - Orders moved to `failed_permanent`
//! - `box_office_revenue_minor_units_total` - Captured payments in minor units
//! - `box_office_tickets_issued_total` - Tickets issued
//!
//! ## Gauges
//! - `box_office_pending_orders` - Paid orders waiting for issuance, as of the
//!   last pending listing

use metrics::{describe_counter, describe_gauge};

/// Initialize and register all business metrics descriptions.
///
/// Call once at startup, after the exporter is installed.
pub fn register_business_metrics() {
    describe_counter!(
        "box_office_orders_submitted_total",
        "Orders submitted at checkout, by kind (paid, free)"
    );
    describe_counter!(
        "box_office_payment_confirmations_total",
        "Payment confirmation signals by outcome (applied, duplicate, ignored)"
    );
    describe_counter!(
        "box_office_issuance_attempts_total",
        "Ticket issuance attempts by outcome (issued, failed, timed_out)"
    );
    describe_counter!(
        "box_office_orders_failed_permanent_total",
        "Orders given up on; refunds are handled manually"
    );
    describe_counter!(
        "box_office_revenue_minor_units_total",
        "Captured payments in minor currency units"
    );
    describe_counter!("box_office_tickets_issued_total", "Tickets issued");
    describe_gauge!(
        "box_office_pending_orders",
        "Paid orders waiting for ticket issuance"
    );

    tracing::info!("Business metrics registered");
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record a submitted order.
pub fn record_order_submitted(free: bool) {
    let kind = if free { "free" } else { "paid" };
    metrics::counter!("box_office_orders_submitted_total", "kind" => kind).increment(1);
    tracing::debug!(kind, "Recorded order_submitted metric");
}

/// Outcome of a payment confirmation signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// Moved the order to paid
    Applied,
    /// Redelivery of an already applied signal
    Duplicate,
    /// Status was not `paid`
    Ignored,
}

impl ConfirmationOutcome {
    const fn as_label(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Duplicate => "duplicate",
            Self::Ignored => "ignored",
        }
    }
}

/// Record a processed confirmation signal.
///
/// # Arguments
///
/// * `amount_minor` - Captured amount, counted as revenue only when applied
pub fn record_payment_confirmation(outcome: ConfirmationOutcome, amount_minor: u64) {
    metrics::counter!("box_office_payment_confirmations_total", "outcome" => outcome.as_label())
        .increment(1);
    if outcome == ConfirmationOutcome::Applied {
        metrics::counter!("box_office_revenue_minor_units_total").increment(amount_minor);
    }
    tracing::debug!(outcome = outcome.as_label(), "Recorded payment_confirmation metric");
}

/// Record a successful issuance attempt.
pub fn record_issuance_succeeded(tickets: u64) {
    metrics::counter!("box_office_issuance_attempts_total", "outcome" => "issued").increment(1);
    metrics::counter!("box_office_tickets_issued_total").increment(tickets);
    tracing::debug!(tickets, "Recorded issuance_succeeded metric");
}

/// Record a failed issuance attempt.
pub fn record_issuance_failed(timed_out: bool) {
    let outcome = if timed_out { "timed_out" } else { "failed" };
    metrics::counter!("box_office_issuance_attempts_total", "outcome" => outcome).increment(1);
    tracing::debug!(outcome, "Recorded issuance_failed metric");
}

/// Record an order moved to `failed_permanent`.
pub fn record_order_failed_permanent() {
    metrics::counter!("box_office_orders_failed_permanent_total").increment(1);
    tracing::debug!("Recorded order_failed_permanent metric");
}

/// Set the pending-orders gauge.
#[allow(clippy::cast_precision_loss)] // gauge values are f64
pub fn set_pending_orders(count: usize) {
    metrics::gauge!("box_office_pending_orders").set(count as f64);
}
