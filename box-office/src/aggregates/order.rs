//! Order reconciliation aggregate.
//!
//! Tracks one order from submission through payment confirmation and ticket
//! issuance:
//!
//! ```text
//! awaiting_payment ──confirm──▶ paid_pending_issuance ──issued──▶ issued
//!        │                        │    ▲
//!        │                        │    └── failed, operator retry
//!        └──────── operator / limit ──▶ failed_permanent
//! ```
//!
//! Free orders are placed directly in `paid_pending_issuance` and start
//! issuance immediately. Issuance is never retried automatically; a failed
//! attempt leaves the order pending until an operator asks again.
//!
//! Every issuance attempt is recorded before the provider is called, so the
//! attempt count reflects calls made even when the process dies mid-call.

use crate::error::OrderRejection;
use crate::issuance::issue_outstanding;
use crate::notifier::TicketNotifier;
use crate::payment_gateway::ConfirmationStatus;
use crate::provider::TicketingProvider;
use crate::types::{Buyer, EventId, Money, Order, OrderId, OrderState, OrderStatus, PurchaseItem, TicketBatch};
use box_office_core::async_effect;
use box_office_core::{effect::Effect, environment::Clock, reducer::Reducer, smallvec, SmallVec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Why an issuance attempt did not produce tickets.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum IssuanceError {
    /// The provider did not answer in time; the call may still have landed
    #[error("ticketing provider did not answer within {after_secs}s")]
    TimedOut {
        /// Timeout that elapsed
        after_secs: u64,
    },

    /// The provider answered with an error
    #[error("{0}")]
    Provider(String),
}

// ============================================================================
// Actions (Commands + Events)
// ============================================================================

/// Actions for the Order aggregate
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum OrderAction {
    // Commands
    /// Record a submitted checkout
    PlaceOrder {
        /// Order ID
        order_id: OrderId,
        /// Event
        event_id: EventId,
        /// Buyer
        buyer: Buyer,
        /// Currency
        currency: String,
        /// Flattened purchase items
        items: Vec<PurchaseItem>,
        /// Amount to charge
        total_amount: Money,
    },

    /// Link the gateway checkout session to the order
    AttachPaymentSession {
        /// Order ID
        order_id: OrderId,
        /// Gateway session id
        payment_reference: String,
    },

    /// Apply a confirmation signal from the gateway
    ConfirmPayment {
        /// Order ID
        order_id: OrderId,
        /// Session id carried by the signal
        payment_reference: String,
        /// Amount captured
        amount_paid: Money,
        /// Reported status
        status: ConfirmationStatus,
    },

    /// Operator asks for another issuance attempt
    RetryIssuance {
        /// Order ID
        order_id: OrderId,
    },

    /// Operator gives up on the order (or a session could not be opened)
    MarkFailedPermanent {
        /// Order ID
        order_id: OrderId,
        /// Shown to operators
        reason: String,
    },

    // Events
    /// Order recorded
    OrderPlaced {
        /// Order ID
        order_id: OrderId,
        /// Event
        event_id: EventId,
        /// Buyer
        buyer: Buyer,
        /// Currency
        currency: String,
        /// Flattened purchase items
        items: Vec<PurchaseItem>,
        /// Amount to charge
        total_amount: Money,
        /// When placed
        placed_at: DateTime<Utc>,
    },

    /// Checkout session created for the order
    PaymentSessionOpened {
        /// Order ID
        order_id: OrderId,
        /// Gateway session id
        payment_reference: String,
        /// When opened
        opened_at: DateTime<Utc>,
    },

    /// Payment captured
    PaymentConfirmed {
        /// Order ID
        order_id: OrderId,
        /// Amount the gateway captured
        amount_paid: Money,
        /// When confirmed
        paid_at: DateTime<Utc>,
    },

    /// A confirmation whose status was not `paid`
    ConfirmationIgnored {
        /// Order ID
        order_id: OrderId,
        /// Reported status
        status: ConfirmationStatus,
    },

    /// A confirmation for an order that was already confirmed
    DuplicateConfirmation {
        /// Order ID
        order_id: OrderId,
    },

    /// An issuance attempt is about to call the provider
    IssuanceAttemptStarted {
        /// Order ID
        order_id: OrderId,
        /// Attempt number, starting at 1
        attempt: u32,
        /// When started
        started_at: DateTime<Utc>,
    },

    /// Tickets issued
    TicketsIssued {
        /// Order ID
        order_id: OrderId,
        /// Every ticket under the order's reference
        batch: TicketBatch,
        /// When issued
        issued_at: DateTime<Utc>,
    },

    /// Issuance attempt failed; the order stays pending
    IssuanceFailed {
        /// Order ID
        order_id: OrderId,
        /// What went wrong
        error: IssuanceError,
        /// When failed
        failed_at: DateTime<Utc>,
    },

    /// Order given up on; refunds are manual
    OrderFailedPermanently {
        /// Order ID
        order_id: OrderId,
        /// Why
        reason: String,
        /// When
        failed_at: DateTime<Utc>,
    },

    /// Command rejected
    ValidationFailed {
        /// Rejection
        error: OrderRejection,
    },
}

impl OrderAction {
    /// Order the action is about, if any
    #[must_use]
    pub const fn order_id(&self) -> Option<OrderId> {
        match self {
            Self::PlaceOrder { order_id, .. }
            | Self::AttachPaymentSession { order_id, .. }
            | Self::ConfirmPayment { order_id, .. }
            | Self::RetryIssuance { order_id }
            | Self::MarkFailedPermanent { order_id, .. }
            | Self::OrderPlaced { order_id, .. }
            | Self::PaymentSessionOpened { order_id, .. }
            | Self::PaymentConfirmed { order_id, .. }
            | Self::ConfirmationIgnored { order_id, .. }
            | Self::DuplicateConfirmation { order_id }
            | Self::IssuanceAttemptStarted { order_id, .. }
            | Self::TicketsIssued { order_id, .. }
            | Self::IssuanceFailed { order_id, .. }
            | Self::OrderFailedPermanently { order_id, .. } => Some(*order_id),
            Self::ValidationFailed { .. } => None,
        }
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Environment dependencies for the Order aggregate
#[derive(Clone)]
pub struct OrderEnvironment {
    /// Clock for timestamps
    pub clock: Arc<dyn Clock>,
    /// Ticketing provider tickets are issued through
    pub provider: Arc<dyn TicketingProvider>,
    /// Buyer confirmation after issuance
    pub notifier: Arc<dyn TicketNotifier>,
    /// Upper bound on one issuance call
    pub issuance_timeout: Duration,
    /// Attempts after which a failure becomes permanent; `None` = unlimited
    pub max_issuance_attempts: Option<u32>,
}

impl OrderEnvironment {
    /// Creates a new `OrderEnvironment` with unlimited retries
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        provider: Arc<dyn TicketingProvider>,
        notifier: Arc<dyn TicketNotifier>,
        issuance_timeout: Duration,
    ) -> Self {
        Self {
            clock,
            provider,
            notifier,
            issuance_timeout,
            max_issuance_attempts: None,
        }
    }

    /// Sets the attempt limit
    #[must_use]
    pub const fn with_max_issuance_attempts(mut self, limit: Option<u32>) -> Self {
        self.max_issuance_attempts = limit;
        self
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the Order aggregate
#[derive(Clone, Debug, Default)]
pub struct OrderReducer;

impl OrderReducer {
    /// Creates a new `OrderReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Applies an event to state
    fn apply_event(state: &mut OrderState, action: &OrderAction) {
        match action {
            OrderAction::OrderPlaced {
                order_id,
                event_id,
                buyer,
                currency,
                items,
                total_amount,
                placed_at,
            } => {
                let status = if total_amount.is_zero() {
                    OrderStatus::PaidPendingIssuance
                } else {
                    OrderStatus::AwaitingPayment
                };
                state.orders.insert(
                    *order_id,
                    Order {
                        id: *order_id,
                        event_id: event_id.clone(),
                        buyer: buyer.clone(),
                        currency: currency.clone(),
                        items: items.clone(),
                        total_amount: *total_amount,
                        payment_reference: None,
                        status,
                        issuance_attempts: 0,
                        tickets: None,
                        last_error: None,
                        amount_paid: None,
                        created_at: *placed_at,
                        updated_at: *placed_at,
                        paid_at: None,
                        issued_at: None,
                    },
                );
                state.last_error = None;
            },

            OrderAction::PaymentSessionOpened {
                order_id,
                payment_reference,
                opened_at,
            } => {
                if let Some(order) = state.orders.get_mut(order_id) {
                    order.payment_reference = Some(payment_reference.clone());
                    order.updated_at = *opened_at;
                }
                state.last_error = None;
            },

            OrderAction::PaymentConfirmed {
                order_id,
                amount_paid,
                paid_at,
            } => {
                if let Some(order) = state.orders.get_mut(order_id) {
                    order.status = OrderStatus::PaidPendingIssuance;
                    order.amount_paid = Some(*amount_paid);
                    order.paid_at = Some(*paid_at);
                    order.updated_at = *paid_at;
                }
                state.last_error = None;
            },

            OrderAction::IssuanceAttemptStarted {
                order_id,
                attempt,
                started_at,
            } => {
                if let Some(order) = state.orders.get_mut(order_id) {
                    order.issuance_attempts = *attempt;
                    order.updated_at = *started_at;
                }
                state.last_error = None;
            },

            OrderAction::TicketsIssued {
                order_id,
                batch,
                issued_at,
            } => {
                if let Some(order) = state.orders.get_mut(order_id) {
                    order.status = OrderStatus::Issued;
                    order.tickets = Some(batch.clone());
                    order.issued_at = Some(*issued_at);
                    order.updated_at = *issued_at;
                    order.last_error = None;
                }
                state.last_error = None;
            },

            OrderAction::IssuanceFailed {
                order_id,
                error,
                failed_at,
            } => {
                if let Some(order) = state.orders.get_mut(order_id) {
                    order.last_error = Some(error.to_string());
                    order.updated_at = *failed_at;
                }
                state.last_error = None;
            },

            OrderAction::OrderFailedPermanently {
                order_id,
                reason,
                failed_at,
            } => {
                if let Some(order) = state.orders.get_mut(order_id) {
                    order.status = OrderStatus::FailedPermanent;
                    order.last_error = Some(reason.clone());
                    order.updated_at = *failed_at;
                }
                state.last_error = None;
            },

            OrderAction::ConfirmationIgnored { .. } | OrderAction::DuplicateConfirmation { .. } => {
                state.last_error = None;
            },

            OrderAction::ValidationFailed { error } => {
                state.last_error = Some(error.clone());
            },

            // Commands don't modify state
            OrderAction::PlaceOrder { .. }
            | OrderAction::AttachPaymentSession { .. }
            | OrderAction::ConfirmPayment { .. }
            | OrderAction::RetryIssuance { .. }
            | OrderAction::MarkFailedPermanent { .. } => {},
        }
    }

    fn reject(state: &mut OrderState, error: OrderRejection) -> SmallVec<[Effect<OrderAction>; 4]> {
        Self::apply_event(state, &OrderAction::ValidationFailed { error });
        SmallVec::new()
    }

    /// Records a new attempt and returns the effect that performs it.
    fn begin_issuance(
        state: &mut OrderState,
        order_id: OrderId,
        env: &OrderEnvironment,
    ) -> SmallVec<[Effect<OrderAction>; 4]> {
        let Some(attempt) = state
            .get(&order_id)
            .map(|order| order.issuance_attempts.saturating_add(1))
        else {
            return Self::reject(state, OrderRejection::NotFound(order_id));
        };

        Self::apply_event(
            state,
            &OrderAction::IssuanceAttemptStarted {
                order_id,
                attempt,
                started_at: env.clock.now(),
            },
        );
        tracing::info!(order_id = %order_id, attempt, "Starting ticket issuance");

        match state.get(&order_id) {
            Some(order) => smallvec![Self::issuance_effect(order, env)],
            None => SmallVec::new(),
        }
    }

    /// Issues the shortfall under a bounded timeout.
    ///
    /// A timeout reports failure but leaves the order pending: the call may
    /// have landed, which the next attempt's shortfall lookup will see.
    fn issuance_effect(order: &Order, env: &OrderEnvironment) -> Effect<OrderAction> {
        let provider = Arc::clone(&env.provider);
        let clock = Arc::clone(&env.clock);
        let timeout = env.issuance_timeout;
        let order_id = order.id;
        let event_id = order.event_id.clone();
        let items = order.items.clone();
        let buyer = order.buyer.clone();

        async_effect! {
            let attempt = issue_outstanding(provider.as_ref(), &event_id, order_id, &items, &buyer);
            let action = match tokio::time::timeout(timeout, attempt).await {
                Ok(Ok(batch)) => OrderAction::TicketsIssued {
                    order_id,
                    batch,
                    issued_at: clock.now(),
                },
                Ok(Err(error)) => OrderAction::IssuanceFailed {
                    order_id,
                    error: IssuanceError::Provider(error.to_string()),
                    failed_at: clock.now(),
                },
                Err(_) => OrderAction::IssuanceFailed {
                    order_id,
                    error: IssuanceError::TimedOut {
                        after_secs: timeout.as_secs(),
                    },
                    failed_at: clock.now(),
                },
            };
            Some(action)
        }
    }

    fn notification_effect(order: &Order, env: &OrderEnvironment) -> Effect<OrderAction> {
        let notifier = Arc::clone(&env.notifier);
        let order = order.clone();

        async_effect! {
            if let Err(error) = notifier.send_confirmation(&order).await {
                tracing::warn!(order_id = %order.id, error = %error, "Ticket confirmation not delivered");
            }
            None
        }
    }
}

impl Reducer for OrderReducer {
    type State = OrderState;
    type Action = OrderAction;
    type Environment = OrderEnvironment;

    #[allow(clippy::too_many_lines)] // one arm per command
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            // ========== Place Order ==========
            OrderAction::PlaceOrder {
                order_id,
                event_id,
                buyer,
                currency,
                items,
                total_amount,
            } => {
                if state.get(&order_id).is_some() {
                    return Self::reject(state, OrderRejection::AlreadyExists(order_id));
                }

                let free = total_amount.is_zero();
                Self::apply_event(
                    state,
                    &OrderAction::OrderPlaced {
                        order_id,
                        event_id,
                        buyer,
                        currency,
                        items,
                        total_amount,
                        placed_at: env.clock.now(),
                    },
                );

                if free {
                    // No payment step: straight to issuance
                    Self::begin_issuance(state, order_id, env)
                } else {
                    SmallVec::new()
                }
            },

            // ========== Attach Payment Session ==========
            OrderAction::AttachPaymentSession {
                order_id,
                payment_reference,
            } => {
                let Some(order) = state.get(&order_id) else {
                    return Self::reject(state, OrderRejection::NotFound(order_id));
                };
                if order.status != OrderStatus::AwaitingPayment {
                    let status = order.status;
                    return Self::reject(
                        state,
                        OrderRejection::NotPending {
                            order_id,
                            status,
                            expected: OrderStatus::AwaitingPayment,
                        },
                    );
                }

                Self::apply_event(
                    state,
                    &OrderAction::PaymentSessionOpened {
                        order_id,
                        payment_reference,
                        opened_at: env.clock.now(),
                    },
                );
                SmallVec::new()
            },

            // ========== Confirm Payment ==========
            OrderAction::ConfirmPayment {
                order_id,
                payment_reference,
                amount_paid,
                status,
            } => {
                let Some(order) = state.get(&order_id) else {
                    return Self::reject(state, OrderRejection::NotFound(order_id));
                };
                if order.payment_reference.as_deref() != Some(payment_reference.as_str()) {
                    return Self::reject(
                        state,
                        OrderRejection::MissingPaymentReference {
                            order_id,
                            reference: payment_reference,
                        },
                    );
                }

                if status != ConfirmationStatus::Paid {
                    Self::apply_event(state, &OrderAction::ConfirmationIgnored { order_id, status });
                    return SmallVec::new();
                }

                match order.status {
                    OrderStatus::AwaitingPayment => {
                        if amount_paid != order.total_amount {
                            tracing::warn!(
                                order_id = %order_id,
                                payment_reference = %payment_reference,
                                expected = order.total_amount.minor_units(),
                                captured = amount_paid.minor_units(),
                                "Captured amount differs from order total"
                            );
                        }
                        Self::apply_event(
                            state,
                            &OrderAction::PaymentConfirmed {
                                order_id,
                                amount_paid,
                                paid_at: env.clock.now(),
                            },
                        );
                        Self::begin_issuance(state, order_id, env)
                    },
                    // Redelivered signal: the first delivery already did the work
                    OrderStatus::PaidPendingIssuance | OrderStatus::Issued => {
                        Self::apply_event(state, &OrderAction::DuplicateConfirmation { order_id });
                        SmallVec::new()
                    },
                    OrderStatus::FailedPermanent => {
                        Self::reject(state, OrderRejection::FailedPermanent(order_id))
                    },
                }
            },

            // ========== Retry Issuance ==========
            OrderAction::RetryIssuance { order_id } => {
                let Some(order) = state.get(&order_id) else {
                    return Self::reject(state, OrderRejection::NotFound(order_id));
                };
                let rejection = match order.status {
                    OrderStatus::AwaitingPayment => Some(OrderRejection::NotPaid(order_id)),
                    OrderStatus::Issued => Some(OrderRejection::AlreadyIssued(order_id)),
                    OrderStatus::FailedPermanent => Some(OrderRejection::FailedPermanent(order_id)),
                    OrderStatus::PaidPendingIssuance => env
                        .max_issuance_attempts
                        .filter(|limit| order.issuance_attempts >= *limit)
                        .map(|limit| OrderRejection::AttemptLimitReached { order_id, limit }),
                };
                if let Some(rejection) = rejection {
                    return Self::reject(state, rejection);
                }

                Self::begin_issuance(state, order_id, env)
            },

            // ========== Mark Failed Permanent ==========
            OrderAction::MarkFailedPermanent { order_id, reason } => {
                let Some(order) = state.get(&order_id) else {
                    return Self::reject(state, OrderRejection::NotFound(order_id));
                };
                match order.status {
                    OrderStatus::Issued => Self::reject(state, OrderRejection::AlreadyIssued(order_id)),
                    OrderStatus::FailedPermanent => {
                        Self::reject(state, OrderRejection::FailedPermanent(order_id))
                    },
                    OrderStatus::AwaitingPayment | OrderStatus::PaidPendingIssuance => {
                        Self::apply_event(
                            state,
                            &OrderAction::OrderFailedPermanently {
                                order_id,
                                reason,
                                failed_at: env.clock.now(),
                            },
                        );
                        SmallVec::new()
                    },
                }
            },

            // ========== Issuance Outcome (from effect) ==========
            OrderAction::TicketsIssued {
                order_id,
                batch,
                issued_at,
            } => {
                tracing::info!(order_id = %order_id, tickets = batch.len(), "Tickets issued");
                Self::apply_event(
                    state,
                    &OrderAction::TicketsIssued {
                        order_id,
                        batch,
                        issued_at,
                    },
                );
                match state.get(&order_id) {
                    Some(order) => smallvec![Self::notification_effect(order, env)],
                    None => SmallVec::new(),
                }
            },

            OrderAction::IssuanceFailed {
                order_id,
                error,
                failed_at,
            } => {
                let reason = error.to_string();
                Self::apply_event(
                    state,
                    &OrderAction::IssuanceFailed {
                        order_id,
                        error,
                        failed_at,
                    },
                );

                let exhausted = state.get(&order_id).and_then(|order| {
                    env.max_issuance_attempts
                        .filter(|limit| order.issuance_attempts >= *limit)
                });
                if let Some(limit) = exhausted {
                    Self::apply_event(
                        state,
                        &OrderAction::OrderFailedPermanently {
                            order_id,
                            reason: format!("gave up after {limit} issuance attempts: {reason}"),
                            failed_at,
                        },
                    );
                }
                SmallVec::new()
            },

            // ========== Events (replayed) ==========
            event => {
                Self::apply_event(state, &event);
                SmallVec::new()
            },
        }
    }
}
