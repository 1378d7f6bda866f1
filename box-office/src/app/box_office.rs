//! The box office service: the operations exposed to the HTTP layer.
//!
//! Order commands follow one loop:
//! 1. Take the order's lock
//! 2. Load the order from the repository
//! 3. Reduce the command
//! 4. Persist the order if it changed
//! 5. Execute the effects and feed the actions they produce back to 3
//!
//! Because effects are awaited while the lock is held, a payment callback
//! and an operator retry for the same order never overlap, and every
//! transition is durable before the next external call starts.

use crate::aggregates::{IssuanceError, OrderAction, OrderEnvironment, OrderReducer};
use crate::app::catalog::CatalogService;
use crate::checkout::{flatten, split_platform_fee, validate_buyer, FlattenedCart};
use crate::error::{BoxOfficeError, OrderRejection};
use crate::inventory::EventCatalog;
use crate::metrics::{self, ConfirmationOutcome};
use crate::payment_gateway::{ConfirmationStatus, OrderIntent, PaymentConfirmation, PaymentGateway};
use crate::repository::OrderRepository;
use crate::reservation::{can_decrement, can_increment, Cart, LineId};
use crate::types::{Buyer, EventId, Money, Order, OrderId, OrderState, OrderStatus};
use box_office_core::reducer::Reducer;
use box_office_runtime::{execute_all, KeyedLocks};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// Checkout settings shared by every order.
#[derive(Clone, Debug)]
pub struct CheckoutSettings {
    /// Lowercase ISO currency code
    pub currency: String,
    /// Platform application fee, percent of the total
    pub platform_fee_percent: u32,
}

/// Per-line result of [`BoxOffice::evaluate_cart`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LineEvaluation {
    /// Line
    pub line: LineId,
    /// Display name
    pub name: String,
    /// Unit price
    pub unit_price: Money,
    /// Selected quantity
    pub quantity: u32,
    /// Another unit can be added
    pub can_increment: bool,
    /// A unit can be removed
    pub can_decrement: bool,
}

/// What the storefront shows for a cart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CartEvaluation {
    /// One entry per line, in catalog order
    pub lines: Vec<LineEvaluation>,
    /// Flattened preview; `None` when nothing is selected
    pub preview: Option<FlattenedCart>,
    /// Why the current selection could not be submitted, if it could not
    pub problem: Option<String>,
}

impl CartEvaluation {
    /// Whether the cart has nothing selected
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.preview.is_none()
    }
}

/// Hosted checkout details returned for a paid order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CheckoutSummary {
    /// Gateway session id
    pub session_id: String,
    /// Where to send the buyer
    pub redirect_url: String,
    /// Platform application fee
    pub platform_fee: Money,
    /// What the merchant receives
    pub merchant_receives: Money,
}

/// Result of [`BoxOffice::submit_order`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubmittedOrder {
    /// The order as persisted
    pub order: Order,
    /// Checkout session; `None` for free orders
    pub checkout: Option<CheckoutSummary>,
}

/// The box office service.
pub struct BoxOffice {
    catalog: Arc<CatalogService>,
    repository: Arc<dyn OrderRepository>,
    gateway: Arc<dyn PaymentGateway>,
    reducer: OrderReducer,
    env: OrderEnvironment,
    locks: KeyedLocks<OrderId>,
    settings: CheckoutSettings,
}

impl BoxOffice {
    /// Create the service
    #[must_use]
    pub fn new(
        catalog: Arc<CatalogService>,
        repository: Arc<dyn OrderRepository>,
        gateway: Arc<dyn PaymentGateway>,
        env: OrderEnvironment,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            catalog,
            repository,
            gateway,
            reducer: OrderReducer::new(),
            env,
            locks: KeyedLocks::new(),
            settings,
        }
    }

    /// Catalog service backing this box office
    #[must_use]
    pub fn catalog_service(&self) -> &Arc<CatalogService> {
        &self.catalog
    }

    // ========================================================================
    // Storefront
    // ========================================================================

    /// Current catalog for an event.
    ///
    /// # Errors
    ///
    /// Returns [`BoxOfficeError::Catalog`] if the provider cannot be read.
    pub async fn catalog(&self, event_id: &EventId) -> Result<Arc<EventCatalog>, BoxOfficeError> {
        Ok(self.catalog.catalog(event_id).await?)
    }

    /// An empty cart for an event.
    ///
    /// # Errors
    ///
    /// Returns [`BoxOfficeError::Catalog`] if the provider cannot be read.
    pub async fn open_cart(&self, event_id: &EventId) -> Result<Cart, BoxOfficeError> {
        let catalog = self.catalog(event_id).await?;
        Ok(Cart::open(&catalog))
    }

    /// A cart with the given quantities selected.
    ///
    /// Quantities are not checked against stock here; see
    /// [`BoxOffice::evaluate_cart`].
    ///
    /// # Errors
    ///
    /// Returns [`BoxOfficeError::InvalidCart`] for a line not in the catalog
    /// or a line selected more than once.
    pub async fn build_cart(
        &self,
        event_id: &EventId,
        selections: &[(LineId, u32)],
    ) -> Result<(Arc<EventCatalog>, Cart), BoxOfficeError> {
        let catalog = self.catalog(event_id).await?;
        let mut cart = Cart::open(&catalog);
        let mut seen = HashSet::with_capacity(selections.len());
        for (line_id, quantity) in selections {
            if !seen.insert(line_id) {
                return Err(BoxOfficeError::InvalidCart(format!("{line_id} is selected more than once")));
            }
            cart.set_quantity(line_id, *quantity)?;
        }
        Ok((catalog, cart))
    }

    /// Per-line increment/decrement availability plus the flattened preview.
    #[must_use]
    pub fn evaluate_cart(catalog: &EventCatalog, cart: &Cart) -> CartEvaluation {
        let lines = cart
            .lines()
            .iter()
            .map(|line| LineEvaluation {
                line: line.id.clone(),
                name: line.name.clone(),
                unit_price: line.unit_price,
                quantity: line.selected_quantity,
                can_increment: can_increment(&line.id, cart, &catalog.snapshot, &catalog.bundles),
                can_decrement: can_decrement(&line.id, cart),
            })
            .collect();

        let problem = cart
            .validate(&catalog.snapshot, &catalog.bundles)
            .err()
            .map(|error| error.to_string());
        let (preview, problem) = match flatten(cart) {
            Ok(flat) => (Some(flat), problem),
            Err(error) => (None, problem.or_else(|| Some(error.to_string()))),
        };

        CartEvaluation {
            lines,
            preview,
            problem,
        }
    }

    // ========================================================================
    // Orders
    // ========================================================================

    /// Submit a cart.
    ///
    /// Paid orders are persisted and then get a checkout session. Free orders
    /// go straight to issuance; an issuance failure leaves them pending for
    /// an operator and is not reported to the buyer.
    ///
    /// # Errors
    ///
    /// - [`BoxOfficeError::InvalidBuyer`], [`BoxOfficeError::EmptyCart`] or
    ///   [`BoxOfficeError::CapacityExceeded`] before anything is written
    /// - [`BoxOfficeError::PaymentSession`] if the gateway fails; the order is
    ///   then `failed_permanent` and nothing was charged
    pub async fn submit_order(&self, cart: &Cart, buyer: Buyer) -> Result<SubmittedOrder, BoxOfficeError> {
        validate_buyer(&buyer)?;
        let catalog = self.catalog(&cart.event_id).await?;
        cart.validate(&catalog.snapshot, &catalog.bundles)?;
        let flat = flatten(cart)?;

        let order_id = OrderId::new();
        let free = flat.total_amount.is_zero();
        let order = self
            .dispatch(
                order_id,
                OrderAction::PlaceOrder {
                    order_id,
                    event_id: cart.event_id.clone(),
                    buyer: buyer.clone(),
                    currency: self.settings.currency.clone(),
                    items: flat.items.clone(),
                    total_amount: flat.total_amount,
                },
            )
            .await?;
        metrics::record_order_submitted(free);
        tracing::info!(
            order_id = %order_id,
            event_id = %cart.event_id,
            total = flat.total_amount.minor_units(),
            tickets = flat.total_ticket_count,
            free,
            "Order submitted"
        );

        if free {
            return Ok(SubmittedOrder { order, checkout: None });
        }

        let fee = split_platform_fee(flat.total_amount, self.settings.platform_fee_percent);
        let intent = OrderIntent {
            order_id,
            event_id: cart.event_id.clone(),
            buyer,
            currency: self.settings.currency.clone(),
            lines: flat.charges,
            total_amount: flat.total_amount,
            fee,
        };

        match self.gateway.create_checkout_session(intent).await {
            Ok(session) => {
                let order = self
                    .dispatch(
                        order_id,
                        OrderAction::AttachPaymentSession {
                            order_id,
                            payment_reference: session.session_id.clone(),
                        },
                    )
                    .await?;
                Ok(SubmittedOrder {
                    order,
                    checkout: Some(CheckoutSummary {
                        session_id: session.session_id,
                        redirect_url: session.redirect_url,
                        platform_fee: fee.platform_fee,
                        merchant_receives: fee.merchant_receives,
                    }),
                })
            },
            Err(error) => {
                tracing::error!(order_id = %order_id, error = %error, "Payment session could not be created");
                self.dispatch(
                    order_id,
                    OrderAction::MarkFailedPermanent {
                        order_id,
                        reason: format!("payment session could not be created: {error}"),
                    },
                )
                .await?;
                Err(BoxOfficeError::PaymentSession(error))
            },
        }
    }

    /// Apply a payment confirmation signal.
    ///
    /// Safe to call repeatedly with the same signal: only the first paid
    /// signal moves the order and starts issuance.
    ///
    /// # Errors
    ///
    /// Returns [`BoxOfficeError::UnknownPaymentReference`] for a session we
    /// never created, or [`BoxOfficeError::InvalidTransition`] for an order
    /// that was already failed permanently.
    pub async fn confirm_payment(&self, confirmation: PaymentConfirmation) -> Result<Order, BoxOfficeError> {
        let Some(order) = self
            .repository
            .find_by_payment_reference(&confirmation.session_id)
            .await?
        else {
            tracing::warn!(payment_reference = %confirmation.session_id, "Confirmation for unknown payment session");
            return Err(BoxOfficeError::UnknownPaymentReference(confirmation.session_id));
        };

        let order_id = order.id;
        let amount = confirmation.amount_paid;
        let paid = confirmation.status == ConfirmationStatus::Paid;
        let result = self
            .dispatch_observed(
                order_id,
                OrderAction::ConfirmPayment {
                    order_id,
                    payment_reference: confirmation.session_id.clone(),
                    amount_paid: amount,
                    status: confirmation.status,
                },
            )
            .await;

        match result {
            Ok((before, after)) => {
                let outcome = if !paid {
                    ConfirmationOutcome::Ignored
                } else if before.is_some_and(|order| order.status == OrderStatus::AwaitingPayment) {
                    ConfirmationOutcome::Applied
                } else {
                    ConfirmationOutcome::Duplicate
                };
                metrics::record_payment_confirmation(outcome, amount.minor_units());
                tracing::info!(
                    order_id = %order_id,
                    payment_reference = %confirmation.session_id,
                    outcome = ?outcome,
                    status = %after.status,
                    "Payment confirmation processed"
                );
                Ok(after)
            },
            Err(BoxOfficeError::InvalidTransition(OrderRejection::FailedPermanent(_))) => {
                tracing::warn!(
                    order_id = %order_id,
                    payment_reference = %confirmation.session_id,
                    buyer_email = %order.buyer.email,
                    amount = amount.minor_units(),
                    "Payment confirmed for an order that already failed permanently; refund manually"
                );
                Err(BoxOfficeError::InvalidTransition(OrderRejection::FailedPermanent(order_id)))
            },
            Err(error) => Err(error),
        }
    }

    /// Operator retry of a pending order.
    ///
    /// Tickets already issued by an earlier attempt are reused, so a retry
    /// after a lost response does not issue twice.
    ///
    /// # Errors
    ///
    /// Returns [`BoxOfficeError::IssuanceFailed`] if this attempt failed too
    /// (the order stays pending unless the attempt limit was reached), or
    /// [`BoxOfficeError::InvalidTransition`] / [`BoxOfficeError::DuplicateIssuance`]
    /// if the order is not pending.
    pub async fn retry_issuance(&self, order_id: OrderId) -> Result<Order, BoxOfficeError> {
        tracing::info!(order_id = %order_id, "Operator retry requested");
        let order = self
            .dispatch(order_id, OrderAction::RetryIssuance { order_id })
            .await?;

        match order.status {
            OrderStatus::Issued => Ok(order),
            _ => Err(BoxOfficeError::IssuanceFailed {
                order_id,
                reason: order
                    .last_error
                    .unwrap_or_else(|| "issuance did not complete".to_string()),
            }),
        }
    }

    /// Paid orders waiting for tickets, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`BoxOfficeError::Repository`] if orders cannot be read.
    pub async fn list_pending_orders(&self) -> Result<Vec<Order>, BoxOfficeError> {
        let pending = self
            .repository
            .list_by_status(OrderStatus::PaidPendingIssuance)
            .await?;
        metrics::set_pending_orders(pending.len());
        Ok(pending)
    }

    /// Give up on an order that has not been issued.
    ///
    /// # Errors
    ///
    /// Returns [`BoxOfficeError::DuplicateIssuance`] for an issued order.
    pub async fn mark_failed_permanent(&self, order_id: OrderId, reason: String) -> Result<Order, BoxOfficeError> {
        tracing::warn!(order_id = %order_id, reason = %reason, "Operator marked order failed");
        self.dispatch(order_id, OrderAction::MarkFailedPermanent { order_id, reason })
            .await
    }

    /// Load an order.
    ///
    /// # Errors
    ///
    /// Returns [`BoxOfficeError::OrderNotFound`] if there is no such order.
    pub async fn get_order(&self, order_id: OrderId) -> Result<Order, BoxOfficeError> {
        self.repository
            .get(order_id)
            .await?
            .ok_or(BoxOfficeError::OrderNotFound(order_id))
    }

    /// Log every order left pending by a previous run. Nothing is retried.
    ///
    /// # Errors
    ///
    /// Returns [`BoxOfficeError::Repository`] if orders cannot be read.
    pub async fn report_pending_on_startup(&self) -> Result<usize, BoxOfficeError> {
        let pending = self.list_pending_orders().await?;
        for order in &pending {
            tracing::warn!(
                order_id = %order.id,
                buyer_email = %order.buyer.email,
                amount_paid = order.amount_paid.unwrap_or(Money::ZERO).minor_units(),
                payment_reference = order.payment_reference.as_deref().unwrap_or("-"),
                attempts = order.issuance_attempts,
                last_error = order.last_error.as_deref().unwrap_or("-"),
                "Order awaiting ticket issuance from a previous run"
            );
        }
        if pending.is_empty() {
            tracing::info!("No orders awaiting issuance");
        } else {
            tracing::warn!(count = pending.len(), "Orders need operator retry");
        }
        Ok(pending.len())
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    async fn dispatch(&self, order_id: OrderId, command: OrderAction) -> Result<Order, BoxOfficeError> {
        self.dispatch_observed(order_id, command)
            .await
            .map(|(_, after)| after)
    }

    /// Runs a command to completion; returns the order before and after.
    async fn dispatch_observed(
        &self,
        order_id: OrderId,
        command: OrderAction,
    ) -> Result<(Option<Order>, Order), BoxOfficeError> {
        let _guard = self.locks.lock(&order_id).await;

        let initial = self.repository.get(order_id).await?;
        let mut state = initial
            .clone()
            .map_or_else(OrderState::new, OrderState::with_order);

        let mut queue = VecDeque::from([command]);
        let mut is_command = true;
        while let Some(action) = queue.pop_front() {
            let before = state.get(&order_id).cloned();
            let observed = action.clone();
            let effects = self.reducer.reduce(&mut state, action, &self.env);

            if let Some(rejection) = state.last_error.take() {
                if is_command {
                    return Err(rejection.into());
                }
                tracing::warn!(order_id = %order_id, rejection = %rejection, "Effect result rejected");
            }
            is_command = false;

            if let Some(after) = state.get(&order_id) {
                if before.as_ref() != Some(after) {
                    self.repository.save(after).await?;
                }
                self.observe(&observed, before.as_ref(), after);
            }

            queue.extend(execute_all(effects).await);
        }

        let after = state
            .get(&order_id)
            .cloned()
            .ok_or(BoxOfficeError::OrderNotFound(order_id))?;
        Ok((initial, after))
    }

    /// Metrics and operator logs for a reduced action.
    fn observe(&self, action: &OrderAction, before: Option<&Order>, after: &Order) {
        match action {
            OrderAction::TicketsIssued { batch, .. } => {
                metrics::record_issuance_succeeded(batch.len() as u64);
            },
            OrderAction::IssuanceFailed { error, .. } => {
                metrics::record_issuance_failed(matches!(error, IssuanceError::TimedOut { .. }));
                tracing::warn!(
                    order_id = %after.id,
                    buyer_email = %after.buyer.email,
                    amount_paid = after.amount_paid.unwrap_or(Money::ZERO).minor_units(),
                    payment_reference = after.payment_reference.as_deref().unwrap_or("-"),
                    attempt = after.issuance_attempts,
                    error = %error,
                    "Ticket issuance failed; order needs operator retry"
                );
            },
            _ => {},
        }

        let was_failed = before.is_some_and(|order| order.status == OrderStatus::FailedPermanent);
        if after.status == OrderStatus::FailedPermanent && !was_failed {
            metrics::record_order_failed_permanent();
            tracing::warn!(
                order_id = %after.id,
                reason = after.last_error.as_deref().unwrap_or("-"),
                max_attempts = ?self.env.max_issuance_attempts,
                "Order failed permanently"
            );
        }
    }
}
