//! Service-level error taxonomy.
//!
//! Each layer has its own `thiserror` enum (cart, checkout, provider,
//! gateway, repository); [`BoxOfficeError`] is what the upward-facing
//! operations return.

use crate::checkout::CheckoutError;
use crate::payment_gateway::GatewayError;
use crate::provider::ProviderError;
use crate::repository::RepositoryError;
use crate::reservation::CartError;
use crate::types::{OrderId, OrderStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why the order reducer refused a command.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum OrderRejection {
    /// No such order
    #[error("order {0} not found")]
    NotFound(OrderId),
    /// An order with this id already exists
    #[error("order {0} already exists")]
    AlreadyExists(OrderId),
    /// The order has not been paid yet
    #[error("order {0} has not been paid")]
    NotPaid(OrderId),
    /// Tickets were already issued
    #[error("order {0} already has tickets issued")]
    AlreadyIssued(OrderId),
    /// The order was marked failed permanently
    #[error("order {0} has failed permanently")]
    FailedPermanent(OrderId),
    /// No further issuance attempts are allowed
    #[error("order {order_id} reached the limit of {limit} issuance attempts")]
    AttemptLimitReached {
        /// Order
        order_id: OrderId,
        /// Configured limit
        limit: u32,
    },
    /// The confirmation does not match the order's payment session
    #[error("payment reference {reference} does not belong to order {order_id}")]
    MissingPaymentReference {
        /// Order
        order_id: OrderId,
        /// Reference carried by the confirmation
        reference: String,
    },
    /// The command needs a different status
    #[error("order {order_id} is {status}, expected {expected}")]
    NotPending {
        /// Order
        order_id: OrderId,
        /// Current status
        status: OrderStatus,
        /// Status the command requires
        expected: OrderStatus,
    },
}

/// Errors returned by the box office operations.
#[derive(Debug, Error)]
pub enum BoxOfficeError {
    /// The cart would oversell stock or exceed a per-item cap
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(CartError),

    /// The cart does not describe a purchasable order
    #[error("invalid cart: {0}")]
    InvalidCart(String),

    /// Submitted with nothing selected
    #[error("cart is empty")]
    EmptyCart,

    /// Buyer details failed validation
    #[error("invalid buyer: {0}")]
    InvalidBuyer(String),

    /// The gateway failed to create a checkout session; nothing was charged
    #[error("payment session could not be created: {0}")]
    PaymentSession(#[source] GatewayError),

    /// The provider rejected or timed out during issuance; retry is possible
    #[error("ticket issuance failed for order {order_id}: {reason}")]
    IssuanceFailed {
        /// Order
        order_id: OrderId,
        /// Last issuance error
        reason: String,
    },

    /// Issuance was requested for an order that already has tickets
    #[error("order {0} already has tickets issued")]
    DuplicateIssuance(OrderId),

    /// A confirmation arrived for a session we never created
    #[error("no order for payment reference {0}")]
    UnknownPaymentReference(String),

    /// No such order
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    /// The order cannot make the requested transition
    #[error("invalid transition: {0}")]
    InvalidTransition(OrderRejection),

    /// Catalog data could not be loaded from the provider
    #[error("catalog unavailable: {0}")]
    Catalog(#[from] ProviderError),

    /// Order storage failed
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<CartError> for BoxOfficeError {
    fn from(err: CartError) -> Self {
        match err {
            CartError::UnknownLine(_) => Self::InvalidCart(err.to_string()),
            CartError::CapacityExceeded { .. }
            | CartError::PerItemCapExceeded { .. }
            | CartError::Unpurchasable(_) => Self::CapacityExceeded(err),
        }
    }
}

impl From<CheckoutError> for BoxOfficeError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::EmptyCart => Self::EmptyCart,
            CheckoutError::InvalidBuyer(reason) => Self::InvalidBuyer(reason),
            CheckoutError::TotalOverflow => Self::InvalidCart(err.to_string()),
        }
    }
}

impl From<OrderRejection> for BoxOfficeError {
    fn from(rejection: OrderRejection) -> Self {
        match rejection {
            OrderRejection::NotFound(order_id) => Self::OrderNotFound(order_id),
            OrderRejection::AlreadyIssued(order_id) => Self::DuplicateIssuance(order_id),
            other => Self::InvalidTransition(other),
        }
    }
}
