//! Domain types for the box office.
//!
//! Catalog entries (ticket types, bundles) are owned by the ticketing
//! provider and only read here. Orders are owned by this crate and are never
//! deleted: an order only moves forward through [`OrderStatus`].

use crate::error::OrderRejection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use uuid::Uuid;

/// Cap applied when the provider does not report a per-order limit.
pub const DEFAULT_ITEM_CAP: u32 = 10;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! provider_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a provider-assigned identifier
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// The raw identifier
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }
    };
}

provider_id!(
    /// Identifier of an event (occurrence) at the ticketing provider
    EventId
);
provider_id!(
    /// Identifier of a ticket type at the ticketing provider
    TicketTypeId
);
provider_id!(
    /// Identifier of a bundle at the ticketing provider
    BundleId
);

/// Unique identifier for an order.
///
/// Doubles as the idempotency token sent to the ticketing provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(Uuid);

impl OrderId {
    /// Creates a new random `OrderId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `OrderId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Money (minor currency units)
// ============================================================================

/// An amount in minor currency units (cents, paise, ...)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from minor units
    #[must_use]
    pub const fn from_minor(units: u64) -> Self {
        Self(units)
    }

    /// Returns the amount in minor units
    #[must_use]
    pub const fn minor_units(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Subtracts, returning `None` if the result would be negative
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Multiplies by a quantity with overflow checking
    #[must_use]
    pub const fn checked_multiply(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as u64) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// A purchasable ticket SKU with its own price and stock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketType {
    /// Provider id
    pub id: TicketTypeId,
    /// Display name
    pub name: String,
    /// Unit price
    pub price: Money,
    /// Stock currently available
    pub remaining: u32,
    /// Most units of this type a single order may contain
    pub max_per_order: u32,
}

/// One constituent of a bundle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleComponent {
    /// Ticket type consumed
    pub ticket_type_id: TicketTypeId,
    /// Units of that ticket type consumed per bundle
    pub quantity: u32,
}

/// A composite SKU that consumes stock from several ticket types.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    /// Provider id
    pub id: BundleId,
    /// Display name
    pub name: String,
    /// Bundle price (its own listed price, not the sum of its parts)
    pub price: Money,
    /// Bundle-level cap, independent of underlying stock
    pub max_quantity: u32,
    /// Constituents, in provider order
    pub components: Vec<BundleComponent>,
}

// ============================================================================
// Orders
// ============================================================================

/// Buyer identity captured at checkout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buyer {
    /// Full name
    pub name: String,
    /// Email address
    pub email: String,
    /// Optional phone number
    pub phone: Option<String>,
}

/// A flattened, ticket-type keyed line sent to the ticketing provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseItem {
    /// Ticket type
    pub ticket_type_id: TicketTypeId,
    /// Units
    pub quantity: u32,
}

/// A single attendee ticket generated by the provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedTicket {
    /// Provider id of the issued ticket
    pub id: String,
    /// Ticket type it was issued for
    pub ticket_type_id: TicketTypeId,
    /// Barcode shown at the door
    pub barcode: String,
}

/// The tickets issued for one order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketBatch {
    /// Issued tickets
    pub tickets: Vec<IssuedTicket>,
}

impl TicketBatch {
    /// Creates a batch from issued tickets
    #[must_use]
    pub const fn new(tickets: Vec<IssuedTicket>) -> Self {
        Self { tickets }
    }

    /// Number of tickets in the batch
    #[must_use]
    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    /// Whether the batch holds no tickets
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    /// Ticket count per ticket type
    #[must_use]
    pub fn count_by_type(&self) -> BTreeMap<TicketTypeId, u32> {
        let mut counts = BTreeMap::new();
        for ticket in &self.tickets {
            *counts.entry(ticket.ticket_type_id.clone()).or_insert(0_u32) += 1;
        }
        counts
    }

    /// Appends another batch
    #[must_use]
    pub fn merged(mut self, other: Self) -> Self {
        self.tickets.extend(other.tickets);
        self
    }
}

/// Where an order is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created, waiting for the gateway to confirm payment
    AwaitingPayment,
    /// Paid (or free), tickets not issued yet
    PaidPendingIssuance,
    /// Tickets issued (terminal)
    Issued,
    /// Given up on; refunds are handled manually (terminal)
    FailedPermanent,
}

impl OrderStatus {
    /// Storage/wire name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingPayment => "awaiting_payment",
            Self::PaidPendingIssuance => "paid_pending_issuance",
            Self::Issued => "issued",
            Self::FailedPermanent => "failed_permanent",
        }
    }

    /// Whether no further transition is possible
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Issued | Self::FailedPermanent)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "awaiting_payment" => Ok(Self::AwaitingPayment),
            "paid_pending_issuance" => Ok(Self::PaidPendingIssuance),
            "issued" => Ok(Self::Issued),
            "failed_permanent" => Ok(Self::FailedPermanent),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

/// An order, from checkout submission to issuance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order id (also the provider idempotency token)
    pub id: OrderId,
    /// Event the tickets are for
    pub event_id: EventId,
    /// Buyer identity
    pub buyer: Buyer,
    /// ISO currency code, lowercase
    pub currency: String,
    /// Purchase items captured at submission; never re-derived
    pub items: Vec<PurchaseItem>,
    /// Amount charged
    pub total_amount: Money,
    /// Gateway session id, once a session exists
    pub payment_reference: Option<String>,
    /// Lifecycle status
    pub status: OrderStatus,
    /// Issuance attempts started, successful or not
    pub issuance_attempts: u32,
    /// Tickets, once issued
    pub tickets: Option<TicketBatch>,
    /// Most recent failure, for operators
    pub last_error: Option<String>,
    /// Amount the gateway reported as captured
    pub amount_paid: Option<Money>,
    /// When the order was created
    pub created_at: DateTime<Utc>,
    /// When the order last changed
    pub updated_at: DateTime<Utc>,
    /// When payment was confirmed
    pub paid_at: Option<DateTime<Utc>>,
    /// When tickets were issued
    pub issued_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Total number of tickets the order will produce
    #[must_use]
    pub fn ticket_count(&self) -> u64 {
        self.items.iter().map(|item| u64::from(item.quantity)).sum()
    }

    /// Whether no payment step precedes issuance
    #[must_use]
    pub const fn is_free(&self) -> bool {
        self.total_amount.is_zero()
    }
}

/// State of the order reconciliation reducer.
///
/// The service loads only the orders a command touches, so in practice this
/// holds one order at a time.
#[derive(Clone, Debug, Default)]
pub struct OrderState {
    /// Orders by id
    pub orders: HashMap<OrderId, Order>,
    /// Rejection produced by the last command, if any
    pub last_error: Option<OrderRejection>,
}

impl OrderState {
    /// Creates an empty state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a state holding one order
    #[must_use]
    pub fn with_order(order: Order) -> Self {
        let mut state = Self::new();
        state.orders.insert(order.id, order);
        state
    }

    /// Gets an order by id
    #[must_use]
    pub fn get(&self, order_id: &OrderId) -> Option<&Order> {
        self.orders.get(order_id)
    }

    /// Number of orders held
    #[must_use]
    pub fn count(&self) -> usize {
        self.orders.len()
    }
}
