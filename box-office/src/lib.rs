//! Box Office - shared-inventory reservation and order reconciliation for an
//! event-ticketing storefront.
//!
//! Sits between a hosted payment gateway and an external ticketing provider
//! that owns the real inventory:
//!
//! - **Reservation checking**: a cart line may only grow if, counting stock
//!   consumed through bundles as well as standalone selections, no ticket
//!   type would be oversold
//! - **Checkout assembly**: bundles flatten into per-ticket-type purchase
//!   items captured on the order at submission
//! - **Order reconciliation**: an order moves through
//!   `awaiting_payment → paid_pending_issuance → issued` (or
//!   `failed_permanent`), and a paid order never silently loses its tickets
//!
//! # Architecture
//!
//! ```text
//!   HTTP (api, server)
//!          │
//!          ▼
//!   ┌──────────────┐   catalog reads   ┌────────────────────┐
//!   │  BoxOffice   │ ────────────────▶ │ TicketingProvider  │
//!   │  (app)       │                   └────────────────────┘
//!   │              │   sessions        ┌────────────────────┐
//!   │              │ ────────────────▶ │  PaymentGateway    │
//!   └──────────────┘                   └────────────────────┘
//!          │ commands (per-order lock)
//!          ▼
//!   ┌──────────────┐   effects: issue tickets, notify buyer
//!   │ OrderReducer │ ─────────────────────────────────────▶ runtime
//!   └──────────────┘
//!          │ every transition
//!          ▼
//!   OrderRepository (memory / PostgreSQL)
//! ```
//!
//! # Issuance idempotency
//!
//! Issuance uses the order id as the provider reference. Each attempt first
//! lists what the provider already issued under that reference and requests
//! only the shortfall, so a retry after a timed-out call whose tickets were
//! created anyway does not issue twice.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregates;
pub mod api;
pub mod app;
pub mod checkout;
pub mod config;
pub mod error;
pub mod inventory;
pub mod issuance;
pub mod metrics;
pub mod notifier;
pub mod payment_gateway;
pub mod provider;
pub mod repository;
pub mod reservation;
pub mod server;
pub mod types;

pub use aggregates::{OrderAction, OrderEnvironment, OrderReducer};
pub use app::{BoxOffice, CatalogService, CheckoutSettings};
pub use config::Config;
pub use error::{BoxOfficeError, OrderRejection};
pub use reservation::{can_decrement, can_increment, Cart, LineId};
pub use types::*;
