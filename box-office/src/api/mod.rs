//! JSON API handlers, organized by area:
//! - Catalog: event catalog and cart evaluation
//! - Orders: submission and status
//! - Payments: gateway confirmation webhook
//! - Admin: pending orders and operator recovery

pub mod admin;
pub mod catalog;
pub mod error;
pub mod orders;
pub mod payments;

pub use admin::{fail_order, list_pending, retry_order};
pub use catalog::{evaluate_cart, get_catalog};
pub use error::AppError;
pub use orders::{get_order, submit_order};
pub use payments::payment_webhook;
