//! Application services.
//!
//! - [`CatalogService`]: cached catalog and inventory per event
//! - [`BoxOffice`]: carts, order submission, payment confirmation and
//!   operator recovery

pub mod box_office;
pub mod catalog;

pub use box_office::{
    BoxOffice, CartEvaluation, CheckoutSettings, CheckoutSummary, LineEvaluation, SubmittedOrder,
};
pub use catalog::CatalogService;
