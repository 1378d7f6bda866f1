//! Aggregate reducers for the box office.
//!
//! - Order: payment confirmation, ticket issuance and operator retry

pub mod order;

pub use order::{IssuanceError, OrderAction, OrderEnvironment, OrderReducer};
