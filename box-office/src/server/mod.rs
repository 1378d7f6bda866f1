//! HTTP server for the box office.
//!
//! - [`routes`]: router construction
//! - [`state`]: shared handler state
//! - [`health`]: liveness endpoint

pub mod health;
pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
