//! Application state for the HTTP server.

use crate::app::BoxOffice;
use std::sync::Arc;

/// State shared across handlers; cloned per request.
#[derive(Clone)]
pub struct AppState {
    /// The box office service
    pub box_office: Arc<BoxOffice>,
}

impl AppState {
    /// Create the application state
    #[must_use]
    pub const fn new(box_office: Arc<BoxOffice>) -> Self {
        Self { box_office }
    }
}
