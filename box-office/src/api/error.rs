//! Error type for HTTP handlers.
//!
//! Bridges [`BoxOfficeError`] to HTTP responses with a `{ code, message }`
//! JSON body.

use crate::error::BoxOfficeError;
use crate::provider::ProviderError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

/// Application error returned by handlers.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    code: &'static str,
    /// Logged for server errors, never sent to the client
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>, code: &'static str) -> Self {
        Self {
            status,
            message: message.into(),
            code,
            source: None,
        }
    }

    /// Attach an internal error for logging.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// 400 Bad Request
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, "BAD_REQUEST")
    }

    /// 404 Not Found
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("{resource} with id {id} not found"),
            "NOT_FOUND",
        )
    }

    /// 409 Conflict
    #[must_use]
    pub fn conflict(message: impl Into<String>, code: &'static str) -> Self {
        Self::new(StatusCode::CONFLICT, message, code)
    }

    /// 422 Unprocessable Entity
    #[must_use]
    pub fn validation(message: impl Into<String>, code: &'static str) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message, code)
    }

    /// 502 Bad Gateway
    #[must_use]
    pub fn bad_gateway(message: impl Into<String>, code: &'static str) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message, code)
    }

    /// 503 Service Unavailable
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message, "SERVICE_UNAVAILABLE")
    }

    /// 500 Internal Server Error
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message, "INTERNAL_SERVER_ERROR")
    }

    /// HTTP status
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                ),
                None => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    "Request failed"
                ),
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<BoxOfficeError> for AppError {
    fn from(err: BoxOfficeError) -> Self {
        let message = err.to_string();
        match err {
            BoxOfficeError::CapacityExceeded(_) => Self::conflict(message, "CAPACITY_EXCEEDED"),
            BoxOfficeError::InvalidCart(_) => Self::validation(message, "INVALID_CART"),
            BoxOfficeError::EmptyCart => Self::validation(message, "EMPTY_CART"),
            BoxOfficeError::InvalidBuyer(_) => Self::validation(message, "INVALID_BUYER"),
            BoxOfficeError::PaymentSession(_) => Self::bad_gateway(message, "PAYMENT_SESSION_FAILED"),
            BoxOfficeError::IssuanceFailed { .. } => Self::bad_gateway(message, "ISSUANCE_FAILED"),
            BoxOfficeError::DuplicateIssuance(_) => Self::conflict(message, "ALREADY_ISSUED"),
            BoxOfficeError::UnknownPaymentReference(reference) => {
                Self::not_found("payment session", reference)
            },
            BoxOfficeError::OrderNotFound(order_id) => Self::not_found("order", order_id),
            BoxOfficeError::InvalidTransition(_) => Self::conflict(message, "INVALID_TRANSITION"),
            BoxOfficeError::Catalog(ProviderError::Rejected { status: 404, .. }) => {
                Self::new(StatusCode::NOT_FOUND, message, "NOT_FOUND")
            },
            BoxOfficeError::Catalog(source) => {
                Self::unavailable(message).with_source(anyhow::Error::new(source))
            },
            BoxOfficeError::Repository(source) => {
                Self::internal("order storage failed").with_source(anyhow::Error::new(source))
            },
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("an internal error occurred").with_source(err)
    }
}
