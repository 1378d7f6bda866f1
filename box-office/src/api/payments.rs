//! Payment confirmation webhook.
//!
//! POST /api/payments/webhook with `{ session_id, amount_paid, status }`.
//!
//! The gateway redelivers anything that is not acknowledged with a 2xx, so
//! outcomes a redelivery cannot change (unknown session, order already failed)
//! are acknowledged and logged. Storage failures are not acknowledged.

#![allow(clippy::missing_errors_doc)] // handlers return AppError

use crate::api::error::AppError;
use crate::error::BoxOfficeError;
use crate::payment_gateway::PaymentConfirmation;
use crate::server::state::AppState;
use axum::{extract::State, Json};
use serde::Serialize;

/// Webhook acknowledgement.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    /// Always `true`
    pub received: bool,
}

/// Apply a confirmation signal.
pub async fn payment_webhook(
    State(state): State<AppState>,
    Json(confirmation): Json<PaymentConfirmation>,
) -> Result<Json<WebhookAck>, AppError> {
    let session_id = confirmation.session_id.clone();
    match state.box_office.confirm_payment(confirmation).await {
        // A failed issuance is not an error here: the order stays pending
        // for an operator and the payment itself was recorded.
        Ok(_)
        | Err(BoxOfficeError::UnknownPaymentReference(_) | BoxOfficeError::InvalidTransition(_)) => {
            Ok(Json(WebhookAck { received: true }))
        },
        Err(error) => {
            tracing::error!(payment_reference = %session_id, error = %error, "Confirmation not recorded");
            Err(error.into())
        },
    }
}
