//! Operator endpoints for orders that need attention.
//!
//! - GET /api/admin/orders/pending
//! - POST /api/admin/orders/:order_id/retry
//! - POST /api/admin/orders/:order_id/fail

#![allow(clippy::missing_errors_doc)] // handlers return AppError

use crate::api::error::AppError;
use crate::server::state::AppState;
use crate::types::{Order, OrderId};
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Response for the pending listing.
#[derive(Debug, Serialize)]
pub struct PendingOrdersResponse {
    /// Number of pending orders
    pub count: usize,
    /// Pending orders, oldest first
    pub orders: Vec<Order>,
}

/// Request to give up on an order.
#[derive(Debug, Deserialize)]
pub struct FailOrderRequest {
    /// Recorded as the order's last error
    pub reason: String,
}

/// Paid orders waiting for tickets.
pub async fn list_pending(State(state): State<AppState>) -> Result<Json<PendingOrdersResponse>, AppError> {
    let orders = state.box_office.list_pending_orders().await?;
    Ok(Json(PendingOrdersResponse {
        count: orders.len(),
        orders,
    }))
}

/// Retry issuance for a pending order.
pub async fn retry_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .box_office
        .retry_issuance(OrderId::from_uuid(order_id))
        .await?;
    Ok(Json(order))
}

/// Mark an order failed permanently.
pub async fn fail_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<FailOrderRequest>,
) -> Result<Json<Order>, AppError> {
    if request.reason.trim().is_empty() {
        return Err(AppError::bad_request("reason is required"));
    }
    let order = state
        .box_office
        .mark_failed_permanent(OrderId::from_uuid(order_id), request.reason)
        .await?;
    Ok(Json(order))
}
