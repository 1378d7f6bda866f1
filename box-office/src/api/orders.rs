//! Order endpoints.
//!
//! - POST /api/events/:event_id/orders
//! - GET /api/orders/:order_id

#![allow(clippy::missing_errors_doc)] // handlers return AppError

use crate::api::catalog::CartRequest;
use crate::api::error::AppError;
use crate::app::SubmittedOrder;
use crate::server::state::AppState;
use crate::types::{Buyer, EventId, Order, OrderId};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

/// Request to submit an order.
#[derive(Debug, Deserialize)]
pub struct SubmitOrderRequest {
    /// Selected quantities
    #[serde(flatten)]
    pub cart: CartRequest,
    /// Buyer details
    pub buyer: Buyer,
}

/// Submit a cart. Responds 201 with the order and, for paid orders, the
/// checkout redirect.
pub async fn submit_order(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    Json(request): Json<SubmitOrderRequest>,
) -> Result<(StatusCode, Json<SubmittedOrder>), AppError> {
    let event_id = EventId::new(event_id);
    let (_, cart) = state
        .box_office
        .build_cart(&event_id, &request.cart.pairs())
        .await?;
    let submitted = state.box_office.submit_order(&cart, request.buyer).await?;
    Ok((StatusCode::CREATED, Json(submitted)))
}

/// Order status, tickets once issued.
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = state.box_office.get_order(OrderId::from_uuid(order_id)).await?;
    Ok(Json(order))
}
