//! Router configuration for the box office.

use super::health::health_check;
use super::state::AppState;
use crate::api::{admin, catalog, orders, payments};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Build the complete Axum router.
///
/// Health at the root, everything else under `/api`.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Storefront
        .route("/events/:event_id/catalog", get(catalog::get_catalog))
        .route("/events/:event_id/cart/evaluate", post(catalog::evaluate_cart))
        .route("/events/:event_id/orders", post(orders::submit_order))
        .route("/orders/:order_id", get(orders::get_order))
        // Gateway callback
        .route("/payments/webhook", post(payments::payment_webhook))
        // Operators
        .route("/admin/orders/pending", get(admin::list_pending))
        .route("/admin/orders/:order_id/retry", post(admin::retry_order))
        .route("/admin/orders/:order_id/fail", post(admin::fail_order));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
