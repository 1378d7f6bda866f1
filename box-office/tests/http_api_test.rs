//! HTTP API tests.
//!
//! Sends requests straight into the router with `tower::ServiceExt::oneshot`;
//! no socket is opened.
//!
//! Run with: `cargo test --test http_api_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use box_office::app::{BoxOffice, CatalogService, CheckoutSettings};
use box_office::notifier::RecordingNotifier;
use box_office::payment_gateway::MockPaymentGateway;
use box_office::provider::InMemoryTicketingProvider;
use box_office::repository::InMemoryOrderRepository;
use box_office::server::{build_router, AppState};
use box_office::types::{Bundle, BundleComponent, BundleId, EventId, Money, TicketType, TicketTypeId};
use box_office::OrderEnvironment;
use box_office_core::environment::SystemClock;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn app() -> (Router, InMemoryTicketingProvider) {
    let provider = InMemoryTicketingProvider::new();
    provider.add_event(
        EventId::new("gala"),
        vec![
            TicketType {
                id: TicketTypeId::new("a"),
                name: "Adult".to_string(),
                price: Money::from_minor(1_000),
                remaining: 3,
                max_per_order: 10,
            },
            TicketType {
                id: TicketTypeId::new("c"),
                name: "Child".to_string(),
                price: Money::from_minor(400),
                remaining: 0,
                max_per_order: 10,
            },
        ],
        vec![
            Bundle {
                id: BundleId::new("pair"),
                name: "Pair".to_string(),
                price: Money::from_minor(1_800),
                max_quantity: 5,
                components: vec![BundleComponent {
                    ticket_type_id: TicketTypeId::new("a"),
                    quantity: 2,
                }],
            },
            Bundle {
                id: BundleId::new("family"),
                name: "Family".to_string(),
                price: Money::from_minor(2_500),
                max_quantity: 5,
                components: vec![
                    BundleComponent {
                        ticket_type_id: TicketTypeId::new("a"),
                        quantity: 1,
                    },
                    BundleComponent {
                        ticket_type_id: TicketTypeId::new("c"),
                        quantity: 1,
                    },
                ],
            },
        ],
    );

    let clock = Arc::new(SystemClock);
    let catalog = Arc::new(CatalogService::new(provider.shared(), clock.clone(), Duration::from_secs(60)));
    let env = OrderEnvironment::new(
        clock,
        provider.shared(),
        RecordingNotifier::new().shared(),
        Duration::from_secs(5),
    );
    let office = BoxOffice::new(
        catalog,
        Arc::new(InMemoryOrderRepository::new()),
        MockPaymentGateway::new().shared(),
        env,
        CheckoutSettings {
            currency: "usd".to_string(),
            platform_fee_percent: 10,
        },
    );

    (build_router(AppState::new(Arc::new(office))), provider)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map_or_else(Body::empty, |value| Body::from(value.to_string())))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

fn selections(pairs: &[(&str, &str, u32)]) -> Value {
    let selections: Vec<Value> = pairs
        .iter()
        .map(|(kind, id, quantity)| json!({ "line": { "kind": kind, "id": id }, "quantity": quantity }))
        .collect();
    json!({ "selections": selections })
}

fn line<'a>(evaluation: &'a Value, kind: &str, id: &str) -> &'a Value {
    evaluation["lines"]
        .as_array()
        .unwrap()
        .iter()
        .find(|line| line["line"]["kind"] == kind && line["line"]["id"] == id)
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let (app, _) = app();
    let (status, body) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_catalog_reports_bundle_availability() {
    let (app, _) = app();
    let (status, body) = send(&app, "GET", "/api/events/gala/catalog", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ticket_types"].as_array().unwrap().len(), 2);
    let bundles = body["bundles"].as_array().unwrap();
    let pair = bundles.iter().find(|b| b["id"] == "pair").unwrap();
    let family = bundles.iter().find(|b| b["id"] == "family").unwrap();
    assert_eq!(pair["availability"]["max_purchasable"], 1);
    assert_eq!(family["availability"]["is_available"], false);
}

#[tokio::test]
async fn test_unknown_event_is_not_found() {
    let (app, _) = app();
    let (status, body) = send(&app, "GET", "/api/events/nope/catalog", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_evaluate_blocks_bundle_that_would_oversell() {
    let (app, _) = app();

    let (status, body) = send(
        &app,
        "POST",
        "/api/events/gala/cart/evaluate",
        Some(selections(&[("ticket", "a", 2)])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(line(&body, "bundle", "pair")["can_increment"], false);
    assert_eq!(line(&body, "bundle", "family")["can_increment"], false);
    assert_eq!(line(&body, "ticket", "a")["can_decrement"], true);
    assert_eq!(body["preview"]["total_amount"], 2_000);

    let (_, body) = send(&app, "POST", "/api/events/gala/cart/evaluate", Some(selections(&[]))).await;
    assert_eq!(line(&body, "bundle", "pair")["can_increment"], true);
    assert!(body["preview"].is_null());
}

#[tokio::test]
async fn test_submit_webhook_and_fetch_order() {
    let (app, provider) = app();

    let mut request = selections(&[("bundle", "pair", 1)]);
    request["buyer"] = json!({ "name": "Ada", "email": "ada@example.com" });
    let (status, submitted) = send(&app, "POST", "/api/events/gala/orders", Some(request)).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(submitted["order"]["status"], "awaiting_payment");
    assert_eq!(submitted["checkout"]["platform_fee"], 180);
    let session_id = submitted["checkout"]["session_id"].as_str().unwrap().to_string();
    let order_id = submitted["order"]["id"].as_str().unwrap().to_string();

    let webhook = json!({ "session_id": session_id, "amount_paid": 1_800, "status": "paid" });
    let (status, ack) = send(&app, "POST", "/api/payments/webhook", Some(webhook.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["received"], true);

    // Redelivery is acknowledged and changes nothing
    let (status, _) = send(&app, "POST", "/api/payments/webhook", Some(webhook)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, order) = send(&app, "GET", &format!("/api/orders/{order_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "issued");
    assert_eq!(order["issuance_attempts"], 1);
    assert_eq!(provider.issue_calls(), 1);
}

#[tokio::test]
async fn test_submit_rejects_invalid_buyer() {
    let (app, _) = app();

    let mut request = selections(&[("ticket", "a", 1)]);
    request["buyer"] = json!({ "name": "Ada", "email": "not-an-email" });
    let (status, body) = send(&app, "POST", "/api/events/gala/orders", Some(request)).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "INVALID_BUYER");
}

#[tokio::test]
async fn test_submit_rejects_oversold_cart() {
    let (app, _) = app();

    let mut request = selections(&[("ticket", "a", 2), ("bundle", "pair", 1)]);
    request["buyer"] = json!({ "name": "Ada", "email": "ada@example.com" });
    let (status, body) = send(&app, "POST", "/api/events/gala/orders", Some(request)).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CAPACITY_EXCEEDED");
}

#[tokio::test]
async fn test_repeated_line_is_rejected() {
    let (app, _) = app();

    let (status, body) = send(
        &app,
        "POST",
        "/api/events/gala/cart/evaluate",
        Some(selections(&[("ticket", "a", 1), ("ticket", "a", 1)])),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "INVALID_CART");
}

#[tokio::test]
async fn test_unknown_webhook_session_is_acknowledged() {
    let (app, _) = app();
    let webhook = json!({ "session_id": "cs_test_nope", "amount_paid": 100, "status": "paid" });

    let (status, ack) = send(&app, "POST", "/api/payments/webhook", Some(webhook)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["received"], true);
}

#[tokio::test]
async fn test_admin_fail_and_retry() {
    let (app, _) = app();

    let mut request = selections(&[("ticket", "a", 1)]);
    request["buyer"] = json!({ "name": "Ada", "email": "ada@example.com" });
    let (_, submitted) = send(&app, "POST", "/api/events/gala/orders", Some(request)).await;
    let order_id = submitted["order"]["id"].as_str().unwrap().to_string();

    let (status, pending) = send(&app, "GET", "/api/admin/orders/pending", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pending["count"], 0);

    let (status, body) = send(&app, "POST", &format!("/api/admin/orders/{order_id}/retry"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_TRANSITION");

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/admin/orders/{order_id}/fail"),
        Some(json!({ "reason": " " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, failed) = send(
        &app,
        "POST",
        &format!("/api/admin/orders/{order_id}/fail"),
        Some(json!({ "reason": "abandoned" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(failed["status"], "failed_permanent");
    assert_eq!(failed["last_error"], "abandoned");
}

#[tokio::test]
async fn test_missing_order_is_not_found() {
    let (app, _) = app();
    let uri = format!("/api/orders/{}", uuid::Uuid::new_v4());

    let (status, body) = send(&app, "GET", &uri, None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}
