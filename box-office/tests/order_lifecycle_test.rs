//! Order lifecycle integration tests.
//!
//! Drives the `BoxOffice` service end to end against the in-memory ticketing
//! provider, mock payment gateway, recording notifier and in-memory order
//! repository.
//!
//! Run with: `cargo test --test order_lifecycle_test`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use box_office::app::{BoxOffice, CatalogService, CheckoutSettings, SubmittedOrder};
use box_office::error::{BoxOfficeError, OrderRejection};
use box_office::notifier::RecordingNotifier;
use box_office::payment_gateway::{ConfirmationStatus, GatewayError, MockPaymentGateway, PaymentConfirmation};
use box_office::provider::{InMemoryTicketingProvider, ProviderError};
use box_office::repository::{InMemoryOrderRepository, OrderRepository};
use box_office::reservation::LineId;
use box_office::types::{
    Bundle, BundleComponent, BundleId, Buyer, EventId, Money, Order, OrderStatus, TicketType, TicketTypeId,
};
use box_office::OrderEnvironment;
use box_office_core::environment::SystemClock;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    office: Arc<BoxOffice>,
    provider: InMemoryTicketingProvider,
    gateway: MockPaymentGateway,
    notifier: RecordingNotifier,
    repository: Arc<InMemoryOrderRepository>,
    event_id: EventId,
}

fn harness(issuance_timeout: Duration, max_attempts: Option<u32>) -> Harness {
    let event_id = EventId::new("ev_gala");
    let listing = |id: &str, price: u64, remaining: u32| TicketType {
        id: TicketTypeId::new(id),
        name: id.to_uppercase(),
        price: Money::from_minor(price),
        remaining,
        max_per_order: 10,
    };

    let provider = InMemoryTicketingProvider::new();
    provider.add_event(
        event_id.clone(),
        vec![listing("a", 1_000, 3), listing("b", 500, 10), listing("f", 0, 5)],
        vec![Bundle {
            id: BundleId::new("pair"),
            name: "Pair of A".to_string(),
            price: Money::from_minor(1_800),
            max_quantity: 5,
            components: vec![BundleComponent {
                ticket_type_id: TicketTypeId::new("a"),
                quantity: 2,
            }],
        }],
    );

    let clock = Arc::new(SystemClock);
    let gateway = MockPaymentGateway::new();
    let notifier = RecordingNotifier::new();
    let repository = Arc::new(InMemoryOrderRepository::new());
    let catalog = Arc::new(CatalogService::new(provider.shared(), clock.clone(), Duration::from_secs(60)));
    let env = OrderEnvironment::new(clock, provider.shared(), notifier.shared(), issuance_timeout)
        .with_max_issuance_attempts(max_attempts);

    let office = Arc::new(BoxOffice::new(
        catalog,
        repository.clone(),
        gateway.shared(),
        env,
        CheckoutSettings {
            currency: "usd".to_string(),
            platform_fee_percent: 10,
        },
    ));

    Harness {
        office,
        provider,
        gateway,
        notifier,
        repository,
        event_id,
    }
}

fn default_harness() -> Harness {
    harness(Duration::from_secs(5), None)
}

fn ticket(id: &str) -> LineId {
    LineId::Ticket(TicketTypeId::new(id))
}

fn buyer() -> Buyer {
    Buyer {
        name: "Grace Hopper".to_string(),
        email: "grace@example.com".to_string(),
        phone: Some("+1 555 010 9999".to_string()),
    }
}

impl Harness {
    async fn submit(&self, selections: &[(LineId, u32)]) -> Result<SubmittedOrder, BoxOfficeError> {
        let (_, cart) = self.office.build_cart(&self.event_id, selections).await?;
        self.office.submit_order(&cart, buyer()).await
    }

    async fn paid_order(&self, quantity: u32) -> Order {
        self.submit(&[(ticket("b"), quantity)]).await.unwrap().order
    }

    async fn confirm(&self, order: &Order) -> Result<Order, BoxOfficeError> {
        self.office
            .confirm_payment(PaymentConfirmation {
                session_id: order.payment_reference.clone().unwrap(),
                amount_paid: order.total_amount,
                status: ConfirmationStatus::Paid,
            })
            .await
    }
}

// ============================================================================
// Happy paths
// ============================================================================

#[tokio::test]
async fn test_paid_order_is_issued_after_confirmation() {
    let h = default_harness();

    let submitted = h.submit(&[(ticket("b"), 2)]).await.unwrap();
    assert_eq!(submitted.order.status, OrderStatus::AwaitingPayment);
    let checkout = submitted.checkout.clone().unwrap();
    assert_eq!(checkout.platform_fee, Money::from_minor(100));
    assert_eq!(checkout.merchant_receives, Money::from_minor(900));

    let issued = h.confirm(&submitted.order).await.unwrap();

    assert_eq!(issued.status, OrderStatus::Issued);
    assert_eq!(issued.issuance_attempts, 1);
    assert_eq!(issued.amount_paid, Some(Money::from_minor(1_000)));
    assert_eq!(issued.tickets.as_ref().unwrap().len(), 2);
    assert_eq!(h.notifier.sent(), vec![issued.id]);
    assert_eq!(h.office.get_order(issued.id).await.unwrap(), issued);
}

#[tokio::test]
async fn test_bundle_order_captures_flattened_items() {
    let h = default_harness();

    let submitted = h.submit(&[(LineId::Bundle(BundleId::new("pair")), 1), (ticket("b"), 1)]).await.unwrap();

    let items: Vec<_> = submitted
        .order
        .items
        .iter()
        .map(|item| (item.ticket_type_id.as_str().to_string(), item.quantity))
        .collect();
    assert_eq!(items, vec![("a".to_string(), 2), ("b".to_string(), 1)]);
    assert_eq!(submitted.order.total_amount, Money::from_minor(2_300));
    assert_eq!(h.gateway.intents()[0].lines.len(), 2);
}

#[tokio::test]
async fn test_free_cart_skips_payment_session() {
    let h = default_harness();

    let submitted = h.submit(&[(ticket("f"), 2)]).await.unwrap();

    assert!(submitted.checkout.is_none());
    assert_eq!(submitted.order.status, OrderStatus::Issued);
    assert!(submitted.order.payment_reference.is_none());
    assert_eq!(h.gateway.calls(), 0);
    assert_eq!(h.provider.issue_calls(), 1);
    assert_eq!(h.provider.remaining(&h.event_id, &TicketTypeId::new("f")), 3);
}

// ============================================================================
// At-least-once confirmations
// ============================================================================

#[tokio::test]
async fn test_duplicate_confirmation_issues_once() {
    let h = default_harness();
    let order = h.paid_order(1).await;

    let first = h.confirm(&order).await.unwrap();
    let second = h.confirm(&order).await.unwrap();

    assert_eq!(first.status, OrderStatus::Issued);
    assert_eq!(second, first);
    assert_eq!(second.issuance_attempts, 1);
    assert_eq!(h.provider.issue_calls(), 1);
    assert_eq!(h.notifier.sent().len(), 1);
}

#[tokio::test]
async fn test_duplicate_confirmation_while_pending_does_not_retry() {
    let h = default_harness();
    let order = h.paid_order(1).await;
    h.provider.fail_next_issue(ProviderError::Unreachable("reset".to_string()));

    let pending = h.confirm(&order).await.unwrap();
    let again = h.confirm(&order).await.unwrap();

    assert_eq!(pending.status, OrderStatus::PaidPendingIssuance);
    assert_eq!(again.status, OrderStatus::PaidPendingIssuance);
    assert_eq!(again.issuance_attempts, 1);
    assert_eq!(h.provider.issue_calls(), 1);
}

#[tokio::test]
async fn test_unpaid_confirmation_is_ignored() {
    let h = default_harness();
    let order = h.paid_order(1).await;

    let after = h
        .office
        .confirm_payment(PaymentConfirmation {
            session_id: order.payment_reference.clone().unwrap(),
            amount_paid: Money::ZERO,
            status: ConfirmationStatus::Unpaid,
        })
        .await
        .unwrap();

    assert_eq!(after.status, OrderStatus::AwaitingPayment);
    assert_eq!(after.issuance_attempts, 0);
    assert_eq!(h.provider.issue_calls(), 0);
}

#[tokio::test]
async fn test_amount_mismatch_is_recorded() {
    let h = default_harness();
    let order = h.paid_order(2).await;

    let issued = h
        .office
        .confirm_payment(PaymentConfirmation {
            session_id: order.payment_reference.clone().unwrap(),
            amount_paid: Money::from_minor(999),
            status: ConfirmationStatus::Paid,
        })
        .await
        .unwrap();

    assert_eq!(issued.status, OrderStatus::Issued);
    assert_eq!(issued.amount_paid, Some(Money::from_minor(999)));
}

// ============================================================================
// Issuance failures and operator recovery
// ============================================================================

#[tokio::test]
async fn test_timed_out_issuance_retry_reuses_existing_batch() {
    let h = harness(Duration::from_millis(50), None);
    let order = h.paid_order(3).await;

    // The provider creates the tickets but answers after the timeout
    h.provider.set_issue_delay(Some(Duration::from_millis(300)));
    let pending = h.confirm(&order).await.unwrap();

    assert_eq!(pending.status, OrderStatus::PaidPendingIssuance);
    assert!(pending.last_error.as_deref().unwrap().contains("did not answer"));
    assert_eq!(h.provider.issued_for(order.id).len(), 3);

    h.provider.set_issue_delay(None);
    let issued = h.office.retry_issuance(order.id).await.unwrap();

    assert_eq!(issued.status, OrderStatus::Issued);
    assert_eq!(issued.issuance_attempts, 2);
    assert_eq!(issued.tickets.as_ref().unwrap().len(), 3);
    assert_eq!(h.provider.issue_calls(), 1);
    assert_eq!(h.provider.issued_for(order.id).len(), 3);
    assert_eq!(h.provider.remaining(&h.event_id, &TicketTypeId::new("b")), 7);
}

#[tokio::test]
async fn test_rejected_issuance_waits_in_pending_bucket() {
    let h = default_harness();
    let order = h.paid_order(1).await;
    h.provider.fail_next_issue(ProviderError::Rejected {
        status: 500,
        message: "upstream error".to_string(),
    });

    let pending = h.confirm(&order).await.unwrap();
    let bucket = h.office.list_pending_orders().await.unwrap();

    assert_eq!(pending.status, OrderStatus::PaidPendingIssuance);
    assert_eq!(bucket.iter().map(|o| o.id).collect::<Vec<_>>(), vec![order.id]);
    assert_eq!(h.office.report_pending_on_startup().await.unwrap(), 1);
    assert!(h.notifier.sent().is_empty());

    let issued = h.office.retry_issuance(order.id).await.unwrap();
    assert_eq!(issued.status, OrderStatus::Issued);
    assert!(h.office.list_pending_orders().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_retry_keeps_order_pending() {
    let h = default_harness();
    let order = h.paid_order(1).await;
    h.provider.fail_next_issue(ProviderError::Unreachable("reset".to_string()));
    h.provider.fail_next_issue(ProviderError::Unreachable("reset again".to_string()));
    h.confirm(&order).await.unwrap();

    let result = h.office.retry_issuance(order.id).await;

    assert!(matches!(
        result,
        Err(BoxOfficeError::IssuanceFailed { order_id, ref reason }) if order_id == order.id && reason.contains("reset again")
    ));
    let stored = h.office.get_order(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::PaidPendingIssuance);
    assert_eq!(stored.issuance_attempts, 2);
}

#[tokio::test]
async fn test_attempt_limit_moves_order_to_failed_permanent() {
    let h = harness(Duration::from_secs(5), Some(2));
    let order = h.paid_order(1).await;
    h.provider.fail_next_issue(ProviderError::Unreachable("one".to_string()));
    h.provider.fail_next_issue(ProviderError::Unreachable("two".to_string()));
    h.confirm(&order).await.unwrap();

    assert!(matches!(
        h.office.retry_issuance(order.id).await,
        Err(BoxOfficeError::IssuanceFailed { .. })
    ));
    let stored = h.office.get_order(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::FailedPermanent);
    assert!(stored.last_error.as_deref().unwrap().contains("gave up after 2"));

    assert!(matches!(
        h.office.retry_issuance(order.id).await,
        Err(BoxOfficeError::InvalidTransition(OrderRejection::FailedPermanent(_)))
    ));
    assert_eq!(h.provider.issue_calls(), 2);
}

#[tokio::test]
async fn test_retry_of_issued_order_is_refused() {
    let h = default_harness();
    let order = h.paid_order(1).await;
    h.confirm(&order).await.unwrap();

    assert!(matches!(
        h.office.retry_issuance(order.id).await,
        Err(BoxOfficeError::DuplicateIssuance(_))
    ));
    assert!(matches!(
        h.office.mark_failed_permanent(order.id, "operator".to_string()).await,
        Err(BoxOfficeError::DuplicateIssuance(_))
    ));
    assert_eq!(h.provider.issue_calls(), 1);
}

#[tokio::test]
async fn test_retry_of_unpaid_order_is_refused() {
    let h = default_harness();
    let order = h.paid_order(1).await;

    assert!(matches!(
        h.office.retry_issuance(order.id).await,
        Err(BoxOfficeError::InvalidTransition(OrderRejection::NotPaid(_)))
    ));
    assert_eq!(h.provider.issue_calls(), 0);
}

#[tokio::test]
async fn test_confirmation_after_operator_failure_is_refused() {
    let h = default_harness();
    let order = h.paid_order(1).await;

    let failed = h
        .office
        .mark_failed_permanent(order.id, "buyer asked to cancel".to_string())
        .await
        .unwrap();
    assert_eq!(failed.status, OrderStatus::FailedPermanent);

    assert!(matches!(
        h.confirm(&order).await,
        Err(BoxOfficeError::InvalidTransition(OrderRejection::FailedPermanent(_)))
    ));
    assert_eq!(h.provider.issue_calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_confirmation_and_retry_issue_once() {
    let h = default_harness();
    let order = h.paid_order(2).await;
    h.provider.set_issue_delay(Some(Duration::from_millis(50)));

    let confirm = {
        let office = Arc::clone(&h.office);
        let session_id = order.payment_reference.clone().unwrap();
        let amount = order.total_amount;
        tokio::spawn(async move {
            office
                .confirm_payment(PaymentConfirmation {
                    session_id,
                    amount_paid: amount,
                    status: ConfirmationStatus::Paid,
                })
                .await
        })
    };
    let retry = {
        let office = Arc::clone(&h.office);
        let order_id = order.id;
        tokio::spawn(async move { office.retry_issuance(order_id).await })
    };

    let confirmed = confirm.await.unwrap().unwrap();
    // Depending on who wins the lock the retry sees an unpaid or an issued order
    let retried = retry.await.unwrap();
    assert!(matches!(
        retried,
        Err(BoxOfficeError::DuplicateIssuance(_) | BoxOfficeError::InvalidTransition(OrderRejection::NotPaid(_)))
    ));

    assert_eq!(confirmed.status, OrderStatus::Issued);
    assert_eq!(h.provider.issue_calls(), 1);
    assert_eq!(h.provider.issued_for(order.id).len(), 2);
}

// ============================================================================
// Submission failures
// ============================================================================

#[tokio::test]
async fn test_payment_session_failure_fails_order() {
    let h = default_harness();
    h.gateway.fail_next(GatewayError::RequestFailed("connection refused".to_string()));

    let result = h.submit(&[(ticket("b"), 1)]).await;

    assert!(matches!(result, Err(BoxOfficeError::PaymentSession(_))));
    let failed = h.repository.list_by_status(OrderStatus::FailedPermanent).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].last_error.as_deref().unwrap().contains("connection refused"));
    assert!(failed[0].payment_reference.is_none());
    assert_eq!(h.provider.issue_calls(), 0);
}

#[tokio::test]
async fn test_oversold_cart_is_rejected_before_any_write() {
    let h = default_harness();

    // 2 standalone + 2 via the bundle > 3 remaining
    let result = h.submit(&[(ticket("a"), 2), (LineId::Bundle(BundleId::new("pair")), 1)]).await;

    assert!(matches!(result, Err(BoxOfficeError::CapacityExceeded(_))));
    assert_eq!(h.gateway.calls(), 0);
    for status in [OrderStatus::AwaitingPayment, OrderStatus::FailedPermanent] {
        assert!(h.repository.list_by_status(status).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_empty_cart_is_rejected() {
    let h = default_harness();

    assert!(matches!(h.submit(&[]).await, Err(BoxOfficeError::EmptyCart)));
    assert_eq!(h.gateway.calls(), 0);
}

#[tokio::test]
async fn test_unknown_payment_reference() {
    let h = default_harness();

    let result = h
        .office
        .confirm_payment(PaymentConfirmation {
            session_id: "cs_test_unknown".to_string(),
            amount_paid: Money::from_minor(500),
            status: ConfirmationStatus::Paid,
        })
        .await;

    assert!(matches!(result, Err(BoxOfficeError::UnknownPaymentReference(_))));
}
