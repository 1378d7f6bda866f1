//! Payment gateway integration.
//!
//! The gateway hosts the checkout page. We create a session for an order and
//! later receive a confirmation signal for it; confirmations are delivered at
//! least once, so the session id doubles as the idempotency key.

use crate::checkout::{ChargeLine, FeeSplit};
use crate::types::{Buyer, EventId, Money, OrderId};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Payment gateway result
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Payment gateway errors.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Credentials are missing or placeholders
    #[error("payment gateway not configured: {0}")]
    NotConfigured(String),

    /// Network failure or timeout
    #[error("payment gateway request failed: {0}")]
    RequestFailed(String),

    /// The gateway refused the request
    #[error("payment gateway rejected request (status {status}): {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body
        message: String,
    },

    /// The response could not be parsed
    #[error("could not decode payment gateway response: {0}")]
    Decode(String),
}

/// Everything the gateway needs to build a hosted checkout page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OrderIntent {
    /// Order being paid for
    pub order_id: OrderId,
    /// Event
    pub event_id: EventId,
    /// Buyer
    pub buyer: Buyer,
    /// Lowercase ISO currency code
    pub currency: String,
    /// Selected lines at their listed prices
    pub lines: Vec<ChargeLine>,
    /// Amount to charge
    pub total_amount: Money,
    /// Platform/merchant split of the total
    pub fee: FeeSplit,
}

/// A created checkout session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Gateway session id (the order's payment reference)
    pub session_id: String,
    /// Where to send the buyer
    pub redirect_url: String,
}

/// Payment status carried by a confirmation signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    /// Funds captured
    Paid,
    /// Session completed without capture (e.g. delayed methods)
    Unpaid,
    /// Anything else the gateway may send
    #[serde(other)]
    Other,
}

/// Inbound confirmation signal for a checkout session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    /// Session the confirmation is for
    pub session_id: String,
    /// Amount captured
    pub amount_paid: Money,
    /// Payment status
    pub status: ConfirmationStatus,
}

/// Payment gateway trait
///
/// Abstraction over hosted-checkout processors.
pub trait PaymentGateway: Send + Sync {
    /// Create a hosted checkout session
    ///
    /// # Errors
    ///
    /// Returns error if the session cannot be created; nothing is charged.
    fn create_checkout_session(
        &self,
        intent: OrderIntent,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<CheckoutSession>> + Send>>;
}

// ============================================================================
// Stripe
// ============================================================================

#[derive(Debug, Deserialize)]
struct StripeSession {
    id: String,
    url: Option<String>,
}

/// Stripe Checkout with a destination charge to a connected account.
#[derive(Clone)]
pub struct StripeGateway {
    client: Client,
    base_url: String,
    secret_key: String,
    connected_account: String,
    frontend_url: String,
}

impl StripeGateway {
    /// Creates a Stripe gateway.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotConfigured`] for a missing or placeholder
    /// secret key, a missing connected account (the platform fee is charged
    /// as an application fee on a destination charge), or if the HTTP client
    /// cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        secret_key: impl Into<String>,
        connected_account: Option<String>,
        frontend_url: impl Into<String>,
        timeout: Duration,
    ) -> GatewayResult<Self> {
        let secret_key = secret_key.into();
        if secret_key.trim().is_empty() || secret_key.contains("REPLACE") {
            return Err(GatewayError::NotConfigured("STRIPE_SECRET_KEY is not set".to_string()));
        }
        let Some(connected_account) = connected_account.filter(|account| !account.trim().is_empty()) else {
            return Err(GatewayError::NotConfigured(
                "STRIPE_CONNECTED_ACCOUNT is not set".to_string(),
            ));
        };
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::NotConfigured(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key,
            connected_account,
            frontend_url: frontend_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn session_form(&self, intent: &OrderIntent) -> Vec<(String, String)> {
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            (
                "success_url".to_string(),
                format!("{}/payment/success?session_id={{CHECKOUT_SESSION_ID}}", self.frontend_url),
            ),
            ("cancel_url".to_string(), format!("{}/payment/cancel", self.frontend_url)),
            ("customer_email".to_string(), intent.buyer.email.clone()),
            ("client_reference_id".to_string(), intent.order_id.to_string()),
            ("metadata[order_id]".to_string(), intent.order_id.to_string()),
            ("metadata[event_id]".to_string(), intent.event_id.to_string()),
        ];

        for (index, line) in intent.lines.iter().enumerate() {
            let key = |field: &str| format!("line_items[{index}]{field}");
            form.push((key("[price_data][currency]"), intent.currency.clone()));
            form.push((key("[price_data][product_data][name]"), line.name.clone()));
            form.push((key("[price_data][unit_amount]"), line.unit_price.minor_units().to_string()));
            form.push((key("[quantity]"), line.quantity.to_string()));
        }

        form.push((
            "payment_intent_data[application_fee_amount]".to_string(),
            intent.fee.platform_fee.minor_units().to_string(),
        ));
        form.push((
            "payment_intent_data[transfer_data][destination]".to_string(),
            self.connected_account.clone(),
        ));
        form
    }
}

impl PaymentGateway for StripeGateway {
    fn create_checkout_session(
        &self,
        intent: OrderIntent,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<CheckoutSession>> + Send>> {
        let form = self.session_form(&intent);
        let client = self.client.clone();
        let url = format!("{}/v1/checkout/sessions", self.base_url);
        let secret_key = self.secret_key.clone();

        Box::pin(async move {
            let response = client
                .post(&url)
                .bearer_auth(&secret_key)
                .form(&form)
                .send()
                .await
                .map_err(|e| GatewayError::RequestFailed(e.to_string()))?;

            match response.status() {
                StatusCode::OK => {
                    let session: StripeSession = response
                        .json()
                        .await
                        .map_err(|e| GatewayError::Decode(e.to_string()))?;
                    let redirect_url = session
                        .url
                        .ok_or_else(|| GatewayError::Decode("session has no url".to_string()))?;

                    tracing::info!(
                        order_id = %intent.order_id,
                        session_id = %session.id,
                        total = intent.total_amount.minor_units(),
                        platform_fee = intent.fee.platform_fee.minor_units(),
                        merchant_receives = intent.fee.merchant_receives.minor_units(),
                        "Checkout session created"
                    );
                    Ok(CheckoutSession {
                        session_id: session.id,
                        redirect_url,
                    })
                },
                StatusCode::UNAUTHORIZED => Err(GatewayError::NotConfigured(
                    "gateway rejected the secret key".to_string(),
                )),
                status => Err(GatewayError::Rejected {
                    status: status.as_u16(),
                    message: response.text().await.unwrap_or_default(),
                }),
            }
        })
    }
}

// ============================================================================
// Mock
// ============================================================================

#[derive(Debug, Default)]
struct MockLedger {
    intents: Vec<OrderIntent>,
    failures: Vec<GatewayError>,
}

/// Mock payment gateway for development and testing.
///
/// Records every intent it receives and hands out `cs_test_` session ids.
/// Failures can be queued.
#[derive(Clone, Debug, Default)]
pub struct MockPaymentGateway {
    ledger: Arc<Mutex<MockLedger>>,
}

impl MockPaymentGateway {
    /// Creates a new mock payment gateway
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an Arc-wrapped handle sharing this mock's records
    #[must_use]
    pub fn shared(&self) -> Arc<dyn PaymentGateway> {
        Arc::new(self.clone())
    }

    fn ledger(&self) -> std::sync::MutexGuard<'_, MockLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fails the next session creation with `error`
    pub fn fail_next(&self, error: GatewayError) {
        self.ledger().failures.push(error);
    }

    /// Intents received so far
    #[must_use]
    pub fn intents(&self) -> Vec<OrderIntent> {
        self.ledger().intents.clone()
    }

    /// Number of session creation calls
    #[must_use]
    pub fn calls(&self) -> usize {
        self.ledger().intents.len()
    }
}

impl PaymentGateway for MockPaymentGateway {
    fn create_checkout_session(
        &self,
        intent: OrderIntent,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<CheckoutSession>> + Send>> {
        let result = {
            let mut ledger = self.ledger();
            let order_id = intent.order_id;
            ledger.intents.push(intent);
            match ledger.failures.pop() {
                Some(error) => Err(error),
                None => {
                    let session_id = format!("cs_test_{}", uuid::Uuid::new_v4().simple());
                    tracing::info!(order_id = %order_id, session_id = %session_id, "Mock checkout session created");
                    Ok(CheckoutSession {
                        redirect_url: format!("https://checkout.test/pay/{session_id}"),
                        session_id,
                    })
                },
            }
        };
        Box::pin(async move { result })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::checkout::split_platform_fee;
    use crate::reservation::LineId;
    use crate::types::{BundleId, TicketTypeId};

    fn intent() -> OrderIntent {
        let total = Money::from_minor(6_500);
        OrderIntent {
            order_id: OrderId::new(),
            event_id: EventId::new("ev_1"),
            buyer: Buyer {
                name: "Ada".to_string(),
                email: "ada@example.com".to_string(),
                phone: None,
            },
            currency: "usd".to_string(),
            lines: vec![
                ChargeLine {
                    line: LineId::Ticket(TicketTypeId::new("adult")),
                    name: "Adult".to_string(),
                    unit_price: Money::from_minor(2_000),
                    quantity: 1,
                },
                ChargeLine {
                    line: LineId::Bundle(BundleId::new("family")),
                    name: "Family".to_string(),
                    unit_price: Money::from_minor(4_500),
                    quantity: 1,
                },
            ],
            total_amount: total,
            fee: split_platform_fee(total, 10),
        }
    }

    #[test]
    fn test_mock_records_intent_and_returns_session() {
        let gateway = MockPaymentGateway::new();
        let session = tokio_test::block_on(gateway.create_checkout_session(intent())).unwrap();

        assert!(session.session_id.starts_with("cs_test_"));
        assert!(session.redirect_url.ends_with(&session.session_id));
        assert_eq!(gateway.calls(), 1);
    }

    #[test]
    fn test_mock_queued_failure() {
        let gateway = MockPaymentGateway::new();
        gateway.fail_next(GatewayError::RequestFailed("timeout".to_string()));

        let result = tokio_test::block_on(gateway.create_checkout_session(intent()));
        assert_eq!(result, Err(GatewayError::RequestFailed("timeout".to_string())));
        assert!(tokio_test::block_on(gateway.create_checkout_session(intent())).is_ok());
    }

    #[test]
    fn test_stripe_requires_real_key() {
        let result = StripeGateway::new(
            "https://api.stripe.com",
            "sk_test_REPLACE_ME",
            Some("acct_merchant".to_string()),
            "http://localhost:5173",
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(GatewayError::NotConfigured(_))));
    }

    #[test]
    fn test_stripe_requires_connected_account_for_fee() {
        for account in [None, Some("  ".to_string())] {
            let result = StripeGateway::new(
                "https://api.stripe.com",
                "sk_test_123",
                account,
                "http://localhost:5173",
                Duration::from_secs(5),
            );
            assert!(matches!(
                result,
                Err(GatewayError::NotConfigured(message)) if message.contains("STRIPE_CONNECTED_ACCOUNT")
            ));
        }
    }

    #[test]
    fn test_stripe_form_carries_lines_and_destination_charge() {
        let gateway = StripeGateway::new(
            "https://api.stripe.com/",
            "sk_test_123",
            Some("acct_merchant".to_string()),
            "http://localhost:5173/",
            Duration::from_secs(5),
        )
        .unwrap();
        let intent = intent();
        let form = gateway.session_form(&intent);
        let value = |key: &str| form.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());

        assert_eq!(value("line_items[1][price_data][unit_amount]"), Some("4500"));
        assert_eq!(value("line_items[0][quantity]"), Some("1"));
        assert_eq!(value("payment_intent_data[application_fee_amount]"), Some("650"));
        assert_eq!(value("payment_intent_data[transfer_data][destination]"), Some("acct_merchant"));
        assert_eq!(value("cancel_url"), Some("http://localhost:5173/payment/cancel"));
        assert_eq!(value("client_reference_id"), Some(intent.order_id.to_string().as_str()));
    }

    #[test]
    fn test_confirmation_status_tolerates_unknown_values() {
        let confirmation: PaymentConfirmation =
            serde_json::from_str(r#"{"session_id":"cs_1","amount_paid":500,"status":"no_payment_required"}"#)
                .unwrap();
        assert_eq!(confirmation.status, ConfirmationStatus::Other);
        assert_eq!(confirmation.amount_paid, Money::from_minor(500));
    }
}
