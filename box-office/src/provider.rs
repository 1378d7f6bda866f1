//! Ticketing provider integration.
//!
//! The provider owns ticket types, bundles and stock, and generates the
//! actual attendee tickets. Issued tickets are tagged with a reference equal
//! to the order id, which is what makes a retried issuance safe: the engine
//! asks what already exists under that reference before issuing more.

use crate::types::{
    Bundle, BundleComponent, BundleId, Buyer, EventId, IssuedTicket, Money, OrderId,
    PurchaseItem, TicketBatch, TicketType, TicketTypeId, DEFAULT_ITEM_CAP,
};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Ticketing provider result
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Boxed future returned by [`TicketingProvider`] methods
pub type ProviderFuture<T> = Pin<Box<dyn Future<Output = ProviderResult<T>> + Send>>;

/// Ticketing provider errors.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Network failure or timeout talking to the provider
    #[error("provider unreachable: {0}")]
    Unreachable(String),

    /// The provider does not have the stock the order needs
    #[error("stock conflict on ticket type {ticket_type_id}: {message}")]
    StockConflict {
        /// Ticket type that ran out
        ticket_type_id: TicketTypeId,
        /// Provider message
        message: String,
    },

    /// Credentials or account setup are wrong
    #[error("provider misconfigured: {0}")]
    Misconfigured(String),

    /// Any other non-success response
    #[error("provider rejected request (status {status}): {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body
        message: String,
    },

    /// The response could not be parsed
    #[error("could not decode provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Whether repeating the same read could succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Unreachable(_) => true,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            Self::StockConflict { .. } | Self::Misconfigured(_) | Self::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Unreachable(err.to_string())
        }
    }
}

/// Ticketing provider trait.
///
/// Reads are idempotent. `issue_tickets` is not: callers must consult
/// `issued_tickets` for the same order first.
pub trait TicketingProvider: Send + Sync {
    /// Ticket types (with remaining stock) for an event
    ///
    /// # Errors
    ///
    /// Returns error if the provider cannot be read
    fn ticket_types(&self, event_id: &EventId) -> ProviderFuture<Vec<TicketType>>;

    /// Bundle definitions for an event
    ///
    /// # Errors
    ///
    /// Returns error if the provider cannot be read
    fn bundles(&self, event_id: &EventId) -> ProviderFuture<Vec<Bundle>>;

    /// Tickets already issued under the order's reference
    ///
    /// # Errors
    ///
    /// Returns error if the provider cannot be read
    fn issued_tickets(&self, event_id: &EventId, order_id: OrderId) -> ProviderFuture<TicketBatch>;

    /// Issues tickets for the given items, tagged with the order's reference
    ///
    /// # Errors
    ///
    /// Returns error if any ticket could not be issued. Tickets issued before
    /// the failure remain at the provider.
    fn issue_tickets(
        &self,
        event_id: &EventId,
        order_id: OrderId,
        items: &[PurchaseItem],
        buyer: &Buyer,
    ) -> ProviderFuture<TicketBatch>;
}

// ============================================================================
// HTTP provider
// ============================================================================

#[derive(Debug, Deserialize)]
struct ApiList<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ApiEvent {
    event_series_id: Option<String>,
    #[serde(default)]
    ticket_types: Vec<ApiTicketType>,
}

#[derive(Debug, Deserialize)]
struct ApiTicketType {
    id: String,
    name: String,
    #[serde(default)]
    price: u64,
    #[serde(default)]
    quantity: u32,
    max_per_order: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ApiBundle {
    id: String,
    name: String,
    #[serde(default)]
    price: u64,
    max_quantity: Option<u32>,
    #[serde(default)]
    ticket_types: Vec<ApiBundleTicket>,
}

#[derive(Debug, Deserialize)]
struct ApiBundleTicket {
    id: String,
    #[serde(default = "one")]
    quantity: u32,
}

const fn one() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct ApiIssuedTicket {
    id: String,
    ticket_type_id: String,
    barcode: Option<String>,
}

impl From<ApiIssuedTicket> for IssuedTicket {
    fn from(ticket: ApiIssuedTicket) -> Self {
        let barcode = ticket.barcode.unwrap_or_else(|| ticket.id.clone());
        Self {
            id: ticket.id,
            ticket_type_id: TicketTypeId::new(ticket.ticket_type_id),
            barcode,
        }
    }
}

/// Ticketing provider over its REST API (basic auth, form-encoded writes).
#[derive(Clone)]
pub struct HttpTicketingProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpTicketingProvider {
    /// Creates a provider client.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Misconfigured`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, request_timeout: Duration) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ProviderError::Misconfigured(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(
        client: Client,
        url: String,
        api_key: String,
        query: Vec<(&'static str, String)>,
    ) -> ProviderResult<T> {
        let response = client
            .get(&url)
            .basic_auth(&api_key, Some(""))
            .header("Accept", "application/json")
            .query(&query)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => response
                .json::<T>()
                .await
                .map_err(|e| ProviderError::Decode(e.to_string())),
            status => Err(error_from_status(status, response.text().await.unwrap_or_default(), None)),
        }
    }

    async fn fetch_event(client: Client, base_url: String, api_key: String, event_id: EventId) -> ProviderResult<ApiEvent> {
        Self::get(client, format!("{base_url}/events/{event_id}"), api_key, Vec::new()).await
    }
}

/// Form for issuing one ticket. The provider emails the ticket to the buyer
/// as well as our own confirmation.
fn issue_form(
    event_id: &EventId,
    ticket_type_id: &TicketTypeId,
    order_id: OrderId,
    buyer: &Buyer,
) -> [(&'static str, String); 6] {
    [
        ("event_id", event_id.to_string()),
        ("ticket_type_id", ticket_type_id.to_string()),
        ("full_name", buyer.name.clone()),
        ("email", buyer.email.clone()),
        ("reference", order_id.to_string()),
        ("send_email", "true".to_string()),
    ]
}

fn error_from_status(status: StatusCode, message: String, ticket_type: Option<&TicketTypeId>) -> ProviderError {
    match (status, ticket_type) {
        (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::PAYMENT_REQUIRED, _) => {
            ProviderError::Misconfigured(format!("status {}: {message}", status.as_u16()))
        },
        (StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY, Some(ticket_type_id)) => {
            ProviderError::StockConflict {
                ticket_type_id: ticket_type_id.clone(),
                message,
            }
        },
        (status, _) => ProviderError::Rejected {
            status: status.as_u16(),
            message,
        },
    }
}

impl TicketingProvider for HttpTicketingProvider {
    fn ticket_types(&self, event_id: &EventId) -> ProviderFuture<Vec<TicketType>> {
        let (client, base_url, api_key) = (self.client.clone(), self.base_url.clone(), self.api_key.clone());
        let event_id = event_id.clone();
        Box::pin(async move {
            let event = Self::fetch_event(client, base_url, api_key, event_id).await?;
            Ok(event
                .ticket_types
                .into_iter()
                .map(|tt| TicketType {
                    id: TicketTypeId::new(tt.id),
                    name: tt.name,
                    price: Money::from_minor(tt.price),
                    remaining: tt.quantity,
                    max_per_order: tt.max_per_order.unwrap_or(DEFAULT_ITEM_CAP),
                })
                .collect())
        })
    }

    fn bundles(&self, event_id: &EventId) -> ProviderFuture<Vec<Bundle>> {
        let (client, base_url, api_key) = (self.client.clone(), self.base_url.clone(), self.api_key.clone());
        let event_id = event_id.clone();
        Box::pin(async move {
            let event = Self::fetch_event(client.clone(), base_url.clone(), api_key.clone(), event_id).await?;
            // Bundles live on the series; a standalone event has none.
            let Some(series_id) = event.event_series_id else {
                return Ok(Vec::new());
            };
            let bundles: ApiList<ApiBundle> =
                Self::get(client, format!("{base_url}/event_series/{series_id}/bundles"), api_key, Vec::new()).await?;
            Ok(bundles
                .data
                .into_iter()
                .map(|bundle| Bundle {
                    id: BundleId::new(bundle.id),
                    name: bundle.name,
                    price: Money::from_minor(bundle.price),
                    max_quantity: bundle.max_quantity.unwrap_or(DEFAULT_ITEM_CAP),
                    components: bundle
                        .ticket_types
                        .into_iter()
                        .map(|component| BundleComponent {
                            ticket_type_id: TicketTypeId::new(component.id),
                            quantity: component.quantity,
                        })
                        .collect(),
                })
                .collect())
        })
    }

    fn issued_tickets(&self, event_id: &EventId, order_id: OrderId) -> ProviderFuture<TicketBatch> {
        let (client, base_url, api_key) = (self.client.clone(), self.base_url.clone(), self.api_key.clone());
        let event_id = event_id.clone();
        Box::pin(async move {
            let issued: ApiList<ApiIssuedTicket> = Self::get(
                client,
                format!("{base_url}/issued_tickets"),
                api_key,
                vec![("event_id", event_id.to_string()), ("reference", order_id.to_string())],
            )
            .await?;
            Ok(TicketBatch::new(issued.data.into_iter().map(IssuedTicket::from).collect()))
        })
    }

    fn issue_tickets(
        &self,
        event_id: &EventId,
        order_id: OrderId,
        items: &[PurchaseItem],
        buyer: &Buyer,
    ) -> ProviderFuture<TicketBatch> {
        let (client, base_url, api_key) = (self.client.clone(), self.base_url.clone(), self.api_key.clone());
        let event_id = event_id.clone();
        let items = items.to_vec();
        let buyer = buyer.clone();
        Box::pin(async move {
            let url = format!("{base_url}/issued_tickets");
            let mut tickets = Vec::new();

            // The provider issues one ticket per request.
            for item in &items {
                for _ in 0..item.quantity {
                    let form = issue_form(&event_id, &item.ticket_type_id, order_id, &buyer);
                    let response = client
                        .post(&url)
                        .basic_auth(&api_key, Some(""))
                        .header("Accept", "application/json")
                        .form(&form)
                        .send()
                        .await?;

                    let status = response.status();
                    if !status.is_success() {
                        let message = response.text().await.unwrap_or_default();
                        tracing::warn!(
                            order_id = %order_id,
                            ticket_type_id = %item.ticket_type_id,
                            issued_so_far = tickets.len(),
                            status = status.as_u16(),
                            "Provider refused to issue ticket"
                        );
                        return Err(error_from_status(status, message, Some(&item.ticket_type_id)));
                    }
                    let ticket: ApiIssuedTicket = response
                        .json()
                        .await
                        .map_err(|e| ProviderError::Decode(e.to_string()))?;
                    tickets.push(IssuedTicket::from(ticket));
                }
            }

            tracing::info!(order_id = %order_id, count = tickets.len(), "Tickets issued by provider");
            Ok(TicketBatch::new(tickets))
        })
    }
}

// ============================================================================
// In-memory provider
// ============================================================================

#[derive(Debug, Default)]
struct StockedEvent {
    ticket_types: Vec<TicketType>,
    bundles: Vec<Bundle>,
}

#[derive(Debug, Default)]
struct Ledger {
    events: HashMap<EventId, StockedEvent>,
    issued: HashMap<OrderId, Vec<IssuedTicket>>,
    next_ticket: u64,
    issue_calls: usize,
    read_failures: usize,
    issue_failures: VecDeque<ProviderError>,
    issue_delay: Option<Duration>,
}

impl Ledger {
    fn event(&self, event_id: &EventId) -> ProviderResult<&StockedEvent> {
        self.events.get(event_id).ok_or_else(|| ProviderError::Rejected {
            status: 404,
            message: format!("event {event_id} not found"),
        })
    }

    fn take_read_failure(&mut self) -> ProviderResult<()> {
        if self.read_failures > 0 {
            self.read_failures -= 1;
            return Err(ProviderError::Unreachable("connection reset".to_string()));
        }
        Ok(())
    }

    fn issue(&mut self, event_id: &EventId, order_id: OrderId, items: &[PurchaseItem]) -> ProviderResult<TicketBatch> {
        let event = self.events.get_mut(event_id).ok_or_else(|| ProviderError::Rejected {
            status: 404,
            message: format!("event {event_id} not found"),
        })?;

        for item in items {
            let remaining: u32 = event
                .ticket_types
                .iter()
                .filter(|tt| tt.id == item.ticket_type_id)
                .map(|tt| tt.remaining)
                .sum();
            if remaining < item.quantity {
                return Err(ProviderError::StockConflict {
                    ticket_type_id: item.ticket_type_id.clone(),
                    message: format!("requested {}, remaining {remaining}", item.quantity),
                });
            }
        }

        let mut tickets = Vec::new();
        for item in items {
            let mut outstanding = item.quantity;
            for listing in event.ticket_types.iter_mut().filter(|tt| tt.id == item.ticket_type_id) {
                let taken = outstanding.min(listing.remaining);
                listing.remaining -= taken;
                outstanding -= taken;
            }
            for _ in 0..item.quantity {
                self.next_ticket += 1;
                tickets.push(IssuedTicket {
                    id: format!("it_{}", self.next_ticket),
                    ticket_type_id: item.ticket_type_id.clone(),
                    barcode: format!("BC{:08}", self.next_ticket),
                });
            }
        }

        self.issued.entry(order_id).or_default().extend(tickets.iter().cloned());
        Ok(TicketBatch::new(tickets))
    }
}

/// Provider double that enforces stock and tags tickets with the order id.
///
/// Failures and slow responses can be injected. A slow issuance lands its
/// tickets before the delay, like a provider whose response is lost.
#[derive(Clone, Debug, Default)]
pub struct InMemoryTicketingProvider {
    ledger: Arc<Mutex<Ledger>>,
}

impl InMemoryTicketingProvider {
    /// Creates an empty provider
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn shared(&self) -> Arc<dyn TicketingProvider> {
        Arc::new(self.clone())
    }

    fn ledger(&self) -> std::sync::MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds (or replaces) an event's catalog
    pub fn add_event(&self, event_id: EventId, ticket_types: Vec<TicketType>, bundles: Vec<Bundle>) {
        self.ledger().events.insert(event_id, StockedEvent { ticket_types, bundles });
    }

    /// Overrides the stock of every listing of a ticket type
    pub fn set_remaining(&self, event_id: &EventId, ticket_type_id: &TicketTypeId, remaining: u32) {
        if let Some(event) = self.ledger().events.get_mut(event_id) {
            for listing in event.ticket_types.iter_mut().filter(|tt| &tt.id == ticket_type_id) {
                listing.remaining = remaining;
            }
        }
    }

    /// Remaining stock of a ticket type, summed over listings
    #[must_use]
    pub fn remaining(&self, event_id: &EventId, ticket_type_id: &TicketTypeId) -> u32 {
        self.ledger().events.get(event_id).map_or(0, |event| {
            event
                .ticket_types
                .iter()
                .filter(|tt| &tt.id == ticket_type_id)
                .map(|tt| tt.remaining)
                .sum()
        })
    }

    /// Fails the next `count` catalog reads as unreachable
    pub fn fail_next_reads(&self, count: usize) {
        self.ledger().read_failures = count;
    }

    /// Fails the next issuance call with `error` (queued)
    pub fn fail_next_issue(&self, error: ProviderError) {
        self.ledger().issue_failures.push_back(error);
    }

    /// Delays issuance responses; tickets are recorded before the delay
    pub fn set_issue_delay(&self, delay: Option<Duration>) {
        self.ledger().issue_delay = delay;
    }

    /// Number of `issue_tickets` calls received
    #[must_use]
    pub fn issue_calls(&self) -> usize {
        self.ledger().issue_calls
    }

    /// Every ticket issued under an order's reference
    #[must_use]
    pub fn issued_for(&self, order_id: OrderId) -> Vec<IssuedTicket> {
        self.ledger().issued.get(&order_id).cloned().unwrap_or_default()
    }
}

impl TicketingProvider for InMemoryTicketingProvider {
    fn ticket_types(&self, event_id: &EventId) -> ProviderFuture<Vec<TicketType>> {
        let result = {
            let mut ledger = self.ledger();
            ledger
                .take_read_failure()
                .and_then(|()| ledger.event(event_id).map(|event| event.ticket_types.clone()))
        };
        Box::pin(async move { result })
    }

    fn bundles(&self, event_id: &EventId) -> ProviderFuture<Vec<Bundle>> {
        let result = {
            let mut ledger = self.ledger();
            ledger
                .take_read_failure()
                .and_then(|()| ledger.event(event_id).map(|event| event.bundles.clone()))
        };
        Box::pin(async move { result })
    }

    fn issued_tickets(&self, _event_id: &EventId, order_id: OrderId) -> ProviderFuture<TicketBatch> {
        let batch = TicketBatch::new(self.issued_for(order_id));
        Box::pin(async move { Ok(batch) })
    }

    fn issue_tickets(
        &self,
        event_id: &EventId,
        order_id: OrderId,
        items: &[PurchaseItem],
        _buyer: &Buyer,
    ) -> ProviderFuture<TicketBatch> {
        let ledger = Arc::clone(&self.ledger);
        let event_id = event_id.clone();
        let items = items.to_vec();
        Box::pin(async move {
            let (result, delay) = {
                let mut ledger = ledger.lock().unwrap_or_else(PoisonError::into_inner);
                ledger.issue_calls += 1;
                let result = match ledger.issue_failures.pop_front() {
                    Some(error) => Err(error),
                    None => ledger.issue(&event_id, order_id, &items),
                };
                (result, ledger.issue_delay)
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        })
    }
}
