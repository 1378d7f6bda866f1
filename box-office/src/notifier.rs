//! Buyer confirmation after tickets are issued.

use crate::types::{Order, OrderId};
use lettre::address::Address;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Notification delivery failure.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("confirmation for order {order_id} not delivered: {reason}")]
pub struct NotifyError {
    /// Order the confirmation was for
    pub order_id: OrderId,
    /// Delivery failure
    pub reason: String,
}

/// Sends the "your tickets are ready" message to the buyer.
pub trait TicketNotifier: Send + Sync {
    /// Send a confirmation for an issued order.
    ///
    /// # Errors
    ///
    /// Returns error if delivery fails. Callers log it; order state is not
    /// affected.
    fn send_confirmation(
        &self,
        order: &Order,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send>>;
}

/// Logs confirmations instead of sending them.
#[derive(Clone, Debug, Default)]
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    /// Create a new console notifier.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl TicketNotifier for ConsoleNotifier {
    fn send_confirmation(
        &self,
        order: &Order,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send>> {
        let barcodes: Vec<String> = order
            .tickets
            .as_ref()
            .map(|batch| batch.tickets.iter().map(|ticket| ticket.barcode.clone()).collect())
            .unwrap_or_default();

        tracing::info!(
            order_id = %order.id,
            to = %order.buyer.email,
            tickets = barcodes.len(),
            barcodes = ?barcodes,
            "Ticket confirmation (console)"
        );
        Box::pin(async { Ok(()) })
    }
}

/// The configured sender address could not be parsed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid SMTP sender {from:?}: {reason}")]
pub struct InvalidSender {
    /// Value of the sender setting
    pub from: String,
    /// Parse failure
    pub reason: String,
}

/// Emails the buyer a confirmation listing every ticket barcode.
///
/// A transport is built per message and the blocking send runs on the
/// blocking pool.
#[derive(Clone)]
pub struct SmtpNotifier {
    smtp_host: String,
    smtp_port: u16,
    credentials: Credentials,
    from: Mailbox,
}

impl SmtpNotifier {
    /// Create an SMTP notifier.
    ///
    /// `from` is either a bare address or `Name <address>`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidSender`] if `from` is not a valid mailbox.
    pub fn new(
        smtp_host: impl Into<String>,
        smtp_port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
        from: &str,
    ) -> Result<Self, InvalidSender> {
        let from = from.parse::<Mailbox>().map_err(|e| InvalidSender {
            from: from.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            smtp_host: smtp_host.into(),
            smtp_port,
            credentials: Credentials::new(username.into(), password.into()),
            from,
        })
    }

    /// The confirmation email for an issued order.
    fn confirmation_message(&self, order: &Order) -> Result<Message, NotifyError> {
        let failure = |reason: String| NotifyError {
            order_id: order.id,
            reason,
        };
        let address = order
            .buyer
            .email
            .parse::<Address>()
            .map_err(|e| failure(format!("invalid buyer address: {e}")))?;

        Message::builder()
            .from(self.from.clone())
            .to(Mailbox::new(Some(order.buyer.name.clone()), address))
            .subject(format!("Your tickets for {}", order.event_id))
            .header(ContentType::TEXT_PLAIN)
            .body(confirmation_text(order))
            .map_err(|e| failure(format!("failed to build email: {e}")))
    }

    fn build_transport(&self) -> Result<SmtpTransport, lettre::transport::smtp::Error> {
        Ok(SmtpTransport::relay(&self.smtp_host)?
            .port(self.smtp_port)
            .credentials(self.credentials.clone())
            .build())
    }
}

impl TicketNotifier for SmtpNotifier {
    fn send_confirmation(
        &self,
        order: &Order,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send>> {
        let order_id = order.id;
        let to = order.buyer.email.clone();
        let message = self.confirmation_message(order);
        let transport = self.build_transport();

        Box::pin(async move {
            let failure = |reason: String| NotifyError { order_id, reason };
            let message = message?;
            let mailer = transport.map_err(|e| failure(format!("SMTP relay error: {e}")))?;

            tokio::task::spawn_blocking(move || mailer.send(&message))
                .await
                .map_err(|e| failure(format!("email task failed: {e}")))?
                .map_err(|e| failure(format!("failed to send email: {e}")))?;

            tracing::info!(order_id = %order_id, to = %to, "Ticket confirmation sent");
            Ok(())
        })
    }
}

/// Plain-text body: greeting, order summary, one line per ticket.
fn confirmation_text(order: &Order) -> String {
    let amount = if order.total_amount.is_zero() {
        "FREE".to_string()
    } else {
        format!("{} {}", order.total_amount, order.currency.to_uppercase())
    };

    let mut lines = vec![
        format!("Hi {},", order.buyer.name),
        String::new(),
        format!("Your booking for {} is confirmed.", order.event_id),
        format!("Order: {}", order.id),
        format!("Amount: {amount}"),
        String::new(),
        "Tickets:".to_string(),
    ];
    let tickets = order.tickets.as_ref().map(|batch| batch.tickets.as_slice()).unwrap_or_default();
    lines.extend(
        tickets
            .iter()
            .enumerate()
            .map(|(index, ticket)| format!("  {}. {}  {}", index + 1, ticket.ticket_type_id, ticket.barcode)),
    );
    lines.push(String::new());
    lines.push("Present the barcode at the entrance for check-in.".to_string());
    lines.join("\n")
}

/// Records confirmations for assertions; can be told to fail.
#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<OrderId>>>,
    failing: Arc<Mutex<bool>>,
}

impl RecordingNotifier {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arc-wrapped handle sharing this recorder's state
    #[must_use]
    pub fn shared(&self) -> Arc<dyn TicketNotifier> {
        Arc::new(self.clone())
    }

    /// Make every following delivery fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap_or_else(PoisonError::into_inner) = failing;
    }

    /// Orders a confirmation was attempted for, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<OrderId> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl TicketNotifier for RecordingNotifier {
    fn send_confirmation(
        &self,
        order: &Order,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send>> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(order.id);
        let result = if *self.failing.lock().unwrap_or_else(PoisonError::into_inner) {
            Err(NotifyError {
                order_id: order.id,
                reason: "mailbox unavailable".to_string(),
            })
        } else {
            Ok(())
        };
        Box::pin(async move { result })
    }
}
