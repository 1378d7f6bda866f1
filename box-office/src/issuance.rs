//! Idempotent ticket issuance.
//!
//! The provider issues one ticket per unit and tags each with the order id.
//! Before issuing, the tickets already present under that reference are
//! subtracted from the order's purchase items, so a retry after a lost
//! response only issues what is still missing.

use crate::provider::{ProviderResult, TicketingProvider};
use crate::types::{Buyer, EventId, OrderId, PurchaseItem, TicketBatch};

/// Items still to be issued, given what already exists.
///
/// Tickets of a type the order never asked for are ignored.
#[must_use]
pub fn shortfall(items: &[PurchaseItem], existing: &TicketBatch) -> Vec<PurchaseItem> {
    let mut issued = existing.count_by_type();
    items
        .iter()
        .filter_map(|item| {
            let have = issued.get_mut(&item.ticket_type_id).map_or(0, |count| {
                let used = (*count).min(item.quantity);
                *count -= used;
                used
            });
            let missing = item.quantity - have;
            (missing > 0).then(|| PurchaseItem {
                ticket_type_id: item.ticket_type_id.clone(),
                quantity: missing,
            })
        })
        .collect()
}

/// Issues whatever part of the order is not yet issued and returns the full
/// batch (existing plus new).
///
/// # Errors
///
/// Returns the provider error from the lookup or from issuance.
pub async fn issue_outstanding(
    provider: &dyn TicketingProvider,
    event_id: &EventId,
    order_id: OrderId,
    items: &[PurchaseItem],
    buyer: &Buyer,
) -> ProviderResult<TicketBatch> {
    let existing = provider.issued_tickets(event_id, order_id).await?;
    let missing = shortfall(items, &existing);

    if missing.is_empty() {
        tracing::info!(
            order_id = %order_id,
            tickets = existing.len(),
            "All tickets already issued, reusing existing batch"
        );
        return Ok(existing);
    }

    if !existing.is_empty() {
        tracing::warn!(
            order_id = %order_id,
            already_issued = existing.len(),
            "Order partially issued by an earlier attempt, issuing remainder"
        );
    }

    let fresh = provider.issue_tickets(event_id, order_id, &missing, buyer).await?;
    Ok(existing.merged(fresh))
}
