//! Inventory snapshot and bundle catalog.
//!
//! Both are read-only views of provider data as of the last fetch. They are
//! eventually consistent: the provider is the source of truth at issuance.

use crate::types::{Bundle, BundleId, EventId, TicketType, TicketTypeId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Remaining stock per ticket type.
///
/// A ticket type missing from the snapshot has unknown stock and is treated
/// as sold out.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InventorySnapshot {
    remaining: HashMap<TicketTypeId, u32>,
}

impl InventorySnapshot {
    /// Creates an empty snapshot
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregates remaining stock by ticket type.
    ///
    /// A ticket type listed more than once (bound to several occurrences)
    /// contributes the stock of every listing.
    #[must_use]
    pub fn from_ticket_types(ticket_types: &[TicketType]) -> Self {
        let mut remaining: HashMap<TicketTypeId, u32> = HashMap::new();
        for ticket_type in ticket_types {
            let entry = remaining.entry(ticket_type.id.clone()).or_insert(0);
            *entry = entry.saturating_add(ticket_type.remaining);
        }
        Self { remaining }
    }

    /// Sets the stock of one ticket type
    #[must_use]
    pub fn with_stock(mut self, ticket_type_id: impl Into<TicketTypeId>, remaining: u32) -> Self {
        self.remaining.insert(ticket_type_id.into(), remaining);
        self
    }

    /// Remaining stock, zero when unknown
    #[must_use]
    pub fn remaining(&self, ticket_type_id: &TicketTypeId) -> u32 {
        self.remaining.get(ticket_type_id).copied().unwrap_or(0)
    }

    /// Whether the snapshot has any figure for this ticket type
    #[must_use]
    pub fn is_known(&self, ticket_type_id: &TicketTypeId) -> bool {
        self.remaining.contains_key(ticket_type_id)
    }

    /// Iterates over known stock figures
    pub fn iter(&self) -> impl Iterator<Item = (&TicketTypeId, u32)> {
        self.remaining.iter().map(|(id, remaining)| (id, *remaining))
    }
}

/// Bundle definitions for one event, in provider order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BundleCatalog {
    bundles: Vec<Bundle>,
}

impl BundleCatalog {
    /// Creates a catalog from bundle definitions
    #[must_use]
    pub const fn new(bundles: Vec<Bundle>) -> Self {
        Self { bundles }
    }

    /// Looks up a bundle
    #[must_use]
    pub fn get(&self, bundle_id: &BundleId) -> Option<&Bundle> {
        self.bundles.iter().find(|bundle| &bundle.id == bundle_id)
    }

    /// Iterates over bundles
    pub fn iter(&self) -> impl Iterator<Item = &Bundle> {
        self.bundles.iter()
    }

    /// Number of bundles
    #[must_use]
    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    /// Whether there are no bundles
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }
}

/// How many units of a bundle could be bought on their own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BundleAvailability {
    /// At least one unit is purchasable
    pub is_available: bool,
    /// `min(max_quantity, floor(remaining / quantity))` over the components
    pub max_purchasable: u32,
}

/// Standalone availability of a bundle against a snapshot.
///
/// A component with a per-bundle quantity of zero, or whose stock is unknown,
/// makes the bundle unavailable. So does a bundle with no components.
#[must_use]
pub fn bundle_availability(bundle: &Bundle, snapshot: &InventorySnapshot) -> BundleAvailability {
    let by_stock = bundle
        .components
        .iter()
        .map(|component| {
            if component.quantity == 0 || !snapshot.is_known(&component.ticket_type_id) {
                0
            } else {
                snapshot.remaining(&component.ticket_type_id) / component.quantity
            }
        })
        .min();

    let max_purchasable = by_stock.map_or(0, |units| units.min(bundle.max_quantity));
    BundleAvailability {
        is_available: max_purchasable > 0,
        max_purchasable,
    }
}

/// Everything the reservation checker needs for one event.
#[derive(Clone, Debug)]
pub struct EventCatalog {
    /// Event
    pub event_id: EventId,
    /// Ticket types as listed by the provider
    pub ticket_types: Vec<TicketType>,
    /// Bundle definitions
    pub bundles: BundleCatalog,
    /// Stock aggregated by ticket type
    pub snapshot: InventorySnapshot,
    /// When the provider data was fetched
    pub fetched_at: DateTime<Utc>,
}

impl EventCatalog {
    /// Builds a catalog from provider data
    #[must_use]
    pub fn new(
        event_id: EventId,
        ticket_types: Vec<TicketType>,
        bundles: Vec<Bundle>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        let snapshot = InventorySnapshot::from_ticket_types(&ticket_types);
        Self {
            event_id,
            ticket_types,
            bundles: BundleCatalog::new(bundles),
            snapshot,
            fetched_at,
        }
    }

    /// Ticket types with duplicate listings collapsed, first listing wins
    #[must_use]
    pub fn distinct_ticket_types(&self) -> Vec<&TicketType> {
        let mut seen = std::collections::HashSet::new();
        self.ticket_types
            .iter()
            .filter(|ticket_type| seen.insert(&ticket_type.id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BundleComponent, Money};

    fn ticket_type(id: &str, remaining: u32) -> TicketType {
        TicketType {
            id: TicketTypeId::new(id),
            name: id.to_uppercase(),
            price: Money::from_minor(1_000),
            remaining,
            max_per_order: 10,
        }
    }

    fn bundle(max_quantity: u32, components: &[(&str, u32)]) -> Bundle {
        Bundle {
            id: BundleId::new("family"),
            name: "Family".to_string(),
            price: Money::from_minor(3_000),
            max_quantity,
            components: components
                .iter()
                .map(|(id, quantity)| BundleComponent {
                    ticket_type_id: TicketTypeId::new(*id),
                    quantity: *quantity,
                })
                .collect(),
        }
    }

    #[test]
    fn test_snapshot_sums_listings_of_the_same_type() {
        let snapshot = InventorySnapshot::from_ticket_types(&[
            ticket_type("adult", 4),
            ticket_type("child", 2),
            ticket_type("adult", 6),
        ]);

        assert_eq!(snapshot.remaining(&TicketTypeId::new("adult")), 10);
        assert_eq!(snapshot.remaining(&TicketTypeId::new("child")), 2);
        assert_eq!(snapshot.remaining(&TicketTypeId::new("senior")), 0);
        assert!(!snapshot.is_known(&TicketTypeId::new("senior")));
    }

    #[test]
    fn test_bundle_limited_by_scarcest_component() {
        let snapshot = InventorySnapshot::new().with_stock("adult", 7).with_stock("child", 9);
        let availability = bundle_availability(&bundle(5, &[("adult", 2), ("child", 1)]), &snapshot);

        assert_eq!(
            availability,
            BundleAvailability {
                is_available: true,
                max_purchasable: 3
            }
        );
    }

    #[test]
    fn test_bundle_limited_by_its_own_cap() {
        let snapshot = InventorySnapshot::new().with_stock("adult", 100);
        let availability = bundle_availability(&bundle(2, &[("adult", 1)]), &snapshot);
        assert_eq!(availability.max_purchasable, 2);
    }

    #[test]
    fn test_bundle_unavailable_cases() {
        let snapshot = InventorySnapshot::new().with_stock("adult", 5).with_stock("child", 0);

        assert!(!bundle_availability(&bundle(5, &[("adult", 1), ("child", 1)]), &snapshot).is_available);
        assert!(!bundle_availability(&bundle(5, &[("adult", 1), ("ghost", 1)]), &snapshot).is_available);
        assert!(!bundle_availability(&bundle(5, &[("adult", 0)]), &snapshot).is_available);
        assert!(!bundle_availability(&bundle(5, &[]), &snapshot).is_available);
    }

    #[test]
    fn test_distinct_ticket_types_keeps_first_listing() {
        let catalog = EventCatalog::new(
            EventId::new("ev_1"),
            vec![ticket_type("adult", 1), ticket_type("child", 1), ticket_type("adult", 1)],
            Vec::new(),
            Utc::now(),
        );
        let ids: Vec<&str> = catalog
            .distinct_ticket_types()
            .iter()
            .map(|ticket_type| ticket_type.id.as_str())
            .collect();
        assert_eq!(ids, vec!["adult", "child"]);
        assert_eq!(catalog.snapshot.remaining(&TicketTypeId::new("adult")), 2);
    }
}
