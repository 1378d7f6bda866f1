//! Reservation checker.
//!
//! Decides whether a cart line may grow by one unit without overselling any
//! ticket type, counting stock consumed through bundles as well as standalone
//! selections. Everything here is pure and cheap enough to run on every click;
//! consumption is recomputed from the whole cart each time rather than
//! maintained incrementally.

use crate::inventory::{BundleCatalog, EventCatalog, InventorySnapshot};
use crate::types::{BundleComponent, BundleId, EventId, Money, TicketTypeId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// Identifies a selectable catalog item in a cart.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum LineId {
    /// Standalone ticket type
    Ticket(TicketTypeId),
    /// Bundle
    Bundle(BundleId),
}

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ticket(id) => write!(f, "ticket:{id}"),
            Self::Bundle(id) => write!(f, "bundle:{id}"),
        }
    }
}

/// Cart mutation errors.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CartError {
    /// The line is not part of this cart
    #[error("unknown cart line {0}")]
    UnknownLine(LineId),

    /// The line's own per-order cap would be exceeded
    #[error("{line} is limited to {cap} per order")]
    PerItemCapExceeded {
        /// Line
        line: LineId,
        /// Cap
        cap: u32,
    },

    /// A bundle with no components, or a component of zero units
    #[error("{0} cannot be purchased")]
    Unpurchasable(LineId),

    /// A ticket type would be oversold
    #[error("ticket type {ticket_type} needs {required} but only {remaining} remain")]
    CapacityExceeded {
        /// Oversold ticket type
        ticket_type: TicketTypeId,
        /// Units the cart would consume
        required: u64,
        /// Units in stock
        remaining: u32,
    },
}

/// One selectable item plus its selected quantity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CartLine {
    /// Which item
    pub id: LineId,
    /// Display name
    pub name: String,
    /// Price per unit of this line
    pub unit_price: Money,
    /// Per-order cap (`max_per_order` or bundle `max_quantity`)
    pub cap: u32,
    /// Constituents, empty for standalone tickets
    pub components: Vec<BundleComponent>,
    /// Units selected
    pub selected_quantity: u32,
}

impl CartLine {
    /// Whether this line is a bundle
    #[must_use]
    pub const fn is_bundle(&self) -> bool {
        matches!(self.id, LineId::Bundle(_))
    }
}

/// A buyer's cart for one event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Cart {
    /// Event
    pub event_id: EventId,
    lines: Vec<CartLine>,
}

impl Cart {
    /// Opens a cart with one zero-quantity line per catalog item
    #[must_use]
    pub fn open(catalog: &EventCatalog) -> Self {
        let tickets = catalog.distinct_ticket_types().into_iter().map(|ticket_type| CartLine {
            id: LineId::Ticket(ticket_type.id.clone()),
            name: ticket_type.name.clone(),
            unit_price: ticket_type.price,
            cap: ticket_type.max_per_order,
            components: Vec::new(),
            selected_quantity: 0,
        });
        let bundles = catalog.bundles.iter().map(|bundle| CartLine {
            id: LineId::Bundle(bundle.id.clone()),
            name: bundle.name.clone(),
            unit_price: bundle.price,
            cap: bundle.max_quantity,
            components: bundle.components.clone(),
            selected_quantity: 0,
        });

        Self {
            event_id: catalog.event_id.clone(),
            lines: tickets.chain(bundles).collect(),
        }
    }

    /// Builds a cart from explicit lines
    #[must_use]
    pub const fn from_lines(event_id: EventId, lines: Vec<CartLine>) -> Self {
        Self { event_id, lines }
    }

    /// All lines, in catalog order
    #[must_use]
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    /// Looks up a line
    #[must_use]
    pub fn line(&self, line_id: &LineId) -> Option<&CartLine> {
        self.lines.iter().find(|line| &line.id == line_id)
    }

    /// Selected quantity of a line, zero when absent
    #[must_use]
    pub fn quantity(&self, line_id: &LineId) -> u32 {
        self.line(line_id).map_or(0, |line| line.selected_quantity)
    }

    /// Whether nothing is selected
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(|line| line.selected_quantity == 0)
    }

    /// Adds one unit after checking caps and stock.
    ///
    /// # Errors
    ///
    /// Returns the reason the increment is not allowed.
    pub fn increment(
        &mut self,
        line_id: &LineId,
        snapshot: &InventorySnapshot,
        bundles: &BundleCatalog,
    ) -> Result<u32, CartError> {
        check_increment(line_id, self, snapshot, bundles)?;
        let line = self.line_mut(line_id)?;
        line.selected_quantity = line.selected_quantity.saturating_add(1);
        Ok(line.selected_quantity)
    }

    /// Removes one unit; a line already at zero stays at zero.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::UnknownLine`] if the line is not in the cart.
    pub fn decrement(&mut self, line_id: &LineId) -> Result<u32, CartError> {
        let line = self.line_mut(line_id)?;
        line.selected_quantity = line.selected_quantity.saturating_sub(1);
        Ok(line.selected_quantity)
    }

    /// Sets a quantity without checking stock; call [`Cart::validate`] after.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::UnknownLine`] if the line is not in the cart.
    pub fn set_quantity(&mut self, line_id: &LineId, quantity: u32) -> Result<(), CartError> {
        self.line_mut(line_id)?.selected_quantity = quantity;
        Ok(())
    }

    /// Resets every line to zero
    pub fn clear(&mut self) {
        for line in &mut self.lines {
            line.selected_quantity = 0;
        }
    }

    /// Checks the whole cart against caps and stock.
    ///
    /// # Errors
    ///
    /// Returns the first cap or stock violation found.
    pub fn validate(&self, snapshot: &InventorySnapshot, bundles: &BundleCatalog) -> Result<(), CartError> {
        for line in &self.lines {
            if line.selected_quantity > line.cap {
                return Err(CartError::PerItemCapExceeded {
                    line: line.id.clone(),
                    cap: line.cap,
                });
            }
            if line.selected_quantity > 0 && line.is_bundle() && !is_purchasable(components_of(line, bundles)) {
                return Err(CartError::Unpurchasable(line.id.clone()));
            }
        }

        let required = consumption(self, bundles);
        check_stock(required.iter().filter(|(_, units)| **units > 0).map(|(id, _)| id), &required, snapshot)
    }

    fn line_mut(&mut self, line_id: &LineId) -> Result<&mut CartLine, CartError> {
        self.lines
            .iter_mut()
            .find(|line| &line.id == line_id)
            .ok_or_else(|| CartError::UnknownLine(line_id.clone()))
    }
}

/// Whether `line_id` may be incremented by one unit.
///
/// Never errors: a violated check is reported as `false`.
#[must_use]
pub fn can_increment(
    line_id: &LineId,
    cart: &Cart,
    snapshot: &InventorySnapshot,
    bundles: &BundleCatalog,
) -> bool {
    check_increment(line_id, cart, snapshot, bundles).is_ok()
}

/// Whether `line_id` may be decremented (it has at least one unit selected).
#[must_use]
pub fn can_decrement(line_id: &LineId, cart: &Cart) -> bool {
    cart.quantity(line_id) > 0
}

/// Like [`can_increment`], but says why not.
///
/// # Errors
///
/// Returns the violated cap or the first oversold ticket type.
pub fn check_increment(
    line_id: &LineId,
    cart: &Cart,
    snapshot: &InventorySnapshot,
    bundles: &BundleCatalog,
) -> Result<(), CartError> {
    let line = cart
        .line(line_id)
        .ok_or_else(|| CartError::UnknownLine(line_id.clone()))?;

    let next = match line.selected_quantity.checked_add(1) {
        Some(next) if next <= line.cap => next,
        _ => {
            return Err(CartError::PerItemCapExceeded {
                line: line_id.clone(),
                cap: line.cap,
            });
        },
    };

    if line.is_bundle() && !is_purchasable(components_of(line, bundles)) {
        return Err(CartError::Unpurchasable(line_id.clone()));
    }

    let simulated = |candidate: &CartLine| {
        if &candidate.id == line_id {
            next
        } else {
            candidate.selected_quantity
        }
    };

    let mut touched: BTreeSet<&TicketTypeId> = BTreeSet::new();
    if let LineId::Ticket(ticket_type_id) = line_id {
        touched.insert(ticket_type_id);
    }
    for candidate in cart.lines() {
        if candidate.is_bundle() && simulated(candidate) > 0 {
            touched.extend(components_of(candidate, bundles).iter().map(|c| &c.ticket_type_id));
        }
    }

    let required = simulated_consumption(cart, bundles, simulated);
    check_stock(touched.into_iter(), &required, snapshot)
}

/// Units of every ticket type the cart consumes, standalone and via bundles.
#[must_use]
pub fn consumption(cart: &Cart, bundles: &BundleCatalog) -> BTreeMap<TicketTypeId, u64> {
    simulated_consumption(cart, bundles, |line| line.selected_quantity)
}

fn simulated_consumption(
    cart: &Cart,
    bundles: &BundleCatalog,
    quantity_of: impl Fn(&CartLine) -> u32,
) -> BTreeMap<TicketTypeId, u64> {
    let mut required: BTreeMap<TicketTypeId, u64> = BTreeMap::new();
    for line in cart.lines() {
        let quantity = u64::from(quantity_of(line));
        if quantity == 0 {
            continue;
        }
        match &line.id {
            LineId::Ticket(ticket_type_id) => {
                *required.entry(ticket_type_id.clone()).or_insert(0) += quantity;
            },
            LineId::Bundle(_) => {
                for component in components_of(line, bundles) {
                    *required.entry(component.ticket_type_id.clone()).or_insert(0) +=
                        quantity * u64::from(component.quantity);
                }
            },
        }
    }
    required
}

fn check_stock<'a>(
    ticket_types: impl Iterator<Item = &'a TicketTypeId>,
    required: &BTreeMap<TicketTypeId, u64>,
    snapshot: &InventorySnapshot,
) -> Result<(), CartError> {
    for ticket_type in ticket_types {
        let needed = required.get(ticket_type).copied().unwrap_or(0);
        let remaining = snapshot.remaining(ticket_type);
        if needed > u64::from(remaining) {
            return Err(CartError::CapacityExceeded {
                ticket_type: ticket_type.clone(),
                required: needed,
                remaining,
            });
        }
    }
    Ok(())
}

/// A bundle needs at least one component, each consuming at least one unit.
fn is_purchasable(components: &[BundleComponent]) -> bool {
    !components.is_empty() && components.iter().all(|component| component.quantity > 0)
}

/// Composition from the live bundle catalog, falling back to what the line
/// captured when the cart was opened.
fn components_of<'a>(line: &'a CartLine, bundles: &'a BundleCatalog) -> &'a [BundleComponent] {
    match &line.id {
        LineId::Bundle(bundle_id) => bundles
            .get(bundle_id)
            .map_or(line.components.as_slice(), |bundle| bundle.components.as_slice()),
        LineId::Ticket(_) => &[],
    }
}
