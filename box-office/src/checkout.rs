//! Cart/checkout assembler.
//!
//! Turns a cart into the flat, ticket-type keyed purchase list that the rest
//! of the system works with. Bundle membership is resolved here and nowhere
//! downstream.

use crate::reservation::{Cart, LineId};
use crate::types::{Buyer, Money, PurchaseItem, TicketTypeId};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Checkout assembly errors.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CheckoutError {
    /// No line has a positive quantity after flattening
    #[error("cart is empty")]
    EmptyCart,

    /// Buyer details failed validation
    #[error("invalid buyer: {0}")]
    InvalidBuyer(String),

    /// The total does not fit in the amount type
    #[error("order total overflows")]
    TotalOverflow,
}

/// A selected line as it will be charged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChargeLine {
    /// Cart line
    pub line: LineId,
    /// Display name
    pub name: String,
    /// Listed unit price of the line
    pub unit_price: Money,
    /// Units selected
    pub quantity: u32,
}

/// Result of [`flatten`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FlattenedCart {
    /// Purchase items merged by ticket type, ordered by ticket type id
    pub items: Vec<PurchaseItem>,
    /// Sum of `unit_price × quantity` over the selected lines
    pub total_amount: Money,
    /// Tickets the order will produce
    pub total_ticket_count: u64,
    /// The selected lines, for the payment session
    pub charges: Vec<ChargeLine>,
}

/// Flattens a cart into purchase items.
///
/// Bundles expand into `quantity_per_bundle × selected` units of each
/// component; quantities for the same ticket type are summed.
///
/// # Errors
///
/// Returns [`CheckoutError::EmptyCart`] when nothing would be issued, or
/// [`CheckoutError::TotalOverflow`] for an absurd total.
pub fn flatten(cart: &Cart) -> Result<FlattenedCart, CheckoutError> {
    let mut merged: BTreeMap<TicketTypeId, u64> = BTreeMap::new();
    let mut total_amount = Money::ZERO;
    let mut charges = Vec::new();

    for line in cart.lines().iter().filter(|line| line.selected_quantity > 0) {
        let selected = u64::from(line.selected_quantity);
        match &line.id {
            LineId::Ticket(ticket_type_id) => {
                *merged.entry(ticket_type_id.clone()).or_insert(0) += selected;
            },
            LineId::Bundle(_) => {
                for component in &line.components {
                    *merged.entry(component.ticket_type_id.clone()).or_insert(0) +=
                        selected * u64::from(component.quantity);
                }
            },
        }

        let line_total = line
            .unit_price
            .checked_multiply(line.selected_quantity)
            .ok_or(CheckoutError::TotalOverflow)?;
        total_amount = total_amount
            .checked_add(line_total)
            .ok_or(CheckoutError::TotalOverflow)?;
        charges.push(ChargeLine {
            line: line.id.clone(),
            name: line.name.clone(),
            unit_price: line.unit_price,
            quantity: line.selected_quantity,
        });
    }

    let mut items = Vec::with_capacity(merged.len());
    for (ticket_type_id, quantity) in merged.into_iter().filter(|(_, quantity)| *quantity > 0) {
        let quantity = u32::try_from(quantity).map_err(|_| CheckoutError::TotalOverflow)?;
        items.push(PurchaseItem {
            ticket_type_id,
            quantity,
        });
    }

    if items.is_empty() {
        return Err(CheckoutError::EmptyCart);
    }

    let total_ticket_count = items.iter().map(|item| u64::from(item.quantity)).sum();
    Ok(FlattenedCart {
        items,
        total_amount,
        total_ticket_count,
        charges,
    })
}

/// Checks buyer details.
///
/// The name is required, the email needs a local part and a dotted domain,
/// and a phone number, when given, is 7 to 15 digits, spaces, dashes or
/// parentheses with an optional leading `+`.
///
/// # Errors
///
/// Returns [`CheckoutError::InvalidBuyer`] naming the offending field.
pub fn validate_buyer(buyer: &Buyer) -> Result<(), CheckoutError> {
    if buyer.name.trim().is_empty() {
        return Err(CheckoutError::InvalidBuyer("name is required".to_string()));
    }
    if !is_valid_email(buyer.email.trim()) {
        return Err(CheckoutError::InvalidBuyer(format!(
            "email '{}' is not valid",
            buyer.email
        )));
    }
    if let Some(phone) = buyer.phone.as_deref().map(str::trim).filter(|phone| !phone.is_empty()) {
        if !is_valid_phone(phone) {
            return Err(CheckoutError::InvalidBuyer(format!(
                "phone '{phone}' is not valid"
            )));
        }
    }
    Ok(())
}

fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !email.contains(char::is_whitespace)
        && !domain.contains('@')
        && domain
            .split_once('.')
            .is_some_and(|(name, tld)| !name.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

fn is_valid_phone(phone: &str) -> bool {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    (7..=15).contains(&digits.chars().count())
        && digits
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '-' | ' ' | '(' | ')'))
}

/// How a paid total is split between the platform and the merchant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FeeSplit {
    /// Application fee kept by the platform
    pub platform_fee: Money,
    /// What the connected merchant account receives
    pub merchant_receives: Money,
}

/// Splits `total` with a platform fee of `ceil(total × percent / 100)`.
///
/// Percentages above 100 are treated as 100.
#[must_use]
pub fn split_platform_fee(total: Money, percent: u32) -> FeeSplit {
    let total_units = u128::from(total.minor_units());
    let fee = (total_units * u128::from(percent.min(100))).div_ceil(100);
    let platform_fee = Money::from_minor(u64::try_from(fee).unwrap_or(u64::MAX));
    FeeSplit {
        platform_fee,
        merchant_receives: total.checked_sub(platform_fee).unwrap_or(Money::ZERO),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::inventory::EventCatalog;
    use crate::types::{Bundle, BundleComponent, BundleId, EventId, TicketType};
    use chrono::Utc;

    fn catalog() -> EventCatalog {
        let ticket_type = |id: &str, price: u64| TicketType {
            id: TicketTypeId::new(id),
            name: id.to_string(),
            price: Money::from_minor(price),
            remaining: 50,
            max_per_order: 10,
        };
        EventCatalog::new(
            EventId::new("ev_1"),
            vec![ticket_type("adult", 2_000), ticket_type("child", 1_000)],
            vec![Bundle {
                id: BundleId::new("family"),
                name: "Family".to_string(),
                price: Money::from_minor(4_500),
                max_quantity: 5,
                components: vec![
                    BundleComponent {
                        ticket_type_id: TicketTypeId::new("adult"),
                        quantity: 2,
                    },
                    BundleComponent {
                        ticket_type_id: TicketTypeId::new("child"),
                        quantity: 2,
                    },
                ],
            }],
            Utc::now(),
        )
    }

    fn buyer() -> Buyer {
        Buyer {
            name: "Ada Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            phone: Some("+1 555-010-9999".to_string()),
        }
    }

    #[test]
    fn test_bundle_and_standalone_merge_by_ticket_type() {
        let mut cart = Cart::open(&catalog());
        cart.set_quantity(&LineId::Ticket(TicketTypeId::new("adult")), 1).unwrap();
        cart.set_quantity(&LineId::Bundle(BundleId::new("family")), 2).unwrap();

        let flat = flatten(&cart).unwrap();

        assert_eq!(
            flat.items,
            vec![
                PurchaseItem {
                    ticket_type_id: TicketTypeId::new("adult"),
                    quantity: 5
                },
                PurchaseItem {
                    ticket_type_id: TicketTypeId::new("child"),
                    quantity: 4
                },
            ]
        );
        // bundle charged at its own price, not the sum of its parts
        assert_eq!(flat.total_amount, Money::from_minor(2_000 + 2 * 4_500));
        assert_eq!(flat.total_ticket_count, 9);
        assert_eq!(flat.charges.len(), 2);
    }

    #[test]
    fn test_empty_cart_rejected() {
        let cart = Cart::open(&catalog());
        assert_eq!(flatten(&cart), Err(CheckoutError::EmptyCart));
    }

    #[test]
    fn test_flatten_is_repeatable() {
        let mut cart = Cart::open(&catalog());
        cart.set_quantity(&LineId::Bundle(BundleId::new("family")), 1).unwrap();
        assert_eq!(flatten(&cart), flatten(&cart));
    }

    #[test]
    fn test_buyer_validation() {
        assert_eq!(validate_buyer(&buyer()), Ok(()));
        assert_eq!(validate_buyer(&Buyer { phone: None, ..buyer() }), Ok(()));
        assert_eq!(
            validate_buyer(&Buyer {
                phone: Some("   ".to_string()),
                ..buyer()
            }),
            Ok(())
        );

        for bad in [
            Buyer { name: "  ".to_string(), ..buyer() },
            Buyer { email: "ada.example.com".to_string(), ..buyer() },
            Buyer { email: "@example.com".to_string(), ..buyer() },
            Buyer { email: "ada@localhost".to_string(), ..buyer() },
            Buyer { phone: Some("12345".to_string()), ..buyer() },
            Buyer { phone: Some("555-CALL-NOW".to_string()), ..buyer() },
        ] {
            assert!(matches!(validate_buyer(&bad), Err(CheckoutError::InvalidBuyer(_))), "{bad:?}");
        }
    }

    #[test]
    fn test_platform_fee_rounds_up() {
        assert_eq!(
            split_platform_fee(Money::from_minor(1_005), 10),
            FeeSplit {
                platform_fee: Money::from_minor(101),
                merchant_receives: Money::from_minor(904),
            }
        );
        assert_eq!(split_platform_fee(Money::from_minor(1_000), 0).platform_fee, Money::ZERO);
        assert_eq!(
            split_platform_fee(Money::from_minor(1_000), 250).merchant_receives,
            Money::ZERO
        );
    }
}
