//! Catalog and cart endpoints.
//!
//! - GET /api/events/:event_id/catalog
//! - POST /api/events/:event_id/cart/evaluate

#![allow(clippy::missing_errors_doc)] // handlers return AppError

use crate::api::error::AppError;
use crate::app::{BoxOffice, CartEvaluation};
use crate::inventory::{bundle_availability, BundleAvailability};
use crate::reservation::LineId;
use crate::server::state::AppState;
use crate::types::{BundleComponent, BundleId, EventId, Money, TicketTypeId};
use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Ticket type as listed in the catalog.
#[derive(Debug, Serialize)]
pub struct TicketTypeResponse {
    /// Ticket type id
    pub id: TicketTypeId,
    /// Display name
    pub name: String,
    /// Unit price in minor units
    pub price: Money,
    /// Remaining stock across every listing of this type
    pub remaining: u32,
    /// Per-order cap
    pub max_per_order: u32,
}

/// Bundle as listed in the catalog.
#[derive(Debug, Serialize)]
pub struct BundleResponse {
    /// Bundle id
    pub id: BundleId,
    /// Display name
    pub name: String,
    /// Bundle price in minor units
    pub price: Money,
    /// Per-order cap
    pub max_quantity: u32,
    /// Ticket types one unit expands into
    pub components: Vec<BundleComponent>,
    /// Standalone availability against the snapshot
    pub availability: BundleAvailability,
}

/// Response for GET /api/events/:event_id/catalog.
#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    /// Event
    pub event_id: EventId,
    /// Ticket types
    pub ticket_types: Vec<TicketTypeResponse>,
    /// Bundles
    pub bundles: Vec<BundleResponse>,
    /// When the inventory snapshot was taken
    pub fetched_at: DateTime<Utc>,
}

/// One selected line.
#[derive(Debug, Clone, Deserialize)]
pub struct Selection {
    /// Line, e.g. `{"kind": "bundle", "id": "family"}`
    pub line: LineId,
    /// Selected units
    pub quantity: u32,
}

/// Cart body shared by evaluation and submission.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CartRequest {
    /// Selected lines; unlisted lines are zero
    #[serde(default)]
    pub selections: Vec<Selection>,
}

impl CartRequest {
    pub(crate) fn pairs(&self) -> Vec<(LineId, u32)> {
        self.selections
            .iter()
            .map(|selection| (selection.line.clone(), selection.quantity))
            .collect()
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Catalog with per-bundle availability.
pub async fn get_catalog(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<CatalogResponse>, AppError> {
    let event_id = EventId::new(event_id);
    let catalog = state.box_office.catalog(&event_id).await?;

    let ticket_types = catalog
        .distinct_ticket_types()
        .into_iter()
        .map(|ticket_type| TicketTypeResponse {
            id: ticket_type.id.clone(),
            name: ticket_type.name.clone(),
            price: ticket_type.price,
            remaining: catalog.snapshot.remaining(&ticket_type.id),
            max_per_order: ticket_type.max_per_order,
        })
        .collect();
    let bundles = catalog
        .bundles
        .iter()
        .map(|bundle| BundleResponse {
            id: bundle.id.clone(),
            name: bundle.name.clone(),
            price: bundle.price,
            max_quantity: bundle.max_quantity,
            components: bundle.components.clone(),
            availability: bundle_availability(bundle, &catalog.snapshot),
        })
        .collect();

    Ok(Json(CatalogResponse {
        event_id,
        ticket_types,
        bundles,
        fetched_at: catalog.fetched_at,
    }))
}

/// Increment/decrement availability per line and the checkout preview.
pub async fn evaluate_cart(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    Json(request): Json<CartRequest>,
) -> Result<Json<CartEvaluation>, AppError> {
    let event_id = EventId::new(event_id);
    let (catalog, cart) = state.box_office.build_cart(&event_id, &request.pairs()).await?;
    Ok(Json(BoxOffice::evaluate_cart(&catalog, &cart)))
}
