//! Order persistence.
//!
//! Orders are saved after every transition, before the next external call,
//! so a restart resumes from the last durable state.

use crate::types::{Order, OrderId, OrderStatus};
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// Repository errors.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RepositoryError {
    /// The backing store failed
    #[error("order storage error: {0}")]
    Storage(String),

    /// An order document could not be encoded or decoded
    #[error("order serialization error: {0}")]
    Serialization(String),
}

/// Storage for orders.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Inserts or replaces an order.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the write fails.
    async fn save(&self, order: &Order) -> Result<(), RepositoryError>;

    /// Loads an order by id.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the read fails.
    async fn get(&self, order_id: OrderId) -> Result<Option<Order>, RepositoryError>;

    /// Loads the order a payment session belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the read fails.
    async fn find_by_payment_reference(&self, reference: &str) -> Result<Option<Order>, RepositoryError>;

    /// Orders in `status`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the read fails.
    async fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, RepositoryError>;
}

/// In-memory repository for development and tests.
#[derive(Debug, Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<HashMap<OrderId, Order>>,
}

impl InMemoryOrderRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn save(&self, order: &Order) -> Result<(), RepositoryError> {
        self.orders.write().await.insert(order.id, order.clone());
        Ok(())
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(self.orders.read().await.get(&order_id).cloned())
    }

    async fn find_by_payment_reference(&self, reference: &str) -> Result<Option<Order>, RepositoryError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .find(|order| order.payment_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, RepositoryError> {
        let mut orders: Vec<Order> = self
            .orders
            .read()
            .await
            .values()
            .filter(|order| order.status == status)
            .cloned()
            .collect();
        orders.sort_by_key(|order| order.created_at);
        Ok(orders)
    }
}

/// `PostgreSQL` repository.
///
/// Each order is one row: the full order as a JSONB document, plus the
/// columns we query by.
#[derive(Clone, Debug)]
pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    /// Creates a repository over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the orders table and its indexes if missing.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Storage`] if a statement fails.
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        for statement in [
            r"
            CREATE TABLE IF NOT EXISTS box_office_orders (
                order_id UUID PRIMARY KEY,
                status TEXT NOT NULL,
                payment_reference TEXT UNIQUE,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                document JSONB NOT NULL
            )
            ",
            r"
            CREATE INDEX IF NOT EXISTS idx_box_office_orders_status
                ON box_office_orders (status, created_at)
            ",
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        }
        tracing::info!("Order table ready");
        Ok(())
    }

    fn decode(document: serde_json::Value) -> Result<Order, RepositoryError> {
        serde_json::from_value(document).map_err(|e| RepositoryError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    async fn save(&self, order: &Order) -> Result<(), RepositoryError> {
        let document =
            serde_json::to_value(order).map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        sqlx::query(
            r"
            INSERT INTO box_office_orders (
                order_id, status, payment_reference, created_at, updated_at, document
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (order_id) DO UPDATE SET
                status = EXCLUDED.status,
                payment_reference = EXCLUDED.payment_reference,
                updated_at = EXCLUDED.updated_at,
                document = EXCLUDED.document
            ",
        )
        .bind(*order.id.as_uuid())
        .bind(order.status.as_str())
        .bind(order.payment_reference.as_deref())
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(document)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Storage(e.to_string()))?;

        tracing::debug!(order_id = %order.id, status = %order.status, "Order saved");
        Ok(())
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT document FROM box_office_orders WHERE order_id = $1")
                .bind(*order_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| RepositoryError::Storage(e.to_string()))?;

        row.map(|(document,)| Self::decode(document)).transpose()
    }

    async fn find_by_payment_reference(&self, reference: &str) -> Result<Option<Order>, RepositoryError> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT document FROM box_office_orders WHERE payment_reference = $1")
                .bind(reference)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| RepositoryError::Storage(e.to_string()))?;

        row.map(|(document,)| Self::decode(document)).transpose()
    }

    async fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, RepositoryError> {
        let rows: Vec<(serde_json::Value,)> = sqlx::query_as(
            "SELECT document FROM box_office_orders WHERE status = $1 ORDER BY created_at",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Storage(e.to_string()))?;

        rows.into_iter().map(|(document,)| Self::decode(document)).collect()
    }
}
