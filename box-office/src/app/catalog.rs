//! Cached catalog and inventory per event.
//!
//! The snapshot is eventually consistent: reads are served from cache while
//! it is younger than the configured max age, and a background task refreshes
//! every cached event periodically. The provider enforces stock for real at
//! issuance time.

use crate::inventory::EventCatalog;
use crate::provider::{ProviderError, TicketingProvider};
use crate::types::EventId;
use box_office_core::environment::Clock;
use box_office_runtime::retry::{retry_with_predicate, RetryPolicy};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Catalog cache backed by the ticketing provider.
pub struct CatalogService {
    provider: Arc<dyn TicketingProvider>,
    clock: Arc<dyn Clock>,
    max_age: chrono::Duration,
    retry: RetryPolicy,
    cache: RwLock<HashMap<EventId, Arc<EventCatalog>>>,
}

impl CatalogService {
    /// Create a catalog service with the default retry policy
    #[must_use]
    pub fn new(provider: Arc<dyn TicketingProvider>, clock: Arc<dyn Clock>, max_age: Duration) -> Self {
        Self {
            provider,
            clock,
            max_age: chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX),
            retry: RetryPolicy::default(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the retry policy used for provider reads
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Catalog for an event, refetched when missing or stale.
    ///
    /// If a refetch fails and an older catalog is cached, the older one is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns the provider error when nothing usable is cached.
    pub async fn catalog(&self, event_id: &EventId) -> Result<Arc<EventCatalog>, ProviderError> {
        let cached = self.cache.read().await.get(event_id).cloned();
        if let Some(catalog) = &cached {
            if self.clock.now() - catalog.fetched_at < self.max_age {
                return Ok(Arc::clone(catalog));
            }
        }

        match self.refresh(event_id).await {
            Ok(catalog) => Ok(catalog),
            Err(error) => match cached {
                Some(stale) => {
                    tracing::warn!(
                        event_id = %event_id,
                        fetched_at = %stale.fetched_at,
                        error = %error,
                        "Catalog refresh failed, serving stale snapshot"
                    );
                    Ok(stale)
                },
                None => Err(error),
            },
        }
    }

    /// Refetch an event's catalog from the provider.
    ///
    /// # Errors
    ///
    /// Returns the provider error once retries are exhausted.
    pub async fn refresh(&self, event_id: &EventId) -> Result<Arc<EventCatalog>, ProviderError> {
        let (ticket_types, bundles) = tokio::try_join!(
            retry_with_predicate(
                &self.retry,
                || self.provider.ticket_types(event_id),
                ProviderError::is_retryable,
            ),
            retry_with_predicate(
                &self.retry,
                || self.provider.bundles(event_id),
                ProviderError::is_retryable,
            ),
        )?;

        let catalog = Arc::new(EventCatalog::new(
            event_id.clone(),
            ticket_types,
            bundles,
            self.clock.now(),
        ));
        tracing::debug!(
            event_id = %event_id,
            ticket_types = catalog.ticket_types.len(),
            bundles = catalog.bundles.len(),
            "Catalog refreshed"
        );

        self.cache
            .write()
            .await
            .insert(event_id.clone(), Arc::clone(&catalog));
        Ok(catalog)
    }

    /// Events with a cached catalog
    pub async fn cached_events(&self) -> Vec<EventId> {
        self.cache.read().await.keys().cloned().collect()
    }

    /// Periodically refresh every cached event.
    ///
    /// Failures are logged and the previous snapshot is kept.
    pub fn spawn_refresh_loop(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                for event_id in self.cached_events().await {
                    if let Err(error) = self.refresh(&event_id).await {
                        tracing::warn!(event_id = %event_id, error = %error, "Background catalog refresh failed");
                    }
                }
            }
        })
    }
}
