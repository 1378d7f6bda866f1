//! Per-key mutual exclusion.
//!
//! Payment confirmations arrive from the gateway at least once and operators
//! can trigger retries at any time. Both paths take the lock for the order
//! they touch, so transitions of one order are applied strictly one after
//! another while different orders proceed independently.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of async mutexes keyed by `K`.
///
/// Entries are created lazily and pruned once nobody holds or waits on them.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for exclusive access to `key`.
    ///
    /// The returned guard releases the key when dropped.
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().await;
            // Drop slots nobody else references before handing one out.
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        slot.lock_owned().await
    }

    /// Number of keys currently tracked (held or awaited)
    pub async fn tracked(&self) -> usize {
        self.slots.lock().await.len()
    }
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
