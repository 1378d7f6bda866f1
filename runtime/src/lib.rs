//! # Box Office Runtime
//!
//! The imperative shell around reducers:
//!
//! - [`execute_all`] drives the effects of one reduction to completion and
//!   collects every action they produce, so the caller can feed them back
//!   into the reducer.
//! - [`locks::KeyedLocks`] serializes work per key (one order at a time),
//!   which is what keeps a payment callback and an operator retry for the same
//!   order from racing each other.
//! - [`retry`] provides exponential backoff for idempotent reads.
//!
//! Effects are awaited in place rather than spawned. A caller holding a
//! per-order lock therefore observes the complete outcome of a transition,
//! including the result of any external call it triggered, before the lock is
//! released.

use box_office_core::effect::Effect;

pub mod locks;
pub mod retry;

pub use locks::KeyedLocks;
pub use retry::{retry_with_backoff, retry_with_predicate, RetryPolicy};

/// Execute an effect and collect the actions it produces.
///
/// - `Effect::None` produces nothing.
/// - `Effect::Future` is awaited; its action (if any) is collected.
pub async fn execute<A>(effect: Effect<A>) -> Option<A>
where
    A: Send + 'static,
{
    match effect {
        Effect::None => None,
        Effect::Future(fut) => {
            tracing::trace!("Executing Effect::Future");
            fut.await
        },
    }
}

/// Execute a batch of effects (as returned by a reducer) in order.
pub async fn execute_all<A, I>(effects: I) -> Vec<A>
where
    A: Send + 'static,
    I: IntoIterator<Item = Effect<A>>,
{
    let mut actions = Vec::new();
    for effect in effects {
        actions.extend(execute(effect).await);
    }
    actions
}
