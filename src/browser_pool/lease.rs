//! Leases and reservations
//!
//! Both types give capacity back on drop, so a cancelled or panicking caller
//! can never leak a slot.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::PoolCore;
use super::state::Grant;
use crate::engine::{Engine, RenderContext};

// =============================================================================
// Reservation
// =============================================================================

/// Capacity reserved for one caller that has not become a lease yet.
///
/// Dropping it undoes the reservation and lets the next waiter in.
pub(crate) struct Reservation<E: Engine> {
    core: Arc<PoolCore<E>>,
    grant: Option<Grant<E>>,
}

impl<E: Engine> Reservation<E> {
    pub fn new(core: Arc<PoolCore<E>>, grant: Grant<E>) -> Self {
        Self {
            core,
            grant: Some(grant),
        }
    }

    /// A launch permit with nothing behind it yet
    pub fn launch(core: Arc<PoolCore<E>>) -> Self {
        Self::new(core, Grant::Launch)
    }

    /// The reserved slot, if it is already bound to an engine
    pub fn slot(&self) -> Option<(u64, Arc<E>)> {
        match &self.grant {
            Some(Grant::Slot { engine_id, engine }) => Some((*engine_id, Arc::clone(engine))),
            _ => None,
        }
    }

    /// Register a freshly launched engine against this launch permit.
    ///
    /// With `hold_slot` the reservation now holds the engine's first slot.
    /// Returns `None` if the pool is shutting down; the caller then owns
    /// closing the engine.
    pub fn bind_launched(&mut self, engine: Arc<E>, hold_slot: bool) -> Option<u64> {
        debug_assert!(matches!(self.grant, Some(Grant::Launch)));
        self.grant = None;

        let engine_id = self
            .core
            .state
            .lock()
            .register_launched(Arc::clone(&engine), hold_slot)?;

        if hold_slot {
            self.grant = Some(Grant::Slot { engine_id, engine });
        }

        // The new engine's spare contexts belong to whoever is queued
        self.core.drain();
        Some(engine_id)
    }

    /// Hand the reserved slot over to a lease
    pub fn into_lease(mut self, engine_id: u64, engine: Arc<E>, context: E::Context) -> RenderLease<E> {
        self.grant = None;
        RenderLease {
            core: Arc::clone(&self.core),
            engine_id,
            engine,
            context: Some(context),
            acquired_at: Instant::now(),
            released: false,
        }
    }
}

impl<E: Engine> Drop for Reservation<E> {
    fn drop(&mut self) {
        if let Some(grant) = self.grant.take() {
            trace!("Returning unused reservation to the pool");
            self.core.undo(grant);
        }
    }
}

// =============================================================================
// Render Lease
// =============================================================================

/// Exclusive use of one rendering context on one engine.
///
/// Call [`release`](Self::release) when done. A lease dropped without being
/// released is released on a background task.
pub struct RenderLease<E: Engine> {
    core: Arc<PoolCore<E>>,
    engine_id: u64,
    engine: Arc<E>,
    context: Option<E::Context>,
    acquired_at: Instant,
    released: bool,
}

impl<E: Engine> RenderLease<E> {
    pub fn engine_id(&self) -> u64 {
        self.engine_id
    }

    /// The leased context. `None` once released.
    pub fn context(&self) -> Option<&E::Context> {
        self.context.as_ref()
    }

    pub fn is_engine_alive(&self) -> bool {
        self.engine.is_alive()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Close the context and return its slot to the pool.
    ///
    /// Idempotent. Close failures are logged, never returned. The slot is
    /// returned even if this future is dropped part way through.
    pub async fn release(&mut self) {
        if self.released {
            trace!(engine_id = self.engine_id, "Lease already released");
            return;
        }
        self.released = true;

        let slot = SlotReturn {
            core: Arc::clone(&self.core),
            engine_id: self.engine_id,
        };

        if let Some(context) = self.context.take() {
            close_context(self.engine_id, context, self.core.close_timeout).await;
        }

        debug!(
            engine_id = self.engine_id,
            held_ms = self.held_for().as_millis() as u64,
            "Released rendering context"
        );
        drop(slot);
    }
}

impl<E: Engine> fmt::Debug for RenderLease<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderLease")
            .field("engine_id", &self.engine_id)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl<E: Engine> Drop for RenderLease<E> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let slot = SlotReturn {
            core: Arc::clone(&self.core),
            engine_id: self.engine_id,
        };
        let context = self.context.take();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let engine_id = self.engine_id;
                let limit = self.core.close_timeout;
                handle.spawn(async move {
                    if let Some(context) = context {
                        close_context(engine_id, context, limit).await;
                    }
                    drop(slot);
                });
            }
            Err(_) => {
                warn!(
                    engine_id = self.engine_id,
                    "Lease dropped outside a runtime; context not closed"
                );
                drop(slot);
            }
        }
    }
}

/// Returns one slot to the pool on drop, then drains the queue
struct SlotReturn<E: Engine> {
    core: Arc<PoolCore<E>>,
    engine_id: u64,
}

impl<E: Engine> Drop for SlotReturn<E> {
    fn drop(&mut self) {
        self.core.release_slot(self.engine_id);
    }
}

async fn close_context<C: RenderContext>(engine_id: u64, context: C, limit: Duration) {
    match tokio::time::timeout(limit, context.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(engine_id, error = %e, "Failed to close rendering context"),
        Err(_) => warn!(
            engine_id,
            timeout_ms = limit.as_millis() as u64,
            "Closing rendering context timed out"
        ),
    }
}
