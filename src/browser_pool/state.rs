//! Serialized pool bookkeeping
//!
//! Everything in this module is synchronous and runs under the pool mutex.
//! Async work (launching, opening and closing contexts) happens outside the
//! lock on reservations handed out from here.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::engine::Engine;

/// One engine tracked by the pool
pub(crate) struct EngineSlot<E> {
    pub id: u64,
    pub engine: Arc<E>,
    /// Contexts currently leased on this engine
    pub active: usize,
    pub launched_at: Instant,
}

/// Capacity handed to a caller
pub(crate) enum Grant<E> {
    /// A context slot reserved on an existing engine
    Slot { engine_id: u64, engine: Arc<E> },
    /// Permission to launch one new engine; its first slot belongs to the holder
    Launch,
}

/// A caller suspended until capacity frees up
pub(crate) struct Waiter<E> {
    pub id: u64,
    pub requested_at: Instant,
    pub deadline: Instant,
    pub cancel: CancellationToken,
    pub tx: oneshot::Sender<Grant<E>>,
}

impl<E> Waiter<E> {
    /// Expired, cancelled, or nobody listening any more
    fn is_stale(&self, now: Instant) -> bool {
        self.deadline <= now || self.cancel.is_cancelled() || self.tx.is_closed()
    }
}

/// Outcome of an admission attempt
pub(crate) enum Admission<E> {
    Granted(Grant<E>),
    Queued,
    Closed,
}

/// Point-in-time pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub browsers: usize,
    pub launching: usize,
    pub active_leases: usize,
    pub capacity: usize,
    pub queued: usize,
    pub shutting_down: bool,
}

pub(crate) struct PoolState<E> {
    engines: Vec<EngineSlot<E>>,
    launching: usize,
    waiters: VecDeque<Waiter<E>>,
    next_engine_id: u64,
    next_waiter_id: u64,
    shutting_down: bool,
    max_browsers: usize,
    max_contexts: usize,
}

impl<E: Engine> PoolState<E> {
    pub fn new(max_browsers: usize, max_contexts: usize) -> Self {
        Self {
            engines: Vec::with_capacity(max_browsers),
            launching: 0,
            waiters: VecDeque::new(),
            next_engine_id: 1,
            next_waiter_id: 1,
            shutting_down: false,
            max_browsers,
            max_contexts,
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// Admit a new caller.
    ///
    /// Live waiters always go first: a new caller is only granted capacity
    /// directly when nobody is queued ahead of it.
    pub fn admit(&mut self, now: Instant, evicted: &mut Vec<EngineSlot<E>>) -> Admission<E> {
        if self.shutting_down {
            return Admission::Closed;
        }

        self.evict_dead_into(evicted);
        self.waiters.retain(|w| !w.is_stale(now));

        if !self.waiters.is_empty() {
            return Admission::Queued;
        }

        match self.reserve() {
            Some(grant) => Admission::Granted(grant),
            None => Admission::Queued,
        }
    }

    /// Append a waiter to the back of the queue and return its id
    pub fn enqueue(
        &mut self,
        requested_at: Instant,
        deadline: Instant,
        cancel: CancellationToken,
        tx: oneshot::Sender<Grant<E>>,
    ) -> u64 {
        let id = self.next_waiter_id;
        self.next_waiter_id += 1;
        self.waiters.push_back(Waiter {
            id,
            requested_at,
            deadline,
            cancel,
            tx,
        });
        id
    }

    /// Remove a waiter. Returns false if it is no longer queued.
    pub fn withdraw(&mut self, waiter_id: u64) -> bool {
        match self.waiters.iter().position(|w| w.id == waiter_id) {
            Some(index) => {
                self.waiters.remove(index);
                true
            }
            None => false,
        }
    }

    /// Pop the oldest live waiter together with capacity for it.
    ///
    /// Stale entries at the front are discarded without being served.
    pub fn pop_servable(
        &mut self,
        now: Instant,
        evicted: &mut Vec<EngineSlot<E>>,
    ) -> Option<(Waiter<E>, Grant<E>)> {
        if self.shutting_down {
            return None;
        }

        self.evict_dead_into(evicted);

        loop {
            let front = self.waiters.front()?;
            if front.is_stale(now) {
                self.waiters.pop_front();
                continue;
            }

            let grant = self.reserve()?;
            let waiter = self.waiters.pop_front()?;
            return Some((waiter, grant));
        }
    }

    /// First-fit slot on a live engine, else a launch permit if there is room
    fn reserve(&mut self) -> Option<Grant<E>> {
        let max_contexts = self.max_contexts;
        if let Some(slot) = self
            .engines
            .iter_mut()
            .find(|slot| slot.active < max_contexts)
        {
            slot.active += 1;
            return Some(Grant::Slot {
                engine_id: slot.id,
                engine: Arc::clone(&slot.engine),
            });
        }

        if self.engines.len() + self.launching < self.max_browsers {
            self.launching += 1;
            return Some(Grant::Launch);
        }

        None
    }

    /// Reserve room for an idle engine (warmup)
    pub fn reserve_launch(&mut self) -> bool {
        if self.shutting_down || self.engines.len() + self.launching >= self.max_browsers {
            return false;
        }
        self.launching += 1;
        true
    }

    /// Return capacity from a grant that was never turned into a lease
    pub fn undo(&mut self, grant: Grant<E>) {
        match grant {
            Grant::Slot { engine_id, .. } => {
                self.release_slot(engine_id);
            }
            Grant::Launch => self.launch_finished(),
        }
    }

    /// Decrement an engine's active count. No-op if the engine is gone.
    pub fn release_slot(&mut self, engine_id: u64) -> bool {
        match self.engines.iter_mut().find(|slot| slot.id == engine_id) {
            Some(slot) => {
                debug_assert!(slot.active > 0, "release on idle engine {engine_id}");
                slot.active = slot.active.saturating_sub(1);
                true
            }
            None => false,
        }
    }

    pub fn launch_finished(&mut self) {
        debug_assert!(self.launching > 0, "launch accounting underflow");
        self.launching = self.launching.saturating_sub(1);
    }

    /// Turn a launch permit into a tracked engine.
    ///
    /// With `hold_slot` the new engine starts with one active context owned by
    /// the launcher. Returns `None` when the pool began shutting down meanwhile.
    pub fn register_launched(&mut self, engine: Arc<E>, hold_slot: bool) -> Option<u64> {
        self.launch_finished();
        if self.shutting_down {
            return None;
        }

        let id = self.next_engine_id;
        self.next_engine_id += 1;
        self.engines.push(EngineSlot {
            id,
            engine,
            active: usize::from(hold_slot),
            launched_at: Instant::now(),
        });
        Some(id)
    }

    /// Remove one engine from capacity accounting
    pub fn evict(&mut self, engine_id: u64) -> Option<EngineSlot<E>> {
        let index = self.engines.iter().position(|slot| slot.id == engine_id)?;
        Some(self.engines.remove(index))
    }

    /// Remove every engine whose liveness probe fails
    pub fn evict_dead(&mut self) -> Vec<EngineSlot<E>> {
        let mut evicted = Vec::new();
        self.evict_dead_into(&mut evicted);
        evicted
    }

    fn evict_dead_into(&mut self, evicted: &mut Vec<EngineSlot<E>>) {
        if self.engines.iter().all(|slot| slot.engine.is_alive()) {
            return;
        }

        let (alive, dead): (Vec<_>, Vec<_>) = self
            .engines
            .drain(..)
            .partition(|slot| slot.engine.is_alive());
        self.engines = alive;
        evicted.extend(dead);
    }

    /// Enter shutdown, handing back every engine and waiter.
    ///
    /// Idempotent: later calls return empty collections.
    pub fn begin_shutdown(&mut self) -> (Vec<EngineSlot<E>>, Vec<Waiter<E>>) {
        self.shutting_down = true;
        let engines = std::mem::take(&mut self.engines);
        let waiters = self.waiters.drain(..).collect();
        (engines, waiters)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            browsers: self.engines.len(),
            launching: self.launching,
            active_leases: self.engines.iter().map(|slot| slot.active).sum(),
            capacity: self.max_browsers * self.max_contexts,
            queued: self.waiters.len(),
            shutting_down: self.shutting_down,
        }
    }

    #[cfg(test)]
    fn max_active(&self) -> usize {
        self.engines.iter().map(|s| s.active).max().unwrap_or(0)
    }
}
