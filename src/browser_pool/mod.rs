//! Bounded browser pool with a FIFO wait queue
//!
//! Up to `max_browsers` engines, each hosting up to `max_contexts_per_browser`
//! rendering contexts. Callers beyond that wait in strict arrival order, each
//! with its own deadline and cancellation token. Every piece of bookkeeping
//! lives in one [`PoolState`](state::PoolState) behind one mutex that is never
//! held across an await.

pub mod error;
pub mod lease;
pub mod state;

use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::error::Elapsed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use error::PoolError;
pub use lease::RenderLease;
pub use state::PoolStats;

use lease::Reservation;
use state::{Admission, EngineSlot, Grant, PoolState};

use crate::config::BrowserPoolConfig;
use crate::engine::{Engine, EngineLauncher, EngineResult};

// =============================================================================
// Shared Core
// =============================================================================

/// State shared between the pool, its leases and its reservations
pub(crate) struct PoolCore<E: Engine> {
    pub(crate) state: Mutex<PoolState<E>>,
    pub(crate) close_timeout: Duration,
}

impl<E: Engine> PoolCore<E> {
    /// Hand free capacity to queued waiters, oldest first.
    ///
    /// Grants are sent while the lock is held so delivery and withdrawal can
    /// never interleave.
    pub(crate) fn drain(&self) {
        let mut evicted = Vec::new();
        {
            let mut state = self.state.lock();
            let now = Instant::now();

            while let Some((waiter, grant)) = state.pop_servable(now, &mut evicted) {
                let waiter_id = waiter.id;
                let waited = now.saturating_duration_since(waiter.requested_at);
                match waiter.tx.send(grant) {
                    Ok(()) => debug!(
                        waiter_id,
                        waited_ms = waited.as_millis() as u64,
                        "Served queued waiter"
                    ),
                    Err(grant) => state.undo(grant),
                }
            }
        }
        self.close_in_background(evicted);
    }

    pub(crate) fn release_slot(&self, engine_id: u64) {
        self.state.lock().release_slot(engine_id);
        self.drain();
    }

    pub(crate) fn undo(&self, grant: Grant<E>) {
        self.state.lock().undo(grant);
        self.drain();
    }

    fn close_in_background(&self, slots: Vec<EngineSlot<E>>) {
        if slots.is_empty() {
            return;
        }

        for slot in &slots {
            warn!(
                engine_id = slot.id,
                active = slot.active,
                "Evicting dead browser engine"
            );
        }

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let limit = self.close_timeout;
            handle.spawn(close_engines(slots, limit));
        }
    }
}

async fn close_engines<E: Engine>(slots: Vec<EngineSlot<E>>, limit: Duration) {
    join_all(
        slots
            .into_iter()
            .map(|slot| close_engine(Some(slot.id), slot.engine, limit)),
    )
    .await;
}

/// Close one engine. `engine_id` is `None` for engines that never joined the
/// pool, such as launches finishing after their caller left.
async fn close_engine<E: Engine>(engine_id: Option<u64>, engine: Arc<E>, limit: Duration) {
    match tokio::time::timeout(limit, engine.close()).await {
        Ok(Ok(())) => debug!(engine_id, "Closed browser engine"),
        Ok(Err(e)) => warn!(engine_id, error = %e, "Browser engine close failed"),
        Err(_) => warn!(
            engine_id,
            timeout_ms = limit.as_millis() as u64,
            "Browser engine close timed out"
        ),
    }
}

// =============================================================================
// Browser Pool
// =============================================================================

/// Bounded pool of browser engines handing out rendering-context leases
pub struct BrowserPool<L: EngineLauncher> {
    launcher: Arc<L>,
    core: Arc<PoolCore<L::Engine>>,
    config: BrowserPoolConfig,
    keepalive: Mutex<Option<JoinHandle<()>>>,
}

/// How a suspended acquire woke up
enum Wake<E> {
    Delivered(Option<Grant<E>>),
    Deadline,
    Cancelled,
}

/// Output of a spawned, time-bounded launch
type LaunchTask<E> = JoinHandle<Result<EngineResult<E>, Elapsed>>;

impl<L: EngineLauncher> BrowserPool<L> {
    pub fn new(config: BrowserPoolConfig, launcher: L) -> Arc<Self> {
        let core = PoolCore {
            state: Mutex::new(PoolState::new(
                config.max_browsers,
                config.max_contexts_per_browser,
            )),
            close_timeout: config.close_timeout,
        };

        Arc::new(Self {
            launcher: Arc::new(launcher),
            core: Arc::new(core),
            config,
            keepalive: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &BrowserPoolConfig {
        &self.config
    }

    /// Pre-warm engines and start the dead-engine sweep
    pub async fn start(self: &Arc<Self>) {
        let launched = self.warmup(self.config.warmup_browsers).await;
        info!(
            launched,
            max_browsers = self.config.max_browsers,
            max_contexts = self.config.max_contexts_per_browser,
            "Browser pool started"
        );
        self.spawn_keepalive();
    }

    pub fn stats(&self) -> PoolStats {
        self.core.state.lock().stats()
    }

    // -------------------------------------------------------------------------
    // Acquire
    // -------------------------------------------------------------------------

    /// Lease one rendering context.
    ///
    /// Waits in FIFO order when the pool is full, until `deadline` or until
    /// `cancel` fires. If `cancel` fires after capacity was granted but before
    /// this returns, the lease is released and `Aborted` returned.
    pub async fn acquire(
        &self,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<RenderLease<L::Engine>, PoolError> {
        if cancel.is_cancelled() {
            return Err(PoolError::Aborted);
        }

        let grant = self.admit(deadline, cancel).await?;
        let reservation = Reservation::new(Arc::clone(&self.core), grant);
        self.open_lease(reservation, cancel).await
    }

    async fn admit(
        &self,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Grant<L::Engine>, PoolError> {
        let requested_at = Instant::now();
        let mut evicted = Vec::new();

        let admission = {
            let mut state = self.core.state.lock();
            match state.admit(requested_at, &mut evicted) {
                Admission::Granted(grant) => Ok(Ok(grant)),
                Admission::Closed => Err(PoolError::ShuttingDown),
                Admission::Queued => {
                    let (tx, rx) = oneshot::channel();
                    let waiter_id = state.enqueue(requested_at, deadline, cancel.clone(), tx);
                    debug!(
                        waiter_id,
                        queued = state.stats().queued,
                        "Pool at capacity, waiting for a rendering context"
                    );
                    Ok(Err((waiter_id, rx)))
                }
            }
        };

        self.core.close_in_background(evicted);

        match admission? {
            Ok(grant) => Ok(grant),
            Err((waiter_id, rx)) => {
                // Capacity may have been freed by the eviction above
                self.core.drain();
                self.wait_in_queue(waiter_id, rx, requested_at, deadline, cancel)
                    .await
            }
        }
    }

    async fn wait_in_queue(
        &self,
        waiter_id: u64,
        rx: oneshot::Receiver<Grant<L::Engine>>,
        requested_at: Instant,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Grant<L::Engine>, PoolError> {
        let mut ticket = QueueTicket {
            core: self.core.as_ref(),
            waiter_id,
            rx,
            settled: false,
        };

        let wake = tokio::select! {
            biased;
            delivered = &mut ticket.rx => Wake::Delivered(delivered.ok()),
            _ = tokio::time::sleep_until(deadline) => Wake::Deadline,
            _ = cancel.cancelled() => Wake::Cancelled,
        };

        let timed_out = match wake {
            Wake::Delivered(Some(grant)) => {
                ticket.settled = true;
                return Ok(grant);
            }
            // Dropped from the queue without a grant
            Wake::Delivered(None) => {
                ticket.settled = true;
                !cancel.is_cancelled()
            }
            Wake::Deadline => true,
            Wake::Cancelled => false,
        };

        // A grant delivered before we got the lock wins
        if !ticket.settled
            && let Some(grant) = ticket.withdraw()
        {
            return Ok(grant);
        }

        let outcome = if timed_out {
            PoolError::QueueTimeout(requested_at.elapsed())
        } else {
            PoolError::Aborted
        };

        if self.core.state.lock().is_shutting_down() {
            return Err(PoolError::ShuttingDown);
        }
        debug!(waiter_id, error = %outcome, "Left the wait queue without a lease");
        Err(outcome)
    }

    async fn open_lease(
        &self,
        reservation: Reservation<L::Engine>,
        cancel: &CancellationToken,
    ) -> Result<RenderLease<L::Engine>, PoolError> {
        let (reservation, engine_id, engine) = match reservation.slot() {
            Some((engine_id, engine)) => (reservation, engine_id, engine),
            None => self.launch_reserved(reservation, cancel).await?,
        };

        let limit = self.config.launch_timeout;
        let opened = tokio::select! {
            biased;
            opened = tokio::time::timeout(limit, engine.new_context()) => Some(opened),
            _ = cancel.cancelled() => None,
        };

        // Dropping the reservation hands the slot back
        let Some(opened) = opened else {
            debug!(engine_id, "Cancelled while opening a rendering context");
            return Err(PoolError::Aborted);
        };

        match opened {
            Ok(Ok(context)) => {
                let mut lease = reservation.into_lease(engine_id, engine, context);
                if cancel.is_cancelled() {
                    lease.release().await;
                    return Err(PoolError::Aborted);
                }
                debug!(engine_id, "Leased rendering context");
                Ok(lease)
            }
            Err(_) => {
                drop(reservation);
                warn!(
                    engine_id,
                    timeout_ms = limit.as_millis() as u64,
                    "Opening a rendering context timed out"
                );
                Err(PoolError::Context {
                    engine_id,
                    message: format!(
                        "context creation did not finish within {}ms",
                        limit.as_millis()
                    ),
                })
            }
            Ok(Err(e)) => {
                drop(reservation);
                if engine.is_alive() {
                    return Err(PoolError::Context {
                        engine_id,
                        message: e.to_string(),
                    });
                }
                self.evict_unhealthy(engine_id).await;
                Err(PoolError::EngineCrash {
                    engine_id,
                    message: e.to_string(),
                })
            }
        }
    }

    /// Launch the engine a launch permit was granted for.
    ///
    /// The launch runs on its own task so a cancelled caller can leave at
    /// once. The permit stays held until that task finishes, and an engine
    /// that starts after its caller left is closed again.
    async fn launch_reserved(
        &self,
        mut reservation: Reservation<L::Engine>,
        cancel: &CancellationToken,
    ) -> Result<(Reservation<L::Engine>, u64, Arc<L::Engine>), PoolError> {
        let started = Instant::now();
        let limit = self.config.launch_timeout;
        let launcher = Arc::clone(&self.launcher);
        let mut launch: LaunchTask<L::Engine> =
            tokio::spawn(async move { tokio::time::timeout(limit, launcher.launch()).await });

        let joined = tokio::select! {
            biased;
            joined = &mut launch => Some(joined),
            _ = cancel.cancelled() => None,
        };

        let Some(joined) = joined else {
            debug!("Cancelled while launching a browser engine");
            self.abandon_launch(launch, reservation);
            return Err(PoolError::Aborted);
        };

        let engine = match joined {
            Ok(Ok(Ok(engine))) => Arc::new(engine),
            Ok(Ok(Err(e))) => {
                warn!(error = %e, "Browser engine launch failed");
                return Err(PoolError::LaunchFailed(e.to_string()));
            }
            Ok(Err(_)) => {
                warn!(
                    timeout_ms = limit.as_millis() as u64,
                    "Browser engine launch timed out"
                );
                return Err(PoolError::LaunchFailed(format!(
                    "launch did not finish within {}ms",
                    limit.as_millis()
                )));
            }
            Err(e) => {
                warn!(error = %e, "Browser engine launch task failed");
                return Err(PoolError::LaunchFailed(e.to_string()));
            }
        };

        match reservation.bind_launched(Arc::clone(&engine), true) {
            Some(engine_id) => {
                info!(
                    engine_id,
                    launch_ms = started.elapsed().as_millis() as u64,
                    "Launched browser engine"
                );
                Ok((reservation, engine_id, engine))
            }
            None => {
                close_engine(None, engine, self.core.close_timeout).await;
                Err(PoolError::ShuttingDown)
            }
        }
    }

    /// Let a launch nobody waits for finish in the background, then close it
    fn abandon_launch(&self, launch: LaunchTask<L::Engine>, reservation: Reservation<L::Engine>) {
        let limit = self.core.close_timeout;
        tokio::spawn(async move {
            if let Ok(Ok(Ok(engine))) = launch.await {
                debug!("Closing browser engine launched for a departed caller");
                close_engine(None, Arc::new(engine), limit).await;
            }
            drop(reservation);
        });
    }

    // -------------------------------------------------------------------------
    // Eviction, Warmup, Keepalive
    // -------------------------------------------------------------------------

    /// Remove an engine from the pool and close it.
    ///
    /// Outstanding leases on it stay valid handles but no longer count against
    /// capacity. Returns false if the engine was already gone.
    pub async fn evict_unhealthy(&self, engine_id: u64) -> bool {
        let Some(slot) = self.core.state.lock().evict(engine_id) else {
            return false;
        };

        warn!(
            engine_id,
            active = slot.active,
            age_secs = slot.launched_at.elapsed().as_secs(),
            "Evicting unhealthy browser engine"
        );
        self.core.drain();
        close_engine(Some(slot.id), slot.engine, self.core.close_timeout).await;
        true
    }

    /// Launch up to `count` idle engines in parallel.
    ///
    /// Failures are logged and skipped. Returns how many engines started.
    pub async fn warmup(&self, count: usize) -> usize {
        let reservations: Vec<_> = {
            let mut state = self.core.state.lock();
            (0..count)
                .take_while(|_| state.reserve_launch())
                .map(|_| Reservation::launch(Arc::clone(&self.core)))
                .collect()
        };

        let results = join_all(
            reservations
                .into_iter()
                .map(|reservation| self.launch_idle(reservation)),
        )
        .await;

        self.core.drain();
        results.into_iter().filter(|started| *started).count()
    }

    async fn launch_idle(&self, mut reservation: Reservation<L::Engine>) -> bool {
        let limit = self.config.launch_timeout;
        match tokio::time::timeout(limit, self.launcher.launch()).await {
            Ok(Ok(engine)) => {
                let engine = Arc::new(engine);
                match reservation.bind_launched(Arc::clone(&engine), false) {
                    Some(engine_id) => {
                        info!(engine_id, "Pre-warmed browser engine");
                        true
                    }
                    None => {
                        close_engine(None, engine, self.core.close_timeout).await;
                        false
                    }
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to pre-warm browser engine");
                false
            }
            Err(_) => {
                warn!(
                    timeout_ms = limit.as_millis() as u64,
                    "Pre-warming a browser engine timed out"
                );
                false
            }
        }
    }

    /// Evict every engine whose liveness probe fails. Returns the count.
    pub async fn sweep(&self) -> usize {
        let dead = self.core.state.lock().evict_dead();
        if dead.is_empty() {
            return 0;
        }

        let count = dead.len();
        warn!(count, "Keepalive sweep found dead browser engines");
        self.core.drain();
        close_engines(dead, self.core.close_timeout).await;
        count
    }

    fn spawn_keepalive(self: &Arc<Self>) {
        let pool: Weak<Self> = Arc::downgrade(self);
        let interval = self.config.keepalive_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                pool.sweep().await;
            }
        });

        if let Some(previous) = self.keepalive.lock().replace(handle) {
            previous.abort();
        }
    }

    // -------------------------------------------------------------------------
    // Shutdown
    // -------------------------------------------------------------------------

    /// Close every engine and fail every waiter with `ShuttingDown`.
    ///
    /// Idempotent. Later `acquire` calls fail immediately.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.keepalive.lock().take() {
            handle.abort();
        }

        let (engines, waiters) = self.core.state.lock().begin_shutdown();
        if engines.is_empty() && waiters.is_empty() {
            debug!("Browser pool already shut down");
            return;
        }

        info!(
            browsers = engines.len(),
            waiters = waiters.len(),
            "Shutting down browser pool"
        );

        // Dropping the senders wakes every waiter
        drop(waiters);
        close_engines(engines, self.core.close_timeout).await;
        info!("Browser pool shutdown complete");
    }
}

impl<L: EngineLauncher> Drop for BrowserPool<L> {
    fn drop(&mut self) {
        if let Some(handle) = self.keepalive.get_mut().take() {
            handle.abort();
        }
    }
}

/// A place in the wait queue. Dropping it withdraws from the queue and hands
/// back any grant that raced in.
struct QueueTicket<'a, E: Engine> {
    core: &'a PoolCore<E>,
    waiter_id: u64,
    rx: oneshot::Receiver<Grant<E>>,
    settled: bool,
}

impl<E: Engine> QueueTicket<'_, E> {
    fn withdraw(&mut self) -> Option<Grant<E>> {
        self.settled = true;
        if self.core.state.lock().withdraw(self.waiter_id) {
            return None;
        }
        self.rx.try_recv().ok()
    }
}

impl<E: Engine> Drop for QueueTicket<'_, E> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(grant) = self.withdraw() {
            self.core.undo(grant);
        }
    }
}
