//! Request lifecycle controller
//!
//! One render request holds at most one lease, runs under three nested
//! deadlines (navigation, capture, whole request) plus the queue deadline, and
//! shares a single cancellation token across every stage. The lease is released
//! on every exit path.

pub mod error;
pub mod request;
pub mod stage;

use axum::http::StatusCode;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use error::{ErrorBody, RenderError};
pub use request::{RenderJob, RenderRequest};
pub use stage::{StageOutcome, cancellable_sleep, run_stage};

use crate::browser_pool::{BrowserPool, RenderLease};
use crate::config::TimeoutConfig;
use crate::engine::{EngineError, EngineLauncher, ImageFormat, RenderContext};

/// Sent if an error body cannot be encoded
const FALLBACK_ERROR_BODY: &[u8] =
    br#"{"error":"internal","message":"failed to encode error response","timeout":false}"#;

/// A successfully captured image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    pub format: ImageFormat,
    pub bytes: Vec<u8>,
}

/// What the HTTP layer writes back. Built exactly once per request.
#[derive(Debug, Clone)]
pub struct RenderResponse {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl RenderResponse {
    pub fn image(image: RenderedImage) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: image.format.content_type(),
            body: image.bytes,
        }
    }

    pub fn error(err: &RenderError, request_id: Uuid) -> Self {
        let body = serde_json::to_vec(&ErrorBody::new(err, request_id)).unwrap_or_else(|e| {
            warn!(%request_id, error = %e, "Failed to encode error body");
            FALLBACK_ERROR_BODY.to_vec()
        });
        Self {
            status: err.status(),
            content_type: "application/json",
            body,
        }
    }
}

/// Drives render requests through the pool
pub struct RenderService<L: EngineLauncher> {
    pool: Arc<BrowserPool<L>>,
    timeouts: TimeoutConfig,
}

impl<L: EngineLauncher> RenderService<L> {
    pub fn new(pool: Arc<BrowserPool<L>>, timeouts: TimeoutConfig) -> Self {
        Self { pool, timeouts }
    }

    pub fn pool(&self) -> &Arc<BrowserPool<L>> {
        &self.pool
    }

    pub fn timeouts(&self) -> TimeoutConfig {
        self.timeouts
    }

    /// Render and classify. Never fails; errors become JSON bodies.
    pub async fn render(&self, request: RenderRequest) -> RenderResponse {
        let request_id = Uuid::new_v4();
        match self.execute(request, request_id).await {
            Ok(image) => RenderResponse::image(image),
            Err(err) => RenderResponse::error(&err, request_id),
        }
    }

    /// Render, returning the typed error on failure
    pub async fn try_render(&self, request: RenderRequest) -> Result<RenderedImage, RenderError> {
        self.execute(request, Uuid::new_v4()).await
    }

    async fn execute(
        &self,
        request: RenderRequest,
        request_id: Uuid,
    ) -> Result<RenderedImage, RenderError> {
        let job = request.validate().inspect_err(|e| {
            debug!(%request_id, error = %e, "Rejected render request");
        })?;

        let started = Instant::now();
        let cancel = CancellationToken::new();
        let limit = self.timeouts.request;

        let pipeline = self.run_pipeline(&job, &cancel);
        tokio::pin!(pipeline);

        // Pipeline first: a result that is already there beats the timer
        let finished = tokio::select! {
            biased;
            result = &mut pipeline => Some(result),
            _ = tokio::time::sleep(limit) => None,
        };

        let result = match finished {
            Some(result) => result,
            None => {
                cancel.cancel();
                // Unwind the in-flight stage so its lease is released
                if pipeline.await.is_ok() {
                    debug!(%request_id, "Discarded capture that finished after the request timeout");
                }
                Err(RenderError::GlobalTimeout(limit))
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(image) => info!(
                %request_id,
                target = %job.target.describe(),
                viewport = %job.viewport,
                format = %image.format,
                bytes = image.bytes.len(),
                elapsed_ms,
                "Rendered screenshot"
            ),
            Err(e) => warn!(
                %request_id,
                target = %job.target.describe(),
                kind = e.kind(),
                timeout = e.is_timeout(),
                elapsed_ms,
                error = %e,
                "Render failed"
            ),
        }

        result
    }

    async fn run_pipeline(
        &self,
        job: &RenderJob,
        cancel: &CancellationToken,
    ) -> Result<RenderedImage, RenderError> {
        let queue_deadline = Instant::now() + self.timeouts.queue;
        let mut lease = self.pool.acquire(queue_deadline, cancel).await?;

        let result = self.drive(&lease, job, cancel).await;

        if matches!(result, Err(RenderError::EngineCrash(_))) {
            self.pool.evict_unhealthy(lease.engine_id()).await;
        }
        lease.release().await;

        result
    }

    async fn drive(
        &self,
        lease: &RenderLease<L::Engine>,
        job: &RenderJob,
        cancel: &CancellationToken,
    ) -> Result<RenderedImage, RenderError> {
        let Some(context) = lease.context() else {
            return Err(RenderError::Engine("lease has no rendering context".to_string()));
        };

        let navigation = context.navigate(&job.target, job.viewport);
        match run_stage(navigation, self.timeouts.navigation, cancel).await {
            StageOutcome::Completed(Ok(())) => {}
            StageOutcome::Completed(Err(e)) => {
                return Err(engine_failure(lease, e, RenderError::Navigation));
            }
            StageOutcome::TimedOut => {
                return Err(RenderError::NavigationTimeout(self.timeouts.navigation));
            }
            StageOutcome::Cancelled => return Err(RenderError::Aborted),
        }

        if !job.delay.is_zero() && !cancellable_sleep(job.delay, cancel).await {
            return Err(RenderError::Aborted);
        }

        let capture = context.capture(job.format, job.full_page);
        match run_stage(capture, self.timeouts.render, cancel).await {
            StageOutcome::Completed(Ok(bytes)) => Ok(RenderedImage {
                format: job.format,
                bytes,
            }),
            StageOutcome::Completed(Err(e)) => Err(engine_failure(lease, e, RenderError::Capture)),
            StageOutcome::TimedOut => Err(RenderError::RenderTimeout(self.timeouts.render)),
            StageOutcome::Cancelled => Err(RenderError::Aborted),
        }
    }
}

/// A stage failure on a dead engine is a crash, not a page problem
fn engine_failure<E: crate::engine::Engine>(
    lease: &RenderLease<E>,
    err: EngineError,
    classify: fn(String) -> RenderError,
) -> RenderError {
    if lease.is_engine_alive() {
        classify(err.detail().to_string())
    } else {
        RenderError::EngineCrash(err.to_string())
    }
}
