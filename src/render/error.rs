use axum::http::StatusCode;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::browser_pool::PoolError;

/// Every way a render request can fail
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("browser pool could not grow: {0}")]
    PoolExhausted(String),

    #[error("waited {}ms for a free rendering context", .0.as_millis())]
    QueueTimeout(Duration),

    #[error("request aborted")]
    Aborted,

    #[error("navigation did not finish within {}ms", .0.as_millis())]
    NavigationTimeout(Duration),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("capture did not finish within {}ms", .0.as_millis())]
    RenderTimeout(Duration),

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("request did not finish within {}ms", .0.as_millis())]
    GlobalTimeout(Duration),

    #[error("browser engine crashed: {0}")]
    EngineCrash(String),

    #[error("browser engine error: {0}")]
    Engine(String),

    #[error("service is shutting down")]
    ShuttingDown,
}

impl RenderError {
    /// Stable machine-readable identifier
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::PoolExhausted(_) => "pool_exhausted",
            Self::QueueTimeout(_) => "queue_timeout",
            Self::Aborted => "aborted",
            Self::NavigationTimeout(_) => "navigation_timeout",
            Self::Navigation(_) => "navigation_failed",
            Self::RenderTimeout(_) => "render_timeout",
            Self::Capture(_) => "capture_failed",
            Self::GlobalTimeout(_) => "request_timeout",
            Self::EngineCrash(_) => "engine_crash",
            Self::Engine(_) => "engine_error",
            Self::ShuttingDown => "shutting_down",
        }
    }

    /// True when the cause was definitively a deadline
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::QueueTimeout(_)
                | Self::NavigationTimeout(_)
                | Self::RenderTimeout(_)
                | Self::GlobalTimeout(_)
        )
    }

    /// 400 for bad input, 504 for timeouts, 503 for everything else
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            e if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<PoolError> for RenderError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::ShuttingDown => Self::ShuttingDown,
            PoolError::LaunchFailed(message) => Self::PoolExhausted(message),
            PoolError::QueueTimeout(waited) => Self::QueueTimeout(waited),
            PoolError::Aborted => Self::Aborted,
            PoolError::EngineCrash { message, .. } => Self::EngineCrash(message),
            PoolError::Context { message, .. } => Self::Engine(message),
        }
    }
}

/// JSON body sent for every failed request
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    pub timeout: bool,
    pub request_id: Uuid,
}

impl ErrorBody {
    pub fn new(err: &RenderError, request_id: Uuid) -> Self {
        Self {
            error: err.kind(),
            message: err.to_string(),
            timeout: err.is_timeout(),
            request_id,
        }
    }
}
