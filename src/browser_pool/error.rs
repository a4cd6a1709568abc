use std::time::Duration;
use thiserror::Error;

/// Why the pool could not hand out a lease
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("browser pool is shutting down")]
    ShuttingDown,

    /// Growing the pool failed. Surfaced to the caller that tried to grow it.
    #[error("failed to launch browser engine: {0}")]
    LaunchFailed(String),

    #[error("no rendering context became free within {}ms", .0.as_millis())]
    QueueTimeout(Duration),

    #[error("request aborted while acquiring a rendering context")]
    Aborted,

    /// The engine died while a context was being opened on it
    #[error("browser engine {engine_id} crashed: {message}")]
    EngineCrash { engine_id: u64, message: String },

    /// The engine is alive but refused to open a context
    #[error("browser engine {engine_id} could not open a context: {message}")]
    Context { engine_id: u64, message: String },
}
