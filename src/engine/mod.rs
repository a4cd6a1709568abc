//! Browser engine abstraction
//!
//! The pool and the render controller only ever talk to an engine through the
//! three traits in this module. [`chromium`] provides the production
//! implementation; tests plug in scripted engines.
//!
//! Every async operation here may fail or hang. Callers bound them with
//! timeouts and cancellation; implementations are not required to.

pub mod chromium;
pub mod profile;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

pub use chromium::{ChromiumContext, ChromiumEngine, ChromiumLauncher};

/// Result alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Failures reported by an engine implementation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine launch failed: {0}")]
    Launch(String),

    #[error("context creation failed: {0}")]
    Context(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("close failed: {0}")]
    Close(String),
}

impl EngineError {
    /// The underlying message without the operation prefix
    pub fn detail(&self) -> &str {
        match self {
            Self::Launch(m)
            | Self::Context(m)
            | Self::Navigation(m)
            | Self::Capture(m)
            | Self::Close(m) => m,
        }
    }
}

// =============================================================================
// Engine Traits
// =============================================================================

/// Starts new engine instances on demand.
pub trait EngineLauncher: Send + Sync + 'static {
    type Engine: Engine;

    /// Launch a fresh engine instance
    fn launch(&self) -> impl Future<Output = EngineResult<Self::Engine>> + Send;
}

/// A running engine instance hosting isolated rendering contexts.
pub trait Engine: Send + Sync + 'static {
    type Context: RenderContext;

    /// Cheap, synchronous liveness probe.
    ///
    /// Called under the pool lock on every admission scan, so it must never
    /// block or await.
    fn is_alive(&self) -> bool;

    /// Open a new isolated rendering context
    fn new_context(&self) -> impl Future<Output = EngineResult<Self::Context>> + Send;

    /// Shut the engine down. Closes every context it hosts.
    fn close(&self) -> impl Future<Output = EngineResult<()>> + Send;
}

/// One isolated browsing session on an engine.
pub trait RenderContext: Send + Sync + 'static {
    /// Load `target` into the context at the given viewport size
    fn navigate(
        &self,
        target: &RenderTarget,
        viewport: Viewport,
    ) -> impl Future<Output = EngineResult<()>> + Send;

    /// Capture the current content as encoded image bytes
    fn capture(
        &self,
        format: ImageFormat,
        full_page: bool,
    ) -> impl Future<Output = EngineResult<Vec<u8>>> + Send;

    /// Close the context and free its engine-side resources
    fn close(self) -> impl Future<Output = EngineResult<()>> + Send;
}

// =============================================================================
// Render Values
// =============================================================================

/// What to load into a rendering context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderTarget {
    /// Inline HTML document
    Html(String),
    /// Remote address to navigate to
    Url(Url),
}

impl RenderTarget {
    /// Short description for log lines. Never includes inline content.
    pub fn describe(&self) -> String {
        match self {
            Self::Html(html) => format!("inline html ({} bytes)", html.len()),
            Self::Url(url) => url.to_string(),
        }
    }
}

/// Output image encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// Lossless raster (PNG)
    #[default]
    Png,
    /// Lossy raster (JPEG)
    #[serde(alias = "jpg")]
    Jpeg,
}

impl ImageFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Png => write!(f, "png"),
            Self::Jpeg => write!(f, "jpeg"),
        }
    }
}

impl FromStr for ImageFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            other => Err(format!("unsupported image format '{other}' (expected png or jpeg)")),
        }
    }
}

/// Output size in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub const DEFAULT_WIDTH: u32 = 1280;
    pub const DEFAULT_HEIGHT: u32 = 720;
    /// Largest edge Chromium will composite
    pub const MAX_EDGE: u32 = 16_384;

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WIDTH, Self::DEFAULT_HEIGHT)
    }
}

impl fmt::Display for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
