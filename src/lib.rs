pub mod browser_pool;
pub mod config;
pub mod engine;
pub mod render;
pub mod server;

pub use browser_pool::{BrowserPool, PoolError, PoolStats, RenderLease};
pub use config::{
    BrowserLaunchConfig, BrowserPoolConfig, ConfigError, ScreenshotConfig, ServerConfig,
    TimeoutConfig,
};
pub use engine::{
    ChromiumLauncher, Engine, EngineError, EngineLauncher, EngineResult, ImageFormat,
    RenderContext, RenderTarget, Viewport,
};
pub use render::{RenderError, RenderRequest, RenderResponse, RenderService, RenderedImage};
pub use server::router;
