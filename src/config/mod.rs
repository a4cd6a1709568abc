//! Service configuration
//!
//! Plain structs with documented defaults, populated from environment
//! variables once at startup and never mutated afterwards.

pub mod env;
pub mod types;

pub use types::{
    BrowserLaunchConfig, BrowserPoolConfig, ConfigError, ScreenshotConfig, ServerConfig,
    TimeoutConfig,
};
