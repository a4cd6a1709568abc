use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Complete service configuration, read once at startup
#[derive(Debug, Clone, Default)]
pub struct ScreenshotConfig {
    pub server: ServerConfig,
    pub pool: BrowserPoolConfig,
    pub timeouts: TimeoutConfig,
    pub browser: BrowserLaunchConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind (default: 0.0.0.0:3000)
    pub bind_addr: SocketAddr,
    /// Maximum accepted request body in bytes (default: 10 MiB)
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 3000),
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Configuration for the browser pool
#[derive(Debug, Clone)]
pub struct BrowserPoolConfig {
    /// Maximum browser engines alive at once (default: 5)
    pub max_browsers: usize,
    /// Maximum rendering contexts per engine (default: 10)
    pub max_contexts_per_browser: usize,
    /// Engines launched eagerly at startup (default: 1)
    pub warmup_browsers: usize,
    /// Interval between dead-engine sweeps (default: 30s)
    pub keepalive_interval: Duration,
    /// Upper bound on launching an engine or opening a context (default: 30s)
    pub launch_timeout: Duration,
    /// Upper bound on closing one context or engine (default: 5s)
    pub close_timeout: Duration,
}

impl BrowserPoolConfig {
    /// Total concurrent leases the pool can hand out
    pub fn capacity(&self) -> usize {
        self.max_browsers * self.max_contexts_per_browser
    }
}

impl Default for BrowserPoolConfig {
    fn default() -> Self {
        Self {
            max_browsers: 5,
            max_contexts_per_browser: 10,
            warmup_browsers: 1,
            keepalive_interval: Duration::from_secs(30),
            launch_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(5),
        }
    }
}

/// The four nested deadlines applied to each render request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Longest wait for pool capacity (default: 30s)
    pub queue: Duration,
    /// Longest content load (default: 30s)
    pub navigation: Duration,
    /// Longest screenshot capture (default: 60s)
    pub render: Duration,
    /// Whole-request bound (default: 120s)
    pub request: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            queue: Duration::from_millis(30_000),
            navigation: Duration::from_millis(30_000),
            render: Duration::from_millis(60_000),
            request: Duration::from_millis(120_000),
        }
    }
}

/// How Chromium processes are started
#[derive(Debug, Clone)]
pub struct BrowserLaunchConfig {
    /// Run without a window (default: true)
    pub headless: bool,
    /// Explicit executable, skipping discovery
    pub executable: Option<PathBuf>,
    /// CDP command timeout inside chromiumoxide (default: 30s)
    pub command_timeout: Duration,
    /// Additional command-line switches
    pub extra_args: Vec<String>,
}

impl Default for BrowserLaunchConfig {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            command_timeout: Duration::from_secs(30),
            extra_args: Vec::new(),
        }
    }
}

/// Invalid configuration value
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be a positive integer, got '{value}'")]
    NotPositive { key: &'static str, value: String },

    #[error("{key} must be a non-negative integer, got '{value}'")]
    NotInteger { key: &'static str, value: String },

    #[error("{key} must be true or false, got '{value}'")]
    NotBool { key: &'static str, value: String },

    #[error("invalid bind address {host}:{port}")]
    BindAddr { host: String, port: u16 },
}
