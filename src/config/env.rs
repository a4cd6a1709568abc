//! Environment-variable loading
//!
//! Every knob is optional. Unset or blank variables keep their defaults;
//! malformed values are rejected so a typo never silently runs with defaults.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use super::types::{ConfigError, ScreenshotConfig};

pub const MAX_BROWSERS: &str = "MAX_BROWSERS";
pub const MAX_CONTEXTS_PER_BROWSER: &str = "MAX_CONTEXTS_PER_BROWSER";
pub const QUEUE_TIMEOUT_MS: &str = "QUEUE_TIMEOUT_MS";
pub const NAVIGATION_TIMEOUT_MS: &str = "NAVIGATION_TIMEOUT_MS";
pub const RENDER_TIMEOUT_MS: &str = "RENDER_TIMEOUT_MS";
pub const REQUEST_TIMEOUT_MS: &str = "REQUEST_TIMEOUT_MS";
pub const WARMUP_BROWSERS: &str = "WARMUP_BROWSERS";
pub const KEEPALIVE_INTERVAL_MS: &str = "KEEPALIVE_INTERVAL_MS";
pub const LAUNCH_TIMEOUT_MS: &str = "LAUNCH_TIMEOUT_MS";
pub const CLOSE_TIMEOUT_MS: &str = "CLOSE_TIMEOUT_MS";
pub const HOST: &str = "HOST";
pub const PORT: &str = "PORT";
pub const MAX_BODY_BYTES: &str = "MAX_BODY_BYTES";
pub const CHROMIUM_PATH: &str = "CHROMIUM_PATH";
pub const BROWSER_HEADLESS: &str = "BROWSER_HEADLESS";

impl ScreenshotConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();

        let pool = &mut config.pool;
        if let Some(v) = get(MAX_BROWSERS) {
            pool.max_browsers = positive(MAX_BROWSERS, &v)? as usize;
        }
        if let Some(v) = get(MAX_CONTEXTS_PER_BROWSER) {
            pool.max_contexts_per_browser = positive(MAX_CONTEXTS_PER_BROWSER, &v)? as usize;
        }
        if let Some(v) = get(WARMUP_BROWSERS) {
            pool.warmup_browsers = non_negative(WARMUP_BROWSERS, &v)? as usize;
        }
        pool.warmup_browsers = pool.warmup_browsers.min(pool.max_browsers);
        if let Some(v) = get(KEEPALIVE_INTERVAL_MS) {
            pool.keepalive_interval = millis(KEEPALIVE_INTERVAL_MS, &v)?;
        }
        if let Some(v) = get(LAUNCH_TIMEOUT_MS) {
            pool.launch_timeout = millis(LAUNCH_TIMEOUT_MS, &v)?;
        }
        if let Some(v) = get(CLOSE_TIMEOUT_MS) {
            pool.close_timeout = millis(CLOSE_TIMEOUT_MS, &v)?;
        }

        let timeouts = &mut config.timeouts;
        if let Some(v) = get(QUEUE_TIMEOUT_MS) {
            timeouts.queue = millis(QUEUE_TIMEOUT_MS, &v)?;
        }
        if let Some(v) = get(NAVIGATION_TIMEOUT_MS) {
            timeouts.navigation = millis(NAVIGATION_TIMEOUT_MS, &v)?;
        }
        if let Some(v) = get(RENDER_TIMEOUT_MS) {
            timeouts.render = millis(RENDER_TIMEOUT_MS, &v)?;
        }
        if let Some(v) = get(REQUEST_TIMEOUT_MS) {
            timeouts.request = millis(REQUEST_TIMEOUT_MS, &v)?;
        }

        let server = &mut config.server;
        if let Some(v) = get(MAX_BODY_BYTES) {
            server.max_body_bytes = positive(MAX_BODY_BYTES, &v)? as usize;
        }
        let host = get(HOST);
        let port = get(PORT);
        if host.is_some() || port.is_some() {
            let port = match port {
                Some(v) => u16::try_from(positive(PORT, &v)?).map_err(|_| {
                    ConfigError::NotPositive {
                        key: PORT,
                        value: v.clone(),
                    }
                })?,
                None => server.bind_addr.port(),
            };
            let ip = match host {
                Some(h) => h.parse::<IpAddr>().map_err(|_| ConfigError::BindAddr {
                    host: h.clone(),
                    port,
                })?,
                None => server.bind_addr.ip(),
            };
            server.bind_addr = SocketAddr::new(ip, port);
        }

        let browser = &mut config.browser;
        if let Some(v) = get(CHROMIUM_PATH) {
            browser.executable = Some(PathBuf::from(v));
        }
        if let Some(v) = get(BROWSER_HEADLESS) {
            browser.headless = boolean(BROWSER_HEADLESS, &v)?;
        }

        Ok(config)
    }
}

fn positive(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::NotPositive {
            key,
            value: value.to_string(),
        }),
    }
}

fn non_negative(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::NotInteger {
        key,
        value: value.to_string(),
    })
}

fn millis(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    positive(key, value).map(Duration::from_millis)
}

fn boolean(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::NotBool {
            key,
            value: value.to_string(),
        }),
    }
}
