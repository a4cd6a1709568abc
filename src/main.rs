// Screenshot HTTP Server
//
// Renders HTML or URLs to PNG/JPEG through a bounded pool of headless
// Chromium instances. All settings come from environment variables.

use anyhow::{Context, Result};
use kodegen_tools_screenshot::{
    BrowserPool, ChromiumLauncher, RenderService, ScreenshotConfig, router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ScreenshotConfig::from_env().context("Invalid configuration")?;
    info!(
        bind = %config.server.bind_addr,
        max_browsers = config.pool.max_browsers,
        max_contexts = config.pool.max_contexts_per_browser,
        queue_timeout_ms = config.timeouts.queue.as_millis() as u64,
        navigation_timeout_ms = config.timeouts.navigation.as_millis() as u64,
        render_timeout_ms = config.timeouts.render.as_millis() as u64,
        request_timeout_ms = config.timeouts.request.as_millis() as u64,
        "Starting screenshot server"
    );

    let launcher = ChromiumLauncher::new(config.browser.clone());
    let pool = BrowserPool::new(config.pool.clone(), launcher);
    pool.start().await;

    let service = Arc::new(RenderService::new(Arc::clone(&pool), config.timeouts));
    let app = router(service, config.server.max_body_bytes);

    let listener = TcpListener::bind(config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!("Listening on {}", config.server.bind_addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Close Chrome even if the server loop failed
    pool.shutdown().await;
    served.context("HTTP server error")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
