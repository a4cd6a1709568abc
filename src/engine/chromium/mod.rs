//! Chromium engine over the DevTools protocol
//!
//! One [`ChromiumEngine`] is one Chromium process. Each [`ChromiumContext`] is a
//! fresh CDP browser context (separate cookies, storage and cache) holding a
//! single page.

pub mod setup;

use chromiumoxide::Page;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::browser::{BrowserContextId, CloseParams};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::page::ScreenshotParams;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::profile::{BrowserProfile, PROFILE_PREFIX};
use super::{
    Engine, EngineError, EngineLauncher, EngineResult, ImageFormat, RenderContext, RenderTarget,
    Viewport,
};
use crate::config::BrowserLaunchConfig;

pub use setup::{download_managed_browser, find_browser_executable, launch_chromium};

/// JPEG quality used for lossy captures
pub const JPEG_QUALITY: i64 = 85;

// =============================================================================
// Launcher
// =============================================================================

/// Launches Chromium processes for the pool.
///
/// The executable is resolved once, on first launch, and reused afterwards so
/// a managed download happens at most once per process.
pub struct ChromiumLauncher {
    config: BrowserLaunchConfig,
    executable: OnceCell<PathBuf>,
}

impl ChromiumLauncher {
    pub fn new(config: BrowserLaunchConfig) -> Self {
        Self {
            config,
            executable: OnceCell::new(),
        }
    }

    async fn launch_inner(&self) -> anyhow::Result<ChromiumEngine> {
        let executable = self
            .executable
            .get_or_try_init(|| setup::resolve_executable(&self.config))
            .await?;

        let profile = BrowserProfile::create(PROFILE_PREFIX)?;
        let (browser, handler) = launch_chromium(&self.config, executable, profile.path()).await?;

        info!(
            "Launched Chromium {} with profile {}",
            executable.display(),
            profile.path().display()
        );

        Ok(ChromiumEngine {
            browser: Arc::new(browser),
            handler,
            _profile: profile,
        })
    }
}

impl EngineLauncher for ChromiumLauncher {
    type Engine = ChromiumEngine;

    async fn launch(&self) -> EngineResult<ChromiumEngine> {
        self.launch_inner()
            .await
            .map_err(|e| EngineError::Launch(format!("{e:#}")))
    }
}

// =============================================================================
// Engine
// =============================================================================

/// A running Chromium process.
///
/// Dropping the engine aborts the handler task and removes the profile
/// directory. The process itself exits once the last `Browser` handle is gone.
pub struct ChromiumEngine {
    browser: Arc<Browser>,
    handler: JoinHandle<()>,
    _profile: BrowserProfile,
}

impl Drop for ChromiumEngine {
    fn drop(&mut self) {
        debug!("Dropping ChromiumEngine - aborting handler task");
        self.handler.abort();
    }
}

impl Engine for ChromiumEngine {
    type Context = ChromiumContext;

    fn is_alive(&self) -> bool {
        !self.handler.is_finished()
    }

    async fn new_context(&self) -> EngineResult<ChromiumContext> {
        let created = self
            .browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(|e| EngineError::Context(e.to_string()))?;
        let context_id = created.result.browser_context_id.clone();

        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(EngineError::Context)?;

        match self.browser.new_page(params).await {
            Ok(page) => Ok(ChromiumContext {
                page,
                context_id,
                browser: Arc::clone(&self.browser),
            }),
            Err(e) => {
                if let Err(dispose_err) = self
                    .browser
                    .execute(DisposeBrowserContextParams::new(context_id))
                    .await
                {
                    warn!("Failed to dispose orphaned browser context: {dispose_err}");
                }
                Err(EngineError::Context(e.to_string()))
            }
        }
    }

    async fn close(&self) -> EngineResult<()> {
        self.browser
            .execute(CloseParams::default())
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Close(e.to_string()))
    }
}

// =============================================================================
// Context
// =============================================================================

/// One isolated browser context with a single page
pub struct ChromiumContext {
    page: Page,
    context_id: BrowserContextId,
    browser: Arc<Browser>,
}

impl ChromiumContext {
    async fn apply_viewport(&self, viewport: Viewport) -> EngineResult<()> {
        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(i64::from(viewport.width))
            .height(i64::from(viewport.height))
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(EngineError::Navigation)?;

        self.page
            .execute(metrics)
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Navigation(format!("viewport {viewport}: {e}")))
    }
}

impl RenderContext for ChromiumContext {
    async fn navigate(&self, target: &RenderTarget, viewport: Viewport) -> EngineResult<()> {
        self.apply_viewport(viewport).await?;

        match target {
            RenderTarget::Html(html) => {
                self.page
                    .set_content(html)
                    .await
                    .map_err(|e| EngineError::Navigation(e.to_string()))?;
            }
            RenderTarget::Url(url) => {
                self.page
                    .goto(url.as_str())
                    .await
                    .map_err(|e| EngineError::Navigation(e.to_string()))?;
                self.page
                    .wait_for_navigation()
                    .await
                    .map_err(|e| EngineError::Navigation(e.to_string()))?;
            }
        }

        Ok(())
    }

    async fn capture(&self, format: ImageFormat, full_page: bool) -> EngineResult<Vec<u8>> {
        let params = match format {
            ImageFormat::Png => ScreenshotParams::builder()
                .format(CaptureScreenshotFormat::Png)
                .full_page(full_page)
                .build(),
            ImageFormat::Jpeg => ScreenshotParams::builder()
                .format(CaptureScreenshotFormat::Jpeg)
                .quality(JPEG_QUALITY)
                .full_page(full_page)
                .build(),
        };

        self.page
            .screenshot(params)
            .await
            .map_err(|e| EngineError::Capture(e.to_string()))
    }

    async fn close(self) -> EngineResult<()> {
        let Self {
            page,
            context_id,
            browser,
        } = self;

        let page_result = page.close().await;
        let dispose_result = browser
            .execute(DisposeBrowserContextParams::new(context_id))
            .await;

        page_result.map_err(|e| EngineError::Close(format!("page: {e}")))?;
        dispose_result
            .map(|_| ())
            .map_err(|e| EngineError::Close(format!("browser context: {e}")))
    }
}
