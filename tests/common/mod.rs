//! Scripted in-memory browser engine for the screenshot test suite
//!
//! Every delay goes through `tokio::time`, so tests running with
//! `start_paused = true` see deterministic timing.

use kodegen_tools_screenshot::{
    BrowserPool, BrowserPoolConfig, Engine, EngineError, EngineLauncher, EngineResult,
    ImageFormat, RenderContext, RenderTarget, TimeoutConfig, Viewport,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

pub const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
pub const JPEG_MAGIC: &[u8] = b"\xff\xd8\xff";

/// Behaviour knobs, read at the moment each operation runs
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub launch_delay: Duration,
    pub fail_launch: bool,
    pub context_delay: Duration,
    pub navigate_delay: Duration,
    pub fail_navigation: bool,
    pub capture_delay: Duration,
    pub fail_capture: bool,
    /// Kill the hosting engine during capture
    pub crash_on_capture: bool,
}

#[derive(Debug, Default)]
pub struct Counters {
    pub launches: AtomicUsize,
    pub engines_closed: AtomicUsize,
    pub contexts_opened: AtomicUsize,
    pub contexts_closed: AtomicUsize,
    pub captures: AtomicUsize,
}

impl Counters {
    #[allow(dead_code)]
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    #[allow(dead_code)]
    pub fn engines_closed(&self) -> usize {
        self.engines_closed.load(Ordering::SeqCst)
    }

    #[allow(dead_code)]
    pub fn contexts_opened(&self) -> usize {
        self.contexts_opened.load(Ordering::SeqCst)
    }

    #[allow(dead_code)]
    pub fn contexts_closed(&self) -> usize {
        self.contexts_closed.load(Ordering::SeqCst)
    }

    #[allow(dead_code)]
    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

struct Shared {
    script: Mutex<Script>,
    counters: Counters,
    engines: Mutex<Vec<Arc<AtomicBool>>>,
}

/// Test-side handle onto every fake engine a launcher creates
#[derive(Clone)]
pub struct FakeBrowsers {
    shared: Arc<Shared>,
}

impl FakeBrowsers {
    pub fn new(script: Script) -> Self {
        Self {
            shared: Arc::new(Shared {
                script: Mutex::new(script),
                counters: Counters::default(),
                engines: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn launcher(&self) -> FakeLauncher {
        FakeLauncher {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn counters(&self) -> &Counters {
        &self.shared.counters
    }

    #[allow(dead_code)]
    pub fn update(&self, f: impl FnOnce(&mut Script)) {
        f(&mut self.shared.script.lock());
    }

    /// Mark the n-th launched engine as dead
    #[allow(dead_code)]
    pub fn kill(&self, index: usize) {
        self.shared.engines.lock()[index].store(false, Ordering::SeqCst);
    }
}

pub struct FakeLauncher {
    shared: Arc<Shared>,
}

impl EngineLauncher for FakeLauncher {
    type Engine = FakeEngine;

    async fn launch(&self) -> EngineResult<FakeEngine> {
        let script = self.shared.script.lock().clone();
        pause(script.launch_delay).await;
        if script.fail_launch {
            return Err(EngineError::Launch("chromium binary missing".to_string()));
        }

        self.shared.counters.launches.fetch_add(1, Ordering::SeqCst);
        let alive = Arc::new(AtomicBool::new(true));
        self.shared.engines.lock().push(Arc::clone(&alive));

        Ok(FakeEngine {
            alive,
            shared: Arc::clone(&self.shared),
        })
    }
}

pub struct FakeEngine {
    alive: Arc<AtomicBool>,
    shared: Arc<Shared>,
}

impl Engine for FakeEngine {
    type Context = FakeContext;

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn new_context(&self) -> EngineResult<FakeContext> {
        let delay = self.shared.script.lock().context_delay;
        pause(delay).await;
        if !self.is_alive() {
            return Err(EngineError::Context("connection closed".to_string()));
        }
        self.shared
            .counters
            .contexts_opened
            .fetch_add(1, Ordering::SeqCst);
        Ok(FakeContext {
            alive: Arc::clone(&self.alive),
            shared: Arc::clone(&self.shared),
        })
    }

    async fn close(&self) -> EngineResult<()> {
        self.alive.store(false, Ordering::SeqCst);
        self.shared
            .counters
            .engines_closed
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeContext {
    alive: Arc<AtomicBool>,
    shared: Arc<Shared>,
}

impl RenderContext for FakeContext {
    async fn navigate(&self, _target: &RenderTarget, _viewport: Viewport) -> EngineResult<()> {
        let script = self.shared.script.lock().clone();
        pause(script.navigate_delay).await;
        if script.fail_navigation {
            return Err(EngineError::Navigation("net::ERR_NAME_NOT_RESOLVED".to_string()));
        }
        Ok(())
    }

    async fn capture(&self, format: ImageFormat, _full_page: bool) -> EngineResult<Vec<u8>> {
        let script = self.shared.script.lock().clone();
        pause(script.capture_delay).await;
        if script.crash_on_capture {
            self.alive.store(false, Ordering::SeqCst);
            return Err(EngineError::Capture("target crashed".to_string()));
        }
        if script.fail_capture {
            return Err(EngineError::Capture("compositor failure".to_string()));
        }

        self.shared.counters.captures.fetch_add(1, Ordering::SeqCst);
        Ok(match format {
            ImageFormat::Png => PNG_MAGIC.to_vec(),
            ImageFormat::Jpeg => JPEG_MAGIC.to_vec(),
        })
    }

    async fn close(self) -> EngineResult<()> {
        self.shared
            .counters
            .contexts_closed
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// Pool config without warmup, so tests control every launch
#[allow(dead_code)]
pub fn pool_config(max_browsers: usize, max_contexts: usize) -> BrowserPoolConfig {
    BrowserPoolConfig {
        max_browsers,
        max_contexts_per_browser: max_contexts,
        warmup_browsers: 0,
        keepalive_interval: Duration::from_secs(30),
        launch_timeout: Duration::from_secs(5),
        close_timeout: Duration::from_secs(1),
    }
}

#[allow(dead_code)]
pub fn timeouts_ms(queue: u64, navigation: u64, render: u64, request: u64) -> TimeoutConfig {
    TimeoutConfig {
        queue: Duration::from_millis(queue),
        navigation: Duration::from_millis(navigation),
        render: Duration::from_millis(render),
        request: Duration::from_millis(request),
    }
}

#[allow(dead_code)]
pub fn fake_pool(
    max_browsers: usize,
    max_contexts: usize,
    script: Script,
) -> (Arc<BrowserPool<FakeLauncher>>, FakeBrowsers) {
    let fake = FakeBrowsers::new(script);
    let pool = BrowserPool::new(pool_config(max_browsers, max_contexts), fake.launcher());
    (pool, fake)
}

/// A deadline far enough away never to matter
#[allow(dead_code)]
pub fn far_deadline() -> Instant {
    Instant::now() + Duration::from_secs(3600)
}

/// Let spawned release and close tasks run
#[allow(dead_code)]
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
