//! Chrome/Chromium implementation of the page seam via the DevTools protocol.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{GrantPermissionsParams, PermissionType};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use super::locator::{self, Action};
use super::network::{IdleWindow, NetworkTracker};
use super::{BrowserSession, PageDriver, Selector, SessionLauncher};
use crate::config::WorkerConfig;
use crate::error::{BotError, BotResult};

const VIEWPORT_WIDTH: u32 = 1280;
const VIEWPORT_HEIGHT: u32 = 720;
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36";

/// Upper bound for one protocol round trip, including awaited promises.
const EVALUATE_TIMEOUT: Duration = Duration::from_secs(30);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);
const NETWORK_IDLE_WINDOW: Duration = Duration::from_millis(500);
const NETWORK_IDLE_POLL: Duration = Duration::from_millis(250);

const LAUNCH_ARGS: &[&str] = &[
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--disable-infobars",
    "--disable-gpu",
    "--use-fake-ui-for-media-stream",
    "--use-fake-device-for-media-stream",
    "--autoplay-policy=no-user-gesture-required",
    "--disable-blink-features=AutomationControlled",
];

#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
}

impl BrowserSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            headless: config.headless,
            chrome_path: config.chrome_path.clone(),
        }
    }

    fn browser_config(&self) -> BotResult<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(VIEWPORT_WIDTH, VIEWPORT_HEIGHT)
            .viewport(Viewport {
                width: VIEWPORT_WIDTH,
                height: VIEWPORT_HEIGHT,
                ..Default::default()
            })
            .args(LAUNCH_ARGS.iter().copied())
            .arg(format!("--user-agent={USER_AGENT}"));

        if !self.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.chrome_path {
            builder = builder.chrome_executable(path);
        }

        builder.build().map_err(BotError::Browser)
    }
}

pub struct ChromeLauncher {
    settings: BrowserSettings,
}

impl ChromeLauncher {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl SessionLauncher for ChromeLauncher {
    async fn launch(&self) -> BotResult<Box<dyn BrowserSession>> {
        let session = ChromeSession::launch(&self.settings).await?;
        Ok(Box::new(session))
    }
}

/// One browser process with one page. `close` must run on every exit path;
/// dropping without closing still aborts the protocol handler.
pub struct ChromeSession {
    browser: Mutex<Option<Browser>>,
    handler: std::sync::Mutex<Option<JoinHandle<()>>>,
    page: Arc<ChromePage>,
    closed: AtomicBool,
}

impl ChromeSession {
    pub async fn launch(settings: &BrowserSettings) -> BotResult<Self> {
        info!(
            "Launching Chromium (headless: {}, viewport {}x{})",
            settings.headless, VIEWPORT_WIDTH, VIEWPORT_HEIGHT
        );

        let (browser, mut handler) = Browser::launch(settings.browser_config()?)
            .await
            .map_err(BotError::browser)?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser protocol handler stopped: {}", e);
                    break;
                }
            }
        });

        let grant = GrantPermissionsParams::new(vec![
            PermissionType::AudioCapture,
            PermissionType::VideoCapture,
        ]);
        if let Err(e) = browser.execute(grant).await {
            warn!("Failed to pre-grant media permissions: {}", e);
        }

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler_task.abort();
                return Err(BotError::browser(e));
            }
        };
        let page = match ChromePage::attach(page).await {
            Ok(page) => page,
            Err(e) => {
                handler_task.abort();
                return Err(e);
            }
        };

        info!("Browser launched");

        Ok(Self {
            browser: Mutex::new(Some(browser)),
            handler: std::sync::Mutex::new(Some(handler_task)),
            page: Arc::new(page),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    fn page(&self) -> Arc<dyn PageDriver> {
        self.page.clone()
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(mut browser) = self.browser.lock().await.take() {
            let graceful = timeout(CLOSE_TIMEOUT, async {
                browser.close().await.map_err(BotError::browser)?;
                browser.wait().await.map_err(BotError::browser)?;
                Ok::<_, BotError>(())
            })
            .await;

            match graceful {
                Ok(Ok(())) => info!("Browser closed"),
                Ok(Err(e)) => {
                    warn!("Browser did not close cleanly ({}), killing it", e);
                    let _ = browser.kill().await;
                }
                Err(_) => {
                    warn!("Browser close timed out, killing it");
                    let _ = browser.kill().await;
                }
            }
        }

        if let Ok(mut slot) = self.handler.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.handler.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

pub struct ChromePage {
    page: Page,
    network: NetworkTracker,
    next_token: AtomicU64,
}

impl ChromePage {
    pub async fn attach(page: Page) -> BotResult<Self> {
        let network = NetworkTracker::attach(&page).await?;
        Ok(Self {
            page,
            network,
            next_token: AtomicU64::new(1),
        })
    }

    async fn eval(&self, script: String) -> BotResult<Value> {
        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(BotError::Browser)?;

        let result = timeout(EVALUATE_TIMEOUT, self.page.evaluate_expression(params))
            .await
            .map_err(|_| BotError::Browser("page evaluation timed out".to_string()))?
            .map_err(BotError::browser)?;

        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    /// Tag the first visible match so it can be fetched as a protocol element.
    async fn mark(&self, selector: &Selector, clear: bool) -> BotResult<String> {
        let token = format!("t{}", self.next_token.fetch_add(1, Ordering::Relaxed));
        let action = if clear { Action::MarkAndClear } else { Action::Mark };
        let marked = self
            .eval(locator::script(selector, action, Some(&token)))
            .await?;
        if marked.as_bool() != Some(true) {
            return Err(BotError::Browser(format!("no visible element for {selector}")));
        }
        Ok(locator::target_css(&token))
    }

    async fn wait_for_network_idle(&self, deadline: Instant) -> BotResult<()> {
        let mut idle = IdleWindow::new(NETWORK_IDLE_WINDOW);
        loop {
            let ready = self.eval("document.readyState".to_string()).await?;
            let ready = ready.as_str() == Some("complete");
            let snapshot = self.network.snapshot();

            if idle.observe(ready, snapshot, Instant::now()) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BotError::Browser(format!(
                    "timed out waiting for the network to go idle ({} requests in flight)",
                    snapshot.in_flight
                )));
            }
            sleep(NETWORK_IDLE_POLL).await;
        }
    }
}

#[async_trait]
impl PageDriver for ChromePage {
    async fn navigate(&self, url: &str, limit: Duration) -> BotResult<()> {
        let deadline = Instant::now() + limit;
        timeout(limit, self.page.goto(url))
            .await
            .map_err(|_| BotError::Browser(format!("navigation to {url} timed out")))?
            .map_err(BotError::browser)?;
        self.wait_for_network_idle(deadline).await?;
        debug!("Navigation to {} settled", url);
        Ok(())
    }

    async fn screenshot(&self, path: &Path) -> BotResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(BotError::browser)?;
        }
        let params = ScreenshotParams::builder().full_page(true).build();
        timeout(EVALUATE_TIMEOUT, self.page.save_screenshot(params, path))
            .await
            .map_err(|_| BotError::Browser("screenshot timed out".to_string()))?
            .map_err(BotError::browser)?;
        Ok(())
    }

    async fn is_visible(&self, selector: &Selector) -> BotResult<bool> {
        let value = self
            .eval(locator::script(selector, Action::Visible, None))
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn attribute(&self, selector: &Selector, name: &str) -> BotResult<Option<String>> {
        let value = self
            .eval(locator::script(selector, Action::Attribute, Some(name)))
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn click(&self, selector: &Selector) -> BotResult<()> {
        let target = self.mark(selector, false).await?;
        let element = self
            .page
            .find_element(target)
            .await
            .map_err(BotError::browser)?;
        element.click().await.map_err(BotError::browser)?;
        Ok(())
    }

    async fn fill(&self, selector: &Selector, value: &str) -> BotResult<()> {
        let target = self.mark(selector, true).await?;
        let element = self
            .page
            .find_element(target)
            .await
            .map_err(BotError::browser)?;
        element.click().await.map_err(BotError::browser)?;
        element.type_str(value).await.map_err(BotError::browser)?;
        Ok(())
    }

    async fn click_by_text(&self, labels: &[&str]) -> BotResult<Option<String>> {
        let value = self.eval(locator::click_text_script(labels)).await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn evaluate(&self, script: &str) -> BotResult<Value> {
        self.eval(script.to_string()).await
    }
}
