//! Browser session and page automation seam.
//!
//! Everything above this module talks to the meeting page through
//! [`PageDriver`]; the Chrome implementation lives in [`chrome`].

pub mod chrome;
pub mod locator;
pub mod network;

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

use crate::error::{BotError, BotResult};

pub use chrome::{BrowserSettings, ChromeLauncher};

const VISIBILITY_POLL: Duration = Duration::from_millis(250);

/// One way of locating an element on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Selector {
    Css { css: &'static str },
    #[serde(rename = "xpath")]
    XPath { xpath: &'static str },
    /// Element text, either exactly equal or containing the needle
    Text { text: &'static str, exact: bool },
    /// CSS match whose text contains the needle
    HasText {
        css: &'static str,
        text: &'static str,
    },
}

pub const fn css(css: &'static str) -> Selector {
    Selector::Css { css }
}

pub const fn xpath(xpath: &'static str) -> Selector {
    Selector::XPath { xpath }
}

pub const fn text_is(text: &'static str) -> Selector {
    Selector::Text { text, exact: true }
}

pub const fn text_contains(text: &'static str) -> Selector {
    Selector::Text { text, exact: false }
}

pub const fn has_text(css: &'static str, text: &'static str) -> Selector {
    Selector::HasText { css, text }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css { css } => write!(f, "{css}"),
            Self::XPath { xpath } => write!(f, "{xpath}"),
            Self::Text { text, exact: true } => write!(f, "text=\"{text}\""),
            Self::Text { text, exact: false } => write!(f, "text*=\"{text}\""),
            Self::HasText { css, text } => write!(f, "{css}:has-text(\"{text}\")"),
        }
    }
}

/// Operations the automation needs from one browser page.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate and wait until the network is idle.
    async fn navigate(&self, url: &str, timeout: Duration) -> BotResult<()>;

    async fn screenshot(&self, path: &Path) -> BotResult<()>;

    async fn is_visible(&self, selector: &Selector) -> BotResult<bool>;

    /// Attribute of the first visible match, `None` if absent.
    async fn attribute(&self, selector: &Selector, name: &str) -> BotResult<Option<String>>;

    async fn click(&self, selector: &Selector) -> BotResult<()>;

    async fn fill(&self, selector: &Selector, value: &str) -> BotResult<()>;

    /// Click the first visible button whose text or label contains one of
    /// `labels`, in order. Returns the label that matched.
    async fn click_by_text(&self, labels: &[&str]) -> BotResult<Option<String>>;

    /// Evaluate a script in the page context; promises are awaited.
    async fn evaluate(&self, script: &str) -> BotResult<serde_json::Value>;
}

/// A running browser owning one page.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    fn page(&self) -> Arc<dyn PageDriver>;

    /// Tear the browser down. Safe to call more than once.
    async fn close(&self);
}

#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self) -> BotResult<Box<dyn BrowserSession>>;
}

/// Best-effort diagnostic screenshot `<dir>/<name>.png`.
pub async fn checkpoint(page: &dyn PageDriver, dir: &Path, name: &str) {
    let path = dir.join(format!("{name}.png"));
    match page.screenshot(&path).await {
        Ok(()) => debug!("Screenshot saved: {:?}", path),
        Err(e) => debug!("Screenshot {} failed: {}", name, e),
    }
}

/// Visibility check where any page error counts as "not visible".
pub async fn visible(page: &dyn PageDriver, selector: &Selector) -> bool {
    match page.is_visible(selector).await {
        Ok(v) => v,
        Err(e) => {
            debug!("Visibility check failed for {}: {}", selector, e);
            false
        }
    }
}

/// Visible and not marked `aria-disabled="true"`.
pub async fn visible_and_enabled(page: &dyn PageDriver, selector: &Selector) -> bool {
    if !visible(page, selector).await {
        return false;
    }
    !matches!(
        page.attribute(selector, "aria-disabled").await,
        Ok(Some(ref v)) if v == "true"
    )
}

/// First candidate that is currently visible.
pub async fn first_visible(page: &dyn PageDriver, candidates: &[Selector]) -> Option<Selector> {
    for selector in candidates {
        if visible(page, selector).await {
            return Some(*selector);
        }
    }
    None
}

/// Whether any candidate is currently visible.
pub async fn any_visible(page: &dyn PageDriver, candidates: &[Selector]) -> bool {
    first_visible(page, candidates).await.is_some()
}

/// Poll until one of `candidates` is visible or `limit` elapses.
pub async fn wait_for_any(
    page: &dyn PageDriver,
    candidates: &[Selector],
    limit: Duration,
) -> Option<Selector> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(found) = first_visible(page, candidates).await {
            return Some(found);
        }
        if Instant::now() >= deadline {
            return None;
        }
        sleep(VISIBILITY_POLL).await;
    }
}

/// Wait up to `per_attempt` for the selector to appear, then click it.
pub async fn wait_and_click(
    page: &dyn PageDriver,
    selector: &Selector,
    per_attempt: Duration,
) -> BotResult<()> {
    if wait_for_any(page, std::slice::from_ref(selector), per_attempt)
        .await
        .is_none()
    {
        return Err(BotError::Browser(format!("{selector} not visible")));
    }
    timeout(per_attempt, page.click(selector))
        .await
        .map_err(|_| BotError::Browser(format!("click on {selector} timed out")))?
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use serde_json::Value;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type Evaluator = Box<dyn FnMut(&str) -> BotResult<Value> + Send>;

    struct Rule {
        selector: Selector,
        from: Duration,
        until: Option<Duration>,
    }

    /// Scripted page: selectors become visible in time windows measured from
    /// the moment the page was created (tokio time, so paused clocks work).
    pub struct FakePage {
        start: Instant,
        rules: Mutex<Vec<Rule>>,
        attributes: Mutex<Vec<(Selector, &'static str, String)>>,
        text_labels: Mutex<Vec<&'static str>>,
        evaluator: Mutex<Option<Evaluator>>,
        pub clicks: Mutex<Vec<Selector>>,
        pub fills: Mutex<Vec<(Selector, String)>>,
        pub text_clicks: Mutex<Vec<String>>,
        pub navigations: Mutex<Vec<String>>,
        pub screenshots: Mutex<Vec<PathBuf>>,
        pub scripts: Mutex<Vec<String>>,
        pub visibility_checks: AtomicUsize,
    }

    impl FakePage {
        pub fn new() -> Self {
            Self {
                start: Instant::now(),
                rules: Mutex::new(Vec::new()),
                attributes: Mutex::new(Vec::new()),
                text_labels: Mutex::new(Vec::new()),
                evaluator: Mutex::new(None),
                clicks: Mutex::new(Vec::new()),
                fills: Mutex::new(Vec::new()),
                text_clicks: Mutex::new(Vec::new()),
                navigations: Mutex::new(Vec::new()),
                screenshots: Mutex::new(Vec::new()),
                scripts: Mutex::new(Vec::new()),
                visibility_checks: AtomicUsize::new(0),
            }
        }

        pub fn show(&self, selector: Selector) {
            self.show_between(selector, Duration::ZERO, None);
        }

        pub fn show_between(&self, selector: Selector, from: Duration, until: Option<Duration>) {
            self.rules.lock().unwrap().push(Rule {
                selector,
                from,
                until,
            });
        }

        pub fn set_attribute(&self, selector: Selector, name: &'static str, value: &str) {
            self.attributes
                .lock()
                .unwrap()
                .push((selector, name, value.to_string()));
        }

        pub fn accept_text_click(&self, label: &'static str) {
            self.text_labels.lock().unwrap().push(label);
        }

        pub fn on_evaluate(&self, f: impl FnMut(&str) -> BotResult<Value> + Send + 'static) {
            *self.evaluator.lock().unwrap() = Some(Box::new(f));
        }

        pub fn elapsed(&self) -> Duration {
            Instant::now() - self.start
        }

        fn currently_visible(&self, selector: &Selector) -> bool {
            let now = self.elapsed();
            self.rules.lock().unwrap().iter().any(|rule| {
                rule.selector == *selector
                    && now >= rule.from
                    && rule.until.map_or(true, |until| now < until)
            })
        }
    }

    #[async_trait]
    impl PageDriver for FakePage {
        async fn navigate(&self, url: &str, _timeout: Duration) -> BotResult<()> {
            self.navigations.lock().unwrap().push(url.to_string());
            Ok(())
        }

        async fn screenshot(&self, path: &Path) -> BotResult<()> {
            self.screenshots.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }

        async fn is_visible(&self, selector: &Selector) -> BotResult<bool> {
            self.visibility_checks.fetch_add(1, Ordering::SeqCst);
            Ok(self.currently_visible(selector))
        }

        async fn attribute(&self, selector: &Selector, name: &str) -> BotResult<Option<String>> {
            if !self.currently_visible(selector) {
                return Ok(None);
            }
            Ok(self
                .attributes
                .lock()
                .unwrap()
                .iter()
                .find(|(s, n, _)| s == selector && *n == name)
                .map(|(_, _, v)| v.clone()))
        }

        async fn click(&self, selector: &Selector) -> BotResult<()> {
            if !self.currently_visible(selector) {
                return Err(BotError::Browser(format!("no visible element for {selector}")));
            }
            self.clicks.lock().unwrap().push(*selector);
            Ok(())
        }

        async fn fill(&self, selector: &Selector, value: &str) -> BotResult<()> {
            if !self.currently_visible(selector) {
                return Err(BotError::Browser(format!("no visible element for {selector}")));
            }
            self.fills
                .lock()
                .unwrap()
                .push((*selector, value.to_string()));
            Ok(())
        }

        async fn click_by_text(&self, labels: &[&str]) -> BotResult<Option<String>> {
            let accepted = self.text_labels.lock().unwrap().clone();
            let hit = labels
                .iter()
                .copied()
                .find(|label| accepted.iter().any(|a| a == label))
                .map(str::to_string);
            if let Some(label) = &hit {
                self.text_clicks.lock().unwrap().push(label.clone());
            }
            Ok(hit)
        }

        async fn evaluate(&self, script: &str) -> BotResult<Value> {
            self.scripts.lock().unwrap().push(script.to_string());
            match self.evaluator.lock().unwrap().as_mut() {
                Some(f) => f(script),
                None => Ok(Value::Null),
            }
        }
    }
}
