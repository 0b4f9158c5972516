//! Join sequence shared by every platform.
//!
//! navigate → settle → (interstitials) → name → camera off → join click →
//! admission. Only navigation, the join click and admission can fail the
//! run; the other steps log and move on.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::selectors::PlatformSelectors;
use crate::admission::AdmissionMachine;
use crate::browser::{self, PageDriver};
use crate::config::{AdmissionTimings, JoinTimings, WorkerConfig};
use crate::error::{BotError, BotResult};

const INTERSTITIAL_TIMEOUT: Duration = Duration::from_secs(10);
const LEAVE_CLICK_TIMEOUT: Duration = Duration::from_secs(5);
const LEAVE_CONFIRM_WAIT: Duration = Duration::from_secs(2);

pub struct JoinFlow {
    page: Arc<dyn PageDriver>,
    selectors: &'static PlatformSelectors,
    bot_name: String,
    join: JoinTimings,
    admission: AdmissionTimings,
    screenshot_dir: PathBuf,
}

impl JoinFlow {
    pub fn new(
        page: Arc<dyn PageDriver>,
        selectors: &'static PlatformSelectors,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            page,
            selectors,
            bot_name: config.bot_name.clone(),
            join: config.timings.join.clone(),
            admission: config.timings.admission.clone(),
            screenshot_dir: config.screenshot_dir.clone(),
        }
    }

    fn page(&self) -> &dyn PageDriver {
        self.page.as_ref()
    }

    pub async fn run(&self, url: &str) -> BotResult<()> {
        info!("Navigating to {}", url);
        self.page()
            .navigate(url, self.join.navigation_timeout())
            .await?;
        self.checkpoint("01-after-navigation").await;

        sleep(self.join.settle()).await;

        self.pass_interstitials().await;
        self.enter_name().await;
        self.camera_off().await;

        if let Err(e) = self.click_join().await {
            self.checkpoint("06-join-failed").await;
            return Err(e);
        }
        self.checkpoint("03-after-join-click").await;

        AdmissionMachine::new(self.page(), &self.selectors.admission, self.admission.clone())
            .with_screenshots(self.screenshot_dir.clone())
            .run()
            .await
            .into_result()?;

        Ok(())
    }

    async fn pass_interstitials(&self) {
        if self.selectors.pre_join.is_empty() {
            return;
        }
        match browser::wait_for_any(self.page(), self.selectors.pre_join, INTERSTITIAL_TIMEOUT).await
        {
            Some(selector) => match self.page().click(&selector).await {
                Ok(()) => {
                    info!("Continued in the browser via {}", selector);
                    sleep(self.join.settle()).await;
                }
                Err(e) => warn!("Failed to click {}: {}", selector, e),
            },
            None => debug!("No browser interstitial shown"),
        }
    }

    async fn enter_name(&self) {
        let Some(input) = browser::wait_for_any(
            self.page(),
            self.selectors.name_input,
            self.join.name_input_timeout(),
        )
        .await
        else {
            info!("No name input found, joining without a name");
            return;
        };

        match self.page().fill(&input, &self.bot_name).await {
            Ok(()) => {
                info!("Entered bot name: {}", self.bot_name);
                self.checkpoint("02-name-entered").await;
            }
            Err(e) => warn!("Failed to enter bot name: {}", e),
        }
    }

    /// The microphone stays untouched; some platforms refuse to admit a
    /// participant whose devices are all off.
    async fn camera_off(&self) {
        let Some(toggle) = browser::first_visible(self.page(), self.selectors.camera).await else {
            debug!("No camera toggle visible");
            return;
        };

        let label = self
            .page()
            .attribute(&toggle, "aria-label")
            .await
            .ok()
            .flatten()
            .unwrap_or_default();
        if camera_already_off(&label, self.selectors.camera_off_labels) {
            debug!("Camera already off ({})", label);
            return;
        }

        match self.page().click(&toggle).await {
            Ok(()) => info!("Camera disabled"),
            Err(e) => warn!("Failed to disable camera: {}", e),
        }
    }

    async fn click_join(&self) -> BotResult<()> {
        let per_attempt = self.join.join_click_timeout();

        for candidate in self.selectors.join {
            match browser::wait_and_click(self.page(), candidate, per_attempt).await {
                Ok(()) => {
                    info!("Clicked join via {}", candidate);
                    return Ok(());
                }
                Err(e) => debug!("Join candidate {} failed: {}", candidate, e),
            }
        }

        match self.page().click_by_text(self.selectors.join_labels).await {
            Ok(Some(label)) => {
                info!("Clicked join via button text \"{}\"", label);
                return Ok(());
            }
            Ok(None) => {}
            Err(e) => debug!("Text join fallback failed: {}", e),
        }

        Err(BotError::Join {
            candidates: self.selectors.join.len() + 1,
        })
    }

    pub async fn leave(&self) -> bool {
        let mut left = false;
        for candidate in self.selectors.leave {
            if !browser::visible(self.page(), candidate).await {
                continue;
            }
            match timeout(LEAVE_CLICK_TIMEOUT, self.page().click(candidate)).await {
                Ok(Ok(())) => {
                    info!("Clicked leave via {}", candidate);
                    left = true;
                    break;
                }
                Ok(Err(e)) => debug!("Leave candidate {} failed: {}", candidate, e),
                Err(_) => debug!("Leave candidate {} timed out", candidate),
            }
        }

        if let Some(confirm) =
            browser::wait_for_any(self.page(), self.selectors.leave_confirm, LEAVE_CONFIRM_WAIT).await
        {
            match self.page().click(&confirm).await {
                Ok(()) => {
                    info!("Confirmed leave via {}", confirm);
                    left = true;
                }
                Err(e) => debug!("Leave confirmation failed: {}", e),
            }
        }

        if !left {
            warn!("No leave control matched, the meeting page will be closed instead");
        }
        left
    }

    pub async fn is_in_meeting(&self) -> bool {
        self.selectors.admission.in_meeting(self.page()).await
    }

    async fn checkpoint(&self, name: &str) {
        browser::checkpoint(self.page(), &self.screenshot_dir, name).await;
    }
}

fn camera_already_off(label: &str, off_labels: &[&str]) -> bool {
    let label = label.to_lowercase();
    off_labels.iter().any(|marker| label.contains(marker))
}
