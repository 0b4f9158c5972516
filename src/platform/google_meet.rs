use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::join_flow::JoinFlow;
use super::selectors::GOOGLE_MEET;
use super::PlatformAdapter;
use crate::browser::PageDriver;
use crate::config::{Platform, WorkerConfig};
use crate::error::BotResult;

pub struct GoogleMeetAdapter {
    flow: JoinFlow,
}

impl GoogleMeetAdapter {
    pub fn new(page: Arc<dyn PageDriver>, config: &WorkerConfig) -> Self {
        Self {
            flow: JoinFlow::new(page, &GOOGLE_MEET, config),
        }
    }
}

#[async_trait]
impl PlatformAdapter for GoogleMeetAdapter {
    fn platform(&self) -> Platform {
        Platform::GoogleMeet
    }

    async fn join(&self, url: &str) -> BotResult<()> {
        info!("Joining Google Meet: {}", url);
        self.flow.run(url).await?;
        info!("Joined Google Meet");
        Ok(())
    }

    async fn leave(&self) -> bool {
        info!("Leaving Google Meet");
        self.flow.leave().await
    }

    async fn is_in_meeting(&self) -> bool {
        self.flow.is_in_meeting().await
    }
}
