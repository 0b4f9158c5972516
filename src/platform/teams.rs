use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::join_flow::JoinFlow;
use super::selectors::TEAMS;
use super::PlatformAdapter;
use crate::browser::PageDriver;
use crate::config::{Platform, WorkerConfig};
use crate::error::BotResult;

/// Microsoft Teams web client. The light-meetings page first offers the
/// desktop app; the join flow clicks through to the in-browser client.
pub struct TeamsAdapter {
    flow: JoinFlow,
}

impl TeamsAdapter {
    pub fn new(page: Arc<dyn PageDriver>, config: &WorkerConfig) -> Self {
        Self {
            flow: JoinFlow::new(page, &TEAMS, config),
        }
    }
}

#[async_trait]
impl PlatformAdapter for TeamsAdapter {
    fn platform(&self) -> Platform {
        Platform::Teams
    }

    async fn join(&self, url: &str) -> BotResult<()> {
        info!("Joining Microsoft Teams: {}", url);
        self.flow.run(url).await?;
        info!("Joined Microsoft Teams");
        Ok(())
    }

    async fn leave(&self) -> bool {
        info!("Leaving Microsoft Teams");
        self.flow.leave().await
    }

    async fn is_in_meeting(&self) -> bool {
        self.flow.is_in_meeting().await
    }
}
