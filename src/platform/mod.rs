//! Meeting platform adapters.

pub mod google_meet;
pub mod join_flow;
pub mod selectors;
pub mod teams;

use async_trait::async_trait;
use std::sync::Arc;

use crate::browser::PageDriver;
use crate::config::{Platform, WorkerConfig};
use crate::error::BotResult;

pub use google_meet::GoogleMeetAdapter;
pub use teams::TeamsAdapter;

/// Join/leave mechanics for one meeting platform.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Navigate, request to join and wait until admitted.
    async fn join(&self, url: &str) -> BotResult<()>;

    /// Best-effort; returns whether a leave control was clicked.
    async fn leave(&self) -> bool;

    async fn is_in_meeting(&self) -> bool;
}

pub fn adapter_for(config: &WorkerConfig, page: Arc<dyn PageDriver>) -> Box<dyn PlatformAdapter> {
    match config.platform {
        Platform::GoogleMeet => Box::new(GoogleMeetAdapter::new(page, config)),
        Platform::Teams => Box::new(TeamsAdapter::new(page, config)),
    }
}
