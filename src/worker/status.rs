//! Worker phase tracking and lifecycle publishing.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::control::{ControlPlane, LifecycleStatus};

/// Phase of one worker run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerPhase {
    Starting,
    Joining,
    Active,
    Recording,
    Finalizing,
    Completed,
    Failed,
}

impl WorkerPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Joining => "joining",
            Self::Active => "active",
            Self::Recording => "recording",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn status(&self) -> Option<LifecycleStatus> {
        match self {
            Self::Starting => None,
            Self::Joining => Some(LifecycleStatus::Joining),
            Self::Active => Some(LifecycleStatus::Active),
            Self::Recording => Some(LifecycleStatus::Recording),
            Self::Finalizing => Some(LifecycleStatus::Finalizing),
            Self::Completed => Some(LifecycleStatus::Completed),
            Self::Failed => Some(LifecycleStatus::Failed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerState {
    pub phase: WorkerPhase,
    pub chunk_count: u64,
}

impl Default for WorkerState {
    fn default() -> Self {
        Self {
            phase: WorkerPhase::Starting,
            chunk_count: 0,
        }
    }
}

/// Shared handle: the orchestrator moves the phase forward, the heartbeat
/// task republishes it. Once a terminal status is out nothing else is sent.
#[derive(Clone)]
pub struct StatusReporter {
    control: Arc<ControlPlane>,
    inner: Arc<Mutex<WorkerState>>,
}

impl StatusReporter {
    pub fn new(control: Arc<ControlPlane>) -> Self {
        Self {
            control,
            inner: Arc::new(Mutex::new(WorkerState::default())),
        }
    }

    pub async fn get(&self) -> WorkerState {
        self.inner.lock().await.clone()
    }

    pub async fn phase(&self) -> WorkerPhase {
        self.inner.lock().await.phase
    }

    /// Move to `phase` and publish it. Ignored once terminal.
    pub async fn advance(&self, phase: WorkerPhase, chunk_count: Option<u64>) -> bool {
        self.transition(phase, chunk_count, None).await
    }

    /// Republish `recording` with the current count; only while recording.
    pub async fn heartbeat(&self, chunk_count: u64) {
        let mut state = self.inner.lock().await;
        if state.phase != WorkerPhase::Recording {
            debug!("Skipping heartbeat in phase {}", state.phase.as_str());
            return;
        }
        state.chunk_count = chunk_count;
        // held across the publish so a terminal status cannot overtake it
        self.control
            .publish_status(LifecycleStatus::Recording, Some(chunk_count), None)
            .await;
    }

    pub async fn complete(&self, chunk_count: u64) -> bool {
        self.transition(WorkerPhase::Completed, Some(chunk_count), None)
            .await
    }

    pub async fn fail(&self, message: String) -> bool {
        self.transition(WorkerPhase::Failed, None, Some(message))
            .await
    }

    async fn transition(
        &self,
        phase: WorkerPhase,
        chunk_count: Option<u64>,
        error: Option<String>,
    ) -> bool {
        let mut state = self.inner.lock().await;
        if state.phase.is_terminal() {
            debug!(
                "Ignoring {} after terminal {}",
                phase.as_str(),
                state.phase.as_str()
            );
            return false;
        }

        state.phase = phase;
        if let Some(count) = chunk_count {
            state.chunk_count = count;
        }
        info!("Worker phase: {}", phase.as_str());

        if let Some(status) = phase.status() {
            self.control.publish_status(status, chunk_count, error).await;
        }
        true
    }
}
