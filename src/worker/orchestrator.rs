//! Recording worker orchestrator.
//!
//! joining → active → recording → finalizing → completed | failed
//!
//! All collaborators are injected; the browser is closed and the control
//! plane disconnected on every exit path.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::status::{StatusReporter, WorkerPhase};
use crate::browser::{PageDriver, SessionLauncher};
use crate::capture::{AudioCapture, CaptureSettings, CaptureSummary, ChunkCounter};
use crate::config::WorkerConfig;
use crate::control::ControlPlane;
use crate::error::{BotError, BotResult};
use crate::platform;
use crate::sink::{ChunkSink, FinalizeReport};

const LAUNCH_TIMEOUT: Duration = Duration::from_secs(60);

/// External collaborators of one worker run.
pub struct WorkerDeps {
    pub control: Arc<ControlPlane>,
    pub sink: Arc<dyn ChunkSink>,
    pub launcher: Box<dyn SessionLauncher>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerReport {
    pub chunk_count: u64,
    pub capture: Option<CaptureSummary>,
    pub finalize: Option<FinalizeReport>,
}

/// Requests a cooperative stop. Cloned into the command listener and the
/// signal handler.
#[derive(Clone)]
pub struct StopHandle {
    token: CancellationToken,
    status: StatusReporter,
}

impl StopHandle {
    pub async fn request(&self, source: &str) {
        let phase = self.status.phase().await;
        if phase == WorkerPhase::Finalizing || phase.is_terminal() {
            info!("Stop from {} ignored, worker is {}", source, phase.as_str());
            return;
        }
        if self.token.is_cancelled() {
            info!("Stop from {} ignored, already stopping", source);
            return;
        }
        info!("Stop requested by {} while {}", source, phase.as_str());
        self.token.cancel();
    }

    pub fn is_requested(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub struct Worker {
    config: WorkerConfig,
    control: Arc<ControlPlane>,
    sink: Arc<dyn ChunkSink>,
    launcher: Box<dyn SessionLauncher>,
    stop: CancellationToken,
    status: StatusReporter,
}

impl Worker {
    pub fn new(config: WorkerConfig, deps: WorkerDeps, stop: CancellationToken) -> Self {
        let status = StatusReporter::new(deps.control.clone());
        Self {
            config,
            control: deps.control,
            sink: deps.sink,
            launcher: deps.launcher,
            stop,
            status,
        }
    }

    pub fn status(&self) -> StatusReporter {
        self.status.clone()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            token: self.stop.clone(),
            status: self.status.clone(),
        }
    }

    /// Run the meeting to completion. The terminal status has been
    /// published when this returns.
    pub async fn run(self) -> BotResult<WorkerReport> {
        info!(
            "Worker {} starting for meeting {} on {}",
            self.config.container_id, self.config.meeting_id, self.config.platform
        );
        self.status.advance(WorkerPhase::Joining, None).await;

        let result = match timeout(LAUNCH_TIMEOUT, self.launcher.launch()).await {
            Ok(Ok(session)) => {
                let result = self.drive(session.page()).await;
                session.close().await;
                result
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BotError::Browser(format!(
                "browser did not launch within {}s",
                LAUNCH_TIMEOUT.as_secs()
            ))),
        };

        match &result {
            Ok(report) => {
                info!("Meeting recorded: {} chunks", report.chunk_count);
                self.status.complete(report.chunk_count).await;
            }
            Err(e) => {
                error!("Worker failed: {}", e);
                self.status.fail(e.to_string()).await;
            }
        }

        self.control.disconnect().await;
        result
    }

    async fn drive(&self, page: Arc<dyn PageDriver>) -> BotResult<WorkerReport> {
        let adapter = platform::adapter_for(&self.config, page.clone());

        adapter.join(&self.config.meeting_url).await?;
        info!("Admitted to the {} meeting", adapter.platform());

        if self.stop.is_cancelled() {
            info!("Stop was requested while joining, leaving without recording");
            adapter.leave().await;
            return Ok(WorkerReport::default());
        }
        self.status.advance(WorkerPhase::Active, None).await;

        let capture = AudioCapture::new(
            page,
            self.sink.clone(),
            self.config.meeting_id,
            CaptureSettings::from_config(&self.config),
        );
        let capture = match capture.start().await {
            Ok(running) => running,
            Err(e) => {
                adapter.leave().await;
                return Err(e);
            }
        };
        self.status.advance(WorkerPhase::Recording, Some(0)).await;

        let heartbeat_stop = CancellationToken::new();
        let heartbeat = tokio::spawn(heartbeat_loop(
            self.status.clone(),
            capture.chunk_counter(),
            self.config.timings.worker.heartbeat(),
            heartbeat_stop.clone(),
        ));

        let fault = capture.fault();
        let mut poll = interval(self.config.timings.worker.stop_poll());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failure = loop {
            poll.tick().await;
            if self.stop.is_cancelled() {
                info!("Stop signal observed, finalizing");
                break None;
            }
            if fault.is_cancelled() {
                if !adapter.is_in_meeting().await {
                    warn!("Meeting controls are no longer visible");
                }
                let reason = capture
                    .fault_reason()
                    .unwrap_or_else(|| "page context closed".to_string());
                break Some(BotError::CaptureLost(reason));
            }
        };

        heartbeat_stop.cancel();
        if let Err(e) = heartbeat.await {
            warn!("Heartbeat task ended abnormally: {}", e);
        }

        self.status.advance(WorkerPhase::Finalizing, None).await;
        let summary = capture.stop().await;
        let finalize = self.finalize(&summary, &mut failure).await;

        adapter.leave().await;

        match failure {
            Some(e) => Err(e),
            None => Ok(WorkerReport {
                chunk_count: summary.chunks_produced,
                capture: Some(summary),
                finalize,
            }),
        }
    }

    /// Called once, after capture has stopped and every upload returned.
    async fn finalize(
        &self,
        summary: &CaptureSummary,
        failure: &mut Option<BotError>,
    ) -> Option<FinalizeReport> {
        if summary.chunks_uploaded == 0 {
            warn!("No chunks were uploaded, skipping finalize");
            return None;
        }

        let limit = self.config.timings.worker.finalize_timeout();
        let outcome = match timeout(limit, self.sink.finalize(self.config.meeting_id)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(BotError::Sink(format!(
                "finalize did not finish within {}s",
                limit.as_secs()
            ))),
        };

        match outcome {
            Ok(report) => {
                info!(
                    "Finalized {} ({} chunks, {} bytes)",
                    report.filename, report.chunks_merged, report.file_size
                );
                Some(report)
            }
            Err(e) => {
                error!("Finalize failed: {}", e);
                failure.get_or_insert(e);
                None
            }
        }
    }
}

async fn heartbeat_loop(
    status: StatusReporter,
    counter: ChunkCounter,
    every: Duration,
    stop: CancellationToken,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => status.heartbeat(counter.get()).await,
        }
    }
}
