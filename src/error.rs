//! Error taxonomy for the recording worker.
//!
//! Every failure that can end a worker run is a `BotError`. The orchestrator
//! publishes its `Display` text as the `error_message` of the final `failed`
//! status update.

use std::time::Duration;
use thiserror::Error;

use crate::admission::AdmissionState;

#[derive(Debug, Error)]
pub enum BotError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("could not click the join control after trying {candidates} candidates")]
    Join { candidates: usize },

    #[error("admission was rejected by the meeting")]
    AdmissionRejected,

    #[error("timed out waiting for admission in {phase} after {}s", after.as_secs())]
    AdmissionTimedOut {
        phase: AdmissionState,
        after: Duration,
    },

    #[error("recording could not start: {0}")]
    RecordingInit(String),

    #[error("chunk {index} failed to upload after {attempts} attempts: {reason}")]
    ChunkUpload {
        index: u64,
        attempts: u32,
        reason: String,
    },

    #[error("control plane error: {0}")]
    ControlPlane(String),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("chunk sink error: {0}")]
    Sink(String),

    #[error("lost the page capture context: {0}")]
    CaptureLost(String),
}

pub type BotResult<T> = Result<T, BotError>;

impl BotError {
    /// Whether this error ends the worker run.
    ///
    /// A chunk that failed all of its upload attempts is logged and skipped;
    /// everything else is terminal.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::ChunkUpload { .. })
    }

    pub fn browser(err: impl std::fmt::Display) -> Self {
        Self::Browser(err.to_string())
    }

    pub fn control_plane(err: impl std::fmt::Display) -> Self {
        Self::ControlPlane(err.to_string())
    }

    pub fn sink(err: impl std::fmt::Display) -> Self {
        Self::Sink(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_chunk_upload_is_non_fatal() {
        let upload = BotError::ChunkUpload {
            index: 3,
            attempts: 3,
            reason: "503".to_string(),
        };
        assert!(!upload.is_fatal());
        assert!(BotError::AdmissionRejected.is_fatal());
        assert!(BotError::Join { candidates: 4 }.is_fatal());
        assert!(BotError::Config("x".to_string()).is_fatal());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            BotError::Join { candidates: 23 }.to_string(),
            "could not click the join control after trying 23 candidates"
        );
        let timeout = BotError::AdmissionTimedOut {
            phase: AdmissionState::WaitingRoom,
            after: Duration::from_secs(120),
        };
        assert_eq!(
            timeout.to_string(),
            "timed out waiting for admission in waiting_room after 120s"
        );
    }
}
