//! Wire records exchanged over the control plane.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status published by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    Joining,
    Active,
    Recording,
    Finalizing,
    Completed,
    Failed,
}

impl LifecycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
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
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub container_id: String,
    pub meeting_id: i64,
    pub status: LifecycleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: String,
}

impl StatusUpdate {
    pub fn new(
        container_id: &str,
        meeting_id: i64,
        status: LifecycleStatus,
        chunk_count: Option<u64>,
        error_message: Option<String>,
    ) -> Self {
        Self {
            container_id: container_id.to_string(),
            meeting_id,
            status,
            chunk_count,
            error_message,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Externally injected command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Stop,
    /// A command this worker does not understand; logged and ignored.
    Other(String),
}

#[derive(Debug, Deserialize)]
struct CommandMessage {
    command: String,
}

impl Command {
    pub fn parse(payload: &str) -> Result<Self, serde_json::Error> {
        let message: CommandMessage = serde_json::from_str(payload)?;
        Ok(match message.command.trim().to_ascii_lowercase().as_str() {
            "stop" => Self::Stop,
            _ => Self::Other(message.command),
        })
    }
}

/// Channel names for one worker instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channels {
    pub status: String,
    pub command: String,
}

impl Channels {
    pub fn for_container(container_id: &str, prefix: Option<&str>) -> Self {
        let ns = match prefix {
            Some(p) if !p.is_empty() => format!("{}:", p.trim_end_matches(':')),
            _ => String::new(),
        };
        Self {
            status: format!("{ns}status:{container_id}"),
            command: format!("{ns}command:{container_id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_update_wire_shape() {
        let update = StatusUpdate::new("bot-1", 42, LifecycleStatus::Recording, Some(3), None);
        let value: serde_json::Value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["container_id"], "bot-1");
        assert_eq!(value["meeting_id"], 42);
        assert_eq!(value["status"], "recording");
        assert_eq!(value["chunk_count"], 3);
        assert!(value.get("error_message").is_none());
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_failed_update_carries_error() {
        let update = StatusUpdate::new(
            "bot-1",
            42,
            LifecycleStatus::Failed,
            None,
            Some("admission was rejected by the meeting".to_string()),
        );
        let json = serde_json::to_string(&update).unwrap();
        assert!(json.contains("\"status\":\"failed\""));
        assert!(json.contains("\"error_message\":\"admission was rejected by the meeting\""));
        assert!(!json.contains("chunk_count"));
    }

    #[test]
    fn test_command_parse() {
        assert_eq!(Command::parse(r#"{"command":"stop"}"#).unwrap(), Command::Stop);
        assert_eq!(
            Command::parse(r#"{"command":"pause"}"#).unwrap(),
            Command::Other("pause".to_string())
        );
        assert!(Command::parse("stop").is_err());
    }

    #[test]
    fn test_channels() {
        let plain = Channels::for_container("abc", None);
        assert_eq!(plain.status, "status:abc");
        assert_eq!(plain.command, "command:abc");

        let namespaced = Channels::for_container("abc", Some("bot"));
        assert_eq!(namespaced.status, "bot:status:abc");
        assert_eq!(namespaced.command, "bot:command:abc");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(LifecycleStatus::Completed.is_terminal());
        assert!(LifecycleStatus::Failed.is_terminal());
        assert!(!LifecycleStatus::Finalizing.is_terminal());
    }
}
