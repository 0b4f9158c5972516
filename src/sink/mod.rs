//! Durable destinations for recorded chunks.

pub mod http;
pub mod local;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::StorageTarget;
use crate::error::BotResult;

pub use http::HttpSink;
pub use local::LocalSink;

/// One encoded audio segment with its meeting-wide position.
#[derive(Debug, Clone)]
pub struct RecordingChunk {
    pub meeting_id: i64,
    pub index: u64,
    pub payload: Vec<u8>,
    pub produced_at: DateTime<Utc>,
}

/// Result of merging a meeting's chunks into one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeReport {
    pub filename: String,
    pub chunks_merged: u64,
    pub file_size: u64,
}

#[async_trait]
pub trait ChunkSink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Persist one chunk under `(meeting_id, index)`. A single attempt;
    /// retries belong to the caller.
    async fn upload_chunk(&self, meeting_id: i64, index: u64, payload: Vec<u8>) -> BotResult<()>;

    /// Merge every persisted chunk of the meeting in index order.
    async fn finalize(&self, meeting_id: i64) -> BotResult<FinalizeReport>;
}

pub fn chunk_file_name(index: u64) -> String {
    format!("chunk_{index:05}.webm")
}

pub fn from_target(target: &StorageTarget) -> Arc<dyn ChunkSink> {
    match target {
        StorageTarget::Local(root) => Arc::new(LocalSink::new(root.clone())),
        StorageTarget::Http(base_url) => Arc::new(HttpSink::new(base_url)),
    }
}
