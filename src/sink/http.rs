//! HTTP sink for the recording storage service.
//!
//! `POST /stream` takes one multipart `file` part per chunk, keyed by the
//! `X-Meeting-ID` and `X-Chunk-Index` headers. `POST /finalize/{id}` merges
//! the stored chunks and answers with a [`FinalizeReport`].

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use tracing::{debug, error, info};

use super::{chunk_file_name, ChunkSink, FinalizeReport};
use crate::error::{BotError, BotResult};

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(120);

pub struct HttpSink {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSink {
    pub fn new(base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        info!("Using storage service at {}", base_url);
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    async fn check(response: reqwest::Response, what: &str) -> BotResult<String> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BotError::sink(format!("reading {what} response: {e}")))?;

        if !status.is_success() {
            error!("{} failed with status {}: {}", what, status, body);
            return Err(BotError::Sink(format!("{what} failed ({status}): {body}")));
        }
        Ok(body)
    }
}

#[async_trait]
impl ChunkSink for HttpSink {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn upload_chunk(&self, meeting_id: i64, index: u64, payload: Vec<u8>) -> BotResult<()> {
        let size = payload.len();
        let part = Part::bytes(payload)
            .file_name(chunk_file_name(index))
            .mime_str("audio/webm")
            .map_err(BotError::sink)?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/stream", self.base_url))
            .header("X-Meeting-ID", meeting_id.to_string())
            .header("X-Chunk-Index", index.to_string())
            .multipart(form)
            .timeout(UPLOAD_TIMEOUT)
            .send()
            .await
            .map_err(|e| BotError::sink(format!("uploading chunk {index}: {e}")))?;

        Self::check(response, "chunk upload").await?;
        debug!("Uploaded chunk {} ({} bytes)", index, size);
        Ok(())
    }

    async fn finalize(&self, meeting_id: i64) -> BotResult<FinalizeReport> {
        let response = self
            .client
            .post(format!("{}/finalize/{}", self.base_url, meeting_id))
            .timeout(FINALIZE_TIMEOUT)
            .send()
            .await
            .map_err(|e| BotError::sink(format!("finalizing meeting {meeting_id}: {e}")))?;

        let body = Self::check(response, "finalize").await?;
        let report: FinalizeReport = serde_json::from_str(&body)
            .map_err(|e| BotError::sink(format!("parsing finalize response: {e}")))?;

        info!(
            "Storage service merged {} chunks into {} ({} bytes)",
            report.chunks_merged, report.filename, report.file_size
        );
        Ok(report)
    }
}
