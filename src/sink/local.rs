//! Filesystem sink.
//!
//! Layout under the storage root:
//!   temp/meeting_<id>/chunk_00000.webm ...   while recording
//!   final/meeting_<id>_<YYYYmmdd_HHMMSS>.webm after finalize

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::{chunk_file_name, ChunkSink, FinalizeReport};
use crate::error::{BotError, BotResult};

pub struct LocalSink {
    root: PathBuf,
}

impl LocalSink {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn temp_dir(&self, meeting_id: i64) -> PathBuf {
        self.root.join("temp").join(format!("meeting_{meeting_id}"))
    }

    fn final_dir(&self) -> PathBuf {
        self.root.join("final")
    }

    async fn list_chunks(dir: &Path) -> BotResult<Vec<(u64, PathBuf)>> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BotError::sink(format!("reading {}: {e}", dir.display()))),
        };

        let mut chunks = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(BotError::sink)? {
            let name = entry.file_name();
            let Some(index) = name.to_str().and_then(parse_chunk_index) else {
                continue;
            };
            chunks.push((index, entry.path()));
        }
        chunks.sort_by_key(|(index, _)| *index);
        Ok(chunks)
    }
}

fn parse_chunk_index(name: &str) -> Option<u64> {
    name.strip_prefix("chunk_")?
        .strip_suffix(".webm")?
        .parse()
        .ok()
}

#[async_trait]
impl ChunkSink for LocalSink {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn upload_chunk(&self, meeting_id: i64, index: u64, payload: Vec<u8>) -> BotResult<()> {
        let dir = self.temp_dir(meeting_id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| BotError::sink(format!("creating {}: {e}", dir.display())))?;

        let path = dir.join(chunk_file_name(index));
        fs::write(&path, &payload)
            .await
            .map_err(|e| BotError::sink(format!("writing {}: {e}", path.display())))?;

        debug!(
            "Stored {} ({:.2} KB)",
            chunk_file_name(index),
            payload.len() as f64 / 1024.0
        );
        Ok(())
    }

    async fn finalize(&self, meeting_id: i64) -> BotResult<FinalizeReport> {
        let temp = self.temp_dir(meeting_id);
        let chunks = Self::list_chunks(&temp).await?;
        if chunks.is_empty() {
            return Err(BotError::Sink(format!(
                "no chunks stored for meeting {meeting_id}"
            )));
        }

        let final_dir = self.final_dir();
        fs::create_dir_all(&final_dir)
            .await
            .map_err(|e| BotError::sink(format!("creating {}: {e}", final_dir.display())))?;

        let filename = format!(
            "meeting_{}_{}.webm",
            meeting_id,
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        );
        let output_path = final_dir.join(&filename);
        let mut output = fs::File::create(&output_path)
            .await
            .map_err(|e| BotError::sink(format!("creating {}: {e}", output_path.display())))?;

        let mut file_size = 0u64;
        for (_, path) in &chunks {
            let bytes = fs::read(path)
                .await
                .map_err(|e| BotError::sink(format!("reading {}: {e}", path.display())))?;
            output.write_all(&bytes).await.map_err(BotError::sink)?;
            file_size += bytes.len() as u64;
        }
        output.flush().await.map_err(BotError::sink)?;

        if let Err(e) = fs::remove_dir_all(&temp).await {
            warn!("Failed to remove {}: {}", temp.display(), e);
        }

        info!(
            "Merged {} chunks into {} ({} bytes)",
            chunks.len(),
            output_path.display(),
            file_size
        );

        Ok(FinalizeReport {
            filename,
            chunks_merged: chunks.len() as u64,
            file_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upload_writes_padded_file() {
        let root = TempDir::new().unwrap();
        let sink = LocalSink::new(root.path().to_path_buf());

        sink.upload_chunk(42, 3, b"abc".to_vec()).await.unwrap();

        let path = root.path().join("temp/meeting_42/chunk_00003.webm");
        assert_eq!(std::fs::read(path).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_finalize_concatenates_in_index_order() {
        let root = TempDir::new().unwrap();
        let sink = LocalSink::new(root.path().to_path_buf());

        // out of order on purpose; index 10 sorts after 9 numerically
        for index in [10u64, 0, 9, 1] {
            sink.upload_chunk(7, index, format!("[{index}]").into_bytes())
                .await
                .unwrap();
        }

        let report = sink.finalize(7).await.unwrap();
        assert_eq!(report.chunks_merged, 4);
        assert!(report.filename.starts_with("meeting_7_"));
        assert!(report.filename.ends_with(".webm"));

        let merged = std::fs::read(root.path().join("final").join(&report.filename)).unwrap();
        assert_eq!(merged, b"[0][1][9][10]");
        assert_eq!(report.file_size, merged.len() as u64);
        assert!(!sink.temp_dir(7).exists());
    }

    #[tokio::test]
    async fn test_finalize_without_chunks_fails() {
        let root = TempDir::new().unwrap();
        let sink = LocalSink::new(root.path().to_path_buf());
        assert!(matches!(sink.finalize(1).await, Err(BotError::Sink(_))));
    }

    #[test]
    fn test_parse_chunk_index() {
        assert_eq!(parse_chunk_index("chunk_00012.webm"), Some(12));
        assert_eq!(parse_chunk_index("chunk_abc.webm"), None);
        assert_eq!(parse_chunk_index("notes.txt"), None);
    }
}
