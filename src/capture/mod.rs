//! Meeting audio capture.
//!
//! The page mixes every live remote audio element into one MediaRecorder
//! and queues base64 segments; the host drains that queue, restores order,
//! assigns meeting-wide chunk indices and uploads chunks one at a time.

pub mod sequencer;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::browser::PageDriver;
use crate::config::{CaptureTimings, WorkerConfig};
use crate::error::{BotError, BotResult};
use crate::sink::{ChunkSink, RecordingChunk};

use sequencer::{ChunkSequencer, PageSegment};

const RECORDER_JS: &str = include_str!("recorder.js");
const COUNT_SOURCES: &str = "window.__meetingBot.countSources()";
const DRAIN: &str = "window.__meetingBot.drain()";
const STOP: &str = "window.__meetingBot.stop()";
const STATE: &str = "window.__meetingBot.state()";

/// Consecutive failed drains after which the page context counts as lost.
const MAX_DRAIN_FAILURES: u32 = 5;

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub chunk_duration: Duration,
    pub bitrate: u32,
    pub timings: CaptureTimings,
}

impl CaptureSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            chunk_duration: config.chunk_duration,
            bitrate: config.audio_bitrate,
            timings: config.timings.capture.clone(),
        }
    }

    fn start_script(&self) -> String {
        let params = json!({
            "bitrate": self.bitrate,
            "timesliceMs": self.chunk_duration.as_millis() as u64,
        });
        format!("window.__meetingBot.start({params})")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureSummary {
    /// Audio elements mixed into the recording
    pub sources: u64,
    /// Chunks that received a meeting index
    pub chunks_produced: u64,
    pub chunks_uploaded: u64,
    /// Segments lost in the page plus chunks whose upload gave up
    pub chunks_failed: u64,
}

#[derive(Debug, Deserialize)]
struct StartReport {
    attached: u64,
    #[serde(default)]
    failures: Vec<String>,
}

#[derive(Default)]
struct Counters {
    produced: AtomicU64,
    uploaded: AtomicU64,
    failed: AtomicU64,
    fault: Mutex<Option<String>>,
}

impl Counters {
    fn summary(&self, sources: u64) -> CaptureSummary {
        CaptureSummary {
            sources,
            chunks_produced: self.produced.load(Ordering::SeqCst),
            chunks_uploaded: self.uploaded.load(Ordering::SeqCst),
            chunks_failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

/// Read-only view of the chunk count for other tasks.
#[derive(Clone)]
pub struct ChunkCounter(Arc<Counters>);

impl ChunkCounter {
    pub fn get(&self) -> u64 {
        self.0.produced.load(Ordering::SeqCst)
    }
}

pub struct AudioCapture {
    page: Arc<dyn PageDriver>,
    sink: Arc<dyn ChunkSink>,
    meeting_id: i64,
    settings: CaptureSettings,
}

impl AudioCapture {
    pub fn new(
        page: Arc<dyn PageDriver>,
        sink: Arc<dyn ChunkSink>,
        meeting_id: i64,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            page,
            sink,
            meeting_id,
            settings,
        }
    }

    /// Install the recorder, wait for sources and start recording.
    pub async fn start(self) -> BotResult<RunningCapture> {
        info!(
            "Starting audio capture ({}s segments, {} bps)",
            self.settings.chunk_duration.as_secs(),
            self.settings.bitrate
        );

        self.page
            .evaluate(RECORDER_JS)
            .await
            .map_err(|e| BotError::RecordingInit(format!("installing recorder: {e}")))?;

        let sources = self.discover_sources().await?;
        info!("Found {} live audio sources", sources);

        let report = self
            .page
            .evaluate(&self.settings.start_script())
            .await
            .map_err(|e| BotError::RecordingInit(format!("starting recorder: {e}")))?;
        let report: StartReport = serde_json::from_value(report)
            .map_err(|e| BotError::RecordingInit(format!("unexpected start reply: {e}")))?;

        for failure in &report.failures {
            warn!("Audio source could not be mixed: {}", failure);
        }
        if report.attached == 0 {
            return Err(BotError::RecordingInit(
                "no audio source could be attached to the mixer".to_string(),
            ));
        }
        info!("Recording started, mixing {} sources", report.attached);

        let counters = Arc::new(Counters::default());
        let cancel = CancellationToken::new();
        let fault = CancellationToken::new();
        let drainer = Drainer {
            page: self.page.clone(),
            sink: self.sink,
            meeting_id: self.meeting_id,
            timings: self.settings.timings.clone(),
            sequencer: ChunkSequencer::new(),
            next_index: 0,
            counters: counters.clone(),
        };
        let task = tokio::spawn(drainer.run(cancel.clone(), fault.clone()));

        Ok(RunningCapture {
            page: self.page,
            sources: report.attached,
            stop_timeout: Duration::from_secs(self.settings.timings.stop_timeout_secs),
            counters,
            cancel,
            fault,
            task: Some(task),
        })
    }

    async fn discover_sources(&self) -> BotResult<u64> {
        let attempts = self.settings.timings.discovery_retries.max(1);
        let delay = Duration::from_millis(self.settings.timings.discovery_delay_ms);

        for attempt in 1..=attempts {
            match self.page.evaluate(COUNT_SOURCES).await {
                Ok(value) => {
                    let count = value.as_u64().unwrap_or(0);
                    if count > 0 {
                        return Ok(count);
                    }
                    debug!("No audio sources yet (attempt {}/{})", attempt, attempts);
                }
                Err(e) => debug!("Source discovery failed (attempt {}/{}): {}", attempt, attempts, e),
            }
            if attempt < attempts {
                sleep(delay).await;
            }
        }

        Err(BotError::RecordingInit(format!(
            "no live audio sources found after {attempts} attempts"
        )))
    }
}

/// Handle to a recording in progress. Capture never ends by itself; the
/// owner calls [`RunningCapture::stop`].
pub struct RunningCapture {
    page: Arc<dyn PageDriver>,
    sources: u64,
    stop_timeout: Duration,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    fault: CancellationToken,
    task: Option<JoinHandle<Drainer>>,
}

impl RunningCapture {
    /// Chunks indexed so far.
    pub fn chunk_count(&self) -> u64 {
        self.counters.produced.load(Ordering::SeqCst)
    }

    pub fn chunk_counter(&self) -> ChunkCounter {
        ChunkCounter(self.counters.clone())
    }

    /// Cancelled when the page context is gone for good.
    pub fn fault(&self) -> CancellationToken {
        self.fault.clone()
    }

    pub fn fault_reason(&self) -> Option<String> {
        self.counters.fault.lock().ok().and_then(|r| r.clone())
    }

    /// Stop recording and flush the final partial segment. Every upload
    /// attempt has returned when this resolves.
    pub async fn stop(mut self) -> CaptureSummary {
        info!("Stopping audio capture");
        self.cancel.cancel();

        let drainer = match self.task.take() {
            Some(task) => match task.await {
                Ok(drainer) => Some(drainer),
                Err(e) => {
                    error!("Drain task ended abnormally: {}", e);
                    None
                }
            },
            None => None,
        };

        match timeout(self.stop_timeout, self.page.evaluate(STOP)).await {
            Ok(Ok(_)) => debug!("Page recorder stopped"),
            Ok(Err(e)) => warn!("Page recorder stop failed: {}", e),
            Err(_) => warn!(
                "Page recorder did not stop within {}s",
                self.stop_timeout.as_secs()
            ),
        }
        if let Ok(Ok(state)) = timeout(self.stop_timeout, self.page.evaluate(STATE)).await {
            debug!("Page recorder state after stop: {}", state);
        }

        if let Some(mut drainer) = drainer {
            if let Err(e) = drainer.drain_once().await {
                warn!("Final drain failed: {}", e);
            }
            drainer.flush_remaining().await;
        }

        let summary = self.counters.summary(self.sources);
        info!(
            "Capture stopped: {} chunks produced, {} uploaded, {} failed",
            summary.chunks_produced, summary.chunks_uploaded, summary.chunks_failed
        );
        summary
    }
}

impl Drop for RunningCapture {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.cancel.cancel();
            task.abort();
        }
    }
}

/// Owns ordering and index assignment; runs on its own task until the
/// capture is stopped, then hands itself back for the final drain.
struct Drainer {
    page: Arc<dyn PageDriver>,
    sink: Arc<dyn ChunkSink>,
    meeting_id: i64,
    timings: CaptureTimings,
    sequencer: ChunkSequencer,
    next_index: u64,
    counters: Arc<Counters>,
}

impl Drainer {
    async fn run(mut self, cancel: CancellationToken, fault: CancellationToken) -> Self {
        let mut ticker = interval(Duration::from_millis(self.timings.drain_interval_ms.max(10)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = 0u32;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.drain_once().await {
                        Ok(()) => failures = 0,
                        Err(e) => {
                            failures += 1;
                            warn!("Drain failed ({}/{}): {}", failures, MAX_DRAIN_FAILURES, e);
                            if failures >= MAX_DRAIN_FAILURES {
                                error!("Lost the meeting page, stopping the drain loop");
                                if let Ok(mut reason) = self.counters.fault.lock() {
                                    *reason = Some(e.to_string());
                                }
                                fault.cancel();
                                break;
                            }
                        }
                    }
                }
            }
        }
        self
    }

    async fn drain_once(&mut self) -> BotResult<()> {
        let value = self.page.evaluate(DRAIN).await?;
        let segments: Vec<PageSegment> = match value {
            Value::Null => Vec::new(),
            other => serde_json::from_value(other)
                .map_err(|e| BotError::CaptureLost(format!("unexpected drain reply: {e}")))?,
        };
        if !segments.is_empty() {
            debug!("Drained {} segments from the page", segments.len());
        }

        for segment in segments {
            self.sequencer.push(segment);
        }
        for segment in self.sequencer.pop_ready() {
            self.deliver(segment).await;
        }
        if self.sequencer.pending() > 0 {
            debug!("{} segments waiting for an earlier one", self.sequencer.pending());
        }
        Ok(())
    }

    async fn flush_remaining(&mut self) {
        for segment in self.sequencer.drain_all() {
            self.deliver(segment).await;
        }
    }

    async fn deliver(&mut self, segment: PageSegment) {
        let payload = match (&segment.data, &segment.error) {
            (Some(data), _) => match BASE64.decode(data) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Segment {} is not valid base64: {}", segment.seq, e);
                    self.counters.failed.fetch_add(1, Ordering::SeqCst);
                    return;
                }
            },
            (None, Some(error)) => {
                warn!("Segment {} failed in the page: {}", segment.seq, error);
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                return;
            }
            (None, None) => {
                debug!("Segment {} was empty", segment.seq);
                return;
            }
        };

        let chunk = RecordingChunk {
            meeting_id: self.meeting_id,
            index: self.next_index,
            payload,
            produced_at: produced_at(segment.produced_at),
        };
        self.next_index += 1;
        self.counters.produced.fetch_add(1, Ordering::SeqCst);

        debug!(
            "Chunk {} ({} bytes, recorded {})",
            chunk.index,
            chunk.payload.len(),
            chunk.produced_at.to_rfc3339()
        );

        match upload_with_retry(self.sink.as_ref(), &chunk, &self.timings).await {
            Ok(()) => {
                self.counters.uploaded.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                error!("{}", e);
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

fn produced_at(millis: Option<f64>) -> DateTime<Utc> {
    millis
        .and_then(|ms| Utc.timestamp_millis_opt(ms as i64).single())
        .unwrap_or_else(Utc::now)
}

/// Upload with doubling backoff. Gives up with a non-fatal `ChunkUpload`.
pub async fn upload_with_retry(
    sink: &dyn ChunkSink,
    chunk: &RecordingChunk,
    timings: &CaptureTimings,
) -> BotResult<()> {
    let attempts = timings.upload_attempts.max(1);
    let mut delay = Duration::from_millis(timings.upload_backoff_ms);
    let mut reason = String::new();

    for attempt in 1..=attempts {
        match sink
            .upload_chunk(chunk.meeting_id, chunk.index, chunk.payload.clone())
            .await
        {
            Ok(()) => return Ok(()),
            Err(e) => {
                reason = e.to_string();
                if attempt < attempts {
                    warn!(
                        "Chunk {} upload attempt {}/{} failed: {}, retrying in {}ms",
                        chunk.index,
                        attempt,
                        attempts,
                        e,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    Err(BotError::ChunkUpload {
        index: chunk.index,
        attempts,
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::FakePage;
    use crate::sink::{FinalizeReport, LocalSink};
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};

    /// Sink that records uploads and fails chosen indices a number of times.
    #[derive(Default)]
    struct RecordingSink {
        uploads: Mutex<Vec<(u64, Vec<u8>)>>,
        attempts: Mutex<HashMap<u64, u32>>,
        fail_times: HashMap<u64, u32>,
    }

    #[async_trait]
    impl ChunkSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn upload_chunk(&self, _meeting_id: i64, index: u64, payload: Vec<u8>) -> BotResult<()> {
            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                let n = attempts.entry(index).or_insert(0);
                *n += 1;
                *n
            };
            if attempt <= self.fail_times.get(&index).copied().unwrap_or(0) {
                return Err(BotError::Sink("503".to_string()));
            }
            self.uploads.lock().unwrap().push((index, payload));
            Ok(())
        }

        async fn finalize(&self, _meeting_id: i64) -> BotResult<FinalizeReport> {
            unreachable!("capture never finalizes")
        }
    }

    fn entry(seq: u64, data: &[u8]) -> Value {
        json!({"seq": seq, "data": BASE64.encode(data), "error": null, "producedAt": 1_700_000_000_000u64})
    }

    fn failed_entry(seq: u64) -> Value {
        json!({"seq": seq, "data": null, "error": "EncodingError", "producedAt": 1_700_000_000_000u64})
    }

    /// Page with `sources` live audio elements; each drain pops the next
    /// batch, and `stop()` queues `on_stop` as the final partial segment.
    fn recording_page(sources: u64, batches: Vec<Vec<Value>>, on_stop: Vec<Value>) -> Arc<FakePage> {
        let page = Arc::new(FakePage::new());
        let mut batches: VecDeque<Vec<Value>> = batches.into();
        let mut on_stop = Some(on_stop);
        page.on_evaluate(move |script| {
            Ok(match script {
                COUNT_SOURCES => json!(sources),
                DRAIN => Value::Array(batches.pop_front().unwrap_or_default()),
                STOP => {
                    if let Some(last) = on_stop.take() {
                        batches.push_back(last);
                    }
                    json!(true)
                }
                s if s.starts_with("window.__meetingBot.start(") => {
                    json!({"attached": sources, "failures": []})
                }
                _ => Value::Null,
            })
        });
        page
    }

    fn settings() -> CaptureSettings {
        CaptureSettings {
            chunk_duration: Duration::from_secs(10),
            bitrate: 128_000,
            timings: CaptureTimings::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_sources_mixed_with_chunk_timeslice() {
        let page = recording_page(3, vec![], vec![]);
        let sink = Arc::new(RecordingSink::default());

        let running = AudioCapture::new(page.clone(), sink, 42, settings())
            .start()
            .await
            .unwrap();

        let scripts = page.scripts.lock().unwrap().clone();
        let start = scripts
            .iter()
            .find(|s| s.starts_with("window.__meetingBot.start("))
            .unwrap();
        assert!(start.contains(r#""timesliceMs":10000"#));
        assert!(start.contains(r#""bitrate":128000"#));
        assert_eq!(running.stop().await.sources, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_sources_after_retries() {
        let page = recording_page(0, vec![], vec![]);
        let sink = Arc::new(RecordingSink::default());

        let result = AudioCapture::new(page.clone(), sink, 42, settings()).start().await;

        assert!(matches!(result, Err(BotError::RecordingInit(_))));
        let probes = page
            .scripts
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.as_str() == COUNT_SOURCES)
            .count();
        assert_eq!(probes, 10);
        assert!(page.elapsed() >= Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_indices_contiguous_despite_reorder_and_page_failures() {
        let page = recording_page(
            2,
            vec![
                vec![entry(1, b"b"), entry(0, b"a")],
                vec![entry(3, b"d")],
                vec![failed_entry(2), entry(4, b"e")],
            ],
            vec![],
        );
        let sink = Arc::new(RecordingSink::default());

        let running = AudioCapture::new(page, sink.clone(), 42, settings())
            .start()
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        let summary = running.stop().await;

        let uploads = sink.uploads.lock().unwrap().clone();
        assert_eq!(
            uploads,
            vec![
                (0, b"a".to_vec()),
                (1, b"b".to_vec()),
                (2, b"d".to_vec()),
                (3, b"e".to_vec())
            ]
        );
        assert_eq!(
            summary,
            CaptureSummary {
                sources: 2,
                chunks_produced: 4,
                chunks_uploaded: 4,
                chunks_failed: 1,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_retries_then_moves_on() {
        let page = recording_page(1, vec![vec![entry(0, b"a"), entry(1, b"b")]], vec![]);
        let sink = Arc::new(RecordingSink {
            fail_times: HashMap::from([(0, 5), (1, 2)]),
            ..Default::default()
        });

        let running = AudioCapture::new(page, sink.clone(), 42, settings())
            .start()
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        let summary = running.stop().await;

        assert_eq!(sink.attempts.lock().unwrap()[&0], 3);
        assert_eq!(sink.attempts.lock().unwrap()[&1], 3);
        let indices: Vec<u64> = sink.uploads.lock().unwrap().iter().map(|u| u.0).collect();
        assert_eq!(indices, vec![1]);
        assert_eq!(summary.chunks_uploaded, 1);
        assert_eq!(summary.chunks_failed, 1);
        assert_eq!(summary.chunks_produced, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_segment_flushed_and_merged() {
        let root = tempfile::TempDir::new().unwrap();
        let batches = (0..7u64).map(|i| vec![entry(i, &[i as u8])]).collect();
        let page = recording_page(2, batches, vec![entry(7, &[7])]);
        let sink = Arc::new(LocalSink::new(root.path().to_path_buf()));

        let running = AudioCapture::new(page, sink.clone(), 42, settings())
            .start()
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(running.chunk_count(), 7);

        let summary = running.stop().await;
        assert_eq!(summary.chunks_uploaded, 8);

        let report = sink.finalize(42).await.unwrap();
        assert_eq!(report.chunks_merged, 8);
        assert_eq!(report.file_size, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_page_raises_fault() {
        let page = Arc::new(FakePage::new());
        page.on_evaluate(|script| match script {
            COUNT_SOURCES => Ok(json!(1)),
            DRAIN => Err(BotError::Browser("Execution context was destroyed".to_string())),
            s if s.starts_with("window.__meetingBot.start(") => Ok(json!({"attached": 1})),
            _ => Ok(Value::Null),
        });
        let sink = Arc::new(RecordingSink::default());

        let running = AudioCapture::new(page, sink, 42, settings())
            .start()
            .await
            .unwrap();
        let fault = running.fault();

        tokio::time::timeout(Duration::from_secs(30), fault.cancelled())
            .await
            .unwrap();
        assert!(running.fault_reason().unwrap().contains("context was destroyed"));
        running.stop().await;
    }

    #[tokio::test]
    async fn test_upload_gives_up_with_non_fatal_error() {
        let sink = RecordingSink {
            fail_times: HashMap::from([(9, 10)]),
            ..Default::default()
        };
        let chunk = RecordingChunk {
            meeting_id: 1,
            index: 9,
            payload: vec![1],
            produced_at: Utc::now(),
        };
        let timings = CaptureTimings {
            upload_backoff_ms: 1,
            ..Default::default()
        };

        let err = upload_with_retry(&sink, &chunk, &timings).await.unwrap_err();
        assert!(!err.is_fatal());
        assert!(matches!(err, BotError::ChunkUpload { index: 9, attempts: 3, .. }));
    }
}
