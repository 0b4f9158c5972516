use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use meeting_bot::browser::{BrowserSession, PageDriver, Selector, SessionLauncher};
use meeting_bot::cli::WorkerArgs;
use meeting_bot::config::WorkerConfig;
use meeting_bot::control::{ControlPlane, ControlTransport, LifecycleStatus, StatusUpdate};
use meeting_bot::platform::selectors::GOOGLE_MEET;
use meeting_bot::sink::{ChunkSink, FinalizeReport};
use meeting_bot::worker::{Worker, WorkerDeps};
use meeting_bot::{BotError, BotResult};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Page whose elements are either present or not, with a recorder that
/// yields one segment per drain until `fail_after` drains.
struct ScriptedPage {
    visible: Vec<Selector>,
    drains: AtomicUsize,
    fail_after: Option<usize>,
}

impl ScriptedPage {
    fn admitted() -> Self {
        Self {
            visible: vec![
                GOOGLE_MEET.name_input[0],
                GOOGLE_MEET.join[0],
                GOOGLE_MEET.admission.in_meeting[0],
                GOOGLE_MEET.leave[0],
            ],
            drains: AtomicUsize::new(0),
            fail_after: None,
        }
    }
}

#[async_trait]
impl PageDriver for ScriptedPage {
    async fn navigate(&self, _url: &str, _timeout: Duration) -> BotResult<()> {
        Ok(())
    }

    async fn screenshot(&self, _path: &Path) -> BotResult<()> {
        Ok(())
    }

    async fn is_visible(&self, selector: &Selector) -> BotResult<bool> {
        Ok(self.visible.contains(selector))
    }

    async fn attribute(&self, _selector: &Selector, _name: &str) -> BotResult<Option<String>> {
        Ok(None)
    }

    async fn click(&self, selector: &Selector) -> BotResult<()> {
        if self.visible.contains(selector) {
            Ok(())
        } else {
            Err(BotError::Browser(format!("no element for {selector}")))
        }
    }

    async fn fill(&self, _selector: &Selector, _value: &str) -> BotResult<()> {
        Ok(())
    }

    async fn click_by_text(&self, _labels: &[&str]) -> BotResult<Option<String>> {
        Ok(None)
    }

    async fn evaluate(&self, script: &str) -> BotResult<Value> {
        match script {
            "window.__meetingBot.countSources()" => Ok(json!(1)),
            "window.__meetingBot.drain()" => {
                let n = self.drains.fetch_add(1, Ordering::SeqCst);
                if self.fail_after.is_some_and(|limit| n >= limit) {
                    return Err(BotError::Browser("Target closed".to_string()));
                }
                Ok(json!([{"seq": n, "data": BASE64.encode(format!("chunk-{n}")), "error": null}]))
            }
            s if s.starts_with("window.__meetingBot.start(") => Ok(json!({"attached": 1})),
            _ => Ok(Value::Null),
        }
    }
}

struct Session {
    page: Arc<ScriptedPage>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl BrowserSession for Session {
    fn page(&self) -> Arc<dyn PageDriver> {
        self.page.clone()
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

struct Launcher {
    page: Arc<ScriptedPage>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl SessionLauncher for Launcher {
    async fn launch(&self) -> BotResult<Box<dyn BrowserSession>> {
        Ok(Box::new(Session {
            page: self.page.clone(),
            closes: self.closes.clone(),
        }))
    }
}

#[derive(Default)]
struct Broker {
    published: Mutex<Vec<StatusUpdate>>,
    subscribers: Mutex<HashMap<String, mpsc::Sender<String>>>,
}

impl Broker {
    fn statuses(&self) -> Vec<LifecycleStatus> {
        self.published.lock().unwrap().iter().map(|u| u.status).collect()
    }

    fn last(&self) -> StatusUpdate {
        self.published.lock().unwrap().last().cloned().unwrap()
    }

    async fn send(&self, channel: &str, payload: &str) {
        let sender = self.subscribers.lock().unwrap().get(channel).cloned().unwrap();
        sender.send(payload.to_string()).await.unwrap();
    }
}

#[async_trait]
impl ControlTransport for Broker {
    async fn publish(&self, _channel: &str, payload: String) -> BotResult<()> {
        let update = serde_json::from_str(&payload).unwrap();
        self.published.lock().unwrap().push(update);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> BotResult<mpsc::Receiver<String>> {
        let (tx, rx) = mpsc::channel(4);
        self.subscribers.lock().unwrap().insert(channel.to_string(), tx);
        Ok(rx)
    }

    async fn close(&self) {}
}

#[derive(Debug, Clone, PartialEq)]
enum SinkEvent {
    Upload(u64),
    Finalize,
}

#[derive(Default)]
struct EventSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl EventSink {
    fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChunkSink for EventSink {
    fn name(&self) -> &'static str {
        "events"
    }

    async fn upload_chunk(&self, _meeting_id: i64, index: u64, _payload: Vec<u8>) -> BotResult<()> {
        self.events.lock().unwrap().push(SinkEvent::Upload(index));
        Ok(())
    }

    async fn finalize(&self, meeting_id: i64) -> BotResult<FinalizeReport> {
        let mut events = self.events.lock().unwrap();
        let merged = events.len() as u64;
        events.push(SinkEvent::Finalize);
        Ok(FinalizeReport {
            filename: format!("meeting_{meeting_id}.webm"),
            chunks_merged: merged,
            file_size: merged * 7,
        })
    }
}

struct Fixture {
    worker: Worker,
    control: Arc<ControlPlane>,
    broker: Arc<Broker>,
    sink: Arc<EventSink>,
    closes: Arc<AtomicUsize>,
}

fn fixture(page: ScriptedPage) -> Fixture {
    let args = WorkerArgs {
        meeting_id: Some("42".to_string()),
        user_id: Some("7".to_string()),
        platform: Some("google_meet".to_string()),
        meeting_url: Some("https://meet.google.com/abc-defg-hij".to_string()),
        bot_name: Some("Recorder".to_string()),
        container_id: Some("bot-it".to_string()),
        screenshot_dir: Some(std::env::temp_dir().join("meeting-bot-it")),
        ..Default::default()
    };
    let config = WorkerConfig::from_args(&args).unwrap();

    let broker = Arc::new(Broker::default());
    let control = Arc::new(ControlPlane::new(broker.clone(), &config.session(), None));
    let sink = Arc::new(EventSink::default());
    let closes = Arc::new(AtomicUsize::new(0));
    let worker = Worker::new(
        config,
        WorkerDeps {
            control: control.clone(),
            sink: sink.clone(),
            launcher: Box::new(Launcher {
                page: Arc::new(page),
                closes: closes.clone(),
            }),
        },
        CancellationToken::new(),
    );

    Fixture {
        worker,
        control,
        broker,
        sink,
        closes,
    }
}

#[tokio::test(start_paused = true)]
async fn stop_command_finalizes_after_the_last_upload() {
    let fx = fixture(ScriptedPage::admitted());
    let stop = fx.worker.stop_handle();
    fx.control
        .subscribe_commands(move |_| {
            let stop = stop.clone();
            tokio::spawn(async move { stop.request("command").await });
        })
        .await
        .unwrap();

    let run = tokio::spawn(fx.worker.run());
    tokio::time::sleep(Duration::from_secs(90)).await;
    fx.broker.send("command:bot-it", r#"{"command":"stop"}"#).await;
    let report = run.await.unwrap().unwrap();

    let events = fx.sink.events();
    assert_eq!(events.last(), Some(&SinkEvent::Finalize));
    let uploads: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            SinkEvent::Upload(i) => Some(*i),
            SinkEvent::Finalize => None,
        })
        .collect();
    assert_eq!(uploads, (0..report.chunk_count).collect::<Vec<_>>());
    assert_eq!(report.finalize.unwrap().chunks_merged, report.chunk_count);
    assert_eq!(report.capture.unwrap().sources, 1);

    let statuses = fx.broker.statuses();
    assert_eq!(
        &statuses[..3],
        &[
            LifecycleStatus::Joining,
            LifecycleStatus::Active,
            LifecycleStatus::Recording
        ]
    );
    assert_eq!(statuses.iter().filter(|s| s.is_terminal()).count(), 1);
    let last = fx.broker.last();
    assert_eq!(last.status, LifecycleStatus::Completed);
    assert_eq!(last.chunk_count, Some(report.chunk_count));
    assert_eq!(fx.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn rejected_admission_publishes_failed_once() {
    let page = ScriptedPage {
        visible: vec![
            GOOGLE_MEET.join[0],
            GOOGLE_MEET.admission.rejection[0],
        ],
        drains: AtomicUsize::new(0),
        fail_after: None,
    };
    let fx = fixture(page);

    let err = fx.worker.run().await.unwrap_err();

    assert!(matches!(err, BotError::AdmissionRejected));
    assert_eq!(
        fx.broker.statuses(),
        vec![LifecycleStatus::Joining, LifecycleStatus::Failed]
    );
    assert_eq!(
        fx.broker.last().error_message.as_deref(),
        Some("admission was rejected by the meeting")
    );
    assert!(fx.sink.events().is_empty());
    assert_eq!(fx.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_before_admission_completes_without_recording() {
    let fx = fixture(ScriptedPage::admitted());
    fx.worker.stop_handle().request("test").await;

    let report = fx.worker.run().await.unwrap();

    assert_eq!(report.chunk_count, 0);
    assert!(report.finalize.is_none());
    assert_eq!(
        fx.broker.statuses(),
        vec![LifecycleStatus::Joining, LifecycleStatus::Completed]
    );
    assert!(fx.sink.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn lost_page_fails_after_finalizing_what_was_uploaded() {
    let mut page = ScriptedPage::admitted();
    page.fail_after = Some(4);
    let fx = fixture(page);

    let err = fx.worker.run().await.unwrap_err();

    assert!(matches!(err, BotError::CaptureLost(_)));
    assert_eq!(
        fx.sink.events(),
        vec![
            SinkEvent::Upload(0),
            SinkEvent::Upload(1),
            SinkEvent::Upload(2),
            SinkEvent::Upload(3),
            SinkEvent::Finalize
        ]
    );
    let statuses = fx.broker.statuses();
    assert!(statuses.contains(&LifecycleStatus::Finalizing));
    assert_eq!(*statuses.last().unwrap(), LifecycleStatus::Failed);
    assert_eq!(statuses.iter().filter(|s| s.is_terminal()).count(), 1);
    assert_eq!(fx.closes.load(Ordering::SeqCst), 1);
}
