//! In-flight request tracking from DevTools `Network` events.

use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
};
use chromiumoxide::Page;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{BotError, BotResult};

/// Requests the page has started and not yet finished. `generation` moves
/// on every event so a poller notices activity between two samples.
#[derive(Debug, Default)]
pub struct InFlightRequests {
    inner: Mutex<Activity>,
}

#[derive(Debug, Default)]
struct Activity {
    pending: HashSet<String>,
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkSnapshot {
    pub in_flight: usize,
    pub generation: u64,
}

impl InFlightRequests {
    pub fn started(&self, request_id: &str) {
        if let Ok(mut activity) = self.inner.lock() {
            activity.pending.insert(request_id.to_string());
            activity.generation += 1;
        }
    }

    /// Finished or failed; unknown ids still count as activity.
    pub fn settled(&self, request_id: &str) {
        if let Ok(mut activity) = self.inner.lock() {
            activity.pending.remove(request_id);
            activity.generation += 1;
        }
    }

    pub fn snapshot(&self) -> NetworkSnapshot {
        self.inner
            .lock()
            .map(|activity| NetworkSnapshot {
                in_flight: activity.pending.len(),
                generation: activity.generation,
            })
            .unwrap_or(NetworkSnapshot {
                in_flight: 0,
                generation: 0,
            })
    }
}

/// Decides when a page has gone quiet: document loaded, nothing in flight
/// and no request activity for a full window.
#[derive(Debug)]
pub struct IdleWindow {
    window: Duration,
    last: Option<NetworkSnapshot>,
    quiet_since: Option<Instant>,
}

impl IdleWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: None,
            quiet_since: None,
        }
    }

    pub fn observe(&mut self, document_ready: bool, snapshot: NetworkSnapshot, now: Instant) -> bool {
        let quiet = document_ready && snapshot.in_flight == 0;
        let changed = self.last != Some(snapshot);
        self.last = Some(snapshot);

        if !quiet {
            self.quiet_since = None;
            return false;
        }
        if changed || self.quiet_since.is_none() {
            self.quiet_since = Some(now);
        }
        self.quiet_since
            .is_some_and(|since| now.duration_since(since) >= self.window)
    }
}

/// Listener tasks feeding an [`InFlightRequests`]; aborted on drop.
pub struct NetworkTracker {
    requests: Arc<InFlightRequests>,
    tasks: Vec<JoinHandle<()>>,
}

impl NetworkTracker {
    pub async fn attach(page: &Page) -> BotResult<Self> {
        let requests = Arc::new(InFlightRequests::default());

        let mut sent = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(BotError::browser)?;
        let mut finished = page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(BotError::browser)?;
        let mut failed = page
            .event_listener::<EventLoadingFailed>()
            .await
            .map_err(BotError::browser)?;

        let tracked = requests.clone();
        let on_sent = tokio::spawn(async move {
            while let Some(event) = sent.next().await {
                tracked.started(event.request_id.inner());
            }
        });
        let tracked = requests.clone();
        let on_finished = tokio::spawn(async move {
            while let Some(event) = finished.next().await {
                tracked.settled(event.request_id.inner());
            }
        });
        let tracked = requests.clone();
        let on_failed = tokio::spawn(async move {
            while let Some(event) = failed.next().await {
                tracked.settled(event.request_id.inner());
            }
        });

        Ok(Self {
            requests,
            tasks: vec![on_sent, on_finished, on_failed],
        })
    }

    pub fn snapshot(&self) -> NetworkSnapshot {
        self.requests.snapshot()
    }
}

impl Drop for NetworkTracker {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
