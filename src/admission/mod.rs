//! Admission state machine.
//!
//! After the join click the bot is either let straight in, parked in a
//! waiting room, or turned away. The transition function is pure; the
//! driver loop feeds it page observations at a fixed poll interval.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::browser::{self, PageDriver, Selector};
use crate::config::AdmissionTimings;
use crate::error::{BotError, BotResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionState {
    NotJoined,
    AwaitingPageSettle,
    PollingDirectAdmission,
    WaitingRoom,
    Admitted,
    Rejected,
    TimedOut,
}

impl AdmissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotJoined => "not_joined",
            Self::AwaitingPageSettle => "awaiting_page_settle",
            Self::PollingDirectAdmission => "polling_direct_admission",
            Self::WaitingRoom => "waiting_room",
            Self::Admitted => "admitted",
            Self::Rejected => "rejected",
            Self::TimedOut => "timed_out",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Admitted | Self::Rejected | Self::TimedOut)
    }
}

impl fmt::Display for AdmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the page showed on one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Observation {
    pub loading: bool,
    pub rejected: bool,
    pub in_meeting: bool,
    pub waiting_room: bool,
}

/// Budgets as seen on one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Clock {
    pub settle_expired: bool,
    pub deadline_passed: bool,
}

pub fn next_state(state: AdmissionState, seen: Observation, clock: Clock) -> AdmissionState {
    use AdmissionState::*;

    match state {
        NotJoined => AwaitingPageSettle,
        AwaitingPageSettle => {
            if seen.loading && !clock.settle_expired {
                AwaitingPageSettle
            } else if seen.waiting_room {
                WaitingRoom
            } else {
                PollingDirectAdmission
            }
        }
        PollingDirectAdmission => {
            if seen.rejected {
                Rejected
            } else if seen.in_meeting && !seen.waiting_room {
                Admitted
            } else if seen.waiting_room {
                WaitingRoom
            } else if clock.deadline_passed {
                TimedOut
            } else {
                PollingDirectAdmission
            }
        }
        WaitingRoom => {
            if seen.rejected {
                Rejected
            } else if !seen.waiting_room && seen.in_meeting {
                Admitted
            } else if clock.deadline_passed {
                TimedOut
            } else {
                WaitingRoom
            }
        }
        terminal => terminal,
    }
}

/// Platform selector lists the machine observes.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionIndicators {
    /// "Getting ready" style screens shown right after the join click
    pub loading: &'static [Selector],
    pub waiting_room: &'static [Selector],
    pub rejection: &'static [Selector],
    /// Meeting controls; only count when not `aria-disabled`
    pub in_meeting: &'static [Selector],
}

impl AdmissionIndicators {
    pub async fn in_meeting(&self, page: &dyn PageDriver) -> bool {
        for selector in self.in_meeting {
            if browser::visible_and_enabled(page, selector).await {
                debug!("In-meeting indicator visible: {}", selector);
                return true;
            }
        }
        false
    }

    async fn observe(&self, page: &dyn PageDriver, state: AdmissionState) -> Observation {
        match state {
            AdmissionState::AwaitingPageSettle => Observation {
                loading: browser::any_visible(page, self.loading).await,
                waiting_room: browser::any_visible(page, self.waiting_room).await,
                ..Default::default()
            },
            AdmissionState::PollingDirectAdmission | AdmissionState::WaitingRoom => {
                let rejected = match browser::first_visible(page, self.rejection).await {
                    Some(selector) => {
                        warn!("Rejection indicator visible: {}", selector);
                        true
                    }
                    None => false,
                };
                if rejected {
                    return Observation {
                        rejected,
                        ..Default::default()
                    };
                }
                Observation {
                    waiting_room: browser::any_visible(page, self.waiting_room).await,
                    in_meeting: self.in_meeting(page).await,
                    ..Default::default()
                }
            }
            _ => Observation::default(),
        }
    }
}

/// How an admission attempt ended.
#[derive(Debug, Clone)]
pub struct AdmissionOutcome {
    pub state: AdmissionState,
    /// State the machine was in when it reached `state`
    pub last_phase: AdmissionState,
    pub elapsed: Duration,
    pub transitions: Vec<(AdmissionState, AdmissionState)>,
    timeout: Duration,
}

impl AdmissionOutcome {
    pub fn into_result(self) -> BotResult<Duration> {
        match self.state {
            AdmissionState::Admitted => Ok(self.elapsed),
            AdmissionState::Rejected => Err(BotError::AdmissionRejected),
            _ => Err(BotError::AdmissionTimedOut {
                phase: self.last_phase,
                after: self.timeout,
            }),
        }
    }
}

pub struct AdmissionMachine<'a> {
    page: &'a dyn PageDriver,
    indicators: &'a AdmissionIndicators,
    timings: AdmissionTimings,
    screenshot_dir: Option<PathBuf>,
}

impl<'a> AdmissionMachine<'a> {
    pub fn new(
        page: &'a dyn PageDriver,
        indicators: &'a AdmissionIndicators,
        timings: AdmissionTimings,
    ) -> Self {
        Self {
            page,
            indicators,
            timings,
            screenshot_dir: None,
        }
    }

    pub fn with_screenshots(mut self, dir: PathBuf) -> Self {
        self.screenshot_dir = Some(dir);
        self
    }

    /// Drive the machine until it reaches a terminal state.
    pub async fn run(&self) -> AdmissionOutcome {
        let poll = self.timings.poll_interval();
        let started = Instant::now();
        let mut settle_started = started;
        let mut deadline: Option<Instant> = None;
        let mut state = AdmissionState::NotJoined;
        let mut transitions = Vec::new();

        info!(
            "Waiting for admission (timeout {}s)",
            self.timings.timeout().as_secs()
        );

        loop {
            let seen = self.indicators.observe(self.page, state).await;
            let now = Instant::now();
            let clock = Clock {
                settle_expired: now.duration_since(settle_started) >= self.timings.settle_budget(),
                deadline_passed: deadline.is_some_and(|d| now >= d),
            };

            let next = next_state(state, seen, clock);
            if next == state {
                debug!(
                    "Admission still {} after {}s",
                    state,
                    now.duration_since(started).as_secs()
                );
                sleep(poll).await;
                continue;
            }

            info!("Admission: {} -> {}", state, next);
            transitions.push((state, next));

            match (state, next) {
                (AdmissionState::NotJoined, _) => settle_started = now,
                (AdmissionState::AwaitingPageSettle, _) => {
                    if seen.loading {
                        warn!("Loading screen still visible after settle budget, continuing");
                    }
                    deadline = Some(now + self.timings.timeout());
                }
                _ => {}
            }

            if next == AdmissionState::WaitingRoom {
                self.checkpoint("04-waiting-room").await;
            }

            let previous = state;
            state = next;

            if state.is_terminal() {
                let elapsed = now.duration_since(started);
                match state {
                    AdmissionState::Admitted => {
                        info!("Admitted after {}s", elapsed.as_secs());
                        self.checkpoint("05-admitted").await;
                    }
                    AdmissionState::Rejected => warn!("Admission rejected after {}s", elapsed.as_secs()),
                    _ => warn!("Admission timed out in {}", previous),
                }
                return AdmissionOutcome {
                    state,
                    last_phase: previous,
                    elapsed,
                    transitions,
                    timeout: self.timings.timeout(),
                };
            }

            // Leaving the setup states re-observes immediately.
            if matches!(
                previous,
                AdmissionState::NotJoined | AdmissionState::AwaitingPageSettle
            ) {
                continue;
            }
            sleep(poll).await;
        }
    }

    async fn checkpoint(&self, name: &str) {
        if let Some(dir) = &self.screenshot_dir {
            browser::checkpoint(self.page, dir, name).await;
        }
    }
}
