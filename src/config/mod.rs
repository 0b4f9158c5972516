//! Worker configuration.
//!
//! Invocation parameters arrive as flat strings (environment or flags) and are
//! validated into an immutable [`WorkerConfig`]. Automation timings come from
//! an optional TOML file where every field has a default.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::cli::WorkerArgs;
use crate::error::{BotError, BotResult};

const DEFAULT_BOT_NAME: &str = "Meeting Recorder";
const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
const DEFAULT_STORAGE_PATH: &str = "./storage/recordings";
const DEFAULT_CHUNK_SECONDS: u64 = 10;
const DEFAULT_AUDIO_BITRATE: u32 = 128_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    GoogleMeet,
    Teams,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GoogleMeet => "google_meet",
            Self::Teams => "teams",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google_meet" | "google-meet" | "googlemeet" => Ok(Self::GoogleMeet),
            "teams" | "microsoft_teams" => Ok(Self::Teams),
            other => Err(BotError::Config(format!("unsupported platform: {other}"))),
        }
    }
}

/// Where recorded chunks are persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "location", rename_all = "lowercase")]
pub enum StorageTarget {
    Local(PathBuf),
    Http(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinTimings {
    /// Fixed wait after navigation for client-side rendering
    pub settle_secs: u64,
    pub name_input_timeout_secs: u64,
    /// Bounded wait per join-button candidate
    pub join_click_timeout_secs: u64,
    pub navigation_timeout_secs: u64,
}

impl Default for JoinTimings {
    fn default() -> Self {
        Self {
            settle_secs: 5,
            name_input_timeout_secs: 120,
            join_click_timeout_secs: 5,
            navigation_timeout_secs: 60,
        }
    }
}

impl JoinTimings {
    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn name_input_timeout(&self) -> Duration {
        Duration::from_secs(self.name_input_timeout_secs)
    }

    pub fn join_click_timeout(&self) -> Duration {
        Duration::from_secs(self.join_click_timeout_secs)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionTimings {
    pub poll_interval_secs: u64,
    /// Budget for the "getting ready" loading screen; expiry is not fatal
    pub settle_budget_secs: u64,
    /// Overall deadline shared by direct polling and the waiting room
    pub timeout_secs: u64,
}

impl Default for AdmissionTimings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            settle_budget_secs: 60,
            timeout_secs: 120,
        }
    }
}

impl AdmissionTimings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn settle_budget(&self) -> Duration {
        Duration::from_secs(self.settle_budget_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureTimings {
    pub discovery_retries: u32,
    pub discovery_delay_ms: u64,
    pub drain_interval_ms: u64,
    pub stop_timeout_secs: u64,
    pub upload_attempts: u32,
    pub upload_backoff_ms: u64,
}

impl Default for CaptureTimings {
    fn default() -> Self {
        Self {
            discovery_retries: 10,
            discovery_delay_ms: 1000,
            drain_interval_ms: 1000,
            stop_timeout_secs: 15,
            upload_attempts: 3,
            upload_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerTimings {
    pub heartbeat_secs: u64,
    pub stop_poll_ms: u64,
    pub finalize_timeout_secs: u64,
    pub signal_grace_secs: u64,
}

impl Default for WorkerTimings {
    fn default() -> Self {
        Self {
            heartbeat_secs: 30,
            stop_poll_ms: 1000,
            finalize_timeout_secs: 120,
            signal_grace_secs: 30,
        }
    }
}

impl WorkerTimings {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }

    pub fn stop_poll(&self) -> Duration {
        Duration::from_millis(self.stop_poll_ms.max(10))
    }

    pub fn finalize_timeout(&self) -> Duration {
        Duration::from_secs(self.finalize_timeout_secs)
    }

    pub fn signal_grace(&self) -> Duration {
        Duration::from_secs(self.signal_grace_secs)
    }
}

/// Automation timings, optionally overridden from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub join: JoinTimings,
    pub admission: AdmissionTimings,
    pub capture: CaptureTimings,
    pub worker: WorkerTimings,
}

impl Timings {
    pub fn load(path: &Path) -> BotResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BotError::Config(format!("failed to read settings file {}: {e}", path.display()))
        })?;
        let timings: Self = toml::from_str(&content).map_err(|e| {
            BotError::Config(format!("failed to parse settings file {}: {e}", path.display()))
        })?;
        info!("Loaded automation timings from {:?}", path);
        Ok(timings)
    }
}

/// Identity of one worker instance; fixed for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BotSession {
    pub platform: Platform,
    pub native_meeting_id: String,
    pub bot_name: String,
    pub container_id: String,
    pub meeting_id: i64,
    pub user_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerConfig {
    pub meeting_id: i64,
    pub user_id: i64,
    pub platform: Platform,
    pub meeting_url: String,
    pub bot_name: String,
    pub redis_url: String,
    pub storage: StorageTarget,
    pub chunk_duration: Duration,
    pub audio_bitrate: u32,
    pub container_id: String,
    pub channel_prefix: Option<String>,
    pub screenshot_dir: PathBuf,
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    pub timings: Timings,
}

impl WorkerConfig {
    /// Validate raw invocation parameters.
    pub fn from_args(args: &WorkerArgs) -> BotResult<Self> {
        let meeting_id = parse_id(args.meeting_id.as_deref());
        let user_id = parse_id(args.user_id.as_deref());
        let meeting_url = non_empty(args.meeting_url.as_deref());

        let (meeting_id, user_id, meeting_url) = match (meeting_id, user_id, meeting_url) {
            (Some(m), Some(u), Some(url)) => (m, u, url),
            _ => {
                return Err(BotError::Config(
                    "missing required parameters: MEETING_ID, USER_ID, MEETING_URL".to_string(),
                ))
            }
        };

        let url = Url::parse(&meeting_url)
            .map_err(|e| BotError::Config(format!("invalid meeting URL {meeting_url}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(BotError::Config(format!(
                "meeting URL must be http(s): {meeting_url}"
            )));
        }

        let platform = match non_empty(args.platform.as_deref()) {
            Some(p) => p.parse()?,
            None => Platform::GoogleMeet,
        };

        let chunk_seconds = parse_positive::<u64>(
            "CHUNK_DURATION",
            args.chunk_duration.as_deref(),
            DEFAULT_CHUNK_SECONDS,
        )?;
        let audio_bitrate = parse_positive::<u32>(
            "AUDIO_BITRATE",
            args.audio_bitrate.as_deref(),
            DEFAULT_AUDIO_BITRATE,
        )?;

        let storage = resolve_storage(args.storage_type.as_deref(), args.storage_path.as_deref())?;

        let screenshot_dir = match (&args.screenshot_dir, &storage) {
            (Some(dir), _) => dir.clone(),
            (None, StorageTarget::Local(root)) => root.join("screenshots"),
            (None, StorageTarget::Http(_)) => PathBuf::from("./screenshots"),
        };

        let headless = match non_empty(args.headless.as_deref()) {
            Some(v) => parse_bool("HEADLESS", &v)?,
            None => true,
        };

        let timings = match &args.settings {
            Some(path) => Timings::load(path)?,
            None => Timings::default(),
        };

        Ok(Self {
            meeting_id,
            user_id,
            platform,
            meeting_url,
            bot_name: non_empty(args.bot_name.as_deref())
                .unwrap_or_else(|| DEFAULT_BOT_NAME.to_string()),
            redis_url: non_empty(args.redis_url.as_deref())
                .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            storage,
            chunk_duration: Duration::from_secs(chunk_seconds),
            audio_bitrate,
            container_id: resolve_container_id(
                args.container_id.as_deref(),
                args.hostname.as_deref(),
            ),
            channel_prefix: non_empty(args.channel_prefix.as_deref()),
            screenshot_dir,
            headless,
            chrome_path: args.chrome_path.clone(),
            timings,
        })
    }

    pub fn session(&self) -> BotSession {
        BotSession {
            platform: self.platform,
            native_meeting_id: native_meeting_id(self.platform, &self.meeting_url),
            bot_name: self.bot_name.clone(),
            container_id: self.container_id.clone(),
            meeting_id: self.meeting_id,
            user_id: self.user_id,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Identifiers are positive integers; zero or garbage counts as absent.
fn parse_id(value: Option<&str>) -> Option<i64> {
    non_empty(value)
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|id| *id > 0)
}

fn parse_positive<T>(name: &str, value: Option<&str>, default: T) -> BotResult<T>
where
    T: FromStr + PartialOrd + Default,
{
    let Some(raw) = non_empty(value) else {
        return Ok(default);
    };
    match raw.parse::<T>() {
        Ok(v) if v > T::default() => Ok(v),
        _ => Err(BotError::Config(format!(
            "{name} must be a positive integer, got {raw:?}"
        ))),
    }
}

fn parse_bool(name: &str, value: &str) -> BotResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(BotError::Config(format!(
            "{name} must be true or false, got {value:?}"
        ))),
    }
}

fn resolve_storage(kind: Option<&str>, location: Option<&str>) -> BotResult<StorageTarget> {
    let location = non_empty(location).unwrap_or_else(|| DEFAULT_STORAGE_PATH.to_string());
    let looks_remote = location.starts_with("http://") || location.starts_with("https://");

    match non_empty(kind).map(|k| k.to_ascii_lowercase()).as_deref() {
        None if looks_remote => Ok(StorageTarget::Http(location)),
        None | Some("local") => Ok(StorageTarget::Local(PathBuf::from(location))),
        Some("http") if looks_remote => Ok(StorageTarget::Http(location)),
        Some("http") => Err(BotError::Config(format!(
            "STORAGE_TYPE=http needs an http(s) STORAGE_PATH, got {location}"
        ))),
        Some(other) => Err(BotError::Config(format!(
            "unsupported STORAGE_TYPE: {other}"
        ))),
    }
}

fn resolve_container_id(explicit: Option<&str>, hostname: Option<&str>) -> String {
    non_empty(explicit)
        .or_else(|| non_empty(hostname))
        .unwrap_or_else(|| format!("bot-{}", chrono::Utc::now().timestamp_millis()))
}

/// The platform's own identifier for the meeting, taken from its URL.
pub fn native_meeting_id(platform: Platform, meeting_url: &str) -> String {
    let Ok(url) = Url::parse(meeting_url) else {
        return meeting_url.to_string();
    };

    let segments: Vec<String> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).map(str::to_string).collect())
        .unwrap_or_default();

    let picked = match platform {
        Platform::GoogleMeet => segments.last().cloned(),
        // https://teams.microsoft.com/l/meetup-join/<thread>/<context>
        Platform::Teams => segments
            .iter()
            .position(|seg| seg == "meetup-join")
            .and_then(|i| segments.get(i + 1).cloned())
            .or_else(|| segments.last().cloned()),
    };

    match picked {
        Some(id) => urlencoding::decode(&id).map(Cow::into_owned).unwrap_or(id),
        None => meeting_url.to_string(),
    }
}
