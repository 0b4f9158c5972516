use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "meeting-bot")]
#[command(about = "Joins a video meeting and records its audio", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format: "text" or "json"
    #[arg(long, global = true, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    #[command(flatten)]
    pub worker: WorkerArgs,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Print version information
    Version,
    /// Validate the worker parameters and print the resolved configuration
    CheckConfig,
}

/// Raw invocation parameters.
///
/// Everything is optional at this layer so that missing or malformed values
/// surface as a configuration error instead of a usage error.
#[derive(ClapArgs, Debug, Default, Clone)]
pub struct WorkerArgs {
    /// Internal meeting identifier
    #[arg(long, env = "MEETING_ID")]
    pub meeting_id: Option<String>,

    /// Identifier of the user that owns the recording
    #[arg(long, env = "USER_ID")]
    pub user_id: Option<String>,

    /// Meeting platform: google_meet or teams
    #[arg(long, env = "PLATFORM")]
    pub platform: Option<String>,

    /// Meeting URL to join
    #[arg(long, env = "MEETING_URL")]
    pub meeting_url: Option<String>,

    /// Display name shown to other participants
    #[arg(long, env = "BOT_NAME")]
    pub bot_name: Option<String>,

    /// Message broker URL for status and commands
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Chunk sink kind: local or http (inferred from the location when omitted)
    #[arg(long, env = "STORAGE_TYPE")]
    pub storage_type: Option<String>,

    /// Chunk sink location: a directory or an http(s) base URL
    #[arg(long, env = "STORAGE_PATH")]
    pub storage_path: Option<String>,

    /// Length of one recorded chunk in seconds
    #[arg(long, env = "CHUNK_DURATION")]
    pub chunk_duration: Option<String>,

    /// Audio encoder bitrate in bits per second
    #[arg(long, env = "AUDIO_BITRATE")]
    pub audio_bitrate: Option<String>,

    /// Worker instance identifier used as the control-plane channel key
    #[arg(long, env = "CONTAINER_ID")]
    pub container_id: Option<String>,

    #[arg(long, env = "HOSTNAME", hide = true)]
    pub hostname: Option<String>,

    /// Optional namespace prepended to the control-plane channels
    #[arg(long, env = "CHANNEL_PREFIX")]
    pub channel_prefix: Option<String>,

    /// TOML file overriding automation timings
    #[arg(long, env = "BOT_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Directory for diagnostic screenshots
    #[arg(long, env = "SCREENSHOT_DIR")]
    pub screenshot_dir: Option<PathBuf>,

    /// Run the browser without a visible window (true/false)
    #[arg(long, env = "HEADLESS")]
    pub headless: Option<String>,

    /// Path to the Chrome/Chromium executable
    #[arg(long, env = "CHROME_PATH")]
    pub chrome_path: Option<PathBuf>,
}
