use clap::Parser;
use meeting_bot::{
    app,
    cli::{Cli, CliCommand},
    config::WorkerConfig,
};
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if cli.log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Some(CliCommand::Version) => {
            println!("meeting-bot {}", env!("CARGO_PKG_VERSION"));
            return ExitCode::SUCCESS;
        }
        Some(CliCommand::CheckConfig) => {
            return match WorkerConfig::from_args(&cli.worker) {
                Ok(config) => match serde_json::to_string_pretty(&config) {
                    Ok(json) => {
                        println!("{json}");
                        ExitCode::SUCCESS
                    }
                    Err(e) => {
                        error!("Failed to render configuration: {}", e);
                        ExitCode::FAILURE
                    }
                },
                Err(e) => {
                    error!("{}", e);
                    ExitCode::FAILURE
                }
            };
        }
        None => {}
    }

    match app::run_worker(cli.worker).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Worker exited with an error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
