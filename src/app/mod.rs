use crate::browser::{BrowserSettings, ChromeLauncher};
use crate::cli::WorkerArgs;
use crate::config::WorkerConfig;
use crate::control::{Command, ControlPlane};
use crate::error::BotResult;
use crate::sink;
use crate::worker::{Worker, WorkerDeps, WorkerReport};
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Run one worker for the meeting described by `args`.
///
/// Returns `Ok` when the meeting was recorded or the process was asked to
/// shut down; any other failure has already been published as `failed`.
pub async fn run_worker(args: WorkerArgs) -> Result<()> {
    let config = WorkerConfig::from_args(&args).context("invalid worker configuration")?;
    info!(
        "Meeting {} ({}) for user {} as \"{}\"",
        config.meeting_id, config.platform, config.user_id, config.bot_name
    );

    let control = Arc::new(
        ControlPlane::connect(
            &config.redis_url,
            &config.session(),
            config.channel_prefix.as_deref(),
        )
        .await
        .context("failed to reach the control plane")?,
    );

    let sink = sink::from_target(&config.storage);
    info!("Chunks go to the {} sink", sink.name());

    let deps = WorkerDeps {
        control: control.clone(),
        sink,
        launcher: Box::new(ChromeLauncher::new(BrowserSettings::from_config(&config))),
    };
    let grace = config.timings.worker.signal_grace();
    let worker = Worker::new(config, deps, CancellationToken::new());
    let stop = worker.stop_handle();
    let status = worker.status();

    let listener_stop = stop.clone();
    let subscribed = control
        .subscribe_commands(move |command| match command {
            Command::Stop => {
                let stop = listener_stop.clone();
                tokio::spawn(async move { stop.request("leave command").await });
            }
            Command::Other(action) => warn!("Ignoring unsupported command: {}", action),
        })
        .await;
    if let Err(e) = subscribed {
        status.fail(e.to_string()).await;
        control.disconnect().await;
        return Err(e).context("failed to subscribe to worker commands");
    }

    let mut run = tokio::spawn(worker.run());

    tokio::select! {
        joined = &mut run => return finish(joined),
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping the worker");
        }
    }

    stop.request("signal").await;
    tokio::select! {
        joined = &mut run => {
            if let Err(e) = finish(joined) {
                warn!("Worker ended with an error during shutdown: {:#}", e);
            }
            return Ok(());
        }
        _ = tokio::time::sleep(grace) => {
            warn!("Worker did not finish within {}s of the signal", grace.as_secs());
        }
        _ = shutdown_signal() => {
            warn!("Second shutdown signal, exiting immediately");
        }
    }

    run.abort();
    status.fail("interrupted by shutdown signal".to_string()).await;
    control.disconnect().await;
    Ok(())
}

fn finish(joined: Result<BotResult<WorkerReport>, JoinError>) -> Result<()> {
    match joined {
        Ok(Ok(report)) => {
            match &report.finalize {
                Some(finalized) => info!(
                    "Recording complete: {} chunks in {}",
                    report.chunk_count, finalized.filename
                ),
                None => info!("Worker finished with {} chunks", report.chunk_count),
            }
            Ok(())
        }
        Ok(Err(e)) => Err(e.into()),
        Err(e) => {
            error!("Worker task ended abnormally: {}", e);
            Err(anyhow!("worker task ended abnormally: {e}"))
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = term.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
                return;
            }
            Err(e) => warn!("Cannot listen for SIGTERM: {}", e),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
