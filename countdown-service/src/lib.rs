use std::collections::BTreeSet;
use std::path::Path;

use countdown_shared::TaskId;
use countdown_shared::api::ServiceEvent;
use countdown_shared::domain;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub mod cli;
pub mod config;
pub mod intake;
pub mod notify;
pub mod platform;
pub mod service;
pub mod signal;

pub use cli::{Cli, Command};
pub use config::{ServiceConfig, load_config, resolve_config_path};
pub use service::{CountdownNotifier, CountdownState, StartError};
pub use signal::{CompletionSignal, CompletionWatcher};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("notification error: {0}")]
    Notify(String),
    #[error("template error: {0}")]
    Template(String),
}

fn init_tracing(
    log_file: Option<&Path>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries service events; logs go to stderr
    let console = fmt::layer()
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr);
    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "countdown-service.log".into());
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name));
            let layer = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file_layer)
        .try_init();
    guard
}

fn emit(event: &ServiceEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!(error=%e, "failed to encode service event"),
    }
}

pub async fn run(cli: Cli) -> Result<(), AppError> {
    let (cfg_path, cfg) = ServiceConfig::find_and_load(cli.config)?;
    let _log_guard = init_tracing(cfg.log_file.as_deref());
    info!(path=?cfg_path, "loaded config");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Slot { id } => {
            let task_id = TaskId::parse(&id)
                .map_err(|e| AppError::Config(format!("invalid task id: {e}")))?;
            let now = chrono::Utc::now().timestamp_millis();
            println!(
                "progress={} completion={}",
                domain::resolve_progress_slot(&task_id, now),
                domain::completion_slot(&task_id)
            );
            Ok(())
        }
        Command::Start { ids } => {
            let plat = platform::detect(&cfg, cli.log_only).await?;
            let notifier = CountdownNotifier::new(plat, &cfg).await?;
            start_and_wait(&notifier, ids).await;
            Ok(())
        }
        Command::Serve => {
            let plat = platform::detect(&cfg, cli.log_only).await?;
            let notifier = CountdownNotifier::new(plat, &cfg).await?;
            serve(&notifier).await
        }
    }
}

async fn start_and_wait(notifier: &CountdownNotifier, ids: Vec<String>) {
    let mut started = BTreeSet::new();
    for raw in ids {
        let task_id = match TaskId::parse(&raw) {
            Ok(id) => id,
            Err(e) => {
                warn!(error=%e, raw=%raw, "skipping invalid task id");
                continue;
            }
        };
        match notifier.start(task_id.clone()).await {
            Ok(()) => {
                emit(&ServiceEvent::Started {
                    task_id: task_id.clone(),
                });
                started.insert(task_id);
            }
            Err(e) => emit(&ServiceEvent::Rejected {
                task_id,
                reason: e.to_string(),
            }),
        }
    }

    tokio::select! {
        _ = shutdown_signal() => {
            info!("shutdown signal received; aborting active countdowns");
        }
        _ = notifier.wait_idle() => {}
    }
    notifier.shutdown().await;

    for task_id in started {
        if notifier.state(&task_id).await == CountdownState::Completed {
            emit(&ServiceEvent::Completed { task_id });
        }
    }
}

async fn serve(notifier: &CountdownNotifier) -> Result<(), AppError> {
    let mut watcher = notifier.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(task_id) = watcher.next().await {
            emit(&ServiceEvent::Completed { task_id });
        }
    });

    let cancel = CancellationToken::new();
    let on_signal = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            cancel.cancel();
        })
    };

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let accepted = match intake::serve_lines(stdin, notifier, cancel.child_token()).await {
        Ok(n) => n,
        Err(e) => {
            notifier.shutdown().await;
            on_signal.abort();
            return Err(e);
        }
    };
    info!(accepted, "start request intake finished");

    tokio::select! {
        _ = cancel.cancelled() => {
            info!("shutdown signal received; aborting active countdowns");
        }
        _ = notifier.wait_idle() => {
            info!("all countdowns finished");
        }
    }
    notifier.shutdown().await;
    on_signal.abort();
    let _ = printer.await;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let (Ok(mut sigint), Ok(mut sigterm)) = (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) else {
            warn!("shutdown: failed to install signal handlers");
            return std::future::pending().await;
        };
        tokio::select! {
            _ = sigint.recv() => {
                info!("shutdown: received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("shutdown: received SIGTERM");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown: received Ctrl+C");
    }
}
