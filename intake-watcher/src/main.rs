//! Folder watcher binary: wires the intake pipeline to a real
//! directory, a destination, and process signals.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use intake_core::{DestinationMover, Dispatcher, EventSource, IntakeConfig, Normalizer};

/// Watch a folder for new files, wait for them to settle, and move
/// them to a processed directory.
#[derive(Debug, Parser)]
#[command(name = "intake-watcher", version, about)]
struct Args {
    /// TOML config file; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory to watch.
    #[arg(short, long)]
    path: Option<PathBuf>,

    /// Directory to move settled files into.
    #[arg(short, long)]
    dest: Option<PathBuf>,

    /// Milliseconds between file-size checks while settling.
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Size checks before giving up on an unstable file.
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Consecutive equal size readings required to call a file stable.
    #[arg(long)]
    stability_threshold: Option<u32>,

    /// Candidates settling concurrently.
    #[arg(long)]
    max_in_flight: Option<usize>,
}

/// Config file first, CLI flags on top.
fn resolve_config(args: &Args) -> anyhow::Result<IntakeConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str::<IntakeConfig>(&raw)
                .with_context(|| format!("failed to parse config file {}", path.display()))?
        }
        None => {
            let watch_dir = args
                .path
                .clone()
                .context("--path is required when no config file is given")?;
            let dest_dir = args
                .dest
                .clone()
                .context("--dest is required when no config file is given")?;
            IntakeConfig::new(watch_dir, dest_dir)
        }
    };

    if let Some(path) = &args.path {
        config.watch_dir = path.clone();
    }
    if let Some(dest) = &args.dest {
        config.dest_dir = dest.clone();
    }
    if let Some(poll) = args.poll_interval_ms {
        config.poll_interval_ms = poll;
    }
    if let Some(attempts) = args.max_attempts {
        config.max_settle_attempts = attempts;
    }
    if let Some(threshold) = args.stability_threshold {
        config.stability_threshold = threshold;
    }
    if let Some(workers) = args.max_in_flight {
        config.max_in_flight = workers;
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = resolve_config(&args)?;
    config.watch_dir = std::path::absolute(&config.watch_dir)
        .with_context(|| format!("cannot resolve {}", config.watch_dir.display()))?;
    config.dest_dir = std::path::absolute(&config.dest_dir)
        .with_context(|| format!("cannot resolve {}", config.dest_dir.display()))?;
    config.validate()?;

    std::fs::create_dir_all(&config.watch_dir)
        .with_context(|| format!("cannot create {}", config.watch_dir.display()))?;
    std::fs::create_dir_all(&config.dest_dir)
        .with_context(|| format!("cannot create {}", config.dest_dir.display()))?;

    info!("starting folder watcher");
    info!(path = %config.watch_dir.display(), "watching");
    info!(path = %config.dest_dir.display(), "destination");
    if config.destination_inside_watch() {
        info!("destination is nested inside the watched directory; its events are filtered");
    }

    let (raw_tx, raw_rx) = mpsc::channel(1024);
    let (cand_tx, cand_rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let normalizer = Normalizer::new(config.dest_dir.clone());
    let in_flight = normalizer.in_flight();
    let source = EventSource::start(&config.watch_dir, raw_tx)?;
    let normalizer_task = tokio::spawn(normalizer.run(raw_rx, cand_tx));

    let hook = Arc::new(DestinationMover::new(config.dest_dir.clone()));
    let dispatcher = Dispatcher::new(config, hook, in_flight);

    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for shutdown signal");
            return;
        }
        info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    dispatcher.run(cand_rx, shutdown_rx).await;

    drop(source);
    normalizer_task.abort();
    info!("stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_build_a_config_with_defaults() {
        let args = Args::parse_from(["intake-watcher", "-p", "/data/in", "-d", "/data/out"]);
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.watch_dir, PathBuf::from("/data/in"));
        assert_eq!(config.dest_dir, PathBuf::from("/data/out"));
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.max_settle_attempts, 10);
    }

    #[test]
    fn missing_directories_without_config_file_is_an_error() {
        let args = Args::parse_from(["intake-watcher", "-p", "/data/in"]);
        assert!(resolve_config(&args).is_err());
    }

    #[test]
    fn cli_flags_override_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("intake.toml");
        std::fs::write(
            &file,
            "watch_dir = \"/file/in\"\ndest_dir = \"/file/out\"\npoll_interval_ms = 250\n",
        )
        .unwrap();

        let args = Args::parse_from([
            "intake-watcher",
            "--config",
            file.to_str().unwrap(),
            "--dest",
            "/cli/out",
            "--max-attempts",
            "20",
        ]);
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.watch_dir, PathBuf::from("/file/in"));
        assert_eq!(config.dest_dir, PathBuf::from("/cli/out"));
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.max_settle_attempts, 20);
    }
}
