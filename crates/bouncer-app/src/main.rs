//! Bouncer - Inline admission control for HTTP services.
//!
//! Runs the reverse proxy, the decision sync engine and the challenge
//! subsystem from a single TOML configuration file.

mod bootstrap;

use std::path::PathBuf;

use anyhow::Context;
use bouncer_core::Config;
use clap::Parser;
use directories::ProjectDirs;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::bootstrap::Bouncer;

/// Bouncer - inline admission control for HTTP services
#[derive(Parser, Debug)]
#[command(name = "bouncer", version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Override the configured log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,

    /// Also write daily rotated log files to this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

/// Default configuration path when `--config` is not given.
fn default_config_path() -> PathBuf {
    ProjectDirs::from("", "bouncer", "bouncer")
        .map(|dirs| dirs.config_dir().join("bouncer.toml"))
        .unwrap_or_else(|| PathBuf::from("bouncer.toml"))
}

/// Initialize logging; the returned guard must outlive the program.
fn init_logging(args: &Args, config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_level = if args.debug {
        "debug"
    } else {
        args.log_level.as_deref().unwrap_or(config.log_level.as_str())
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("bouncer={},warn", log_level)));

    if let Some(log_dir) = &args.log_dir {
        let file_appender = std::fs::create_dir_all(log_dir).ok().and_then(|_| {
            RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .max_log_files(7)
                .filename_prefix("bouncer")
                .filename_suffix("log")
                .build(log_dir)
                .ok()
        });

        if let Some(appender) = file_appender {
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stdout))
                .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                .init();
            tracing::info!("Logging to {:?}", log_dir);
            return Some(guard);
        }

        tracing_subscriber::fmt().with_env_filter(env_filter).init();
        tracing::warn!("Log directory {:?} unusable, using console only", log_dir);
        return None;
    }

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let config = Config::from_file(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    let _guard = init_logging(&args, &config);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "Bouncer starting"
    );

    let running = Bouncer::build(&config).await?.start().await?;
    tracing::info!(addr = %running.addr(), upstream = %config.server.upstream, "Bouncer ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");
    running.stop().await;

    Ok(())
}
