//! Pixwatch - synthetic PIX endpoint monitor.
//!
//! Periodically creates a test transaction against a payment API's PIX
//! endpoint, tracks response-time metrics and rolling error state, and
//! reports through a Telegram bot.

mod alerts;
mod config;
mod metrics;
mod monitor;
mod notify;
mod probe;
mod store;

use alerts::ErrorTracker;
use config::MonitorConfig;
use metrics::MetricsAggregator;
use monitor::{Orchestrator, Runner};
use notify::Notifier;
use probe::PixProbe;
use store::FileStore;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "\
pixwatch - synthetic PIX endpoint monitor

USAGE:
    pixwatch [FLAGS]

FLAGS:
    --test    Run exactly one check cycle and exit
    --help    Print this help

Configuration is read from PIXWATCH_* environment variables; see the
config module documentation for the full list.
";

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("pixwatch: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print!("{}", USAGE);
        return Ok(());
    }
    let test_mode = args.iter().any(|a| a == "--test");
    if let Some(unknown) = args.iter().find(|a| *a != "--test") {
        eprint!("{}", USAGE);
        return Err(format!("unrecognized flag: {}", unknown).into());
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pixwatch=info".parse()?),
        )
        .init();

    // Load configuration; missing credentials abort with a diagnostic
    let cfg = MonitorConfig::load()?;
    tracing::info!(
        "Starting Pixwatch ({}) against {}",
        cfg.environment,
        cfg.api_base_url
    );
    tracing::info!("Using state directory {}", cfg.data_dir);

    let store = FileStore::new(&cfg.data_dir)?;
    let metrics = MetricsAggregator::load(store.clone());
    let tracker = ErrorTracker::load(store.clone(), cfg.cooldown_minutes);
    let probe = PixProbe::new(&cfg.api_base_url, &cfg.api_key, cfg.request_timeout_ms)?;
    let notifier = Notifier::new(&cfg.telegram_bot_token, &cfg.telegram_chat_id)?;

    let check_interval = Duration::from_secs(cfg.check_interval_minutes * 60);
    let orchestrator = Arc::new(Mutex::new(Orchestrator::new(
        cfg, store, metrics, tracker, probe, notifier,
    )));

    if test_mode {
        let outcome = orchestrator.lock().await.run_check().await;
        tracing::info!("Test check finished: {:?}", outcome);
        return Ok(());
    }

    // Startup notification plus one immediate check
    {
        let mut orch = orchestrator.lock().await;
        orch.notify_startup().await;
        orch.run_check().await;
    }

    let runner = Runner::new(orchestrator.clone());
    tokio::select! {
        _ = runner.run(check_interval) => {}
        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received");
        }
    }
    runner.stop();

    // Best-effort final flush and shutdown notification
    {
        let orch = orchestrator.lock().await;
        orch.flush();
        orch.notify_shutdown().await;
    }

    tracing::info!("Pixwatch stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
