//! Timer-driven runner for the orchestrator.
//!
//! One select loop drives three tickers: recurring checks, the nightly
//! report window, and the periodic status summary. A stop broadcast
//! channel ends the loop for graceful shutdown.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::Orchestrator;

/// How often the nightly-report window is polled.
const REPORT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// How often the status summary is sent.
const SUMMARY_INTERVAL: Duration = Duration::from_secs(6 * 3600);

/// Local hour/minute after which the daily report is generated.
const REPORT_HOUR: u32 = 23;
const REPORT_MINUTE: u32 = 55;

/// Runner owning the shared orchestrator and its stop channel.
pub struct Runner {
    orchestrator: Arc<Mutex<Orchestrator>>,
    stop: broadcast::Sender<()>,
}

impl Runner {
    pub fn new(orchestrator: Arc<Mutex<Orchestrator>>) -> Self {
        let (stop, _) = broadcast::channel(1);
        Self { orchestrator, stop }
    }

    /// Signal the run loop to exit.
    pub fn stop(&self) {
        let _ = self.stop.send(());
    }

    /// Run until stopped. The first tick of every interval is deferred
    /// by one period; the caller runs the immediate startup check.
    pub async fn run(&self, check_interval: Duration) {
        let mut stop_rx = self.stop.subscribe();

        let mut check_tick = interval_at(Instant::now() + check_interval, check_interval);
        check_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut report_tick =
            interval_at(Instant::now() + REPORT_POLL_INTERVAL, REPORT_POLL_INTERVAL);
        report_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut summary_tick = interval_at(Instant::now() + SUMMARY_INTERVAL, SUMMARY_INTERVAL);
        summary_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            "Runner: checking every {}s, summary every {}h",
            check_interval.as_secs(),
            SUMMARY_INTERVAL.as_secs() / 3600
        );

        loop {
            tokio::select! {
                _ = stop_rx.recv() => break,
                _ = check_tick.tick() => {
                    // One cycle at a time; an overlapping tick is skipped
                    match self.orchestrator.clone().try_lock_owned() {
                        Ok(mut orch) => {
                            tokio::spawn(async move {
                                orch.run_check().await;
                            });
                        }
                        Err(_) => {
                            tracing::warn!("Runner: previous check still in flight; skipping this cycle");
                        }
                    }
                }
                _ = report_tick.tick() => {
                    if in_report_window() {
                        let mut orch = self.orchestrator.lock().await;
                        orch.run_daily_report().await;
                    }
                }
                _ = summary_tick.tick() => {
                    let orch = self.orchestrator.lock().await;
                    orch.send_status_summary().await;
                }
            }
        }

        tracing::info!("Runner: stopped");
    }
}

fn in_report_window() -> bool {
    use chrono::{Local, Timelike};
    let now = Local::now();
    now.hour() == REPORT_HOUR && now.minute() >= REPORT_MINUTE
}
