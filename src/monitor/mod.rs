//! Check orchestrator.
//!
//! Runs one check cycle at a time: invokes the payment probe, routes the
//! outcome to the metrics aggregator and the error tracker, and drives
//! the HEALTHY/UNHEALTHY transition with its mandatory recovery
//! notification.

mod report;
mod runner;

pub use report::*;
pub use runner::*;

use chrono::{DateTime, Local, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::alerts::{classify, CheckContext, ErrorKind, ErrorTracker};
use crate::config::MonitorConfig;
use crate::metrics::MetricsAggregator;
use crate::notify::Notifier;
use crate::probe::{PixProbe, ProbeFailure, ProbeSuccess};
use crate::store::{FileStore, MONITOR_STATS_FILE};

/// Bounded list cap for recent error summaries.
const RECENT_ERRORS_CAP: usize = 100;

/// One recent error summary kept in the stats document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub at: DateTime<Utc>,
    pub kind: ErrorKind,
    pub message: String,
}

/// Aggregate monitor counters (`monitor-stats.json`), persisted after
/// every check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorStats {
    pub total_checks: u64,
    pub successful_checks: u64,
    pub failed_checks: u64,
    pub total_response_time_ms: u64,
    pub last_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub is_healthy: bool,
    pub recent_errors: VecDeque<ErrorSummary>,
}

impl Default for MonitorStats {
    fn default() -> Self {
        Self {
            total_checks: 0,
            successful_checks: 0,
            failed_checks: 0,
            total_response_time_ms: 0,
            last_check: None,
            last_error: None,
            is_healthy: true,
            recent_errors: VecDeque::new(),
        }
    }
}

impl MonitorStats {
    /// Share of checks that succeeded, as a percentage. 100 before any
    /// check has run.
    pub fn uptime_percent(&self) -> f64 {
        if self.total_checks == 0 {
            100.0
        } else {
            self.successful_checks as f64 / self.total_checks as f64 * 100.0
        }
    }

    /// Mean response time over successful checks.
    pub fn average_response_ms(&self) -> f64 {
        if self.successful_checks == 0 {
            0.0
        } else {
            self.total_response_time_ms as f64 / self.successful_checks as f64
        }
    }
}

/// Why a check cycle was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Paused,
    OutsideWindow,
}

/// Outcome of one check cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    Skipped(SkipReason),
    Success { response_time_ms: u64, recovered: bool },
    Failure { kind: ErrorKind, notified: bool, consecutive: u64 },
}

/// The check orchestrator. Owns the trackers and the stats document;
/// the probe and notifier are its external collaborators.
pub struct Orchestrator {
    config: MonitorConfig,
    store: FileStore,
    metrics: MetricsAggregator,
    tracker: ErrorTracker,
    stats: MonitorStats,
    probe: PixProbe,
    notifier: Notifier,
    paused: bool,
}

impl Orchestrator {
    pub fn new(
        config: MonitorConfig,
        store: FileStore,
        metrics: MetricsAggregator,
        tracker: ErrorTracker,
        probe: PixProbe,
        notifier: Notifier,
    ) -> Self {
        let stats: MonitorStats = store.load(MONITOR_STATS_FILE);
        Self {
            config,
            store,
            metrics,
            tracker,
            stats,
            probe,
            notifier,
            paused: false,
        }
    }

    /// Run one full check cycle: probe, route the outcome, send any
    /// resulting notifications. Skipped cycles change no state.
    pub async fn run_check(&mut self) -> CycleOutcome {
        if let Some(reason) = self.skip_reason(Local::now().hour() as u8) {
            tracing::debug!("Orchestrator: check skipped ({:?})", reason);
            return CycleOutcome::Skipped(reason);
        }

        let now = Utc::now();
        let tracking_id = format!("pixwatch-{}", now.timestamp_millis());

        let (outcome, notifications) = match self.probe.create_test_transaction(&tracking_id).await
        {
            Ok(success) => self.observe_success(success, now),
            Err(failure) => self.observe_failure(failure, &tracking_id, now),
        };

        match &outcome {
            CycleOutcome::Success { response_time_ms, recovered } => {
                tracing::info!(
                    "Check ok in {}ms{}",
                    response_time_ms,
                    if *recovered { " (recovered)" } else { "" }
                );
            }
            CycleOutcome::Failure { kind, notified, consecutive } => {
                tracing::warn!(
                    "Check failed: {} (occurrence {}, notify={})",
                    kind,
                    consecutive,
                    notified
                );
            }
            CycleOutcome::Skipped(_) => {}
        }

        for text in notifications {
            self.notifier.send(&text).await;
        }

        outcome
    }

    fn skip_reason(&self, hour: u8) -> Option<SkipReason> {
        if self.paused {
            return Some(SkipReason::Paused);
        }
        if let Some(window) = self.config.monitor_window {
            if !window.is_active(hour) {
                return Some(SkipReason::OutsideWindow);
            }
        }
        None
    }

    /// Route a successful probe result. Returns the outcome plus any
    /// notification texts to deliver.
    pub(crate) fn observe_success(
        &mut self,
        success: ProbeSuccess,
        now: DateTime<Utc>,
    ) -> (CycleOutcome, Vec<String>) {
        self.metrics
            .record_sample_at(success.response_time_ms, true, true, now);

        self.stats.total_checks += 1;
        self.stats.successful_checks += 1;
        self.stats.total_response_time_ms += success.response_time_ms;
        self.stats.last_check = Some(now);

        let recovered = !self.stats.is_healthy;
        self.stats.is_healthy = true;

        let mut notifications = Vec::new();
        if recovered {
            // Full clear: every kind's consecutive count resets, and the
            // recovery notification fires regardless of any cooldown.
            self.tracker.clear_all();
            notifications.push(format!(
                "✅ <b>Monitor recovered</b>\nTime: {}\nResponse time: {}ms\nUptime: {:.2}%",
                now.format("%Y-%m-%d %H:%M:%S UTC"),
                success.response_time_ms,
                self.stats.uptime_percent()
            ));
        }

        self.persist_stats();
        (
            CycleOutcome::Success {
                response_time_ms: success.response_time_ms,
                recovered,
            },
            notifications,
        )
    }

    /// Route a failed probe result through classification and the
    /// cooldown bookkeeping.
    pub(crate) fn observe_failure(
        &mut self,
        failure: ProbeFailure,
        tracking_id: &str,
        now: DateTime<Utc>,
    ) -> (CycleOutcome, Vec<String>) {
        let error = classify(&failure);
        let kind = error.kind();

        // Failures that completed an HTTP exchange still carry telemetry
        if let Some(rt) = failure.response_time_ms {
            self.metrics.record_sample_at(rt, false, false, now);
        }

        self.stats.total_checks += 1;
        self.stats.failed_checks += 1;
        self.stats.last_check = Some(now);
        self.stats.last_error = Some(format!("{}: {}", kind, error.detail()));
        self.stats.is_healthy = false;

        self.stats.recent_errors.push_back(ErrorSummary {
            at: now,
            kind,
            message: error.detail(),
        });
        while self.stats.recent_errors.len() > RECENT_ERRORS_CAP {
            self.stats.recent_errors.pop_front();
        }

        let ctx = CheckContext {
            tracking_id: tracking_id.to_string(),
        };
        let handled = self.tracker.handle_at(&error, &ctx, now);

        let notifications = if handled.should_notify {
            vec![handled.message]
        } else {
            Vec::new()
        };

        self.persist_stats();
        (
            CycleOutcome::Failure {
                kind,
                notified: handled.should_notify,
                consecutive: handled.consecutive_count,
            },
            notifications,
        )
    }

    fn persist_stats(&self) {
        if let Err(e) = self.store.save(MONITOR_STATS_FILE, &self.stats) {
            tracing::warn!("Orchestrator: failed to persist stats: {}", e);
        }
    }

    /// Pause the monitor; subsequent cycles are skipped until resumed.
    pub fn pause(&mut self) {
        self.paused = true;
        tracing::info!("Orchestrator: paused");
    }

    pub fn resume(&mut self) {
        self.paused = false;
        tracing::info!("Orchestrator: resumed");
    }

    pub fn stats(&self) -> &MonitorStats {
        &self.stats
    }

    /// Render the periodic status summary.
    pub fn status_summary(&self) -> String {
        let current = self.metrics.current_stats();
        let analysis = self.metrics.performance_analysis();

        format!(
            "📊 <b>Pixwatch status</b> ({})\n\
             Health: {}\n\
             Uptime: {:.2}% ({} checks)\n\
             Avg response: {:.0}ms (p50 {}ms / p95 {}ms / p99 {}ms)\n\
             Trend: {} ({:+.1}%)\n\
             Last: {}",
            self.config.environment,
            if self.stats.is_healthy { "healthy" } else { "UNHEALTHY" },
            self.stats.uptime_percent(),
            self.stats.total_checks,
            current.average,
            analysis.percentiles.p50,
            analysis.percentiles.p95,
            analysis.percentiles.p99,
            analysis.trend,
            analysis.trend_percent,
            self.stats
                .last_check
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "never".to_string()),
        )
    }

    /// Send the periodic status summary with its action buttons.
    pub async fn send_status_summary(&self) {
        let text = self.status_summary();
        let actions = [crate::notify::Action {
            label: "Full report".to_string(),
            callback: "report:full".to_string(),
        }];
        self.notifier.send_with_actions(&text, &actions).await;
    }

    /// Build today's report, write it once, and announce it. Returns
    /// false when the snapshot for today already exists.
    pub async fn run_daily_report(&mut self) -> bool {
        let date_key = Local::now().format("%Y-%m-%d").to_string();
        let report = build_daily_report(
            &date_key,
            &self.config.environment,
            self.metrics.daily_bucket(&date_key),
            &self.stats,
        );

        match self.store.save_report_once(&date_key, &report) {
            Ok(true) => {
                tracing::info!("Daily report written for {}", date_key);
                let actions = [crate::notify::Action {
                    label: "Hourly breakdown".to_string(),
                    callback: format!("report:{}", date_key),
                }];
                self.notifier
                    .send_with_actions(&render_report_text(&report), &actions)
                    .await;
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::warn!("Failed to write daily report for {}: {}", date_key, e);
                false
            }
        }
    }

    pub async fn notify_startup(&self) {
        let text = format!(
            "🟢 <b>Pixwatch started</b> ({})\nChecking every {} minute(s)",
            self.config.environment, self.config.check_interval_minutes
        );
        self.notifier.send(&text).await;
    }

    pub async fn notify_shutdown(&self) {
        let text = format!(
            "🔴 <b>Pixwatch shutting down</b> ({})\nUptime: {:.2}% over {} checks",
            self.config.environment,
            self.stats.uptime_percent(),
            self.stats.total_checks
        );
        self.notifier.send(&text).await;
    }

    /// Final flush of the stats document at shutdown.
    pub fn flush(&self) {
        self.persist_stats();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorWindow;
    use chrono::TimeZone;

    fn orchestrator(config: MonitorConfig) -> (Orchestrator, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let metrics = MetricsAggregator::load(store.clone());
        let tracker = ErrorTracker::load(store.clone(), config.cooldown_minutes);
        let probe = PixProbe::new("http://127.0.0.1:1", "key", 1000).unwrap();
        let notifier = Notifier::new("token", "chat").unwrap();
        (
            Orchestrator::new(config, store, metrics, tracker, probe, notifier),
            dir,
        )
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, h, m, 0).unwrap()
    }

    fn ok_probe(rt: u64) -> ProbeSuccess {
        ProbeSuccess {
            id: "tx-1".to_string(),
            status: "pending".to_string(),
            pix_code: "000201".to_string(),
            pix_qr_code: "qr".to_string(),
            amount: 0.01,
            response_time_ms: rt,
        }
    }

    fn timeout_probe() -> ProbeFailure {
        ProbeFailure {
            timed_out: true,
            timeout_ms: 30_000,
            message: "probe timed out".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_success_updates_stats() {
        let (mut orch, _dir) = orchestrator(MonitorConfig::default());
        let (outcome, notes) = orch.observe_success(ok_probe(120), at(10, 0));

        assert!(matches!(
            outcome,
            CycleOutcome::Success { response_time_ms: 120, recovered: false }
        ));
        assert!(notes.is_empty());
        assert_eq!(orch.stats().total_checks, 1);
        assert_eq!(orch.stats().successful_checks, 1);
        assert!(orch.stats().is_healthy);
        assert_eq!(orch.stats().uptime_percent(), 100.0);
    }

    #[test]
    fn test_failure_marks_unhealthy_and_notifies_first() {
        let (mut orch, _dir) = orchestrator(MonitorConfig::default());
        let (outcome, notes) = orch.observe_failure(timeout_probe(), "t-1", at(10, 0));

        match outcome {
            CycleOutcome::Failure { kind, notified, consecutive } => {
                assert_eq!(kind, ErrorKind::Timeout);
                assert!(notified);
                assert_eq!(consecutive, 1);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(notes.len(), 1);
        assert!(!orch.stats().is_healthy);
        assert_eq!(orch.stats().failed_checks, 1);
        assert!(orch.stats().last_error.as_deref().unwrap().contains("TIMEOUT_ERROR"));
    }

    #[test]
    fn test_repeat_failure_within_cooldown_is_silent() {
        let (mut orch, _dir) = orchestrator(MonitorConfig::default());
        orch.observe_failure(timeout_probe(), "t-1", at(10, 0));
        let (_, notes) = orch.observe_failure(timeout_probe(), "t-2", at(10, 5));
        assert!(notes.is_empty());
    }

    #[test]
    fn test_recovery_clears_state_and_always_notifies() {
        let (mut orch, _dir) = orchestrator(MonitorConfig::default());
        orch.observe_failure(timeout_probe(), "t-1", at(10, 0));
        orch.observe_failure(timeout_probe(), "t-2", at(10, 1));
        assert!(orch.tracker.has_errors());

        let (outcome, notes) = orch.observe_success(ok_probe(90), at(10, 2));
        assert!(matches!(outcome, CycleOutcome::Success { recovered: true, .. }));
        assert_eq!(notes.len(), 1);
        assert!(notes[0].contains("recovered"));
        assert!(!orch.tracker.has_errors());
        assert!(orch.stats().is_healthy);
    }

    #[test]
    fn test_recent_errors_bounded() {
        let (mut orch, _dir) = orchestrator(MonitorConfig::default());
        for i in 0..110u32 {
            orch.observe_failure(timeout_probe(), "t", at(10, 0) + chrono::Duration::seconds(i as i64));
        }
        assert_eq!(orch.stats().recent_errors.len(), 100);
        assert_eq!(orch.stats().failed_checks, 110);
    }

    #[test]
    fn test_skip_paused_and_window() {
        let mut config = MonitorConfig::default();
        config.monitor_window = Some(MonitorWindow { start_hour: 22, end_hour: 6 });
        let (mut orch, _dir) = orchestrator(config);

        assert_eq!(orch.skip_reason(23), None);
        assert_eq!(orch.skip_reason(2), None);
        assert_eq!(orch.skip_reason(10), Some(SkipReason::OutsideWindow));

        orch.pause();
        assert_eq!(orch.skip_reason(23), Some(SkipReason::Paused));
        orch.resume();
        assert_eq!(orch.skip_reason(23), None);
    }

    #[test]
    fn test_measured_failure_records_sample() {
        let (mut orch, _dir) = orchestrator(MonitorConfig::default());
        let failure = ProbeFailure {
            http_status: Some(500),
            message: "HTTP 500".to_string(),
            response_time_ms: Some(420),
            ..Default::default()
        };
        orch.observe_failure(failure, "t-1", at(10, 0));
        let current = orch.metrics.current_stats();
        assert_eq!(current.count, 1);
        assert_eq!(current.last10[0].response_time_ms, 420);
        assert!(!current.last10[0].success);
    }

    #[test]
    fn test_stats_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        {
            let metrics = MetricsAggregator::load(store.clone());
            let tracker = ErrorTracker::load(store.clone(), 30);
            let probe = PixProbe::new("http://127.0.0.1:1", "key", 1000).unwrap();
            let notifier = Notifier::new("token", "chat").unwrap();
            let mut orch = Orchestrator::new(
                MonitorConfig::default(),
                store.clone(),
                metrics,
                tracker,
                probe,
                notifier,
            );
            orch.observe_failure(timeout_probe(), "t-1", at(10, 0));
        }

        let reloaded: MonitorStats = store.load(MONITOR_STATS_FILE);
        assert_eq!(reloaded.total_checks, 1);
        assert!(!reloaded.is_healthy);
    }
}
