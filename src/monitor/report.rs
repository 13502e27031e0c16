//! Daily report snapshots.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::metrics::{DailyBucket, HourBreakdown};

use super::MonitorStats;

/// One immutable daily report (`report-YYYY-MM-DD.json`).
#[derive(Debug, Clone, Serialize)]
pub struct DailyReport {
    pub date: String,
    pub generated_at: DateTime<Utc>,
    pub environment: String,
    pub samples: u64,
    pub failures: u64,
    pub avg_time_ms: f64,
    pub min_time_ms: u64,
    pub max_time_ms: u64,
    pub uptime_percent: f64,
    pub total_checks: u64,
    pub hourly_breakdown: BTreeMap<String, HourBreakdown>,
}

/// Assemble the report for one day from its daily bucket and the
/// overall monitor counters. A day with no samples produces a
/// zero-filled report.
pub fn build_daily_report(
    date_key: &str,
    environment: &str,
    daily: Option<&DailyBucket>,
    stats: &MonitorStats,
) -> DailyReport {
    let (samples, failures, avg, min, max, breakdown) = match daily {
        Some(b) => (
            b.count,
            b.failure_count,
            if b.count == 0 {
                0.0
            } else {
                b.total_time_ms as f64 / b.count as f64
            },
            b.min_time_ms,
            b.max_time_ms,
            b.hourly_breakdown.clone(),
        ),
        None => (0, 0, 0.0, 0, 0, BTreeMap::new()),
    };

    DailyReport {
        date: date_key.to_string(),
        generated_at: Utc::now(),
        environment: environment.to_string(),
        samples,
        failures,
        avg_time_ms: avg,
        min_time_ms: min,
        max_time_ms: max,
        uptime_percent: stats.uptime_percent(),
        total_checks: stats.total_checks,
        hourly_breakdown: breakdown,
    }
}

/// Render the report notification text.
pub fn render_report_text(report: &DailyReport) -> String {
    let busiest = report
        .hourly_breakdown
        .iter()
        .max_by_key(|(_, slot)| slot.count)
        .map(|(hour, slot)| format!("{}:00 ({} samples)", hour, slot.count))
        .unwrap_or_else(|| "n/a".to_string());

    format!(
        "📅 <b>Daily report {}</b> ({})\n\
         Samples: {} ({} failed)\n\
         Response time: avg {:.0}ms / min {}ms / max {}ms\n\
         Uptime: {:.2}%\n\
         Busiest hour: {}",
        report.date,
        report.environment,
        report.samples,
        report.failures,
        report.avg_time_ms,
        report.min_time_ms,
        report.max_time_ms,
        report.uptime_percent,
        busiest,
    )
}
