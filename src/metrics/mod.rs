//! Performance metrics aggregator.
//!
//! Accumulates response-time samples into a bounded ring buffer plus
//! incrementally-maintained hourly and daily buckets, and derives
//! percentiles, trend, and critical-hour summaries from them. Buckets
//! older than seven days are purged on every write.

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use crate::store::{FileStore, PERFORMANCE_METRICS_FILE};

/// Default capacity of the current-sample ring buffer.
pub const DEFAULT_RING_CAPACITY: usize = 1000;

/// How long hourly/daily buckets are retained.
const BUCKET_RETENTION_DAYS: i64 = 7;

/// A single probe response sample. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSample {
    pub timestamp: DateTime<Utc>,
    pub response_time_ms: u64,
    pub success: bool,
    pub has_expected_payload: bool,
}

/// Incremental per-hour aggregate, keyed by `YYYY-MM-DD-HH`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HourlyBucket {
    pub count: u64,
    pub total_time_ms: u64,
    pub min_time_ms: u64,
    pub max_time_ms: u64,
    pub failure_count: u64,
}

impl HourlyBucket {
    fn add(&mut self, response_time_ms: u64, success: bool) {
        if self.count == 0 {
            self.min_time_ms = response_time_ms;
            self.max_time_ms = response_time_ms;
        } else {
            self.min_time_ms = self.min_time_ms.min(response_time_ms);
            self.max_time_ms = self.max_time_ms.max(response_time_ms);
        }
        self.count += 1;
        self.total_time_ms += response_time_ms;
        if !success {
            self.failure_count += 1;
        }
    }

    fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_time_ms as f64 / self.count as f64
        }
    }
}

/// Per-hour-of-day slice inside a daily bucket, used for reports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HourBreakdown {
    pub count: u64,
    pub total_time_ms: u64,
    pub avg_time_ms: f64,
}

/// Per-day aggregate, keyed by `YYYY-MM-DD`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyBucket {
    pub count: u64,
    pub total_time_ms: u64,
    pub min_time_ms: u64,
    pub max_time_ms: u64,
    pub failure_count: u64,
    /// Hour-of-day ("00".."23") breakdown for report generation.
    pub hourly_breakdown: BTreeMap<String, HourBreakdown>,
}

/// Running counters plus the bounded sample ring buffer.
///
/// `count`/`total_time_ms` are cumulative over all recorded samples;
/// only the ring buffer itself is capped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurrentWindow {
    pub count: u64,
    pub total_time_ms: u64,
    pub min_time_ms: u64,
    pub max_time_ms: u64,
    pub samples: VecDeque<ResponseSample>,
}

/// The whole persisted metrics document (`performance-metrics.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsDocument {
    pub current: CurrentWindow,
    pub hourly: BTreeMap<String, HourlyBucket>,
    pub daily: BTreeMap<String, DailyBucket>,
    pub last_update: Option<DateTime<Utc>>,
}

/// A recent sample rendered for display.
#[derive(Debug, Clone, Serialize)]
pub struct SampleView {
    pub time: String,
    pub response_time_ms: u64,
    pub success: bool,
}

/// Snapshot of the current window.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentStats {
    pub count: u64,
    pub average: f64,
    pub min: u64,
    pub max: u64,
    pub last10: Vec<SampleView>,
}

/// One entry of the fixed-length hourly series.
#[derive(Debug, Clone, Serialize)]
pub struct HourlyStat {
    pub hour: String,
    pub count: u64,
    pub avg_time_ms: f64,
    pub min_time_ms: u64,
    pub max_time_ms: u64,
    pub failure_count: u64,
}

/// Direction of the recent response-time trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Stable,
    Degrading,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trend::Improving => write!(f, "improving"),
            Trend::Stable => write!(f, "stable"),
            Trend::Degrading => write!(f, "degrading"),
        }
    }
}

/// Nearest-rank percentiles over the current ring buffer.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Percentiles {
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
}

/// An hour whose average exceeds 1.5x the overall average.
#[derive(Debug, Clone, Serialize)]
pub struct CriticalHour {
    pub hour: String,
    pub avg_time_ms: f64,
    pub count: u64,
}

/// Output of [`MetricsAggregator::performance_analysis`].
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceAnalysis {
    pub trend: Trend,
    pub trend_percent: f64,
    pub critical_hours: Vec<CriticalHour>,
    pub percentiles: Percentiles,
    pub total_samples: u64,
    pub overall_avg_ms: f64,
}

/// Metrics aggregator backed by the flat-file store.
pub struct MetricsAggregator {
    doc: MetricsDocument,
    capacity: usize,
    store: FileStore,
}

impl MetricsAggregator {
    /// Load the persisted metrics document, seeding empty state when the
    /// file is missing or corrupt.
    pub fn load(store: FileStore) -> Self {
        let doc: MetricsDocument = store.load(PERFORMANCE_METRICS_FILE);
        Self {
            doc,
            capacity: DEFAULT_RING_CAPACITY,
            store,
        }
    }

    /// Override the ring buffer capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Record one sample: append to the ring buffer, update the running
    /// counters and both bucket levels, purge expired buckets, persist.
    pub fn record_sample(&mut self, response_time_ms: u64, success: bool, has_expected_payload: bool) {
        self.record_sample_at(response_time_ms, success, has_expected_payload, Utc::now());
    }

    pub fn record_sample_at(
        &mut self,
        response_time_ms: u64,
        success: bool,
        has_expected_payload: bool,
        now: DateTime<Utc>,
    ) {
        let sample = ResponseSample {
            timestamp: now,
            response_time_ms,
            success,
            has_expected_payload,
        };

        let current = &mut self.doc.current;
        current.samples.push_back(sample);
        while current.samples.len() > self.capacity {
            current.samples.pop_front();
        }

        if current.count == 0 {
            current.min_time_ms = response_time_ms;
            current.max_time_ms = response_time_ms;
        } else {
            current.min_time_ms = current.min_time_ms.min(response_time_ms);
            current.max_time_ms = current.max_time_ms.max(response_time_ms);
        }
        current.count += 1;
        current.total_time_ms += response_time_ms;

        let hour_key = now.format("%Y-%m-%d-%H").to_string();
        self.doc
            .hourly
            .entry(hour_key)
            .or_default()
            .add(response_time_ms, success);

        let day_key = now.format("%Y-%m-%d").to_string();
        let daily = self.doc.daily.entry(day_key).or_default();
        if daily.count == 0 {
            daily.min_time_ms = response_time_ms;
            daily.max_time_ms = response_time_ms;
        } else {
            daily.min_time_ms = daily.min_time_ms.min(response_time_ms);
            daily.max_time_ms = daily.max_time_ms.max(response_time_ms);
        }
        daily.count += 1;
        daily.total_time_ms += response_time_ms;
        if !success {
            daily.failure_count += 1;
        }

        let hod_key = format!("{:02}", now.hour());
        let slot = daily.hourly_breakdown.entry(hod_key).or_default();
        slot.count += 1;
        slot.total_time_ms += response_time_ms;
        slot.avg_time_ms = slot.total_time_ms as f64 / slot.count as f64;

        self.purge_expired(now);
        self.doc.last_update = Some(now);

        if let Err(e) = self.store.save(PERFORMANCE_METRICS_FILE, &self.doc) {
            tracing::warn!("Metrics: failed to persist metrics document: {}", e);
        }
    }

    /// Drop hourly and daily buckets older than the retention period.
    fn purge_expired(&mut self, now: DateTime<Utc>) {
        let cutoff = now - ChronoDuration::days(BUCKET_RETENTION_DAYS);
        let hourly_cutoff = cutoff.format("%Y-%m-%d-%H").to_string();
        let daily_cutoff = cutoff.format("%Y-%m-%d").to_string();

        // Keys are zero-padded so lexicographic order is chronological.
        self.doc.hourly.retain(|k, _| k.as_str() >= hourly_cutoff.as_str());
        self.doc.daily.retain(|k, _| k.as_str() >= daily_cutoff.as_str());
    }

    /// Snapshot of the current window.
    pub fn current_stats(&self) -> CurrentStats {
        let current = &self.doc.current;
        let average = if current.count == 0 {
            0.0
        } else {
            current.total_time_ms as f64 / current.count as f64
        };

        let last10 = current
            .samples
            .iter()
            .rev()
            .take(10)
            .map(|s| SampleView {
                time: s.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                response_time_ms: s.response_time_ms,
                success: s.success,
            })
            .collect();

        CurrentStats {
            count: current.count,
            average,
            min: if current.count == 0 { 0 } else { current.min_time_ms },
            max: current.max_time_ms,
            last10,
        }
    }

    /// Fixed-length hourly series ending at the current hour, oldest
    /// first. Hours without data synthesize a zero-filled entry, so the
    /// result always has exactly `hours` entries.
    pub fn hourly_stats(&self, hours: usize) -> Vec<HourlyStat> {
        self.hourly_stats_at(hours, Utc::now())
    }

    pub fn hourly_stats_at(&self, hours: usize, now: DateTime<Utc>) -> Vec<HourlyStat> {
        let mut series = Vec::with_capacity(hours);
        for offset in (0..hours).rev() {
            let at = now - ChronoDuration::hours(offset as i64);
            let key = at.format("%Y-%m-%d-%H").to_string();
            let stat = match self.doc.hourly.get(&key) {
                Some(b) => HourlyStat {
                    hour: key,
                    count: b.count,
                    avg_time_ms: b.average(),
                    min_time_ms: b.min_time_ms,
                    max_time_ms: b.max_time_ms,
                    failure_count: b.failure_count,
                },
                None => HourlyStat {
                    hour: key,
                    count: 0,
                    avg_time_ms: 0.0,
                    min_time_ms: 0,
                    max_time_ms: 0,
                    failure_count: 0,
                },
            };
            series.push(stat);
        }
        series
    }

    /// Trend, percentiles, and critical hours over recent data.
    pub fn performance_analysis(&self) -> PerformanceAnalysis {
        self.performance_analysis_at(Utc::now())
    }

    pub fn performance_analysis_at(&self, now: DateTime<Utc>) -> PerformanceAnalysis {
        let (trend, trend_percent) = self.trend_at(now);
        let percentiles = self.percentiles();

        let current = &self.doc.current;
        let overall_avg_ms = if current.count == 0 {
            0.0
        } else {
            current.total_time_ms as f64 / current.count as f64
        };

        PerformanceAnalysis {
            trend,
            trend_percent,
            critical_hours: self.critical_hours_at(now, overall_avg_ms),
            percentiles,
            total_samples: current.count,
            overall_avg_ms,
        }
    }

    /// Compare the weighted mean of the most recent 6 hours against the
    /// mean of hours 6-24 ago. A zero-sample window yields (stable, 0).
    fn trend_at(&self, now: DateTime<Utc>) -> (Trend, f64) {
        let window_mean = |from_offset: i64, to_offset: i64| -> Option<f64> {
            let mut total = 0u64;
            let mut count = 0u64;
            for offset in from_offset..to_offset {
                let key = (now - ChronoDuration::hours(offset)).format("%Y-%m-%d-%H").to_string();
                if let Some(b) = self.doc.hourly.get(&key) {
                    total += b.total_time_ms;
                    count += b.count;
                }
            }
            if count == 0 {
                None
            } else {
                Some(total as f64 / count as f64)
            }
        };

        let recent = window_mean(0, 6);
        let older = window_mean(6, 24);

        match (recent, older) {
            (Some(recent_avg), Some(older_avg)) if older_avg > 0.0 => {
                let ratio = (recent_avg - older_avg) / older_avg;
                let trend = if ratio < -0.10 {
                    Trend::Improving
                } else if ratio > 0.10 {
                    Trend::Degrading
                } else {
                    Trend::Stable
                };
                (trend, ratio * 100.0)
            }
            _ => (Trend::Stable, 0.0),
        }
    }

    /// Nearest-rank percentiles over the full ring buffer.
    fn percentiles(&self) -> Percentiles {
        let mut times: Vec<u64> = self
            .doc
            .current
            .samples
            .iter()
            .map(|s| s.response_time_ms)
            .collect();
        times.sort_unstable();

        Percentiles {
            p50: nearest_rank(&times, 50.0),
            p95: nearest_rank(&times, 95.0),
            p99: nearest_rank(&times, 99.0),
        }
    }

    /// Hours in the last 24 whose average exceeds 1.5x the overall
    /// average, first 3 in chronological order.
    fn critical_hours_at(&self, now: DateTime<Utc>, overall_avg_ms: f64) -> Vec<CriticalHour> {
        if overall_avg_ms <= 0.0 {
            return Vec::new();
        }
        let threshold = overall_avg_ms * 1.5;

        let mut critical = Vec::new();
        for offset in (0..24).rev() {
            let key = (now - ChronoDuration::hours(offset)).format("%Y-%m-%d-%H").to_string();
            if let Some(b) = self.doc.hourly.get(&key) {
                if b.count >= 1 && b.average() > threshold {
                    critical.push(CriticalHour {
                        hour: key,
                        avg_time_ms: b.average(),
                        count: b.count,
                    });
                    if critical.len() == 3 {
                        break;
                    }
                }
            }
        }
        critical
    }

    /// Daily bucket for the given day key, if any data was recorded.
    pub fn daily_bucket(&self, day_key: &str) -> Option<&DailyBucket> {
        self.doc.daily.get(day_key)
    }
}

/// Nearest-rank percentile: index = ceil(p/100 * n) - 1, clamped.
fn nearest_rank(sorted: &[u64], p: f64) -> u64 {
    let n = sorted.len();
    if n == 0 {
        return 0;
    }
    let rank = (p / 100.0 * n as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(n - 1);
    sorted[idx]
}
