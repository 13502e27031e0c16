//! Error state tracker and alert formatting.
//!
//! Classifies probe failures into a closed taxonomy, counts consecutive
//! occurrences per kind, and enforces a per-kind cooldown before
//! re-alerting. Persisted state keys on the taxonomy names, so the set
//! must remain stable.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::probe::{ProbeFailure, PIX_CODE_FIELDS};
use crate::store::{FileStore, ERROR_STATE_FILE};

/// The closed error taxonomy. Serialized names are the persisted state
/// keys and must not change.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ErrorKind {
    #[serde(rename = "NETWORK_ERROR")]
    Network,
    #[serde(rename = "TIMEOUT_ERROR")]
    Timeout,
    #[serde(rename = "AUTH_ERROR")]
    Auth,
    #[serde(rename = "API_ERROR")]
    Api,
    #[serde(rename = "INVALID_RESPONSE")]
    InvalidResponse,
    #[serde(rename = "NO_PIX_CODE")]
    NoPixCode,
    #[serde(rename = "UNKNOWN_ERROR")]
    Unknown,
}

impl ErrorKind {
    /// Human label used in notifications.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Network => "Network error",
            ErrorKind::Timeout => "Request timeout",
            ErrorKind::Auth => "Authentication failed",
            ErrorKind::Api => "Payment API error",
            ErrorKind::InvalidResponse => "Invalid response payload",
            ErrorKind::NoPixCode => "PIX code missing",
            ErrorKind::Unknown => "Unknown error",
        }
    }

    /// Recommended remediation, one line per kind.
    pub fn remediation(&self) -> &'static str {
        match self {
            ErrorKind::Network => {
                "Check DNS resolution and outbound connectivity to the payment API."
            }
            ErrorKind::Timeout => {
                "Check payment API latency; raise the request timeout if the endpoint is healthy."
            }
            ErrorKind::Auth => "Verify the API credential; it may be expired or revoked.",
            ErrorKind::Api => "Check the payment provider status page and recent API changes.",
            ErrorKind::InvalidResponse => {
                "The API contract may have changed; inspect the raw response."
            }
            ErrorKind::NoPixCode => {
                "Transaction created but no PIX code returned; check code emission on the provider side."
            }
            ErrorKind::Unknown => "Inspect the monitor logs for the full error.",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Network => "NETWORK_ERROR",
            ErrorKind::Timeout => "TIMEOUT_ERROR",
            ErrorKind::Auth => "AUTH_ERROR",
            ErrorKind::Api => "API_ERROR",
            ErrorKind::InvalidResponse => "INVALID_RESPONSE",
            ErrorKind::NoPixCode => "NO_PIX_CODE",
            ErrorKind::Unknown => "UNKNOWN_ERROR",
        };
        write!(f, "{}", name)
    }
}

/// A classified failure: one variant per [`ErrorKind`], each carrying
/// the structured diagnostic payload for that kind.
#[derive(Debug, Clone)]
pub enum ClassifiedError {
    Network { code: String },
    Timeout { timeout_ms: u64 },
    Auth { status: u16 },
    Api { status: u16, body_message: Option<String> },
    InvalidResponse { missing: Vec<String> },
    NoPixCode,
    Unknown { message: String },
}

impl ClassifiedError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClassifiedError::Network { .. } => ErrorKind::Network,
            ClassifiedError::Timeout { .. } => ErrorKind::Timeout,
            ClassifiedError::Auth { .. } => ErrorKind::Auth,
            ClassifiedError::Api { .. } => ErrorKind::Api,
            ClassifiedError::InvalidResponse { .. } => ErrorKind::InvalidResponse,
            ClassifiedError::NoPixCode => ErrorKind::NoPixCode,
            ClassifiedError::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    /// Kind-specific diagnostic line.
    pub fn detail(&self) -> String {
        match self {
            ClassifiedError::Network { code } => format!("network error code: {}", code),
            ClassifiedError::Timeout { timeout_ms } => {
                format!("no response within {}ms", timeout_ms)
            }
            ClassifiedError::Auth { status } => format!("HTTP {} from the payment API", status),
            ClassifiedError::Api { status, body_message } => match body_message {
                Some(msg) => format!("HTTP {}: {}", status, msg),
                None => format!("HTTP {}", status),
            },
            ClassifiedError::InvalidResponse { missing } => {
                format!("missing fields: {}", missing.join(", "))
            }
            ClassifiedError::NoPixCode => "transaction created without a PIX code".to_string(),
            ClassifiedError::Unknown { message } => message.clone(),
        }
    }
}

/// Network error codes that indicate a timed-out or aborted connection.
const TIMEOUT_CODES: [&str; 2] = ["ETIMEDOUT", "ECONNABORTED"];

/// Network error codes that indicate DNS or connection-level failure.
const NETWORK_CODES: [&str; 4] = ["ENOTFOUND", "ECONNREFUSED", "ECONNRESET", "EAI_AGAIN"];

/// Classify a probe failure. Total: every input maps to exactly one
/// kind, with `UNKNOWN_ERROR` as the catch-all. Rule order matters.
pub fn classify(failure: &ProbeFailure) -> ClassifiedError {
    let code = failure.network_error_code.as_deref();

    if failure.timed_out || code.is_some_and(|c| TIMEOUT_CODES.contains(&c)) {
        return ClassifiedError::Timeout { timeout_ms: failure.timeout_ms };
    }

    if let Some(code) = code {
        if NETWORK_CODES.contains(&code) {
            return ClassifiedError::Network { code: code.to_string() };
        }
    }

    if let Some(status) = failure.http_status {
        if status == 401 || status == 403 {
            return ClassifiedError::Auth { status };
        }
        if status >= 400 {
            return ClassifiedError::Api {
                status,
                body_message: failure.body_message.clone(),
            };
        }
    }

    if !failure.missing_fields.is_empty() {
        let only_pix_fields = failure
            .missing_fields
            .iter()
            .all(|f| PIX_CODE_FIELDS.contains(&f.as_str()));
        if only_pix_fields {
            return ClassifiedError::NoPixCode;
        }
        return ClassifiedError::InvalidResponse {
            missing: failure.missing_fields.clone(),
        };
    }

    ClassifiedError::Unknown { message: failure.message.clone() }
}

/// Per-kind occurrence bookkeeping. An entry exists only while its kind
/// has occurred at least once since the last clear.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorOccurrenceState {
    pub count: u64,
    pub first_occurrence_at: DateTime<Utc>,
    pub last_occurrence_at: DateTime<Utc>,
    pub last_notified_at: Option<DateTime<Utc>>,
}

/// Context a check cycle supplies for alert rendering.
#[derive(Debug, Clone)]
pub struct CheckContext {
    pub tracking_id: String,
}

/// Result of handling one failure.
#[derive(Debug, Clone)]
pub struct Handled {
    pub kind: ErrorKind,
    pub message: String,
    pub should_notify: bool,
    pub consecutive_count: u64,
}

type ErrorStateDoc = BTreeMap<ErrorKind, ErrorOccurrenceState>;

/// Tracks rolling error state with per-kind notification cooldowns.
pub struct ErrorTracker {
    state: ErrorStateDoc,
    cooldown: ChronoDuration,
    store: FileStore,
}

impl ErrorTracker {
    /// Load persisted error state, seeding empty state when the file is
    /// missing or corrupt.
    pub fn load(store: FileStore, cooldown_minutes: u64) -> Self {
        let state: ErrorStateDoc = store.load(ERROR_STATE_FILE);
        Self {
            state,
            cooldown: ChronoDuration::minutes(cooldown_minutes as i64),
            store,
        }
    }

    /// Record one classified failure: create-or-increment the kind's
    /// entry, apply the cooldown rule, and persist unconditionally so
    /// the consecutive count survives restarts.
    pub fn handle(&mut self, error: &ClassifiedError, ctx: &CheckContext) -> Handled {
        self.handle_at(error, ctx, Utc::now())
    }

    pub fn handle_at(
        &mut self,
        error: &ClassifiedError,
        ctx: &CheckContext,
        now: DateTime<Utc>,
    ) -> Handled {
        let kind = error.kind();
        let cooldown = self.cooldown;

        let entry = self.state.entry(kind).or_insert_with(|| ErrorOccurrenceState {
            count: 0,
            first_occurrence_at: now,
            last_occurrence_at: now,
            last_notified_at: None,
        });
        entry.count += 1;
        entry.last_occurrence_at = now;

        // Notify on the first-ever occurrence, then at most once per
        // cooldown period while the failure persists.
        let should_notify = match entry.last_notified_at {
            None => true,
            Some(last) => now - last >= cooldown,
        };
        if should_notify {
            entry.last_notified_at = Some(now);
        }

        let message = format_alert(error, ctx, Some(entry), now);
        let consecutive_count = entry.count;

        self.persist();

        Handled {
            kind,
            message,
            should_notify,
            consecutive_count,
        }
    }

    /// Remove every entry. Called once per successful check that
    /// follows a failure.
    pub fn clear_all(&mut self) {
        if self.state.is_empty() {
            return;
        }
        self.state.clear();
        self.persist();
    }

    /// Remove a single kind's entry.
    pub fn clear_kind(&mut self, kind: ErrorKind) {
        if self.state.remove(&kind).is_some() {
            self.persist();
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.state.is_empty()
    }

    pub fn occurrence(&self, kind: ErrorKind) -> Option<&ErrorOccurrenceState> {
        self.state.get(&kind)
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(ERROR_STATE_FILE, &self.state) {
            tracing::warn!("ErrorTracker: failed to persist error state: {}", e);
        }
    }
}

/// Render the alert text for a classified error. Pure function of the
/// error, context, and current occurrence state.
pub fn format_alert(
    error: &ClassifiedError,
    ctx: &CheckContext,
    state: Option<&ErrorOccurrenceState>,
    now: DateTime<Utc>,
) -> String {
    let kind = error.kind();
    let mut lines = vec![
        format!("🚨 <b>{}</b>", kind.label()),
        format!("Time: {}", now.format("%Y-%m-%d %H:%M:%S UTC")),
        format!("Tracking id: {}", ctx.tracking_id),
        format!("Detail: {}", error.detail()),
    ];

    if let Some(state) = state {
        if state.count > 1 {
            lines.push(format!(
                "Consecutive occurrences: {} (first seen {})",
                state.count,
                state.first_occurrence_at.format("%Y-%m-%d %H:%M:%S UTC")
            ));
        }
    }

    lines.push(format!("Suggested action: {}", kind.remediation()));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tracker(cooldown_minutes: u64) -> (ErrorTracker, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        (ErrorTracker::load(store, cooldown_minutes), dir)
    }

    fn ctx() -> CheckContext {
        CheckContext { tracking_id: "t-1".to_string() }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, h, m, 0).unwrap()
    }

    fn timeout_failure() -> ProbeFailure {
        ProbeFailure {
            timed_out: true,
            timeout_ms: 30_000,
            message: "probe timed out after 30000ms".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_classify_timeout() {
        let err = classify(&timeout_failure());
        assert_eq!(err.kind(), ErrorKind::Timeout);

        let by_code = ProbeFailure {
            network_error_code: Some("ECONNABORTED".to_string()),
            ..Default::default()
        };
        assert_eq!(classify(&by_code).kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_classify_network() {
        for code in ["ENOTFOUND", "ECONNREFUSED"] {
            let f = ProbeFailure {
                network_error_code: Some(code.to_string()),
                ..Default::default()
            };
            assert_eq!(classify(&f).kind(), ErrorKind::Network);
        }
    }

    #[test]
    fn test_classify_http_statuses() {
        let auth = ProbeFailure { http_status: Some(401), ..Default::default() };
        assert_eq!(classify(&auth).kind(), ErrorKind::Auth);
        let forbidden = ProbeFailure { http_status: Some(403), ..Default::default() };
        assert_eq!(classify(&forbidden).kind(), ErrorKind::Auth);
        let api = ProbeFailure { http_status: Some(500), ..Default::default() };
        assert_eq!(classify(&api).kind(), ErrorKind::Api);
    }

    #[test]
    fn test_classify_missing_fields() {
        // Only PIX code fields missing => NO_PIX_CODE
        let no_pix = ProbeFailure {
            missing_fields: vec!["pixCode".to_string(), "pixQrCode".to_string()],
            ..Default::default()
        };
        assert_eq!(classify(&no_pix).kind(), ErrorKind::NoPixCode);

        // Other fields missing => INVALID_RESPONSE
        let invalid = ProbeFailure {
            missing_fields: vec!["id".to_string(), "pixCode".to_string()],
            ..Default::default()
        };
        assert_eq!(classify(&invalid).kind(), ErrorKind::InvalidResponse);
    }

    #[test]
    fn test_classify_catch_all() {
        let f = ProbeFailure { message: "something odd".to_string(), ..Default::default() };
        assert_eq!(classify(&f).kind(), ErrorKind::Unknown);
    }

    #[test]
    fn test_timeout_precedes_status() {
        // A timed-out request that also carries a status classifies as timeout
        let f = ProbeFailure {
            timed_out: true,
            http_status: Some(500),
            ..Default::default()
        };
        assert_eq!(classify(&f).kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_cooldown_first_then_suppressed_then_expired() {
        let (mut tracker, _dir) = tracker(30);
        let err = classify(&timeout_failure());

        let first = tracker.handle_at(&err, &ctx(), at(10, 0));
        assert!(first.should_notify);
        assert_eq!(first.consecutive_count, 1);

        let second = tracker.handle_at(&err, &ctx(), at(10, 5));
        assert!(!second.should_notify);
        assert_eq!(second.consecutive_count, 2);

        let third = tracker.handle_at(&err, &ctx(), at(10, 30));
        assert!(third.should_notify);
        assert_eq!(third.consecutive_count, 3);
    }

    #[test]
    fn test_three_timeouts_one_minute_apart() {
        // 30-minute cooldown: only the first occurrence notifies
        let (mut tracker, _dir) = tracker(30);
        let err = classify(&timeout_failure());

        let mut notified = 0;
        let mut last = None;
        for i in 0..3 {
            let handled = tracker.handle_at(&err, &ctx(), at(10, i));
            if handled.should_notify {
                notified += 1;
            }
            last = Some(handled);
        }
        assert_eq!(notified, 1);
        assert_eq!(last.unwrap().consecutive_count, 3);
    }

    #[test]
    fn test_kinds_tracked_independently() {
        let (mut tracker, _dir) = tracker(30);
        let timeout = classify(&timeout_failure());
        let auth = classify(&ProbeFailure { http_status: Some(401), ..Default::default() });

        assert!(tracker.handle_at(&timeout, &ctx(), at(10, 0)).should_notify);
        // First occurrence of a different kind notifies despite the other's cooldown
        assert!(tracker.handle_at(&auth, &ctx(), at(10, 1)).should_notify);
        assert_eq!(tracker.occurrence(ErrorKind::Timeout).unwrap().count, 1);
        assert_eq!(tracker.occurrence(ErrorKind::Auth).unwrap().count, 1);
    }

    #[test]
    fn test_clear_all_resets_counts() {
        let (mut tracker, _dir) = tracker(30);
        let err = classify(&timeout_failure());
        tracker.handle_at(&err, &ctx(), at(10, 0));
        tracker.handle_at(&err, &ctx(), at(10, 1));
        assert!(tracker.has_errors());

        tracker.clear_all();
        assert!(!tracker.has_errors());

        // Next occurrence starts over and notifies immediately
        let handled = tracker.handle_at(&err, &ctx(), at(10, 2));
        assert!(handled.should_notify);
        assert_eq!(handled.consecutive_count, 1);
    }

    #[test]
    fn test_state_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let err = classify(&timeout_failure());

        let mut first = ErrorTracker::load(store.clone(), 30);
        first.handle_at(&err, &ctx(), at(10, 0));
        first.handle_at(&err, &ctx(), at(10, 1));

        let mut reloaded = ErrorTracker::load(store, 30);
        let handled = reloaded.handle_at(&err, &ctx(), at(10, 2));
        assert_eq!(handled.consecutive_count, 3);
        // Still inside the cooldown stamped before the restart
        assert!(!handled.should_notify);
    }

    #[test]
    fn test_alert_message_contents() {
        let err = classify(&ProbeFailure {
            http_status: Some(500),
            body_message: Some("internal error".to_string()),
            ..Default::default()
        });
        let state = ErrorOccurrenceState {
            count: 4,
            first_occurrence_at: at(9, 0),
            last_occurrence_at: at(10, 0),
            last_notified_at: Some(at(9, 0)),
        };
        let text = format_alert(&err, &ctx(), Some(&state), at(10, 0));
        assert!(text.contains("Payment API error"));
        assert!(text.contains("t-1"));
        assert!(text.contains("HTTP 500: internal error"));
        assert!(text.contains("Consecutive occurrences: 4"));
        assert!(text.contains("Suggested action:"));
    }
}
