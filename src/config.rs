//! Configuration module for Pixwatch.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Required credentials are validated at startup; missing keys are a
//! fatal error listing every absent variable.

use std::env;
use thiserror::Error;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<String>),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}

/// Monitoring-hours window. Supports wraparound across midnight:
/// with `start=22, end=6` the active window is `[22,24) ∪ [0,6)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorWindow {
    pub start_hour: u8,
    pub end_hour: u8,
}

impl MonitorWindow {
    /// Whether the given hour of day (0-23) falls inside the window.
    pub fn is_active(&self, hour: u8) -> bool {
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

/// Monitor configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Base URL of the payment API (default: "https://api.example-pay.com")
    pub api_base_url: String,
    /// Payment API credential (required)
    pub api_key: String,
    /// Telegram bot token (required)
    pub telegram_bot_token: String,
    /// Telegram chat id to notify (required)
    pub telegram_chat_id: String,
    /// Minutes between check cycles (default: 5)
    pub check_interval_minutes: u64,
    /// Probe request timeout in milliseconds (default: 30000)
    pub request_timeout_ms: u64,
    /// Minutes between repeat notifications for the same error kind (default: 30)
    pub cooldown_minutes: u64,
    /// Optional monitoring-hours window; checks are skipped outside it
    pub monitor_window: Option<MonitorWindow>,
    /// Directory for persisted JSON state (default: "./data")
    pub data_dir: String,
    /// Environment label used in notifications (default: "production")
    pub environment: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.example-pay.com".to_string(),
            api_key: String::new(),
            telegram_bot_token: String::new(),
            telegram_chat_id: String::new(),
            check_interval_minutes: 5,
            request_timeout_ms: 30_000,
            cooldown_minutes: 30,
            monitor_window: None,
            data_dir: "./data".to_string(),
            environment: "production".to_string(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PIXWATCH_API_BASE_URL`: payment API base URL
    /// - `PIXWATCH_API_KEY`: payment API credential (required)
    /// - `PIXWATCH_TELEGRAM_BOT_TOKEN`: bot token (required)
    /// - `PIXWATCH_TELEGRAM_CHAT_ID`: chat to notify (required)
    /// - `PIXWATCH_CHECK_INTERVAL_MINUTES`: minutes between checks (default: 5)
    /// - `PIXWATCH_REQUEST_TIMEOUT_MS`: probe timeout in ms (default: 30000)
    /// - `PIXWATCH_COOLDOWN_MINUTES`: notification cooldown (default: 30)
    /// - `PIXWATCH_MONITOR_START_HOUR` / `PIXWATCH_MONITOR_END_HOUR`:
    ///   optional monitoring-hours window, 0-23
    /// - `PIXWATCH_DATA_DIR`: state directory (default: "./data")
    /// - `PIXWATCH_ENVIRONMENT`: environment label (default: "production")
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Ok(url) = env::var("PIXWATCH_API_BASE_URL") {
            cfg.api_base_url = url;
        }
        if let Ok(dir) = env::var("PIXWATCH_DATA_DIR") {
            cfg.data_dir = dir;
        }
        if let Ok(label) = env::var("PIXWATCH_ENVIRONMENT") {
            cfg.environment = label;
        }

        if let Ok(v) = env::var("PIXWATCH_CHECK_INTERVAL_MINUTES") {
            if let Ok(n) = v.parse() {
                cfg.check_interval_minutes = n;
            }
        }
        if let Ok(v) = env::var("PIXWATCH_REQUEST_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                cfg.request_timeout_ms = n;
            }
        }
        if let Ok(v) = env::var("PIXWATCH_COOLDOWN_MINUTES") {
            if let Ok(n) = v.parse() {
                cfg.cooldown_minutes = n;
            }
        }

        cfg.monitor_window = Self::load_window()?;

        let mut missing = Vec::new();
        match env::var("PIXWATCH_API_KEY") {
            Ok(v) if !v.is_empty() => cfg.api_key = v,
            _ => missing.push("PIXWATCH_API_KEY".to_string()),
        }
        match env::var("PIXWATCH_TELEGRAM_BOT_TOKEN") {
            Ok(v) if !v.is_empty() => cfg.telegram_bot_token = v,
            _ => missing.push("PIXWATCH_TELEGRAM_BOT_TOKEN".to_string()),
        }
        match env::var("PIXWATCH_TELEGRAM_CHAT_ID") {
            Ok(v) if !v.is_empty() => cfg.telegram_chat_id = v,
            _ => missing.push("PIXWATCH_TELEGRAM_CHAT_ID".to_string()),
        }

        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        Ok(cfg)
    }

    fn load_window() -> Result<Option<MonitorWindow>, ConfigError> {
        let start = env::var("PIXWATCH_MONITOR_START_HOUR").ok();
        let end = env::var("PIXWATCH_MONITOR_END_HOUR").ok();

        let (start, end) = match (start, end) {
            (Some(s), Some(e)) => (s, e),
            _ => return Ok(None),
        };

        let parse_hour = |key: &str, value: &str| -> Result<u8, ConfigError> {
            value
                .parse::<u8>()
                .ok()
                .filter(|h| *h < 24)
                .ok_or_else(|| ConfigError::Invalid {
                    key: key.to_string(),
                    value: value.to_string(),
                })
        };

        Ok(Some(MonitorWindow {
            start_hour: parse_hour("PIXWATCH_MONITOR_START_HOUR", &start)?,
            end_hour: parse_hour("PIXWATCH_MONITOR_END_HOUR", &end)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.check_interval_minutes, 5);
        assert_eq!(cfg.request_timeout_ms, 30_000);
        assert_eq!(cfg.cooldown_minutes, 30);
        assert!(cfg.monitor_window.is_none());
        assert_eq!(cfg.data_dir, "./data");
    }

    #[test]
    fn test_window_plain() {
        let w = MonitorWindow { start_hour: 8, end_hour: 18 };
        assert!(w.is_active(8));
        assert!(w.is_active(12));
        assert!(!w.is_active(18));
        assert!(!w.is_active(3));
    }

    #[test]
    fn test_window_wraparound() {
        // start=22, end=6 is active at 23 and 2, inactive at 10
        let w = MonitorWindow { start_hour: 22, end_hour: 6 };
        assert!(w.is_active(23));
        assert!(w.is_active(2));
        assert!(!w.is_active(10));
        assert!(w.is_active(22));
        assert!(!w.is_active(6));
    }
}
