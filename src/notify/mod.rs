//! Telegram notification channel.
//!
//! Failures here never propagate into the monitoring core: every send
//! resolves to a [`SendOutcome`], with errors logged and reported as
//! `success: false`.

use serde_json::{json, Value};
use std::time::Duration;

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Result of a send attempt.
#[derive(Debug, Clone, Default)]
pub struct SendOutcome {
    pub success: bool,
    pub message_id: Option<i64>,
}

/// An inline action button attached to a summary message.
#[derive(Debug, Clone)]
pub struct Action {
    pub label: String,
    pub callback: String,
}

/// Telegram bot notification channel.
pub struct Notifier {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl Notifier {
    pub fn new(bot_token: &str, chat_id: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
        })
    }

    /// Send a plain (HTML-formatted) message.
    pub async fn send(&self, text: &str) -> SendOutcome {
        let payload = json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML",
        });
        self.post(payload).await
    }

    /// Send a message with an inline keyboard of action buttons.
    pub async fn send_with_actions(&self, text: &str, actions: &[Action]) -> SendOutcome {
        let buttons: Vec<Value> = actions
            .iter()
            .map(|a| json!({ "text": a.label, "callback_data": a.callback }))
            .collect();

        let payload = json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML",
            "reply_markup": { "inline_keyboard": [buttons] },
        });
        self.post(payload).await
    }

    async fn post(&self, payload: Value) -> SendOutcome {
        let url = format!("{}/bot{}/sendMessage", TELEGRAM_API, self.bot_token);

        let response = match self.client.post(&url).json(&payload).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Notifier: failed to reach Telegram: {}", e);
                return SendOutcome::default();
            }
        };

        if !response.status().is_success() {
            tracing::warn!("Notifier: Telegram returned HTTP {}", response.status());
            return SendOutcome::default();
        }

        let body: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Notifier: unreadable Telegram response: {}", e);
                return SendOutcome::default();
            }
        };

        let ok = body.get("ok").and_then(Value::as_bool).unwrap_or(false);
        let message_id = body
            .pointer("/result/message_id")
            .and_then(Value::as_i64);

        SendOutcome { success: ok, message_id }
    }
}
