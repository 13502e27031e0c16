//! Payment probe client.
//!
//! Creates a synthetic PIX test transaction against the payment API and
//! measures the round trip. The probe owns the HTTP concerns (timeout,
//! auth header, endpoint); callers only see the structured outcome.

use rand::Rng;
use serde_json::Value;
use std::time::{Duration, Instant};

/// Required fields of a test-transaction response payload.
const REQUIRED_FIELDS: [&str; 4] = ["id", "status", "pixCode", "pixQrCode"];

/// Fields that carry the payment code specifically.
pub const PIX_CODE_FIELDS: [&str; 2] = ["pixCode", "pixQrCode"];

/// A successful test transaction.
#[derive(Debug, Clone)]
pub struct ProbeSuccess {
    pub id: String,
    pub status: String,
    pub pix_code: String,
    pub pix_qr_code: String,
    pub amount: f64,
    pub response_time_ms: u64,
}

/// A failed probe call, carrying whatever transport or payload
/// diagnostics were available.
#[derive(Debug, Clone, Default)]
pub struct ProbeFailure {
    pub http_status: Option<u16>,
    pub network_error_code: Option<String>,
    pub message: String,
    pub timed_out: bool,
    /// Configured request timeout, for diagnostics.
    pub timeout_ms: u64,
    /// Required payload fields absent from an otherwise-OK response.
    pub missing_fields: Vec<String>,
    /// Error message extracted from the response body, if any.
    pub body_message: Option<String>,
    /// Measured latency when an HTTP exchange completed.
    pub response_time_ms: Option<u64>,
}

/// Probe client for the PIX transaction endpoint.
pub struct PixProbe {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl PixProbe {
    pub fn new(base_url: &str, api_key: &str, timeout_ms: u64) -> Result<Self, reqwest::Error> {
        let timeout = Duration::from_millis(timeout_ms);
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            timeout,
        })
    }

    /// Create a minimal test transaction and validate the response payload.
    pub async fn create_test_transaction(
        &self,
        tracking_id: &str,
    ) -> Result<ProbeSuccess, ProbeFailure> {
        // Small jitter to avoid aligning exactly with other periodic work
        let jitter = rand::thread_rng().gen_range(0..100);
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        let url = format!("{}/v1/pix/transactions", self.base_url);
        let body = serde_json::json!({
            "amount": 0.01,
            "description": "pixwatch synthetic health check",
            "externalId": tracking_id,
        });

        let start = Instant::now();
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_failure(e))?;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let status = response.status();
        let payload: Option<Value> = response.json().await.ok();

        if !status.is_success() {
            let body_message = payload
                .as_ref()
                .and_then(|v| v.get("message"))
                .and_then(Value::as_str)
                .map(String::from);
            return Err(ProbeFailure {
                http_status: Some(status.as_u16()),
                message: format!("payment API returned HTTP {}", status.as_u16()),
                timeout_ms: self.timeout.as_millis() as u64,
                body_message,
                response_time_ms: Some(elapsed_ms),
                ..Default::default()
            });
        }

        let payload = match payload {
            Some(v) => v,
            None => {
                return Err(ProbeFailure {
                    message: "response body is not valid JSON".to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                    missing_fields: REQUIRED_FIELDS.iter().map(|f| f.to_string()).collect(),
                    response_time_ms: Some(elapsed_ms),
                    ..Default::default()
                })
            }
        };

        match parse_transaction(&payload, elapsed_ms) {
            Ok(success) => Ok(success),
            Err(missing) => Err(ProbeFailure {
                message: format!("response missing required fields: {}", missing.join(", ")),
                timeout_ms: self.timeout.as_millis() as u64,
                missing_fields: missing,
                response_time_ms: Some(elapsed_ms),
                ..Default::default()
            }),
        }
    }

    fn transport_failure(&self, e: reqwest::Error) -> ProbeFailure {
        let timeout_ms = self.timeout.as_millis() as u64;
        if e.is_timeout() {
            ProbeFailure {
                message: format!("probe timed out after {}ms", timeout_ms),
                timed_out: true,
                timeout_ms,
                ..Default::default()
            }
        } else if e.is_connect() {
            let code = if e.to_string().contains("dns") {
                "ENOTFOUND"
            } else {
                "ECONNREFUSED"
            };
            ProbeFailure {
                network_error_code: Some(code.to_string()),
                message: e.to_string(),
                timeout_ms,
                ..Default::default()
            }
        } else {
            ProbeFailure {
                message: e.to_string(),
                timeout_ms,
                ..Default::default()
            }
        }
    }
}

/// Validate the transaction payload, tolerating a `data` wrapper object.
/// Returns the list of missing required fields on failure.
fn parse_transaction(payload: &Value, elapsed_ms: u64) -> Result<ProbeSuccess, Vec<String>> {
    let data = payload.get("data").unwrap_or(payload);

    let missing: Vec<String> = REQUIRED_FIELDS
        .iter()
        .filter(|f| data.get(**f).and_then(Value::as_str).is_none())
        .map(|f| f.to_string())
        .collect();

    if !missing.is_empty() {
        return Err(missing);
    }

    Ok(ProbeSuccess {
        id: data["id"].as_str().unwrap_or_default().to_string(),
        status: data["status"].as_str().unwrap_or_default().to_string(),
        pix_code: data["pixCode"].as_str().unwrap_or_default().to_string(),
        pix_qr_code: data["pixQrCode"].as_str().unwrap_or_default().to_string(),
        amount: data.get("amount").and_then(Value::as_f64).unwrap_or(0.0),
        response_time_ms: elapsed_ms,
    })
}
