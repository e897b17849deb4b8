//! Diagnostic check that the real-time transport is reachable. It is not
//! part of message handling; the result is only reported to the caller.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;

const STATUS_PATHS: [&str; 2] = ["/api/socket-status", "/health"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ProbeReport {
    Connected {
        message: String,
        endpoint: String,
        payload: Value,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
        error: String,
        endpoint: String,
        timestamp: DateTime<Utc>,
    },
}

impl ProbeReport {
    pub fn is_connected(&self) -> bool {
        matches!(self, ProbeReport::Connected { .. })
    }
}

#[derive(Clone)]
pub struct TransportProbe {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl TransportProbe {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        TransportProbe {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            timeout,
        }
    }

    pub fn candidates(&self) -> Vec<String> {
        STATUS_PATHS
            .iter()
            .map(|path| format!("{}{}", self.base_url, path))
            .collect()
    }

    /// Tries each candidate endpoint in turn and reports the first that
    /// answers with a success status.
    pub async fn check(&self) -> ProbeReport {
        let mut last_error = String::from("Unable to reach socket server");

        for endpoint in self.candidates() {
            match self.fetch(&endpoint).await {
                Ok(payload) => {
                    debug!("transport reachable at {}", endpoint);
                    return ProbeReport::Connected {
                        message: "Socket server is accessible".into(),
                        endpoint,
                        payload,
                        timestamp: Utc::now(),
                    };
                }
                Err(e) => {
                    debug!("transport probe {} failed: {}", endpoint, e);
                    last_error = e;
                }
            }
        }

        warn!("transport unreachable at {}: {}", self.base_url, last_error);
        ProbeReport::Error {
            message: "Cannot connect to socket server".into(),
            error: last_error,
            endpoint: self.base_url.clone(),
            timestamp: Utc::now(),
        }
    }

    async fn fetch(&self, endpoint: &str) -> Result<Value, String> {
        let response = self
            .client
            .get(endpoint)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("Status {}", status.as_u16()));
        }

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("application/json"));

        if is_json {
            response.json::<Value>().await.map_err(|e| e.to_string())
        } else {
            response
                .text()
                .await
                .map(Value::String)
                .map_err(|e| e.to_string())
        }
    }
}
