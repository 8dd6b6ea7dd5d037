//! HTTP client for a running leadscan-server
//!
//! Used by front ends and tools that trigger a scan and then follow it by
//! polling until the job reaches a terminal state.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::scan::ScanRequest;
use crate::models::{Company, OutreachDraft, ScanSnapshot};
use crate::services::ScanAccepted;

const USER_AGENT: &str = concat!("leadscan-client/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(String),

    /// Server answered with an error envelope
    #[error("API error {status} {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Polling cancelled")]
    Cancelled,

    #[error("Gave up after {attempts} consecutive errors: {last}")]
    TooManyErrors { attempts: u32, last: String },

    #[error("Decode error: {0}")]
    Decode(String),
}

impl ClientError {
    /// Transport failures and 5xx are worth another attempt; 4xx are not
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport(_) => true,
            ClientError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Error code from the server envelope, if any
    pub fn code(&self) -> Option<&str> {
        match self {
            ClientError::Api { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: String,
    code: String,
}

/// Polling cadence and error tolerance
#[derive(Debug, Clone)]
pub struct PollOptions {
    /// Delay between successful polls
    pub interval: Duration,
    /// Upper bound for the backoff delay after errors
    pub max_backoff: Duration,
    /// Consecutive retryable errors tolerated before giving up
    pub max_consecutive_errors: u32,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
            max_consecutive_errors: 5,
        }
    }
}

impl PollOptions {
    /// Delay after the `errors`-th consecutive failure
    fn backoff(&self, errors: u32) -> Duration {
        self.interval
            .saturating_mul(1u32 << errors.min(16))
            .min(self.max_backoff)
    }
}

/// leadscan-server REST client
#[derive(Debug, Clone)]
pub struct ScanClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl ScanClient {
    /// `base_url` like `http://127.0.0.1:5780`
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(Self::with_http_client(http_client, base_url))
    }

    pub fn with_http_client(http_client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http_client,
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST /api/v1/scan
    pub async fn trigger(&self, request: &ScanRequest) -> Result<ScanAccepted, ClientError> {
        let url = format!("{}/api/v1/scan", self.base_url);
        let response = self.http_client.post(&url).json(request).send().await;
        Self::decode(response).await
    }

    /// GET /api/v1/scan/{id}
    pub async fn status(&self, scan_id: Uuid) -> Result<ScanSnapshot, ClientError> {
        let url = format!("{}/api/v1/scan/{}", self.base_url, scan_id);
        let response = self.http_client.get(&url).send().await;
        Self::decode(response).await
    }

    /// POST /api/v1/scan/{id}/cancel
    pub async fn cancel(&self, scan_id: Uuid) -> Result<ScanSnapshot, ClientError> {
        let url = format!("{}/api/v1/scan/{}/cancel", self.base_url, scan_id);
        let response = self.http_client.post(&url).send().await;
        Self::decode(response).await
    }

    /// GET /api/v1/companies/{id}
    pub async fn company(&self, company_id: &str) -> Result<Company, ClientError> {
        let url = format!("{}/api/v1/companies/{}", self.base_url, company_id);
        let response = self.http_client.get(&url).send().await;
        Self::decode(response).await
    }

    /// POST /api/v1/companies/{id}/outreach/generate
    pub async fn regenerate_outreach(&self, company_id: &str) -> Result<OutreachDraft, ClientError> {
        let url = format!(
            "{}/api/v1/companies/{}/outreach/generate",
            self.base_url, company_id
        );
        let response = self.http_client.post(&url).send().await;
        Self::decode(response).await
    }

    /// Poll `status` until the job is terminal
    ///
    /// Retryable errors back off exponentially from `interval`; a 4xx or
    /// `cancel` ends the loop immediately.
    pub async fn poll_until_terminal(
        &self,
        scan_id: Uuid,
        options: &PollOptions,
        cancel: &CancellationToken,
    ) -> Result<ScanSnapshot, ClientError> {
        let mut consecutive_errors: u32 = 0;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                result = self.status(scan_id) => result,
            };

            let delay = match result {
                Ok(snapshot) if snapshot.status.is_terminal() => return Ok(snapshot),
                Ok(snapshot) => {
                    consecutive_errors = 0;
                    tracing::debug!(
                        scan_id = %scan_id,
                        status = %snapshot.status,
                        progress = snapshot.progress,
                        "Scan still running"
                    );
                    options.interval
                }
                Err(err) if err.is_retryable() => {
                    consecutive_errors += 1;
                    if consecutive_errors >= options.max_consecutive_errors {
                        return Err(ClientError::TooManyErrors {
                            attempts: consecutive_errors,
                            last: err.to_string(),
                        });
                    }
                    let delay = options.backoff(consecutive_errors);
                    tracing::warn!(
                        scan_id = %scan_id,
                        attempt = consecutive_errors,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Status poll failed, backing off"
                    );
                    delay
                }
                Err(err) => return Err(err),
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn decode<T: DeserializeOwned>(
        response: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<T, ClientError> {
        let response = response.map_err(|e| ClientError::Transport(e.to_string()))?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<ErrorEnvelope>(&body) {
                Ok(envelope) => ClientError::Api {
                    status: status.as_u16(),
                    code: envelope.code,
                    message: envelope.error,
                },
                Err(_) => ClientError::Api {
                    status: status.as_u16(),
                    code: "UNKNOWN".to_string(),
                    message: body,
                },
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let options = PollOptions {
            interval: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            max_consecutive_errors: 10,
        };
        assert_eq!(options.backoff(1), Duration::from_millis(200));
        assert_eq!(options.backoff(2), Duration::from_millis(400));
        assert_eq!(options.backoff(3), Duration::from_millis(500));
        assert_eq!(options.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn only_transport_and_server_errors_retry() {
        assert!(ClientError::Transport("reset".into()).is_retryable());
        let server = ClientError::Api {
            status: 503,
            code: "INTERNAL_ERROR".into(),
            message: "down".into(),
        };
        assert!(server.is_retryable());
        let missing = ClientError::Api {
            status: 404,
            code: "NOT_FOUND".into(),
            message: "gone".into(),
        };
        assert!(!missing.is_retryable());
        assert_eq!(missing.code(), Some("NOT_FOUND"));
        assert!(!ClientError::Cancelled.is_retryable());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = ScanClient::with_http_client(reqwest::Client::new(), "http://localhost:5780/");
        assert_eq!(client.base_url(), "http://localhost:5780");
    }
}
