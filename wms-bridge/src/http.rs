//! Shared HTTP plumbing for the ERP and WMS clients: timeouts, retries with
//! exponential backoff, `Retry-After` on 429, and a uniform error type.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP {status}: {body}")]
    Http { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    #[error("invalid url {url}: {reason}")]
    Url { url: String, reason: String },

    #[error("unexpected response: {0}")]
    Payload(String),
}

pub fn build_client(settings: &HttpSettings) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(Duration::from_secs(settings.timeout_secs))
        .build()
}

/// `base` with the given path segments appended, each percent-encoded.
pub fn endpoint(base: &str, segments: &[&str]) -> Result<Url, ClientError> {
    let mut url = Url::parse(base).map_err(|e| ClientError::Url {
        url: base.to_string(),
        reason: e.to_string(),
    })?;
    {
        let mut path = url.path_segments_mut().map_err(|_| ClientError::Url {
            url: base.to_string(),
            reason: "cannot be a base".to_string(),
        })?;
        path.pop_if_empty();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}

/// Sends the request built by `build`, retrying connection failures, timeouts,
/// 429 and 5xx. Any other response (success or 4xx) is returned to the caller.
pub async fn send_with_retry<F>(max_retries: u32, build: F) -> Result<Response, ClientError>
where
    F: Fn() -> RequestBuilder,
{
    let mut last_error = String::new();

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let backoff_secs = std::cmp::min(1u64 << attempt, 30);
            tracing::warn!(attempt, backoff_secs, "retrying after backoff");
            tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
        }

        let response = match build().send().await {
            Ok(resp) => resp,
            Err(e) => {
                last_error = e.to_string();
                if e.is_timeout() || e.is_connect() {
                    continue;
                }
                return Err(ClientError::Request(e));
            }
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            if let Some(retry_after) = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
            {
                let wait = std::cmp::min(retry_after, 60);
                tracing::warn!(wait, "rate-limited, waiting Retry-After");
                tokio::time::sleep(Duration::from_secs(wait)).await;
            }
            last_error = "429 Too Many Requests".to_string();
            continue;
        }
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            last_error = format!("{status}: {body}");
            continue;
        }
        return Ok(response);
    }

    Err(ClientError::MaxRetriesExceeded {
        attempts: max_retries + 1,
        last_error,
    })
}

/// Turns a non-success response into [`ClientError::Http`].
pub async fn ensure_success(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Http { status, body })
}
