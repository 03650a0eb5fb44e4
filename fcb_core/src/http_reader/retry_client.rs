//! Range-request transport over `reqwest` with bounded retries.
//!
//! Transient failures (transport errors, 5xx) are retried with exponential
//! backoff; 4xx responses are fatal immediately. A `200 OK` response to a
//! ranged request means the server ignored the `Range` header, which this
//! client records so the reader can surface `RangeNotSupported` instead of
//! silently downloading whole files.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_range_client::{AsyncHttpRangeClient, HttpError, Result as HttpResult};
use once_cell::sync::Lazy;
use tracing::warn;

/// One connection pool per process; readers share it.
static SHARED_CLIENT: Lazy<reqwest::Client> = Lazy::new(reqwest::Client::new);

const BACKOFF_BASE: Duration = Duration::from_millis(100);

pub struct RetryHttpClient {
    client: reqwest::Client,
    max_retries: u32,
    saw_full_body: Arc<AtomicBool>,
}

impl RetryHttpClient {
    pub fn new(max_retries: u32) -> Self {
        Self {
            client: SHARED_CLIENT.clone(),
            max_retries,
            saw_full_body: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set when the server answered a ranged request with a full body.
    pub(crate) fn full_body_flag(&self) -> Arc<AtomicBool> {
        self.saw_full_body.clone()
    }
}

#[async_trait]
impl AsyncHttpRangeClient for RetryHttpClient {
    async fn get_range(&self, url: &str, range: &str) -> HttpResult<Bytes> {
        let mut attempt = 0u32;
        loop {
            let result = self
                .client
                .get(url)
                .header(reqwest::header::RANGE, range)
                .send()
                .await;

            let retryable = match result {
                Ok(response) => {
                    let status = response.status();
                    if status == reqwest::StatusCode::PARTIAL_CONTENT {
                        return response
                            .bytes()
                            .await
                            .map_err(|e| HttpError::HttpError(e.to_string()));
                    }
                    if status == reqwest::StatusCode::OK {
                        // the server ignored the Range header
                        self.saw_full_body.store(true, Ordering::Relaxed);
                        return Err(HttpError::HttpStatus(status.as_u16()));
                    }
                    if !status.is_server_error() {
                        // 4xx and friends are not retryable
                        return Err(HttpError::HttpStatus(status.as_u16()));
                    }
                    HttpError::HttpStatus(status.as_u16())
                }
                Err(e) => HttpError::HttpError(e.to_string()),
            };

            if attempt >= self.max_retries {
                return Err(retryable);
            }
            let backoff = BACKOFF_BASE * 2u32.pow(attempt);
            warn!(
                url,
                range,
                attempt,
                "transient range request failure ({retryable}), retrying in {backoff:?}"
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    async fn head_response_header(&self, url: &str, header: &str) -> HttpResult<Option<String>> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| HttpError::HttpError(e.to_string()))?;
        Ok(response
            .headers()
            .get(header)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string()))
    }
}
