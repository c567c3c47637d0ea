//! HTTP transport with retry logic.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, Method};

use super::api_types::ApiErrorBody;
use super::retry::{Backoff, RetryPolicy, StatusClass, categorize_status, parse_retry_after};
use crate::application::ports::{ApiRequest, ApiResponse, HttpMethod, Transport, TransportError};
use crate::domain::auth::Token;
use crate::infrastructure::metrics;

/// Reqwest-backed [`Transport`] for the TradeStation REST API.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl HttpTransport {
    /// Create a transport rooted at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network {
                attempts: 0,
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry,
        })
    }

    /// Base URL requests are resolved against.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send_once(
        &self,
        request: &ApiRequest,
        token: &Token,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self
            .client
            .request(to_method(request.method), &url)
            .header(AUTHORIZATION, token.bearer())
            .header(ACCEPT, "application/json");
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder.send().await
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(
        &self,
        request: &ApiRequest,
        token: &Token,
    ) -> Result<ApiResponse, TransportError> {
        let mut backoff = Backoff::new(&self.retry);

        loop {
            let response = match self.send_once(request, token).await {
                Ok(response) => response,
                Err(e) => {
                    if let Some(delay) = backoff.next_backoff() {
                        tracing::warn!(
                            path = %request.path,
                            error = %e,
                            delay_ms = delay.as_millis(),
                            attempt = backoff.attempts(),
                            "Network error, retrying"
                        );
                        metrics::record_http_retry();
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    let attempts = backoff.attempts();
                    return Err(if e.is_timeout() {
                        TransportError::Timeout { attempts }
                    } else {
                        TransportError::Network {
                            attempts,
                            message: e.to_string(),
                        }
                    });
                }
            };

            let status = response.status().as_u16();
            let class = categorize_status(status);

            if class == StatusClass::Success {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| TransportError::Network {
                        attempts: backoff.attempts() + 1,
                        message: e.to_string(),
                    })?;
                return Ok(ApiResponse { status, body });
            }

            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let message = ApiErrorBody::describe(&response.text().await.unwrap_or_default());

            let delay = match class {
                StatusClass::Unauthorized => return Err(TransportError::Unauthorized),
                StatusClass::Rejected | StatusClass::Success => {
                    return Err(TransportError::Status { status, message });
                }
                StatusClass::RateLimited => {
                    backoff.next_backoff().map(|d| retry_after.unwrap_or(d))
                }
                StatusClass::Retryable => backoff.next_backoff(),
            };

            let Some(delay) = delay else {
                return Err(TransportError::Status { status, message });
            };
            tracing::warn!(
                path = %request.path,
                status,
                message = %message,
                delay_ms = delay.as_millis(),
                attempt = backoff.attempts(),
                "Retryable status, retrying"
            );
            metrics::record_http_retry();
            tokio::time::sleep(delay).await;
        }
    }
}

const fn to_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
    }
}
