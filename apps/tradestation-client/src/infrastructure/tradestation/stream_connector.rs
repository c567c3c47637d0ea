//! HTTP streaming connector.
//!
//! TradeStation streams are long-lived chunked HTTP responses carrying one
//! JSON object per line. The connector only opens the response; framing is
//! done by the session.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION};

use super::api_types::ApiErrorBody;
use super::retry::{StatusClass, categorize_status};
use crate::application::ports::{ByteStream, ConnectError, StreamConnector, TransportError};
use crate::domain::auth::Token;
use crate::domain::streaming::Subscription;

/// Media type requesting the v2 stream framing.
pub const STREAM_ACCEPT: &str = "application/vnd.tradestation.streams.v2+json";

/// Reqwest-backed [`StreamConnector`].
#[derive(Debug, Clone)]
pub struct HttpStreamConnector {
    client: Client,
    base_url: String,
}

impl HttpStreamConnector {
    /// Create a connector rooted at `base_url`.
    ///
    /// Only the connect phase is bounded; the body stays open indefinitely.
    pub fn new(
        base_url: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, ConnectError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ConnectError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl StreamConnector for HttpStreamConnector {
    async fn connect(
        &self,
        subscription: &Subscription,
        token: &Token,
    ) -> Result<ByteStream, ConnectError> {
        let url = format!("{}{}", self.base_url, subscription.path());
        let response = self
            .client
            .get(&url)
            .header(AUTHORIZATION, token.bearer())
            .header(ACCEPT, STREAM_ACCEPT)
            .query(&subscription.query())
            .send()
            .await
            .map_err(|e| ConnectError::Unavailable(e.to_string()))?;

        let status = response.status().as_u16();
        match categorize_status(status) {
            StatusClass::Success => {}
            StatusClass::Unauthorized => return Err(ConnectError::Unauthorized),
            StatusClass::RateLimited | StatusClass::Retryable => {
                let body = response.text().await.unwrap_or_default();
                return Err(ConnectError::Unavailable(format!(
                    "status {status}: {}",
                    ApiErrorBody::describe(&body)
                )));
            }
            StatusClass::Rejected => {
                let body = response.text().await.unwrap_or_default();
                return Err(ConnectError::Rejected {
                    status,
                    message: ApiErrorBody::describe(&body),
                });
            }
        }

        tracing::debug!(url = %url, "Stream opened");
        Ok(response
            .bytes_stream()
            .map(|chunk| {
                chunk.map_err(|e| TransportError::Network {
                    attempts: 1,
                    message: e.to_string(),
                })
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use futures::TryStreamExt;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::domain::auth::TradingEnvironment;
    use crate::domain::bars::BarUnit;

    fn token() -> Token {
        Token::new(
            "stream-token",
            Utc::now() + chrono::Duration::minutes(20),
            TradingEnvironment::Sim,
        )
    }

    fn connector(server: &MockServer) -> HttpStreamConnector {
        HttpStreamConnector::new(server.uri(), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn opens_bar_stream_with_headers_and_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/marketdata/stream/barcharts/MSFT"))
            .and(header("authorization", "Bearer stream-token"))
            .and(header("accept", STREAM_ACCEPT))
            .and(query_param("interval", "1"))
            .and(query_param("unit", "Minute"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("{\"Heartbeat\":1}\n{\"Heartbeat\":2}\n"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let subscription = Subscription::bars("MSFT", BarUnit::Minute, 1).unwrap();
        let stream = connector(&server).connect(&subscription, &token()).await.unwrap();
        let chunks: Vec<bytes::Bytes> = stream.try_collect().await.unwrap();
        let body: Vec<u8> = chunks.concat();

        assert_eq!(body, b"{\"Heartbeat\":1}\n{\"Heartbeat\":2}\n");
    }

    #[tokio::test]
    async fn status_mapping() {
        let server = MockServer::start().await;
        Mock::given(path("/marketdata/stream/quotes/AUTH"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(path("/marketdata/stream/quotes/BAD"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "Error": "BadRequest",
                "Message": "Invalid symbol"
            })))
            .mount(&server)
            .await;
        Mock::given(path("/marketdata/stream/quotes/DOWN"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let connector = connector(&server);
        let connect = |symbol: &'static str| {
            let connector = connector.clone();
            async move {
                let subscription = Subscription::quotes([symbol]).unwrap();
                connector.connect(&subscription, &token()).await.err()
            }
        };

        assert_eq!(connect("AUTH").await, Some(ConnectError::Unauthorized));
        assert_eq!(
            connect("BAD").await,
            Some(ConnectError::Rejected {
                status: 400,
                message: "BadRequest: Invalid symbol".to_string()
            })
        );
        assert!(matches!(connect("DOWN").await, Some(ConnectError::Unavailable(_))));
    }

    #[tokio::test]
    async fn unreachable_host_is_unavailable() {
        let connector =
            HttpStreamConnector::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let subscription = Subscription::quotes(["MSFT"]).unwrap();

        let err = connector.connect(&subscription, &token()).await.err();
        assert!(matches!(err, Some(ConnectError::Unavailable(_))));
    }
}
