//! Bar-chart chunk source.
//!
//! Issues one `GET /marketdata/barcharts/{symbol}` per planned chunk. A 401
//! invalidates the token that was rejected, forces a refresh and retries the
//! chunk once; a second 401 is reported as a failure.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};

use super::api_types::BarChartResponse;
use crate::application::ports::{ApiRequest, ChunkFetchError, ChunkSource, Transport};
use crate::application::services::TokenManager;
use crate::domain::bars::{Bar, TimeRange};

/// Fetches bars for one symbol over the REST API.
pub struct BarChartSource {
    symbol: String,
    session_template: Option<String>,
    transport: Arc<dyn Transport>,
    tokens: Arc<TokenManager>,
}

impl BarChartSource {
    /// Create a source for `symbol`.
    #[must_use]
    pub fn new(
        symbol: impl Into<String>,
        transport: Arc<dyn Transport>,
        tokens: Arc<TokenManager>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            session_template: None,
            transport,
            tokens,
        }
    }

    /// Request a specific session template (`Default`, `USEQPre`, ...).
    #[must_use]
    pub fn with_session_template(mut self, template: Option<String>) -> Self {
        self.session_template = template;
        self
    }

    /// Symbol being fetched.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Build the request for one chunk.
    #[must_use]
    pub fn request_for(&self, chunk: &TimeRange) -> ApiRequest {
        let mut request = ApiRequest::get(format!("/marketdata/barcharts/{}", self.symbol))
            .param("interval", chunk.interval())
            .param("unit", chunk.unit().as_str())
            .param("firstdate", format_instant(chunk.start()))
            .param("lastdate", format_instant(chunk.end()));
        if let Some(template) = &self.session_template {
            request = request.param("sessiontemplate", template);
        }
        request
    }
}

fn format_instant(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl ChunkSource for BarChartSource {
    async fn fetch_chunk(&self, chunk: &TimeRange) -> Result<Vec<Bar>, ChunkFetchError> {
        let request = self.request_for(chunk);

        let token = self.tokens.get_token().await?;
        let response = match self.transport.call(&request, &token).await {
            Err(err) if err.is_unauthorized() => {
                tracing::debug!(symbol = %self.symbol, "Token rejected, refreshing once");
                self.tokens.invalidate_token(&token);
                let token = self.tokens.get_token().await?;
                self.transport.call(&request, &token).await?
            }
            other => other?,
        };

        let body: BarChartResponse = response.json()?;
        body.into_bars()
            .map_err(|e| ChunkFetchError::Decode(e.to_string()))
    }
}

impl std::fmt::Debug for BarChartSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BarChartSource")
            .field("symbol", &self.symbol)
            .field("session_template", &self.session_template)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use bytes::Bytes;
    use chrono::TimeZone;
    use parking_lot::Mutex;

    use super::*;
    use crate::application::ports::{
        ApiResponse, CredentialError, CredentialSource, TransportError,
    };
    use crate::domain::auth::{AccessGrant, Token, TradingEnvironment};
    use crate::domain::bars::BarUnit;

    struct SequentialTokens {
        issued: AtomicU32,
    }

    #[async_trait]
    impl CredentialSource for SequentialTokens {
        async fn refresh(&self) -> Result<AccessGrant, CredentialError> {
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(AccessGrant {
                access_token: format!("token-{n}"),
                expires_at: Utc::now() + chrono::Duration::minutes(20),
            })
        }
    }

    /// Answers each call with the next scripted result and records the token used.
    struct ScriptedTransport {
        responses: Mutex<Vec<Result<ApiResponse, TransportError>>>,
        seen: Mutex<Vec<(ApiRequest, String)>>,
    }

    impl ScriptedTransport {
        fn new(mut responses: Vec<Result<ApiResponse, TransportError>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn call(
            &self,
            request: &ApiRequest,
            token: &Token,
        ) -> Result<ApiResponse, TransportError> {
            self.seen
                .lock()
                .push((request.clone(), token.value().to_string()));
            self.responses
                .lock()
                .pop()
                .unwrap_or(Err(TransportError::Decode("script exhausted".to_string())))
        }
    }

    fn ok(body: &str) -> Result<ApiResponse, TransportError> {
        Ok(ApiResponse {
            status: 200,
            body: Bytes::from(body.to_string()),
        })
    }

    const TWO_BARS: &str = r#"{"Bars":[
        {"TimeStamp":"2024-03-01T14:30:00Z","Open":"100.5","High":"101","Low":"100","Close":"100.75","TotalVolume":"1200"},
        {"TimeStamp":"2024-03-01T14:35:00Z","Open":"100.75","High":"102","Low":"100.5","Close":"101.25","TotalVolume":"900"}
    ]}"#;

    fn chunk() -> TimeRange {
        TimeRange::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 14, 35, 0).unwrap(),
            BarUnit::Minute,
            5,
        )
        .unwrap()
    }

    fn source(transport: Arc<ScriptedTransport>) -> (BarChartSource, Arc<SequentialTokens>) {
        let credentials = Arc::new(SequentialTokens {
            issued: AtomicU32::new(0),
        });
        let tokens = Arc::new(TokenManager::new(
            TradingEnvironment::Sim,
            credentials.clone(),
        ));
        (BarChartSource::new("MSFT", transport, tokens), credentials)
    }

    #[test]
    fn request_carries_chunk_bounds() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let (source, _) = source(transport);
        let source = source.with_session_template(Some("USEQPre".to_string()));

        let request = source.request_for(&chunk());

        assert_eq!(request.path, "/marketdata/barcharts/MSFT");
        assert_eq!(
            request.query,
            vec![
                ("interval".to_string(), "5".to_string()),
                ("unit".to_string(), "Minute".to_string()),
                ("firstdate".to_string(), "2024-03-01T14:30:00Z".to_string()),
                ("lastdate".to_string(), "2024-03-01T14:35:00Z".to_string()),
                ("sessiontemplate".to_string(), "USEQPre".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn fetch_decodes_bars() {
        let transport = Arc::new(ScriptedTransport::new(vec![ok(TWO_BARS)]));
        let (source, _) = source(transport);

        let bars = source.fetch_chunk(&chunk()).await.unwrap();

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].volume, 1200);
        assert_eq!(bars[1].close.to_string(), "101.25");
    }

    #[tokio::test]
    async fn unauthorized_refreshes_and_retries_once() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(TransportError::Unauthorized),
            ok(TWO_BARS),
        ]));
        let (source, credentials) = source(transport.clone());

        let bars = source.fetch_chunk(&chunk()).await.unwrap();

        assert_eq!(bars.len(), 2);
        assert_eq!(credentials.issued.load(Ordering::SeqCst), 2);
        let tokens: Vec<String> = transport.seen.lock().iter().map(|(_, t)| t.clone()).collect();
        assert_eq!(tokens, vec!["token-1", "token-2"]);
    }

    #[tokio::test]
    async fn second_unauthorized_is_reported() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(TransportError::Unauthorized),
            Err(TransportError::Unauthorized),
        ]));
        let (source, _) = source(transport.clone());

        let err = source.fetch_chunk(&chunk()).await.unwrap_err();

        assert!(err.is_credential_failure());
        assert_eq!(transport.seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn malformed_bar_is_a_decode_error() {
        let transport = Arc::new(ScriptedTransport::new(vec![ok(
            r#"{"Bars":[{"TimeStamp":"2024-03-01T14:30:00Z","Open":"abc","High":"1","Low":"1","Close":"1","TotalVolume":"1"}]}"#,
        )]));
        let (source, _) = source(transport);

        let err = source.fetch_chunk(&chunk()).await.unwrap_err();
        assert!(matches!(err, ChunkFetchError::Decode(msg) if msg.contains("Open")));
    }

    #[tokio::test]
    async fn missing_bars_field_is_empty() {
        let transport = Arc::new(ScriptedTransport::new(vec![ok("{}")]));
        let (source, _) = source(transport);

        assert!(source.fetch_chunk(&chunk()).await.unwrap().is_empty());
    }
}
