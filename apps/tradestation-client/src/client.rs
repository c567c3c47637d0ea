//! Client Facade
//!
//! Wires configuration, the token manager, the REST transport and the
//! stream connector together and exposes the two entry points: historical
//! bars and streaming sessions.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    ConnectError, CredentialError, CredentialSource, StreamConnector, Transport, TransportError,
};
use crate::application::services::{
    HistoricalBars, HistoricalError, HistoricalRequest, TokenManager,
};
use crate::domain::bars::MergedResult;
use crate::domain::streaming::Subscription;
use crate::infrastructure::config::{ClientConfig, ConfigError};
use crate::infrastructure::stream::{
    SessionConfig, SessionDeps, SessionEvent, SessionHandle, StreamSession,
};
use crate::infrastructure::tradestation::{
    BarChartSource, HttpStreamConnector, HttpTransport, OAuthCredentials, RefreshTokenSource,
};

/// Failure building a client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Invalid or missing configuration.
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    /// REST transport could not be built.
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    /// Stream connector could not be built.
    #[error("stream connector: {0}")]
    Connect(#[from] ConnectError),
    /// Credential source could not be built.
    #[error("credentials: {0}")]
    Credential(#[from] CredentialError),
}

/// TradeStation market data client for one trading environment.
pub struct TradeStationClient {
    config: ClientConfig,
    tokens: Arc<TokenManager>,
    transport: Arc<dyn Transport>,
    connector: Arc<dyn StreamConnector>,
    historical: HistoricalBars,
}

impl TradeStationClient {
    /// Build a client using reqwest adapters against the configured base URL.
    pub fn new(
        config: ClientConfig,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let transport = HttpTransport::new(
            config.api_base_url(),
            config.http.timeout,
            config.http.retry.clone(),
        )?;
        let connector = HttpStreamConnector::new(config.api_base_url(), config.http.timeout)?;
        let tokens = TokenManager::new(config.environment, credentials)
            .with_expiry_skew(config.token_expiry_skew);

        Ok(Self::with_parts(
            config,
            Arc::new(tokens),
            Arc::new(transport),
            Arc::new(connector),
        ))
    }

    /// Build a client from environment variables, refreshing tokens through
    /// the OAuth refresh-token grant.
    pub fn from_env() -> Result<Self, ClientError> {
        let config = ClientConfig::from_env()?;
        let credentials = OAuthCredentials::from_env()?;
        let source = RefreshTokenSource::new(credentials, config.http.timeout)?;
        Self::new(config, Arc::new(source))
    }

    /// Assemble a client from pre-built collaborators.
    #[must_use]
    pub fn with_parts(
        config: ClientConfig,
        tokens: Arc<TokenManager>,
        transport: Arc<dyn Transport>,
        connector: Arc<dyn StreamConnector>,
    ) -> Self {
        let historical = HistoricalBars::new(config.fetch_config(), config.max_bars_per_call);
        tracing::info!(
            environment = %config.environment,
            base_url = %config.api_base_url(),
            "TradeStation client ready"
        );
        Self {
            config,
            tokens,
            transport,
            connector,
            historical,
        }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Shared token manager.
    #[must_use]
    pub const fn token_manager(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Fetch historical bars, splitting the range into parallel chunks.
    pub async fn historical_bars(
        &self,
        request: &HistoricalRequest,
        cancel: &CancellationToken,
    ) -> Result<MergedResult, HistoricalError> {
        let source = BarChartSource::new(
            request.symbol.clone(),
            Arc::clone(&self.transport),
            Arc::clone(&self.tokens),
        )
        .with_session_template(request.session_template.clone());

        self.historical.fetch(&source, request, cancel).await
    }

    /// Open a streaming session with the configured heartbeat and backoff.
    #[must_use]
    pub fn open_stream(
        &self,
        subscription: Subscription,
        sink: mpsc::Sender<SessionEvent>,
    ) -> SessionHandle {
        self.open_stream_with(subscription, self.config.session_config(), sink)
    }

    /// Open a streaming session with explicit session settings.
    #[must_use]
    pub fn open_stream_with(
        &self,
        subscription: Subscription,
        config: SessionConfig,
        sink: mpsc::Sender<SessionEvent>,
    ) -> SessionHandle {
        let deps = SessionDeps {
            tokens: Arc::clone(&self.tokens),
            connector: Arc::clone(&self.connector),
        };
        StreamSession::spawn(subscription, deps, config, sink)
    }
}

impl std::fmt::Debug for TradeStationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeStationClient")
            .field("config", &self.config)
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}
