//! Token Manager
//!
//! Owns the current access token for one trading environment and refreshes
//! it on demand.
//!
//! # Concurrency
//!
//! Readers load the cached token through an [`ArcSwapOption`] and never
//! block. When the token is absent, expired or invalidated, callers queue on
//! a single async mutex; the first one through performs the refresh and
//! every caller that was already waiting receives the result of that same
//! refresh, success or failure. A refresh publishes a new [`Token`]; the
//! previous value is never mutated.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::sync::Mutex;

use crate::application::ports::{CredentialError, CredentialSource};
use crate::domain::auth::{AccessGrant, Token, TradingEnvironment};
use crate::infrastructure::metrics;

/// Default margin kept before a token's reported expiry.
pub const DEFAULT_EXPIRY_SKEW: Duration = Duration::from_secs(30);

/// Cached token plus its invalidation flag.
#[derive(Debug)]
struct CachedToken {
    token: Arc<Token>,
    invalidated: bool,
}

/// Outcome of the most recent refresh, guarded by the refresh gate.
#[derive(Debug, Default)]
struct RefreshRecord {
    last_error: Option<CredentialError>,
}

/// Single-flight access token cache.
pub struct TokenManager {
    environment: TradingEnvironment,
    source: Arc<dyn CredentialSource>,
    current: ArcSwapOption<CachedToken>,
    refresh_gate: Mutex<RefreshRecord>,
    /// Bumped after every completed refresh attempt.
    epoch: AtomicU64,
    expiry_skew: Duration,
}

impl TokenManager {
    /// Create a manager bound to `environment`.
    #[must_use]
    pub fn new(environment: TradingEnvironment, source: Arc<dyn CredentialSource>) -> Self {
        Self {
            environment,
            source,
            current: ArcSwapOption::empty(),
            refresh_gate: Mutex::new(RefreshRecord::default()),
            epoch: AtomicU64::new(0),
            expiry_skew: DEFAULT_EXPIRY_SKEW,
        }
    }

    /// Override the expiry margin.
    #[must_use]
    pub const fn with_expiry_skew(mut self, skew: Duration) -> Self {
        self.expiry_skew = skew;
        self
    }

    /// Seed the cache with an already-issued grant.
    #[must_use]
    pub fn with_initial_grant(self, grant: AccessGrant) -> Self {
        let token = Arc::new(Token::from_grant(grant, self.environment));
        self.current.store(Some(Arc::new(CachedToken {
            token,
            invalidated: false,
        })));
        self
    }

    /// Environment every token from this manager belongs to.
    #[must_use]
    pub const fn environment(&self) -> TradingEnvironment {
        self.environment
    }

    /// The cached token, whether or not it is still usable.
    #[must_use]
    pub fn cached(&self) -> Option<Arc<Token>> {
        self.current
            .load()
            .as_ref()
            .map(|cached| Arc::clone(&cached.token))
    }

    /// Return a valid token, refreshing it first if needed.
    pub async fn get_token(&self) -> Result<Arc<Token>, CredentialError> {
        if let Some(token) = self.usable() {
            return Ok(token);
        }

        let observed_epoch = self.epoch.load(Ordering::Acquire);
        let mut record = self.refresh_gate.lock().await;

        if let Some(token) = self.usable() {
            return Ok(token);
        }
        if self.epoch.load(Ordering::Acquire) != observed_epoch
            && let Some(err) = &record.last_error
        {
            return Err(err.clone());
        }

        self.refresh(&mut record).await
    }

    /// Force the next [`get_token`](Self::get_token) to refresh.
    pub fn invalidate(&self) {
        self.current.rcu(|current| {
            current.as_ref().map(|cached| {
                Arc::new(CachedToken {
                    token: Arc::clone(&cached.token),
                    invalidated: true,
                })
            })
        });
        tracing::debug!(environment = %self.environment, "Access token invalidated");
    }

    /// Invalidate only if `token` is still the cached one.
    ///
    /// A caller holding a stale token (already replaced by a concurrent
    /// refresh) does not throw away the fresh one.
    pub fn invalidate_token(&self, token: &Token) {
        let is_current = self
            .current
            .load()
            .as_ref()
            .is_some_and(|cached| cached.token.as_ref() == token);
        if is_current {
            self.invalidate();
        }
    }

    fn usable(&self) -> Option<Arc<Token>> {
        let guard = self.current.load();
        let cached = guard.as_ref()?;
        (!cached.invalidated && cached.token.is_fresh(self.expiry_skew))
            .then(|| Arc::clone(&cached.token))
    }

    async fn refresh(&self, record: &mut RefreshRecord) -> Result<Arc<Token>, CredentialError> {
        let result = self.source.refresh().await;
        self.epoch.fetch_add(1, Ordering::AcqRel);

        match result {
            Ok(grant) => {
                let token = Arc::new(Token::from_grant(grant, self.environment));
                if !token.is_fresh(self.expiry_skew) {
                    tracing::warn!(
                        environment = %self.environment,
                        expires_at = %token.expires_at(),
                        "Refreshed token expires within the skew window"
                    );
                }
                self.current.store(Some(Arc::new(CachedToken {
                    token: Arc::clone(&token),
                    invalidated: false,
                })));
                record.last_error = None;
                metrics::record_token_refresh(true);
                tracing::info!(
                    environment = %self.environment,
                    expires_at = %token.expires_at(),
                    "Access token refreshed"
                );
                Ok(token)
            }
            Err(err) => {
                record.last_error = Some(err.clone());
                metrics::record_token_refresh(false);
                tracing::warn!(
                    environment = %self.environment,
                    error = %err,
                    "Access token refresh failed"
                );
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("environment", &self.environment)
            .field("expiry_skew", &self.expiry_skew)
            .field("cached", &self.cached())
            .finish_non_exhaustive()
    }
}
