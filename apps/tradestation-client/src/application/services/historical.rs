//! Historical Bars
//!
//! Entry point for bulk historical bar fetches: validate, plan, fetch in
//! parallel, merge. Failures come back typed so callers can tell a bad
//! request from bad credentials from a handful of ranges worth retrying.

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::chunk_planner::{ChunkPlanner, DEFAULT_MAX_BARS_PER_CALL, PlanError};
use super::merger::{ChunkBars, FailureReason, MergeError, Merger};
use super::parallel_fetcher::{FetchConfig, ParallelFetcher};
use crate::application::ports::ChunkSource;
use crate::domain::bars::{BarUnit, MergedResult, TimeRange, TimeRangeError};

// =============================================================================
// Request
// =============================================================================

/// A historical bar request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalRequest {
    /// Symbol.
    pub symbol: String,
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// Inclusive end; `None` means now.
    pub end: Option<DateTime<Utc>>,
    /// Bar unit.
    pub unit: BarUnit,
    /// Bar interval.
    pub interval: u32,
    /// Worker override.
    pub max_workers: Option<usize>,
    /// Per-call bar limit override.
    pub max_bars_per_call: Option<u32>,
    /// Session template (e.g. `USEQPreAndPost`).
    pub session_template: Option<String>,
}

impl HistoricalRequest {
    /// Request bars for `symbol` between `start` and `end`.
    #[must_use]
    pub fn new(
        symbol: impl Into<String>,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        unit: BarUnit,
        interval: u32,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            start,
            end,
            unit,
            interval,
            max_workers: None,
            max_bars_per_call: None,
            session_template: None,
        }
    }

    /// Override the worker count.
    #[must_use]
    pub const fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers);
        self
    }

    /// Override the per-call bar limit.
    #[must_use]
    pub const fn with_max_bars_per_call(mut self, limit: u32) -> Self {
        self.max_bars_per_call = Some(limit);
        self
    }

    /// Restrict to a session template.
    #[must_use]
    pub fn with_session_template(mut self, template: impl Into<String>) -> Self {
        self.session_template = Some(template.into());
        self
    }

    /// Resolve into a validated range, filling a missing end with `now`.
    pub fn time_range(&self, now: DateTime<Utc>) -> Result<TimeRange, HistoricalError> {
        if self.symbol.trim().is_empty() {
            return Err(HistoricalError::InvalidRequest("symbol is blank".to_string()));
        }
        if self.max_workers == Some(0) {
            return Err(HistoricalError::InvalidRequest(
                "worker count must be positive".to_string(),
            ));
        }
        Ok(TimeRange::new(
            self.start,
            self.end.unwrap_or(now),
            self.unit,
            self.interval,
        )?)
    }
}

// =============================================================================
// Errors
// =============================================================================

/// What a caller should do about a [`HistoricalError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// Retry the whole request later.
    RetryOperation,
    /// Retry only these ranges.
    RetryRanges(Vec<TimeRange>),
    /// Credentials are bad; stop.
    FixCredentials,
    /// The request itself is invalid.
    FixRequest,
}

/// Historical fetch failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoricalError {
    /// Request failed validation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Time range failed validation.
    #[error("invalid range: {0}")]
    Range(#[from] TimeRangeError),

    /// Planner rejected the bar limit.
    #[error("planning failed: {0}")]
    Plan(#[from] PlanError),

    /// Cancelled before every chunk completed.
    #[error("fetch cancelled with {} ranges outstanding", remaining.len())]
    Cancelled {
        /// Chunks that did complete.
        partial: Vec<ChunkBars>,
        /// Ranges still to fetch.
        remaining: Vec<TimeRange>,
    },

    /// Chunks failed or disagree.
    #[error(transparent)]
    Merge(#[from] MergeError),
}

impl HistoricalError {
    /// Classify the failure.
    #[must_use]
    pub fn recovery(&self) -> Recovery {
        match self {
            Self::InvalidRequest(_) | Self::Range(_) | Self::Plan(_) => Recovery::FixRequest,
            Self::Cancelled { remaining, .. } => Recovery::RetryRanges(remaining.clone()),
            Self::Merge(MergeError::OrderingViolation { .. }) => Recovery::RetryOperation,
            Self::Merge(err @ MergeError::Incomplete { failed, .. }) => {
                let bad_credentials = failed.iter().any(|f| {
                    matches!(&f.reason, FailureReason::Error(e) if e.is_credential_failure())
                });
                if bad_credentials {
                    Recovery::FixCredentials
                } else {
                    Recovery::RetryRanges(err.failed_ranges())
                }
            }
        }
    }
}

// =============================================================================
// Service
// =============================================================================

/// Plan, fetch and merge historical bars.
#[derive(Debug, Clone)]
pub struct HistoricalBars {
    fetch: FetchConfig,
    max_bars_per_call: u32,
}

impl Default for HistoricalBars {
    fn default() -> Self {
        Self::new(FetchConfig::default(), DEFAULT_MAX_BARS_PER_CALL)
    }
}

impl HistoricalBars {
    /// Create with default fetch settings and bar limit.
    #[must_use]
    pub const fn new(fetch: FetchConfig, max_bars_per_call: u32) -> Self {
        Self {
            fetch,
            max_bars_per_call,
        }
    }

    /// Fetch the bars for `request` from `source`.
    pub async fn fetch(
        &self,
        source: &dyn ChunkSource,
        request: &HistoricalRequest,
        cancel: &CancellationToken,
    ) -> Result<MergedResult, HistoricalError> {
        let range = request.time_range(Utc::now())?;
        let planner =
            ChunkPlanner::new(request.max_bars_per_call.unwrap_or(self.max_bars_per_call))?;
        let chunks = planner.plan(&range);

        let mut config = self.fetch.clone();
        if let Some(workers) = request.max_workers {
            config.max_workers = workers;
        }

        tracing::info!(
            symbol = %request.symbol,
            range = %range,
            chunks = chunks.len(),
            workers = config.max_workers,
            "Fetching historical bars"
        );

        let report = ParallelFetcher::new(config)
            .fetch(source, &chunks, cancel)
            .await;
        let cancelled = report.was_cancelled();

        match Merger::merge(report) {
            Ok(merged) => {
                tracing::info!(symbol = %request.symbol, bars = merged.len(), "Historical bars merged");
                Ok(merged)
            }
            Err(MergeError::Incomplete {
                failed, partial, ..
            }) if cancelled => Err(HistoricalError::Cancelled {
                partial,
                remaining: failed.into_iter().map(|f| f.range).collect(),
            }),
            Err(err) => {
                tracing::warn!(symbol = %request.symbol, error = %err, "Historical fetch incomplete");
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::application::ports::{ChunkFetchError, CredentialError, TransportError};
    use crate::domain::bars::{Bar, test_bar};

    fn minute(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(n)
    }

    /// One bar per minute inside each chunk's inclusive bounds.
    #[derive(Default)]
    struct MinuteSource {
        calls: AtomicUsize,
        fail_at: Option<DateTime<Utc>>,
        error: Option<ChunkFetchError>,
    }

    #[async_trait]
    impl ChunkSource for MinuteSource {
        async fn fetch_chunk(&self, chunk: &TimeRange) -> Result<Vec<Bar>, ChunkFetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_at == Some(chunk.start())
                && let Some(err) = &self.error
            {
                return Err(err.clone());
            }
            let mut bars = Vec::new();
            let mut at = chunk.start();
            while at <= chunk.end() {
                bars.push(test_bar(at));
                at += Duration::minutes(1);
            }
            Ok(bars)
        }
    }

    #[tokio::test]
    async fn chunked_fetch_matches_single_call() {
        let request = HistoricalRequest::new("MSFT", minute(0), Some(minute(95)), BarUnit::Minute, 1)
            .with_max_bars_per_call(20)
            .with_max_workers(3);
        let source = MinuteSource::default();

        let merged = HistoricalBars::default()
            .fetch(&source, &request, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 5);
        assert_eq!(merged.len(), 96);
        let single = source
            .fetch_chunk(&request.time_range(Utc::now()).unwrap())
            .await
            .unwrap();
        assert_eq!(merged.into_bars(), single);
    }

    #[tokio::test]
    async fn failed_chunk_yields_retryable_ranges() {
        let source = MinuteSource {
            fail_at: Some(minute(19)),
            error: Some(ChunkFetchError::Transport(TransportError::Timeout { attempts: 3 })),
            ..MinuteSource::default()
        };
        let request = HistoricalRequest::new("MSFT", minute(0), Some(minute(60)), BarUnit::Minute, 1)
            .with_max_bars_per_call(20);

        let err = HistoricalBars::default()
            .fetch(&source, &request, &CancellationToken::new())
            .await
            .unwrap_err();

        let Recovery::RetryRanges(ranges) = err.recovery() else {
            panic!("expected retryable ranges, got {err:?}");
        };
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].start(), minute(19));
        assert_eq!(ranges[0].end(), minute(38));
    }

    #[tokio::test]
    async fn credential_failures_stop_the_caller() {
        let source = MinuteSource {
            fail_at: Some(minute(0)),
            error: Some(ChunkFetchError::Credential(CredentialError::Rejected {
                status: 401,
                message: "invalid_grant".to_string(),
            })),
            ..MinuteSource::default()
        };
        let request = HistoricalRequest::new("MSFT", minute(0), Some(minute(10)), BarUnit::Minute, 1);

        let err = HistoricalBars::default()
            .fetch(&source, &request, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.recovery(), Recovery::FixCredentials);
    }

    #[tokio::test]
    async fn cancelled_fetch_reports_remaining_ranges() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let request = HistoricalRequest::new("MSFT", minute(0), Some(minute(60)), BarUnit::Minute, 1)
            .with_max_bars_per_call(20);

        let err = HistoricalBars::default()
            .fetch(&MinuteSource::default(), &request, &cancel)
            .await
            .unwrap_err();

        let HistoricalError::Cancelled { partial, remaining } = &err else {
            panic!("expected cancellation, got {err:?}");
        };
        assert!(partial.is_empty());
        assert_eq!(remaining.len(), 4);
        assert!(matches!(err.recovery(), Recovery::RetryRanges(r) if r.len() == 4));
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected_before_fetching() {
        let source = MinuteSource::default();
        let service = HistoricalBars::default();
        let cancel = CancellationToken::new();

        let inverted = HistoricalRequest::new("MSFT", minute(10), Some(minute(0)), BarUnit::Minute, 1);
        let err = service.fetch(&source, &inverted, &cancel).await.unwrap_err();
        assert_eq!(err.recovery(), Recovery::FixRequest);

        let blank = HistoricalRequest::new(" ", minute(0), Some(minute(1)), BarUnit::Minute, 1);
        assert!(matches!(
            service.fetch(&source, &blank, &cancel).await,
            Err(HistoricalError::InvalidRequest(_))
        ));

        let tiny = HistoricalRequest::new("MSFT", minute(0), Some(minute(1)), BarUnit::Minute, 1)
            .with_max_bars_per_call(1);
        assert!(matches!(
            service.fetch(&source, &tiny, &cancel).await,
            Err(HistoricalError::Plan(_))
        ));

        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn open_ended_request_runs_until_now() {
        let now = Utc::now();
        let request = HistoricalRequest::new("MSFT", minute(0), None, BarUnit::Daily, 1);
        assert_eq!(request.time_range(now).unwrap().end(), now);
    }
}
