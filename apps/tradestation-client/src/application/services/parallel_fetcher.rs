//! Parallel Fetcher
//!
//! Fetches planned chunks concurrently through a [`ChunkSource`], bounded by
//! a worker limit. Chunks are dispatched in plan order; completions arrive in
//! any order and land in a per-index slot, so the report is always in plan
//! order. One chunk failing never cancels its siblings.

use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{ChunkFetchError, ChunkSource};
use crate::domain::bars::{Bar, TimeRange};
use crate::infrastructure::metrics;

/// Default number of concurrent chunk requests.
pub const DEFAULT_MAX_WORKERS: usize = 10;

// =============================================================================
// Configuration
// =============================================================================

/// What happens to in-flight chunks once cancellation is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancelPolicy {
    /// Let in-flight requests finish and keep their results.
    #[default]
    Drain,
    /// Drop in-flight requests and mark them cancelled.
    Abandon,
}

/// Parallel fetch configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    /// Maximum concurrent chunk requests (minimum 1).
    pub max_workers: usize,
    /// Handling of in-flight requests on cancellation.
    pub cancel_policy: CancelPolicy,
    /// Extra attempts for a chunk that comes back empty.
    pub empty_chunk_retries: u32,
    /// Base delay between empty-chunk attempts (multiplied by attempt number).
    pub empty_chunk_backoff: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            cancel_policy: CancelPolicy::Drain,
            empty_chunk_retries: 2,
            empty_chunk_backoff: Duration::from_millis(500),
        }
    }
}

// =============================================================================
// Report
// =============================================================================

/// Result of a single chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    /// Bars received (possibly none).
    Fetched(Vec<Bar>),
    /// Fetch failed after the transport's retries.
    Failed(ChunkFetchError),
    /// Never dispatched, or abandoned, because of cancellation.
    Cancelled,
}

impl ChunkOutcome {
    const fn label(&self) -> &'static str {
        match self {
            Self::Fetched(_) => "fetched",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One chunk's slot in a [`FetchReport`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkReport {
    /// Position in the plan.
    pub index: usize,
    /// Requested range.
    pub range: TimeRange,
    /// What happened.
    pub outcome: ChunkOutcome,
}

/// Per-chunk results of a parallel fetch, in plan order.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchReport {
    chunks: Vec<ChunkReport>,
    cancelled: bool,
}

impl FetchReport {
    /// Build a report from per-chunk results already in plan order.
    #[must_use]
    pub const fn new(chunks: Vec<ChunkReport>, cancelled: bool) -> Self {
        Self { chunks, cancelled }
    }

    /// All chunk reports.
    #[must_use]
    pub fn chunks(&self) -> &[ChunkReport] {
        &self.chunks
    }

    /// Consume into chunk reports.
    #[must_use]
    pub fn into_chunks(self) -> Vec<ChunkReport> {
        self.chunks
    }

    /// Chunks that returned bars.
    pub fn succeeded(&self) -> impl Iterator<Item = (&TimeRange, &[Bar])> {
        self.chunks.iter().filter_map(|c| match &c.outcome {
            ChunkOutcome::Fetched(bars) => Some((&c.range, bars.as_slice())),
            _ => None,
        })
    }

    /// Chunks that did not return bars, failed or cancelled.
    pub fn failed(&self) -> impl Iterator<Item = &ChunkReport> {
        self.chunks
            .iter()
            .filter(|c| !matches!(c.outcome, ChunkOutcome::Fetched(_)))
    }

    /// Ranges of chunks that did not return bars.
    #[must_use]
    pub fn failed_ranges(&self) -> Vec<TimeRange> {
        self.failed().map(|c| c.range).collect()
    }

    /// Number of successful chunks.
    #[must_use]
    pub fn succeeded_count(&self) -> usize {
        self.succeeded().count()
    }

    /// Number of unsuccessful chunks.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }

    /// Whether every chunk returned bars.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed_count() == 0
    }

    /// Whether cancellation was observed during the fetch.
    #[must_use]
    pub const fn was_cancelled(&self) -> bool {
        self.cancelled
    }
}

// =============================================================================
// Fetcher
// =============================================================================

/// Bounded-concurrency chunk fetcher.
#[derive(Debug, Clone, Default)]
pub struct ParallelFetcher {
    config: FetchConfig,
}

impl ParallelFetcher {
    /// Create a fetcher.
    #[must_use]
    pub const fn new(config: FetchConfig) -> Self {
        Self { config }
    }

    /// Fetcher configuration.
    #[must_use]
    pub const fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch every chunk, collecting successes and failures.
    pub async fn fetch(
        &self,
        source: &dyn ChunkSource,
        chunks: &[TimeRange],
        cancel: &CancellationToken,
    ) -> FetchReport {
        let workers = self.config.max_workers.max(1);
        let started = Instant::now();
        let mut slots: Vec<Option<ChunkOutcome>> = vec![None; chunks.len()];

        let mut completions = stream::iter(chunks.iter().enumerate())
            .map(|(index, chunk)| async move {
                (index, self.fetch_one(source, index, chunk, cancel).await)
            })
            .buffer_unordered(workers);

        while let Some((index, outcome)) = completions.next().await {
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(outcome);
            }
        }

        let reports: Vec<ChunkReport> = chunks
            .iter()
            .zip(slots)
            .enumerate()
            .map(|(index, (range, outcome))| ChunkReport {
                index,
                range: *range,
                outcome: outcome.unwrap_or(ChunkOutcome::Cancelled),
            })
            .collect();
        let report = FetchReport::new(reports, cancel.is_cancelled());

        tracing::info!(
            chunks = chunks.len(),
            workers,
            succeeded = report.succeeded_count(),
            failed = report.failed_count(),
            cancelled = report.was_cancelled(),
            elapsed_ms = started.elapsed().as_millis(),
            "Parallel chunk fetch finished"
        );
        report
    }

    async fn fetch_one(
        &self,
        source: &dyn ChunkSource,
        index: usize,
        chunk: &TimeRange,
        cancel: &CancellationToken,
    ) -> ChunkOutcome {
        if cancel.is_cancelled() {
            tracing::debug!(chunk = index, "Skipping chunk dispatch after cancellation");
            return ChunkOutcome::Cancelled;
        }

        tracing::debug!(chunk = index, range = %chunk, "Dispatching chunk");
        let started = Instant::now();
        let work = self.fetch_until_non_empty(source, index, chunk);

        let outcome = match self.config.cancel_policy {
            CancelPolicy::Drain => to_outcome(work.await),
            CancelPolicy::Abandon => tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::debug!(chunk = index, "Abandoning in-flight chunk");
                    ChunkOutcome::Cancelled
                }
                result = work => to_outcome(result),
            },
        };

        if let ChunkOutcome::Failed(err) = &outcome {
            tracing::warn!(chunk = index, range = %chunk, error = %err, "Chunk fetch failed");
        }
        metrics::record_chunk(outcome.label(), started.elapsed());
        outcome
    }

    async fn fetch_until_non_empty(
        &self,
        source: &dyn ChunkSource,
        index: usize,
        chunk: &TimeRange,
    ) -> Result<Vec<Bar>, ChunkFetchError> {
        let mut attempt = 0;
        loop {
            let bars = source.fetch_chunk(chunk).await?;
            if !bars.is_empty() || attempt >= self.config.empty_chunk_retries {
                return Ok(bars);
            }
            attempt += 1;
            let delay = self.config.empty_chunk_backoff * attempt;
            tracing::debug!(
                chunk = index,
                attempt,
                delay_ms = delay.as_millis(),
                "Chunk returned no bars, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn to_outcome(result: Result<Vec<Bar>, ChunkFetchError>) -> ChunkOutcome {
    match result {
        Ok(bars) => ChunkOutcome::Fetched(bars),
        Err(err) => ChunkOutcome::Failed(err),
    }
}
