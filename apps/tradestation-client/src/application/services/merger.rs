//! Merger
//!
//! Combines per-chunk bar sequences into one strictly increasing
//! [`MergedResult`]. Chunks are concatenated in plan order. A bar that
//! repeats the previous chunk's last timestamp at the start of the next
//! chunk is the shared inclusive boundary and is dropped; any other
//! overlap or regression is reported, never repaired.

use chrono::{DateTime, Utc};

use super::parallel_fetcher::{ChunkOutcome, FetchReport};
use crate::application::ports::ChunkFetchError;
use crate::domain::bars::{Bar, MergedResult, TimeRange};

/// Why a chunk has no bars to merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The fetch failed.
    Error(ChunkFetchError),
    /// The fetch was cancelled.
    Cancelled,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error(err) => write!(f, "{err}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// A chunk that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedChunk {
    /// Position in the plan.
    pub index: usize,
    /// Requested range.
    pub range: TimeRange,
    /// Cause.
    pub reason: FailureReason,
}

/// A chunk that did succeed, kept so partial data is not lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkBars {
    /// Position in the plan.
    pub index: usize,
    /// Requested range.
    pub range: TimeRange,
    /// Bars as received.
    pub bars: Vec<Bar>,
}

/// Merge failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    /// Some chunks failed or were cancelled.
    #[error("{} of {total} chunks did not complete: {}", failed.len(), describe_failed(failed))]
    Incomplete {
        /// Chunks without data.
        failed: Vec<FailedChunk>,
        /// Chunks with data.
        partial: Vec<ChunkBars>,
        /// Chunks in the plan.
        total: usize,
    },

    /// Timestamps overlap or go backwards.
    #[error("ordering violation in chunk {chunk}: {offending} does not follow {previous}")]
    OrderingViolation {
        /// Chunk holding the offending bar.
        chunk: usize,
        /// Last accepted timestamp.
        previous: DateTime<Utc>,
        /// Offending timestamp.
        offending: DateTime<Utc>,
    },
}

impl MergeError {
    /// Ranges worth re-fetching; empty for ordering violations.
    #[must_use]
    pub fn failed_ranges(&self) -> Vec<TimeRange> {
        match self {
            Self::Incomplete { failed, .. } => failed.iter().map(|f| f.range).collect(),
            Self::OrderingViolation { .. } => Vec::new(),
        }
    }
}

fn describe_failed(failed: &[FailedChunk]) -> String {
    failed
        .iter()
        .map(|f| format!("#{} {} ({})", f.index, f.range, f.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Stateless chunk merger.
#[derive(Debug, Clone, Copy, Default)]
pub struct Merger;

impl Merger {
    /// Merge a fetch report. Every chunk must have succeeded.
    pub fn merge(report: FetchReport) -> Result<MergedResult, MergeError> {
        let total = report.chunks().len();
        let mut failed = Vec::new();
        let mut fetched = Vec::with_capacity(total);

        for chunk in report.into_chunks() {
            match chunk.outcome {
                ChunkOutcome::Fetched(bars) => fetched.push(ChunkBars {
                    index: chunk.index,
                    range: chunk.range,
                    bars,
                }),
                ChunkOutcome::Failed(err) => failed.push(FailedChunk {
                    index: chunk.index,
                    range: chunk.range,
                    reason: FailureReason::Error(err),
                }),
                ChunkOutcome::Cancelled => failed.push(FailedChunk {
                    index: chunk.index,
                    range: chunk.range,
                    reason: FailureReason::Cancelled,
                }),
            }
        }

        if !failed.is_empty() {
            return Err(MergeError::Incomplete {
                failed,
                partial: fetched,
                total,
            });
        }

        fetched.sort_by_key(|chunk| chunk.index);
        Self::merge_chunks(fetched.into_iter().map(|chunk| chunk.bars))
    }

    /// Merge bar sequences given in chunk order.
    pub fn merge_chunks<I>(chunks: I) -> Result<MergedResult, MergeError>
    where
        I: IntoIterator<Item = Vec<Bar>>,
    {
        let mut merged: Vec<Bar> = Vec::new();
        let mut dropped = 0usize;

        for (index, bars) in chunks.into_iter().enumerate() {
            let boundary = merged.last().map(|bar| bar.timestamp);
            merged.reserve(bars.len());

            for (position, bar) in bars.into_iter().enumerate() {
                if let Some(previous) = merged.last().map(|b| b.timestamp) {
                    if position == 0 && boundary == Some(bar.timestamp) {
                        dropped += 1;
                        continue;
                    }
                    if bar.timestamp <= previous {
                        return Err(MergeError::OrderingViolation {
                            chunk: index,
                            previous,
                            offending: bar.timestamp,
                        });
                    }
                }
                merged.push(bar);
            }
        }

        tracing::debug!(bars = merged.len(), boundary_duplicates = dropped, "Merged chunks");
        Ok(MergedResult::from_ordered(merged))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    use super::*;
    use crate::application::ports::TransportError;
    use crate::application::services::parallel_fetcher::ChunkReport;
    use crate::domain::bars::{BarUnit, test_bar};

    fn minute(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(n)
    }

    fn bars(minutes: &[i64]) -> Vec<Bar> {
        minutes.iter().map(|m| test_bar(minute(*m))).collect()
    }

    fn timestamps(result: &MergedResult) -> Vec<DateTime<Utc>> {
        result.bars().iter().map(|b| b.timestamp).collect()
    }

    fn range(from: i64, to: i64) -> TimeRange {
        TimeRange::new(minute(from), minute(to), BarUnit::Minute, 1).unwrap()
    }

    #[test]
    fn boundary_duplicates_keep_first_occurrence() {
        let mut first = bars(&[0, 1, 2]);
        first[2].volume = 1;
        let mut second = bars(&[2, 3, 4]);
        second[0].volume = 2;

        let merged = Merger::merge_chunks(vec![first, second]).unwrap();

        assert_eq!(timestamps(&merged), (0..=4).map(minute).collect::<Vec<_>>());
        assert_eq!(merged.bars()[2].volume, 1);
    }

    #[test]
    fn overlapping_chunks_are_an_ordering_violation() {
        let err = Merger::merge_chunks(vec![bars(&[0, 1, 2, 3]), bars(&[2, 3, 4])]).unwrap_err();
        assert_eq!(
            err,
            MergeError::OrderingViolation {
                chunk: 1,
                previous: minute(2),
                offending: minute(3),
            }
        );
    }

    #[test]
    fn out_of_order_chunk_is_an_ordering_violation() {
        let err = Merger::merge_chunks(vec![bars(&[5, 6]), bars(&[1, 2])]).unwrap_err();
        assert!(matches!(err, MergeError::OrderingViolation { chunk: 1, .. }));
    }

    #[test]
    fn duplicate_inside_a_chunk_is_not_repaired() {
        let err = Merger::merge_chunks(vec![bars(&[0, 1, 1, 2])]).unwrap_err();
        assert!(matches!(err, MergeError::OrderingViolation { chunk: 0, .. }));
    }

    #[test]
    fn empty_chunks_are_skipped() {
        let merged = Merger::merge_chunks(vec![bars(&[0, 1]), Vec::new(), bars(&[1, 2])]).unwrap();
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn incomplete_report_names_failed_ranges() {
        let report = FetchReport::new(
            vec![
                ChunkReport {
                    index: 0,
                    range: range(0, 10),
                    outcome: ChunkOutcome::Fetched(bars(&[0, 5, 10])),
                },
                ChunkReport {
                    index: 1,
                    range: range(10, 20),
                    outcome: ChunkOutcome::Failed(ChunkFetchError::Transport(
                        TransportError::Timeout { attempts: 3 },
                    )),
                },
                ChunkReport {
                    index: 2,
                    range: range(20, 30),
                    outcome: ChunkOutcome::Cancelled,
                },
            ],
            true,
        );

        let err = Merger::merge(report).unwrap_err();

        assert_eq!(err.failed_ranges(), vec![range(10, 20), range(20, 30)]);
        let MergeError::Incomplete { partial, total, .. } = &err else {
            panic!("expected incomplete");
        };
        assert_eq!(*total, 3);
        assert_eq!(partial.len(), 1);
        assert_eq!(partial[0].bars.len(), 3);
        assert!(err.to_string().contains("2 of 3 chunks"));
    }

    #[test]
    fn complete_report_merges_in_plan_order() {
        let report = FetchReport::new(
            vec![
                ChunkReport {
                    index: 0,
                    range: range(0, 2),
                    outcome: ChunkOutcome::Fetched(bars(&[0, 1, 2])),
                },
                ChunkReport {
                    index: 1,
                    range: range(2, 4),
                    outcome: ChunkOutcome::Fetched(bars(&[2, 3, 4])),
                },
            ],
            false,
        );

        let merged = Merger::merge(report).unwrap();

        assert_eq!(merged.coverage(), Some((minute(0), minute(4))));
        assert_eq!(merged.len(), 5);
    }

    proptest! {
        #[test]
        fn merge_is_idempotent_on_ordered_input(
            minutes in proptest::collection::btree_set(0i64..10_000, 0..200)
                .prop_map(|set| set.into_iter().collect::<Vec<_>>())
        ) {
            let input = bars(&minutes);
            let once = Merger::merge_chunks(vec![input.clone()]).unwrap();
            prop_assert_eq!(once.bars(), input.as_slice());
            let twice = Merger::merge_chunks(vec![once.clone().into_bars()]).unwrap();
            prop_assert_eq!(twice, once);
        }

        #[test]
        fn split_with_shared_boundaries_reassembles(
            minutes in proptest::collection::btree_set(0i64..10_000, 1..200)
                .prop_map(|set| set.into_iter().collect::<Vec<_>>()),
            cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..6),
        ) {
            let mut points: Vec<usize> = cuts.iter().map(|c| c.index(minutes.len())).collect();
            points.sort_unstable();
            points.dedup();

            // Each chunk repeats the last bar of the previous one.
            let mut chunks = Vec::new();
            let mut begin = 0;
            for point in points.into_iter().chain(std::iter::once(minutes.len() - 1)) {
                if point < begin {
                    continue;
                }
                chunks.push(bars(&minutes[begin..=point]));
                begin = point;
            }

            let merged = Merger::merge_chunks(chunks).unwrap();
            prop_assert_eq!(merged.into_bars(), bars(&minutes));
        }
    }
}
