//! Chunk Planner
//!
//! Splits a requested [`TimeRange`] into consecutive sub-ranges that each
//! stay within the provider's per-call bar limit.
//!
//! Bars are counted in the unit's base granularity (one per minute for
//! `Minute`, one per day for `Daily`, and so on) regardless of interval, so
//! the estimate never undercounts. Both bounds are inclusive at the
//! provider, which means a chunk spanning `n` base units can return `n + 1`
//! bars. Adjacent chunks share their boundary instant; the merger drops the
//! duplicate bar that lands on it.

use chrono::Duration;

use crate::domain::bars::TimeRange;

/// Provider maximum bars per bar-chart call.
pub const DEFAULT_MAX_BARS_PER_CALL: u32 = 57_600;

const SECONDS_PER_DAY: i64 = 86_400;

/// Planning error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// A chunk must be able to hold both of its inclusive bounds.
    #[error("bar limit per call must be at least 2, got {0}")]
    LimitTooSmall(u32),
}

/// Computes API-compliant chunk boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlanner {
    max_bars_per_call: u32,
}

impl Default for ChunkPlanner {
    fn default() -> Self {
        Self {
            max_bars_per_call: DEFAULT_MAX_BARS_PER_CALL,
        }
    }
}

impl ChunkPlanner {
    /// Create a planner for the given per-call limit.
    pub const fn new(max_bars_per_call: u32) -> Result<Self, PlanError> {
        if max_bars_per_call < 2 {
            return Err(PlanError::LimitTooSmall(max_bars_per_call));
        }
        Ok(Self { max_bars_per_call })
    }

    /// Per-call bar limit.
    #[must_use]
    pub const fn max_bars_per_call(&self) -> u32 {
        self.max_bars_per_call
    }

    /// Upper bound on the bars a single call over `range` can return.
    #[must_use]
    pub fn estimated_bars(range: &TimeRange) -> u64 {
        let base = range.unit().base_span().num_seconds().max(1);
        let span = range.span().num_seconds().max(0);
        span.unsigned_abs() / base.unsigned_abs() + 1
    }

    /// Longest chunk the limit allows for `range`'s unit.
    ///
    /// Spans of a day or more are cut to whole days.
    #[must_use]
    pub fn chunk_span(&self, range: &TimeRange) -> Duration {
        let base = range.unit().base_span().num_seconds();
        let seconds = base.saturating_mul(i64::from(self.max_bars_per_call - 1));
        let seconds = if seconds >= SECONDS_PER_DAY {
            seconds - seconds % SECONDS_PER_DAY
        } else {
            seconds
        };
        Duration::try_seconds(seconds).unwrap_or(Duration::MAX)
    }

    /// Plan the chunks covering `range`, in chronological order.
    ///
    /// The first chunk starts at `range.start()`, the last ends at
    /// `range.end()`, and every chunk ends exactly where the next begins.
    #[must_use]
    pub fn plan(&self, range: &TimeRange) -> Vec<TimeRange> {
        let span = self.chunk_span(range);
        let mut chunks = Vec::new();
        let mut cursor = range.start();

        loop {
            let next = cursor
                .checked_add_signed(span)
                .map_or(range.end(), |t| t.min(range.end()));
            chunks.push(range.slice(cursor, next));
            if next >= range.end() {
                break;
            }
            cursor = next;
        }

        tracing::debug!(
            range = %range,
            chunks = chunks.len(),
            max_bars_per_call = self.max_bars_per_call,
            "Planned bar-chart chunks"
        );
        chunks
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;

    use super::*;
    use crate::domain::bars::BarUnit;

    fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn assert_tiles(range: &TimeRange, chunks: &[TimeRange]) {
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].start(), range.start());
        assert_eq!(chunks[chunks.len() - 1].end(), range.end());
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end(), pair[1].start(), "gap or overlap between chunks");
            assert!(pair[0].start() < pair[0].end(), "empty chunk in multi-chunk plan");
        }
        for chunk in chunks {
            assert_eq!(chunk.unit(), range.unit());
            assert_eq!(chunk.interval(), range.interval());
        }
    }

    #[test]
    fn rejects_degenerate_limits() {
        assert_eq!(ChunkPlanner::new(0), Err(PlanError::LimitTooSmall(0)));
        assert_eq!(ChunkPlanner::new(1), Err(PlanError::LimitTooSmall(1)));
        assert!(ChunkPlanner::new(2).is_ok());
    }

    #[test]
    fn five_minute_bars_over_five_months_need_several_chunks() {
        let range = TimeRange::new(date(2023, 1, 1), date(2023, 6, 1), BarUnit::Minute, 5).unwrap();
        let planner = ChunkPlanner::new(57_600).unwrap();

        let chunks = planner.plan(&range);

        assert!(chunks.len() > 1);
        assert_eq!(chunks.len(), 4);
        assert_eq!(planner.chunk_span(&range), Duration::days(39));
        assert_tiles(&range, &chunks);
    }

    #[test]
    fn small_range_yields_single_chunk() {
        let range = TimeRange::new(date(2023, 1, 2), date(2023, 1, 3), BarUnit::Minute, 1).unwrap();
        let chunks = ChunkPlanner::default().plan(&range);
        assert_eq!(chunks, vec![range]);
    }

    #[test]
    fn daily_bars_over_decades_fit_one_chunk() {
        let range = TimeRange::new(date(1990, 1, 1), date(2024, 1, 1), BarUnit::Daily, 1).unwrap();
        assert_eq!(ChunkPlanner::default().plan(&range).len(), 1);
    }

    #[test]
    fn instant_range_yields_single_chunk() {
        let range = TimeRange::new(date(2023, 1, 2), date(2023, 1, 2), BarUnit::Minute, 1).unwrap();
        assert_eq!(ChunkPlanner::default().plan(&range), vec![range]);
    }

    #[test]
    fn sub_day_spans_stay_minute_granular() {
        let planner = ChunkPlanner::new(11).unwrap();
        let range = TimeRange::new(
            date(2023, 1, 2),
            date(2023, 1, 2) + Duration::minutes(25),
            BarUnit::Minute,
            1,
        )
        .unwrap();

        let chunks = planner.plan(&range);

        assert_eq!(planner.chunk_span(&range), Duration::minutes(10));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].span(), Duration::minutes(5));
        assert_tiles(&range, &chunks);
    }

    #[test]
    fn estimated_bars_counts_inclusive_bounds() {
        let range = TimeRange::new(
            date(2023, 1, 2),
            date(2023, 1, 2) + Duration::minutes(10),
            BarUnit::Minute,
            1,
        )
        .unwrap();
        assert_eq!(ChunkPlanner::estimated_bars(&range), 11);
    }

    fn unit_strategy() -> impl Strategy<Value = BarUnit> {
        prop_oneof![
            Just(BarUnit::Minute),
            Just(BarUnit::Daily),
            Just(BarUnit::Weekly),
            Just(BarUnit::Monthly),
        ]
    }

    proptest! {
        #[test]
        fn plan_tiles_range_within_limit(
            start_secs in 946_684_800i64..1_893_456_000i64,
            span_secs in 0i64..(400 * SECONDS_PER_DAY),
            unit in unit_strategy(),
            limit in 60u32..100_000,
        ) {
            let start = Utc.timestamp_opt(start_secs, 0).unwrap();
            let end = start + Duration::seconds(span_secs);
            let range = TimeRange::new(start, end, unit, 1).unwrap();
            let planner = ChunkPlanner::new(limit).unwrap();

            let chunks = planner.plan(&range);

            prop_assert!(!chunks.is_empty());
            prop_assert_eq!(chunks[0].start(), range.start());
            prop_assert_eq!(chunks[chunks.len() - 1].end(), range.end());
            for pair in chunks.windows(2) {
                prop_assert_eq!(pair[0].end(), pair[1].start());
                prop_assert!(pair[0].start() < pair[0].end());
            }
            for chunk in &chunks {
                prop_assert!(ChunkPlanner::estimated_bars(chunk) <= u64::from(limit));
            }
        }
    }
}
