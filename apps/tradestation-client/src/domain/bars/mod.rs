//! Bar Types
//!
//! Time ranges, bar units and OHLCV bars for historical and streaming
//! bar-chart data.
//!
//! # Invariants
//!
//! - A [`TimeRange`] always has `start <= end` and a positive interval.
//! - A [`MergedResult`] is strictly increasing by timestamp.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Largest minute interval the provider accepts.
pub const MAX_MINUTE_INTERVAL: u32 = 1440;

// =============================================================================
// Bar Unit
// =============================================================================

/// Bar unit as understood by the bar-chart endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BarUnit {
    /// Intraday minute bars.
    Minute,
    /// Daily bars.
    Daily,
    /// Weekly bars.
    Weekly,
    /// Monthly bars.
    Monthly,
}

impl BarUnit {
    /// Name used in request parameters.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Minute => "Minute",
            Self::Daily => "Daily",
            Self::Weekly => "Weekly",
            Self::Monthly => "Monthly",
        }
    }

    /// Shortest wall-clock span covered by one bar at interval 1.
    ///
    /// Monthly uses 28 days so bar counts are never underestimated.
    #[must_use]
    pub fn base_span(&self) -> Duration {
        match self {
            Self::Minute => Duration::minutes(1),
            Self::Daily => Duration::days(1),
            Self::Weekly => Duration::days(7),
            Self::Monthly => Duration::days(28),
        }
    }
}

impl std::fmt::Display for BarUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BarUnit {
    type Err = TimeRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "minute" | "min" => Ok(Self::Minute),
            "daily" | "day" => Ok(Self::Daily),
            "weekly" | "week" => Ok(Self::Weekly),
            "monthly" | "month" => Ok(Self::Monthly),
            _ => Err(TimeRangeError::UnknownUnit(s.to_string())),
        }
    }
}

// =============================================================================
// Time Range
// =============================================================================

/// Errors constructing a [`TimeRange`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeRangeError {
    /// Start is after end.
    #[error("range start {start} is after end {end}")]
    StartAfterEnd {
        /// Requested start.
        start: DateTime<Utc>,
        /// Requested end.
        end: DateTime<Utc>,
    },
    /// Interval is zero.
    #[error("interval must be positive")]
    ZeroInterval,
    /// Minute interval above the provider maximum.
    #[error("minute interval {0} exceeds {MAX_MINUTE_INTERVAL}")]
    IntervalTooLarge(u32),
    /// Unit string not recognised.
    #[error("unknown bar unit: {0}")]
    UnknownUnit(String),
}

/// A bar-chart request window. Both bounds are inclusive at the provider.
///
/// Deserialization goes through [`TimeRange::new`], so a decoded range holds
/// the same invariants as a constructed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTimeRange")]
pub struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    unit: BarUnit,
    interval: u32,
}

/// Unvalidated wire shape of a [`TimeRange`].
#[derive(Deserialize)]
struct RawTimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    unit: BarUnit,
    interval: u32,
}

impl TryFrom<RawTimeRange> for TimeRange {
    type Error = TimeRangeError;

    fn try_from(raw: RawTimeRange) -> Result<Self, Self::Error> {
        Self::new(raw.start, raw.end, raw.unit, raw.interval)
    }
}

impl TimeRange {
    /// Create a validated time range.
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        unit: BarUnit,
        interval: u32,
    ) -> Result<Self, TimeRangeError> {
        if start > end {
            return Err(TimeRangeError::StartAfterEnd { start, end });
        }
        if interval == 0 {
            return Err(TimeRangeError::ZeroInterval);
        }
        if unit == BarUnit::Minute && interval > MAX_MINUTE_INTERVAL {
            return Err(TimeRangeError::IntervalTooLarge(interval));
        }
        Ok(Self {
            start,
            end,
            unit,
            interval,
        })
    }

    /// Sub-range with the same unit and interval.
    ///
    /// Bounds are clamped into this range and ordered.
    #[must_use]
    pub fn slice(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let start = start.clamp(self.start, self.end);
        let end = end.clamp(start, self.end);
        Self {
            start,
            end,
            unit: self.unit,
            interval: self.interval,
        }
    }

    /// Inclusive start.
    #[must_use]
    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Inclusive end.
    #[must_use]
    pub const fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Bar unit.
    #[must_use]
    pub const fn unit(&self) -> BarUnit {
        self.unit
    }

    /// Bar interval in units.
    #[must_use]
    pub const fn interval(&self) -> u32 {
        self.interval
    }

    /// Wall-clock length.
    #[must_use]
    pub fn span(&self) -> Duration {
        self.end - self.start
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}..={} ({}x{})",
            self.start.to_rfc3339(),
            self.end.to_rfc3339(),
            self.interval,
            self.unit
        )
    }
}

// =============================================================================
// Bars
// =============================================================================

/// One OHLCV bar. Identity is the timestamp within a symbol/unit/interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    /// Bar close time.
    pub timestamp: DateTime<Utc>,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Total volume.
    pub volume: u64,
    /// Volume on upticks.
    pub up_volume: Option<u64>,
    /// Volume on downticks.
    pub down_volume: Option<u64>,
    /// Open interest (futures and options).
    pub open_interest: Option<u64>,
}

/// Ordered, duplicate-free bar sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedResult {
    bars: Vec<Bar>,
}

impl MergedResult {
    /// Wrap bars already known to be strictly increasing.
    pub(crate) const fn from_ordered(bars: Vec<Bar>) -> Self {
        Self { bars }
    }

    /// Bars in timestamp order.
    #[must_use]
    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    /// Consume into the bar vector.
    #[must_use]
    pub fn into_bars(self) -> Vec<Bar> {
        self.bars
    }

    /// Number of bars.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    /// Whether there are no bars.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Timestamp of the first and last bar.
    #[must_use]
    pub fn coverage(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((self.bars.first()?.timestamp, self.bars.last()?.timestamp))
    }
}

/// Flat bar at `timestamp` for tests.
#[cfg(test)]
pub(crate) fn test_bar(timestamp: DateTime<Utc>) -> Bar {
    let price = Decimal::new(10_000, 2);
    Bar {
        timestamp,
        open: price,
        high: price,
        low: price,
        close: price,
        volume: 100,
        up_volume: None,
        down_volume: None,
        open_interest: None,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use test_case::test_case;

    use super::*;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn range_rejects_inverted_bounds() {
        let err = TimeRange::new(ts(5), ts(1), BarUnit::Daily, 1).unwrap_err();
        assert!(matches!(err, TimeRangeError::StartAfterEnd { .. }));
    }

    #[test]
    fn range_rejects_bad_intervals() {
        assert_eq!(
            TimeRange::new(ts(1), ts(2), BarUnit::Minute, 0).unwrap_err(),
            TimeRangeError::ZeroInterval
        );
        assert_eq!(
            TimeRange::new(ts(1), ts(2), BarUnit::Minute, 1441).unwrap_err(),
            TimeRangeError::IntervalTooLarge(1441)
        );
        assert!(TimeRange::new(ts(1), ts(2), BarUnit::Minute, 1440).is_ok());
    }

    #[test]
    fn range_allows_single_instant() {
        let range = TimeRange::new(ts(1), ts(1), BarUnit::Daily, 1).unwrap();
        assert_eq!(range.span(), Duration::zero());
        assert_eq!(range.start(), range.end());
    }

    #[test]
    fn deserialized_range_keeps_its_bounds() {
        let range = TimeRange::new(ts(1), ts(5), BarUnit::Minute, 5).unwrap();
        let json = serde_json::to_string(&range).unwrap();
        assert_eq!(serde_json::from_str::<TimeRange>(&json).unwrap(), range);
    }

    #[test_case(
        r#"{"start":"2023-06-01T00:00:00Z","end":"2023-01-01T00:00:00Z","unit":"Minute","interval":1}"#,
        "is after end";
        "inverted bounds"
    )]
    #[test_case(
        r#"{"start":"2023-01-01T00:00:00Z","end":"2023-06-01T00:00:00Z","unit":"Minute","interval":0}"#,
        "interval must be positive";
        "zero interval"
    )]
    #[test_case(
        r#"{"start":"2023-01-01T00:00:00Z","end":"2023-06-01T00:00:00Z","unit":"Minute","interval":1441}"#,
        "exceeds 1440";
        "minute interval too large"
    )]
    fn deserializing_invalid_range_fails(json: &str, reason: &str) {
        let err = serde_json::from_str::<TimeRange>(json).unwrap_err();
        assert!(err.to_string().contains(reason), "unexpected error: {err}");
    }

    #[test]
    fn slice_keeps_unit_and_clamps() {
        let range = TimeRange::new(ts(2), ts(10), BarUnit::Minute, 5).unwrap();
        let slice = range.slice(ts(1), ts(20));
        assert_eq!(slice.start(), ts(2));
        assert_eq!(slice.end(), ts(10));
        assert_eq!(slice.unit(), BarUnit::Minute);
        assert_eq!(slice.interval(), 5);
    }

    #[test_case("Minute", BarUnit::Minute)]
    #[test_case("daily", BarUnit::Daily)]
    #[test_case("WEEK", BarUnit::Weekly)]
    #[test_case("monthly", BarUnit::Monthly)]
    fn unit_parsing(input: &str, expected: BarUnit) {
        assert_eq!(input.parse::<BarUnit>().unwrap(), expected);
    }

    #[test]
    fn unit_parsing_rejects_unknown() {
        assert!(matches!(
            "tick".parse::<BarUnit>(),
            Err(TimeRangeError::UnknownUnit(_))
        ));
    }

    #[test]
    fn merged_result_coverage() {
        assert_eq!(MergedResult::default().coverage(), None);
    }
}
