//! TradeStation API request and response types.
//!
//! These types map directly to TradeStation's v3 JSON format, where most
//! numeric fields arrive as strings.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::domain::bars::Bar;

// ============================================================================
// Numbers
// ============================================================================

/// A number sent either as a JSON number or as a string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum WireNumber {
    /// JSON number.
    Number(serde_json::Number),
    /// Numeric string.
    Text(String),
}

impl WireNumber {
    fn raw(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.trim().to_string(),
        }
    }

    /// Parse as a decimal price.
    pub fn decimal(&self, field: &'static str) -> Result<Decimal, WireError> {
        let raw = self.raw();
        Decimal::from_str(&raw)
            .or_else(|_| Decimal::from_scientific(&raw))
            .map_err(|_| WireError::InvalidNumber { field, value: raw })
    }

    /// Parse as an unsigned count.
    pub fn count(&self, field: &'static str) -> Result<u64, WireError> {
        let raw = self.raw();
        raw.parse::<u64>()
            .ok()
            .or_else(|| {
                // Volumes occasionally arrive as "1234.0".
                Decimal::from_str(&raw)
                    .ok()
                    .filter(|d| d.fract().is_zero() && !d.is_sign_negative())
                    .and_then(|d| u64::try_from(d).ok())
            })
            .ok_or(WireError::InvalidNumber { field, value: raw })
    }
}

/// Wire conversion error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// A numeric field could not be parsed.
    #[error("invalid {field}: {value:?}")]
    InvalidNumber {
        /// Field name.
        field: &'static str,
        /// Raw value.
        value: String,
    },
}

// ============================================================================
// Bar Charts
// ============================================================================

/// One bar as returned by bar-chart endpoints and bar streams.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawBar {
    /// Bar timestamp.
    pub time_stamp: DateTime<Utc>,
    /// Open.
    pub open: WireNumber,
    /// High.
    pub high: WireNumber,
    /// Low.
    pub low: WireNumber,
    /// Close.
    pub close: WireNumber,
    /// Total volume.
    pub total_volume: WireNumber,
    /// Uptick volume.
    #[serde(default)]
    pub up_volume: Option<WireNumber>,
    /// Downtick volume.
    #[serde(default)]
    pub down_volume: Option<WireNumber>,
    /// Open interest.
    #[serde(default)]
    pub open_interest: Option<WireNumber>,
}

impl TryFrom<RawBar> for Bar {
    type Error = WireError;

    fn try_from(raw: RawBar) -> Result<Self, Self::Error> {
        Ok(Self {
            timestamp: raw.time_stamp,
            open: raw.open.decimal("Open")?,
            high: raw.high.decimal("High")?,
            low: raw.low.decimal("Low")?,
            close: raw.close.decimal("Close")?,
            volume: raw.total_volume.count("TotalVolume")?,
            up_volume: raw.up_volume.map(|v| v.count("UpVolume")).transpose()?,
            down_volume: raw.down_volume.map(|v| v.count("DownVolume")).transpose()?,
            open_interest: raw
                .open_interest
                .map(|v| v.count("OpenInterest"))
                .transpose()?,
        })
    }
}

/// Bar-chart response body.
#[derive(Debug, Clone, Deserialize)]
pub struct BarChartResponse {
    /// Bars in chronological order.
    #[serde(rename = "Bars", default)]
    pub bars: Vec<RawBar>,
}

impl BarChartResponse {
    /// Convert every bar, failing on the first malformed one.
    pub fn into_bars(self) -> Result<Vec<Bar>, WireError> {
        self.bars.into_iter().map(Bar::try_from).collect()
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Error body returned by REST and stream endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    /// Error code.
    #[serde(rename = "Error")]
    pub error: String,
    /// Description.
    #[serde(rename = "Message", default)]
    pub message: String,
}

impl ApiErrorBody {
    /// Render a response body as an error message, falling back to the raw text.
    #[must_use]
    pub fn describe(body: &str) -> String {
        match serde_json::from_str::<Self>(body) {
            Ok(err) if err.message.is_empty() => err.error,
            Ok(err) => format!("{}: {}", err.error, err.message),
            Err(_) => body.trim().to_string(),
        }
    }
}

// ============================================================================
// OAuth
// ============================================================================

/// Token endpoint success body.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// New access token.
    pub access_token: String,
    /// Lifetime in seconds.
    pub expires_in: u64,
    /// Rotated refresh token, when the issuer rotates.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Token endpoint error body.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenErrorResponse {
    /// OAuth error code.
    pub error: String,
    /// Description.
    #[serde(default)]
    pub error_description: Option<String>,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use test_case::test_case;

    use super::*;

    #[test]
    fn bar_chart_response_with_string_numbers() {
        let json = r#"{"Bars":[{
            "High":"218.32","Low":"212.42","Open":"216.5","Close":"215.8",
            "TimeStamp":"2023-01-03T21:00:00Z","TotalVolume":"24456578",
            "DownVolume":"100","UpVolume":"200","OpenInterest":"0",
            "IsRealtime":false,"BarStatus":"Closed"
        }]}"#;

        let bars = serde_json::from_str::<BarChartResponse>(json)
            .unwrap()
            .into_bars()
            .unwrap();

        assert_eq!(bars.len(), 1);
        let bar = &bars[0];
        assert_eq!(bar.timestamp, Utc.with_ymd_and_hms(2023, 1, 3, 21, 0, 0).unwrap());
        assert_eq!(bar.high, Decimal::new(21832, 2));
        assert_eq!(bar.volume, 24_456_578);
        assert_eq!(bar.up_volume, Some(200));
        assert_eq!(bar.open_interest, Some(0));
    }

    #[test]
    fn bar_chart_response_with_json_numbers_and_missing_extras() {
        let json = r#"{"Bars":[{
            "High":10.5,"Low":9,"Open":10,"Close":10.25,
            "TimeStamp":"2023-01-03T15:31:00Z","TotalVolume":1500
        }]}"#;

        let bars = serde_json::from_str::<BarChartResponse>(json)
            .unwrap()
            .into_bars()
            .unwrap();

        assert_eq!(bars[0].close, Decimal::new(1025, 2));
        assert_eq!(bars[0].down_volume, None);
    }

    #[test]
    fn missing_bars_array_is_empty() {
        let response: BarChartResponse = serde_json::from_str("{}").unwrap();
        assert!(response.into_bars().unwrap().is_empty());
    }

    #[test]
    fn malformed_price_is_reported() {
        let json = r#"{"Bars":[{
            "High":"n/a","Low":"1","Open":"1","Close":"1",
            "TimeStamp":"2023-01-03T15:31:00Z","TotalVolume":"1"
        }]}"#;
        let err = serde_json::from_str::<BarChartResponse>(json)
            .unwrap()
            .into_bars()
            .unwrap_err();
        assert_eq!(
            err,
            WireError::InvalidNumber {
                field: "High",
                value: "n/a".to_string()
            }
        );
    }

    #[test_case("1500", Some(1500) ; "integer string")]
    #[test_case("1500.0", Some(1500) ; "whole decimal string")]
    #[test_case("1500.5", None ; "fractional")]
    #[test_case("-3", None ; "negative")]
    fn counts(input: &str, expected: Option<u64>) {
        let number = WireNumber::Text(input.to_string());
        assert_eq!(number.count("TotalVolume").ok(), expected);
    }

    #[test_case(r#"{"Error":"BadRequest","Message":"Invalid symbol"}"#, "BadRequest: Invalid symbol")]
    #[test_case(r#"{"Error":"NotFound"}"#, "NotFound")]
    #[test_case("Service Unavailable ", "Service Unavailable")]
    fn error_descriptions(body: &str, expected: &str) {
        assert_eq!(ApiErrorBody::describe(body), expected);
    }
}
