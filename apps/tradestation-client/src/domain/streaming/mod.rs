//! Streaming Types
//!
//! Subscriptions, decoded stream messages and the connection lifecycle of a
//! streaming session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bars::{Bar, BarUnit, MAX_MINUTE_INTERVAL};

/// Most symbols accepted by one quote stream.
pub const MAX_QUOTE_SYMBOLS: usize = 100;

/// Most accounts accepted by one order stream.
pub const MAX_STREAM_ACCOUNTS: usize = 100;

/// Most orders accepted by one order-by-id stream.
pub const MAX_STREAM_ORDERS: usize = 100;

/// Most bars a bar-chart request may ask for by count.
pub const MAX_BARS_BACK: u32 = 57_600;

/// Deepest book level the market depth streams serve.
pub const MAX_DEPTH_LEVELS: u32 = 20;

// =============================================================================
// Subscriptions
// =============================================================================

/// Data kind carried by a subscription's payload frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Bar-chart updates.
    Bar,
    /// Quote updates.
    Quote,
    /// Order status updates.
    Order,
}

/// Errors building a [`Subscription`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// No symbols or accounts given.
    #[error("subscription needs at least one {0}")]
    Empty(&'static str),
    /// Too many symbols or accounts.
    #[error("subscription allows at most {max} {what}, got {got}")]
    TooMany {
        /// What was counted.
        what: &'static str,
        /// Limit.
        max: usize,
        /// Requested count.
        got: usize,
    },
    /// A symbol or account is blank.
    #[error("blank {0} in subscription")]
    Blank(&'static str),
    /// Interval out of range.
    #[error("invalid interval {0}")]
    InvalidInterval(u32),
    /// Bars-back out of range.
    #[error("bars back must be within 1..={MAX_BARS_BACK}, got {0}")]
    InvalidBarsBack(u32),
    /// Depth levels out of range.
    #[error("depth levels must be within 1..={MAX_DEPTH_LEVELS}, got {0}")]
    InvalidDepthLevels(u32),
}

/// Which view of the order book a depth stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthView {
    /// Individual quotes per price level (Level II).
    Quotes,
    /// Quotes aggregated per price level.
    Aggregates,
}

impl DepthView {
    const fn segment(self) -> &'static str {
        match self {
            Self::Quotes => "quotes",
            Self::Aggregates => "aggregates",
        }
    }
}

/// What a streaming session subscribes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subscription {
    /// Live bar-chart updates for one symbol.
    Bars {
        /// Symbol.
        symbol: String,
        /// Bar unit.
        unit: BarUnit,
        /// Bar interval.
        interval: u32,
        /// Number of historical bars to replay before live updates.
        bars_back: Option<u32>,
        /// Session template (e.g. `USEQPreAndPost`).
        session_template: Option<String>,
    },
    /// Quote updates for up to 100 symbols.
    Quotes {
        /// Symbols.
        symbols: Vec<String>,
    },
    /// Order book updates for one symbol, delivered as quotes.
    MarketDepth {
        /// Symbol.
        symbol: String,
        /// Per-level quotes or per-level aggregates.
        view: DepthView,
        /// Levels per side.
        max_levels: u32,
    },
    /// Order updates for up to 100 accounts.
    Orders {
        /// Account identifiers.
        accounts: Vec<String>,
    },
    /// Updates for specific orders in up to 100 accounts.
    OrdersById {
        /// Account identifiers.
        accounts: Vec<String>,
        /// Order identifiers.
        order_ids: Vec<String>,
    },
}

impl Subscription {
    /// Bar-chart subscription.
    pub fn bars(
        symbol: impl Into<String>,
        unit: BarUnit,
        interval: u32,
    ) -> Result<Self, SubscriptionError> {
        let symbol = symbol.into();
        if symbol.trim().is_empty() {
            return Err(SubscriptionError::Blank("symbol"));
        }
        if interval == 0 || (unit == BarUnit::Minute && interval > MAX_MINUTE_INTERVAL) {
            return Err(SubscriptionError::InvalidInterval(interval));
        }
        Ok(Self::Bars {
            symbol,
            unit,
            interval,
            bars_back: None,
            session_template: None,
        })
    }

    /// Quote subscription.
    pub fn quotes<I, S>(symbols: I) -> Result<Self, SubscriptionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let symbols = collect_ids(symbols, "symbol", MAX_QUOTE_SYMBOLS)?;
        Ok(Self::Quotes { symbols })
    }

    /// Market depth subscription at the full book depth.
    pub fn market_depth(
        symbol: impl Into<String>,
        view: DepthView,
    ) -> Result<Self, SubscriptionError> {
        let symbol = symbol.into();
        if symbol.trim().is_empty() {
            return Err(SubscriptionError::Blank("symbol"));
        }
        Ok(Self::MarketDepth {
            symbol,
            view,
            max_levels: MAX_DEPTH_LEVELS,
        })
    }

    /// Order-by-id subscription.
    pub fn orders_by_id<A, I, S, T>(accounts: A, order_ids: I) -> Result<Self, SubscriptionError>
    where
        A: IntoIterator<Item = S>,
        S: Into<String>,
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let accounts = collect_ids(accounts, "account", MAX_STREAM_ACCOUNTS)?;
        let order_ids = collect_ids(order_ids, "order id", MAX_STREAM_ORDERS)?;
        Ok(Self::OrdersById {
            accounts,
            order_ids,
        })
    }

    /// Order subscription.
    pub fn orders<I, S>(accounts: I) -> Result<Self, SubscriptionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let accounts = collect_ids(accounts, "account", MAX_STREAM_ACCOUNTS)?;
        Ok(Self::Orders { accounts })
    }

    /// Replay `count` historical bars first. Only meaningful for bar streams.
    pub fn with_bars_back(mut self, count: u32) -> Result<Self, SubscriptionError> {
        if count == 0 || count > MAX_BARS_BACK {
            return Err(SubscriptionError::InvalidBarsBack(count));
        }
        if let Self::Bars { bars_back, .. } = &mut self {
            *bars_back = Some(count);
        }
        Ok(self)
    }

    /// Limit a depth stream to `levels` per side.
    pub fn with_max_levels(mut self, levels: u32) -> Result<Self, SubscriptionError> {
        if levels == 0 || levels > MAX_DEPTH_LEVELS {
            return Err(SubscriptionError::InvalidDepthLevels(levels));
        }
        if let Self::MarketDepth { max_levels, .. } = &mut self {
            *max_levels = levels;
        }
        Ok(self)
    }

    /// Restrict a bar stream to a session template.
    #[must_use]
    pub fn with_session_template(mut self, template: impl Into<String>) -> Self {
        if let Self::Bars {
            session_template, ..
        } = &mut self
        {
            *session_template = Some(template.into());
        }
        self
    }

    /// Payload kind of this subscription.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Bars { .. } => MessageKind::Bar,
            Self::Quotes { .. } | Self::MarketDepth { .. } => MessageKind::Quote,
            Self::Orders { .. } | Self::OrdersById { .. } => MessageKind::Order,
        }
    }

    /// Symbol implied by the endpoint for streams whose frames omit it.
    #[must_use]
    pub fn implied_symbol(&self) -> Option<&str> {
        match self {
            Self::MarketDepth { symbol, .. } => Some(symbol),
            _ => None,
        }
    }

    /// Endpoint path relative to the API base URL.
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            Self::Bars { symbol, .. } => format!("/marketdata/stream/barcharts/{symbol}"),
            Self::Quotes { symbols } => format!("/marketdata/stream/quotes/{}", symbols.join(",")),
            Self::MarketDepth { symbol, view, .. } => {
                format!("/marketdata/stream/marketdepth/{}/{symbol}", view.segment())
            }
            Self::Orders { accounts } => {
                format!("/brokerage/stream/accounts/{}/orders", accounts.join(","))
            }
            Self::OrdersById {
                accounts,
                order_ids,
            } => format!(
                "/brokerage/stream/accounts/{}/orders/{}",
                accounts.join(","),
                order_ids.join(",")
            ),
        }
    }

    /// Query parameters for the stream request.
    #[must_use]
    pub fn query(&self) -> Vec<(String, String)> {
        match self {
            Self::Bars {
                unit,
                interval,
                bars_back,
                session_template,
                ..
            } => {
                let mut params = vec![
                    ("interval".to_string(), interval.to_string()),
                    ("unit".to_string(), unit.as_str().to_string()),
                ];
                if let Some(count) = bars_back {
                    params.push(("barsback".to_string(), count.to_string()));
                }
                if let Some(template) = session_template {
                    params.push(("sessiontemplate".to_string(), template.clone()));
                }
                params
            }
            Self::MarketDepth { max_levels, .. } => {
                vec![("maxlevels".to_string(), max_levels.to_string())]
            }
            Self::Quotes { .. } | Self::Orders { .. } | Self::OrdersById { .. } => Vec::new(),
        }
    }
}

fn collect_ids<I, S>(
    ids: I,
    what: &'static str,
    max: usize,
) -> Result<Vec<String>, SubscriptionError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
    if ids.is_empty() {
        return Err(SubscriptionError::Empty(what));
    }
    if ids.len() > max {
        return Err(SubscriptionError::TooMany {
            what,
            max,
            got: ids.len(),
        });
    }
    if ids.iter().any(|id| id.trim().is_empty()) {
        return Err(SubscriptionError::Blank(what));
    }
    Ok(ids)
}

// =============================================================================
// Messages
// =============================================================================

/// Quote update. Field meaning is left to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Symbol.
    pub symbol: String,
    /// Remaining provider fields.
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Order status update. Field meaning is left to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    /// Order identifier.
    pub order_id: String,
    /// Provider status code, when present.
    pub status: Option<String>,
    /// Remaining provider fields.
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Error frame sent in-band by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFault {
    /// Error code.
    pub code: String,
    /// Human readable message.
    pub message: String,
}

/// A decoded stream frame, delivered in receipt order.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// Bar update.
    Bar(Bar),
    /// Quote update.
    Quote(Quote),
    /// Order update.
    Order(OrderUpdate),
    /// Keep-alive frame.
    Heartbeat {
        /// Server heartbeat counter.
        sequence: u64,
        /// Server timestamp.
        timestamp: Option<DateTime<Utc>>,
    },
    /// In-band error.
    Error(StreamFault),
}

impl StreamMessage {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Bar(_) => "bar",
            Self::Quote(_) => "quote",
            Self::Order(_) => "order",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Error(_) => "error",
        }
    }

    /// Whether this is a keep-alive frame.
    #[must_use]
    pub const fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Heartbeat { .. })
    }
}

/// Stream control frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// Initial snapshot delivered; live updates follow.
    EndSnapshot,
    /// Server is about to drop the connection; reconnect.
    GoAway,
}

// =============================================================================
// Session State
// =============================================================================

/// Lifecycle state of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum SessionState {
    /// Not connected. Initial and terminal.
    #[default]
    Disconnected = 0,
    /// Opening the stream.
    Connecting = 1,
    /// Receiving frames.
    Connected = 2,
    /// Heartbeat missed; connection presumed half-open.
    Degraded = 3,
    /// Waiting out a backoff before the next attempt.
    Reconnecting = 4,
}

impl SessionState {
    /// Decode from the `repr(u8)` value.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Degraded,
            4 => Self::Reconnecting,
            _ => Self::Disconnected,
        }
    }

    /// State name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
            Self::Reconnecting => "reconnecting",
        }
    }

    /// Whether frames are flowing.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether the session is trying to (re)establish a connection.
    #[must_use]
    pub const fn is_recovering(&self) -> bool {
        matches!(self, Self::Connecting | Self::Degraded | Self::Reconnecting)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
