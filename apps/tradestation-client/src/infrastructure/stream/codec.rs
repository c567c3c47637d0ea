//! Stream Codec
//!
//! Newline-delimited JSON framing and frame classification for TradeStation
//! streams.
//!
//! The response body arrives in arbitrary network chunks; [`LineFramer`]
//! buffers them and yields complete lines. [`FrameDecoder`] turns one line
//! into a [`Frame`]:
//!
//! ```json
//! {"Heartbeat":4,"Timestamp":"2024-03-01T14:30:00Z"}
//! {"StreamStatus":"EndSnapshot"}
//! {"Error":"DualLogon","Message":"..."}
//! {"TimeStamp":"2024-03-01T14:30:00Z","Open":"100.5",...}
//! ```

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::domain::bars::Bar;
use crate::domain::streaming::{
    MessageKind, OrderUpdate, Quote, StreamFault, StreamMessage, StreamStatus, Subscription,
};
use crate::infrastructure::tradestation::{RawBar, WireError};

/// Codec errors. All of them are per-frame: the stream carries on.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Line is not valid JSON or does not fit the expected shape.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Line is JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,

    /// Required field absent or of the wrong type.
    #[error("missing or invalid field {0}")]
    InvalidField(&'static str),

    /// Unrecognised stream status.
    #[error("unknown stream status: {0}")]
    UnknownStatus(String),

    /// Numeric field failed to convert.
    #[error(transparent)]
    Wire(#[from] WireError),
}

// =============================================================================
// Framing
// =============================================================================

/// Reassembles newline-terminated lines from arbitrary chunks.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: BytesMut,
}

impl LineFramer {
    /// Create an empty framer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a network chunk.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete, non-blank line without its terminator.
    pub fn next_line(&mut self) -> Option<Bytes> {
        loop {
            let end = self.buffer.iter().position(|&b| b == b'\n')?;
            let mut line = self.buffer.split_to(end + 1);
            line.truncate(end);
            if line.last() == Some(&b'\r') {
                line.truncate(end - 1);
            }
            if line.iter().any(|b| !b.is_ascii_whitespace()) {
                return Some(line.freeze());
            }
        }
    }

    /// Bytes of an incomplete trailing line.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

// =============================================================================
// Classification
// =============================================================================

/// A decoded line.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Message for the consumer.
    Message(StreamMessage),
    /// Control frame for the session.
    Status(StreamStatus),
}

/// Classifies lines for one subscription kind.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    kind: MessageKind,
    implied_symbol: Option<String>,
}

impl FrameDecoder {
    /// Decoder for payloads of `kind`.
    #[must_use]
    pub const fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            implied_symbol: None,
        }
    }

    /// Decoder for the frames `subscription` produces.
    #[must_use]
    pub fn for_subscription(subscription: &Subscription) -> Self {
        Self {
            kind: subscription.kind(),
            implied_symbol: subscription.implied_symbol().map(ToString::to_string),
        }
    }

    /// Decode one line.
    pub fn decode(&self, line: &[u8]) -> Result<Frame, CodecError> {
        let Value::Object(mut map) = serde_json::from_slice(line)? else {
            return Err(CodecError::NotAnObject);
        };

        if let Some(sequence) = map.get("Heartbeat") {
            let sequence = as_u64(sequence).ok_or(CodecError::InvalidField("Heartbeat"))?;
            let timestamp = map
                .get("Timestamp")
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|at| at.with_timezone(&Utc));
            return Ok(Frame::Message(StreamMessage::Heartbeat {
                sequence,
                timestamp,
            }));
        }

        if let Some(status) = map.get("StreamStatus") {
            return match status.as_str() {
                Some("EndSnapshot") => Ok(Frame::Status(StreamStatus::EndSnapshot)),
                Some("GoAway") => Ok(Frame::Status(StreamStatus::GoAway)),
                _ => Err(CodecError::UnknownStatus(status.to_string())),
            };
        }

        if let Some(code) = map.get("Error") {
            let code = code.as_str().map_or_else(|| code.to_string(), ToString::to_string);
            let message = map
                .get("Message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Ok(Frame::Message(StreamMessage::Error(StreamFault {
                code,
                message,
            })));
        }

        let message = match self.kind {
            MessageKind::Bar => {
                let raw: RawBar = serde_json::from_value(Value::Object(map))?;
                StreamMessage::Bar(Bar::try_from(raw)?)
            }
            MessageKind::Quote => {
                let symbol = match take_string(&mut map, "Symbol") {
                    Ok(symbol) => symbol,
                    Err(err) => self.implied_symbol.clone().ok_or(err)?,
                };
                StreamMessage::Quote(Quote {
                    symbol,
                    fields: map,
                })
            }
            MessageKind::Order => {
                let order_id = take_string(&mut map, "OrderID")?;
                let status = map
                    .remove("Status")
                    .and_then(|v| v.as_str().map(ToString::to_string));
                StreamMessage::Order(OrderUpdate {
                    order_id,
                    status,
                    fields: map,
                })
            }
        };
        Ok(Frame::Message(message))
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn take_string(map: &mut Map<String, Value>, field: &'static str) -> Result<String, CodecError> {
    match map.remove(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        _ => Err(CodecError::InvalidField(field)),
    }
}
