//! Streaming Session Infrastructure
//!
//! Newline-delimited JSON framing, liveness tracking, reconnect backoff and
//! the session state machine that ties them together.

pub mod codec;
pub mod heartbeat;
pub mod reconnect;
pub mod session;

pub use codec::{CodecError, Frame, FrameDecoder, LineFramer};
pub use heartbeat::{DEFAULT_HEARTBEAT_TIMEOUT, HeartbeatMonitor};
pub use reconnect::{ReconnectBackoff, ReconnectPolicy};
pub use session::{
    DEFAULT_EVENT_CAPACITY, SessionConfig, SessionDeps, SessionError, SessionEvent, SessionHandle,
    StreamSession,
};
