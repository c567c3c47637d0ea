//! Stream Session
//!
//! One long-lived task per subscription that keeps a TradeStation stream
//! open and forwards decoded messages to the consumer in receipt order.
//!
//! # State Machine
//!
//! ```text
//!                 +------------+
//!   spawn ------> | Connecting | <-----------------------------+
//!                 +------------+                               |
//!                   |   |    \__ 401 twice / 4xx ---> Disconnected (terminal)
//!              ok   |   | 5xx, network                         |
//!                   v   v                                      |
//!            +-----------+        +--------------+   backoff   |
//!            | Connected | -----> | Reconnecting | ------------+
//!            +-----------+  lost  +--------------+
//!                   |                    ^    \__ attempts exhausted ---> Disconnected
//!   heartbeat miss  v                    |
//!            +-----------+               |
//!            | Degraded  | --------------+
//!            +-----------+
//! ```
//!
//! `close()` moves to `Disconnected` from any state and aborts pending
//! reads and backoff sleeps. After a reconnect the consumer receives
//! [`SessionEvent::Resumed`] before any message of the new connection.

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::codec::{Frame, FrameDecoder, LineFramer};
use super::heartbeat::{DEFAULT_HEARTBEAT_TIMEOUT, HeartbeatMonitor};
use super::reconnect::{ReconnectBackoff, ReconnectPolicy};
use crate::application::ports::{ByteStream, ConnectError, CredentialError, StreamConnector};
use crate::application::services::TokenManager;
use crate::domain::streaming::{SessionState, StreamMessage, StreamStatus, Subscription};
use crate::infrastructure::metrics;

/// Default consumer channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

// =============================================================================
// Configuration
// =============================================================================

/// Session behaviour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    /// Silence window before the connection is presumed dead.
    pub heartbeat_timeout: Duration,
    /// Backoff between reconnect attempts.
    pub reconnect: ReconnectBackoff,
    /// Deliver heartbeat frames to the consumer as well.
    pub forward_heartbeats: bool,
    /// Suggested consumer channel capacity.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            reconnect: ReconnectBackoff::default(),
            forward_heartbeats: false,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Collaborators shared with the rest of the client.
#[derive(Clone)]
pub struct SessionDeps {
    /// Token source.
    pub tokens: Arc<TokenManager>,
    /// Opens the streaming response.
    pub connector: Arc<dyn StreamConnector>,
}

impl std::fmt::Debug for SessionDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDeps")
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Events and Errors
// =============================================================================

/// Why a session ended on its own.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The server rejected a freshly refreshed token.
    #[error("stream authentication failed: {0}")]
    Auth(String),

    /// Reconnect attempts exhausted.
    #[error("connection lost after {attempts} reconnect attempts")]
    ConnectionLost {
        /// Attempts made.
        attempts: u32,
    },

    /// The server refused the subscription.
    #[error("subscription rejected with status {status}: {message}")]
    Rejected {
        /// HTTP status.
        status: u16,
        /// Server message.
        message: String,
    },

    /// No token could be obtained.
    #[error("credentials: {0}")]
    Credential(#[from] CredentialError),
}

/// What the consumer receives.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A decoded message.
    Message(StreamMessage),
    /// Lifecycle transition.
    StateChanged(SessionState),
    /// The stream is back after a disconnect; messages may have been missed.
    Resumed {
        /// Reconnect attempts it took.
        attempt: u32,
        /// Time between losing the previous connection and this one.
        downtime: Duration,
    },
    /// Initial snapshot delivered.
    SnapshotComplete,
    /// Final event. `None` when closed by the caller.
    Closed(Option<SessionError>),
}

// =============================================================================
// Handle
// =============================================================================

/// Control handle for a running session.
#[derive(Debug)]
pub struct SessionHandle {
    id: Uuid,
    state: Arc<AtomicU8>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Session identifier, also attached to its log span.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Current lifecycle state. Always `Disconnected` once closed.
    #[must_use]
    pub fn state(&self) -> SessionState {
        if self.cancel.is_cancelled() {
            return SessionState::Disconnected;
        }
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Stop the session. Safe to call repeatedly.
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!(session = %self.id, "Closing stream session");
        }
        self.cancel.cancel();
        self.state
            .store(SessionState::Disconnected as u8, Ordering::Release);
    }

    /// Whether `close()` was called or the session ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.task.is_finished()
    }

    /// Wait for the session task to finish.
    pub async fn join(self) -> Result<(), tokio::task::JoinError> {
        self.task.await
    }
}

// =============================================================================
// Session
// =============================================================================

/// How the session loop stopped.
#[derive(Debug)]
enum Exit {
    Closed,
    ConsumerGone,
    Failed(SessionError),
}

/// Why a live connection ended.
#[derive(Debug)]
enum Loss {
    Ended,
    GoAway,
    Broken(String),
    Silent(Duration),
}

/// Outcome of one connect attempt.
enum Attempt {
    Open(ByteStream),
    Retry(String),
}

fn discard_partial(framer: &LineFramer) {
    if framer.pending() > 0 {
        metrics::record_decode_error();
        tracing::debug!(len = framer.pending(), "Discarding incomplete trailing frame");
    }
}

fn credential_failure(err: CredentialError) -> Result<Attempt, Exit> {
    if err.is_fatal() {
        Err(Exit::Failed(SessionError::Credential(err)))
    } else {
        Ok(Attempt::Retry(err.to_string()))
    }
}

/// The session task.
pub struct StreamSession {
    id: Uuid,
    subscription: Subscription,
    deps: SessionDeps,
    config: SessionConfig,
    sink: mpsc::Sender<SessionEvent>,
    state: Arc<AtomicU8>,
    /// Last state published to metrics and the consumer.
    reported: AtomicU8,
    cancel: CancellationToken,
}

impl StreamSession {
    /// Start a session on the current runtime.
    #[must_use]
    pub fn spawn(
        subscription: Subscription,
        deps: SessionDeps,
        config: SessionConfig,
        sink: mpsc::Sender<SessionEvent>,
    ) -> SessionHandle {
        let id = Uuid::new_v4();
        let state = Arc::new(AtomicU8::new(SessionState::Disconnected as u8));
        let cancel = CancellationToken::new();

        let span = tracing::info_span!(
            "stream_session",
            session = %id,
            path = %subscription.path()
        );
        let session = Self {
            id,
            subscription,
            deps,
            config,
            sink,
            state: Arc::clone(&state),
            reported: AtomicU8::new(SessionState::Disconnected as u8),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(session.run().instrument(span));

        SessionHandle {
            id,
            state,
            cancel,
            task,
        }
    }

    async fn run(self) {
        let exit = match self.drive().await {
            Ok(never) => match never {},
            Err(exit) => exit,
        };

        self.state
            .store(SessionState::Disconnected as u8, Ordering::Release);
        let previous = SessionState::from_u8(
            self.reported
                .swap(SessionState::Disconnected as u8, Ordering::AcqRel),
        );
        metrics::record_state_change(previous, SessionState::Disconnected);

        let error = match exit {
            Exit::ConsumerGone => {
                tracing::debug!("Consumer dropped, session stopped");
                return;
            }
            Exit::Closed => None,
            Exit::Failed(err) => {
                tracing::error!(session = %self.id, error = %err, "Stream session failed");
                Some(err)
            }
        };
        self.emit_final(SessionEvent::StateChanged(SessionState::Disconnected))
            .await;
        self.emit_final(SessionEvent::Closed(error)).await;
    }

    async fn drive(&self) -> Result<Infallible, Exit> {
        let mut policy = ReconnectPolicy::new(self.config.reconnect);
        let mut lost_at: Option<Instant> = None;

        loop {
            self.transition(SessionState::Connecting).await?;

            let attempt = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(Exit::Closed),
                attempt = self.open() => attempt?,
            };

            match attempt {
                Attempt::Open(stream) => {
                    self.transition(SessionState::Connected).await?;
                    if let Some(since) = lost_at.take() {
                        let downtime = since.elapsed();
                        tracing::info!(
                            attempt = policy.attempt_count(),
                            downtime_ms = downtime.as_millis(),
                            "Stream resumed"
                        );
                        self.emit(SessionEvent::Resumed {
                            attempt: policy.attempt_count(),
                            downtime,
                        })
                        .await?;
                    } else {
                        tracing::info!("Stream connected");
                    }

                    let loss = self.pump(stream, &mut policy).await?;
                    lost_at = Some(Instant::now());
                    match loss {
                        Loss::Silent(silence) => {
                            tracing::warn!(
                                silence_ms = silence.as_millis(),
                                "Heartbeat timeout, connection presumed dead"
                            );
                            self.transition(SessionState::Degraded).await?;
                        }
                        Loss::GoAway => tracing::info!("Server requested reconnect"),
                        Loss::Ended => tracing::warn!("Stream ended by server"),
                        Loss::Broken(error) => tracing::warn!(error = %error, "Stream read failed"),
                    }
                }
                Attempt::Retry(error) => {
                    tracing::warn!(error = %error, "Stream connect failed");
                }
            }

            self.transition(SessionState::Reconnecting).await?;
            let Some(delay) = policy.next_delay() else {
                return Err(Exit::Failed(SessionError::ConnectionLost {
                    attempts: policy.attempt_count(),
                }));
            };
            metrics::record_reconnect();
            tracing::warn!(
                attempt = policy.attempt_count(),
                delay_ms = delay.as_millis(),
                "Reconnecting stream"
            );

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(Exit::Closed),
                () = self.sink.closed() => return Err(Exit::ConsumerGone),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Connect with the current token; on 401 refresh once and retry.
    async fn open(&self) -> Result<Attempt, Exit> {
        let token = match self.deps.tokens.get_token().await {
            Ok(token) => token,
            Err(err) => return credential_failure(err),
        };
        let first = self
            .deps
            .connector
            .connect(&self.subscription, &token)
            .await;

        let result = match first {
            Err(ConnectError::Unauthorized) => {
                tracing::debug!("Stream handshake unauthorized, refreshing token");
                self.deps.tokens.invalidate_token(&token);
                let token = match self.deps.tokens.get_token().await {
                    Ok(token) => token,
                    Err(err) => return credential_failure(err),
                };
                match self
                    .deps
                    .connector
                    .connect(&self.subscription, &token)
                    .await
                {
                    Err(ConnectError::Unauthorized) => {
                        return Err(Exit::Failed(SessionError::Auth(
                            "token rejected after refresh".to_string(),
                        )));
                    }
                    other => other,
                }
            }
            other => other,
        };

        match result {
            Ok(stream) => Ok(Attempt::Open(stream)),
            Err(ConnectError::Unavailable(error)) => Ok(Attempt::Retry(error)),
            Err(ConnectError::Rejected { status, message }) => {
                Err(Exit::Failed(SessionError::Rejected { status, message }))
            }
            Err(ConnectError::Unauthorized) => Err(Exit::Failed(SessionError::Auth(
                "token rejected".to_string(),
            ))),
        }
    }

    /// Read frames until the connection is lost.
    async fn pump(
        &self,
        mut stream: ByteStream,
        policy: &mut ReconnectPolicy,
    ) -> Result<Loss, Exit> {
        let mut framer = LineFramer::new();
        let decoder = FrameDecoder::for_subscription(&self.subscription);
        let mut monitor = HeartbeatMonitor::new(self.config.heartbeat_timeout);

        loop {
            let chunk = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(Exit::Closed),
                () = self.sink.closed() => return Err(Exit::ConsumerGone),
                next = stream.next() => match next {
                    Some(Ok(chunk)) => chunk,
                    Some(Err(err)) => {
                        discard_partial(&framer);
                        return Ok(Loss::Broken(err.to_string()));
                    }
                    None => {
                        discard_partial(&framer);
                        return Ok(Loss::Ended);
                    }
                },
                () = tokio::time::sleep_until(monitor.deadline()) => {
                    return Ok(Loss::Silent(monitor.silence()));
                }
            };

            framer.push(&chunk);
            while let Some(line) = framer.next_line() {
                if monitor.frames() == 0 {
                    policy.reset();
                }
                monitor.record_frame();

                match decoder.decode(&line) {
                    Ok(Frame::Message(message)) => {
                        metrics::record_stream_message(message.kind());
                        if message.is_heartbeat() && !self.config.forward_heartbeats {
                            continue;
                        }
                        self.emit(SessionEvent::Message(message)).await?;
                    }
                    Ok(Frame::Status(StreamStatus::EndSnapshot)) => {
                        self.emit(SessionEvent::SnapshotComplete).await?;
                    }
                    Ok(Frame::Status(StreamStatus::GoAway)) => return Ok(Loss::GoAway),
                    Err(error) => {
                        metrics::record_decode_error();
                        tracing::debug!(
                            error = %error,
                            len = line.len(),
                            "Skipping undecodable frame"
                        );
                    }
                }
            }
        }
    }

    async fn transition(&self, next: SessionState) -> Result<(), Exit> {
        if self.cancel.is_cancelled() {
            return Err(Exit::Closed);
        }
        self.state.store(next as u8, Ordering::Release);
        if self.cancel.is_cancelled() {
            self.state
                .store(SessionState::Disconnected as u8, Ordering::Release);
            return Err(Exit::Closed);
        }
        let previous = SessionState::from_u8(self.reported.swap(next as u8, Ordering::AcqRel));
        if previous == next {
            return Ok(());
        }
        metrics::record_state_change(previous, next);
        tracing::debug!(from = %previous, to = %next, "Session state changed");
        self.emit(SessionEvent::StateChanged(next)).await
    }

    async fn emit(&self, event: SessionEvent) -> Result<(), Exit> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Exit::Closed),
            sent = self.sink.send(event) => sent.map_err(|_| Exit::ConsumerGone),
        }
    }

    /// Best-effort delivery of closing events; never blocks past `close()`.
    async fn emit_final(&self, event: SessionEvent) {
        if self.cancel.is_cancelled() {
            let _ = self.sink.try_send(event);
            return;
        }
        tokio::select! {
            biased;
            _ = self.sink.send(event.clone()) => {}
            () = self.cancel.cancelled() => {
                let _ = self.sink.try_send(event);
            }
        }
    }
}
