//! Heartbeat Monitor
//!
//! Tracks the last frame received on a stream and exposes the instant by
//! which the next one must arrive. TradeStation servers push keep-alive
//! frames on their own, so there is no ping to send: silence past the
//! timeout means the connection is presumed half-open.

use std::time::Duration;

use tokio::time::Instant;

/// Default silence window before a connection is considered dead.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);

/// Liveness tracking for one connection.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    timeout: Duration,
    last_frame: Instant,
    frames: u64,
}

impl HeartbeatMonitor {
    /// Start monitoring now.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_frame: Instant::now(),
            frames: 0,
        }
    }

    /// Record any received frame, heartbeat or data.
    pub fn record_frame(&mut self) {
        self.last_frame = Instant::now();
        self.frames += 1;
    }

    /// Instant by which the next frame must arrive.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.last_frame + self.timeout
    }

    /// Time since the last frame (or since monitoring began).
    #[must_use]
    pub fn silence(&self) -> Duration {
        self.last_frame.elapsed()
    }

    /// Frames seen on this connection.
    #[must_use]
    pub const fn frames(&self) -> u64 {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expires_after_silence() {
        let monitor = HeartbeatMonitor::new(Duration::from_secs(30));
        assert!(Instant::now() < monitor.deadline());

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(Instant::now() < monitor.deadline());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(Instant::now(), monitor.deadline());
        assert_eq!(monitor.silence(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn frames_push_the_deadline() {
        let mut monitor = HeartbeatMonitor::new(Duration::from_secs(10));
        let first = monitor.deadline();

        tokio::time::advance(Duration::from_secs(8)).await;
        monitor.record_frame();

        assert_eq!(monitor.deadline(), first + Duration::from_secs(8));
        assert_eq!(monitor.frames(), 1);

        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(Instant::now() < monitor.deadline());
    }
}
