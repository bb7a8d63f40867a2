//! Keepalive and shutdown timing shared by both ends of a bridge session.
//!
//! The keepalive discipline works in pairs: the server pings every
//! [`PING_PERIOD`] and the read side treats the connection as dead when no
//! pong arrives within [`PONG_WAIT`]. The ping period is
//! always 9/10 of the pong wait so at least one probe lands inside every
//! read window.

use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Maximum inbound message size accepted from the peer, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 8192;

/// Time allowed to write a single frame to the peer.
pub const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Time allowed to read the next pong from the peer.
pub const PONG_WAIT: Duration = Duration::from_secs(60);

/// Period between pings. Must be less than [`PONG_WAIT`].
pub const PING_PERIOD: Duration = Duration::from_millis(PONG_WAIT.as_millis() as u64 * 9 / 10);

/// Time the child gets after the interrupt before it is killed.
pub const KILL_GRACE: Duration = Duration::from_secs(1);

/// Time the connection is held open after the normal-closure frame.
pub const CLOSE_GRACE: Duration = Duration::from_secs(10);

/// Longest accepted value for any timing parameter.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Timing parameters for one bridge session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Inbound message ceiling in bytes.
    pub max_message_size: usize,
    /// Write deadline per outbound frame.
    pub write_wait: Duration,
    /// Read deadline, refreshed by every pong.
    pub pong_wait: Duration,
    /// Keepalive period.
    pub ping_period: Duration,
    /// Wait for output completion before escalating to a kill.
    pub kill_grace: Duration,
    /// Linger after the normal-closure frame.
    pub close_grace: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
            write_wait: WRITE_WAIT,
            pong_wait: PONG_WAIT,
            ping_period: PING_PERIOD,
            kill_grace: KILL_GRACE,
            close_grace: CLOSE_GRACE,
        }
    }
}

impl Timing {
    /// Returns the ping period matching a pong wait (9/10 of it).
    pub fn ping_period_for(pong_wait: Duration) -> Duration {
        pong_wait / 10 * 9
    }

    /// Sets the pong wait and recomputes the ping period from it.
    pub fn with_pong_wait(mut self, pong_wait: Duration) -> Self {
        self.pong_wait = pong_wait;
        self.ping_period = Self::ping_period_for(pong_wait);
        self
    }

    /// Sets the write deadline.
    pub fn with_write_wait(mut self, write_wait: Duration) -> Self {
        self.write_wait = write_wait;
        self
    }

    /// Sets the grace window before the child is killed.
    pub fn with_kill_grace(mut self, kill_grace: Duration) -> Self {
        self.kill_grace = kill_grace;
        self
    }

    /// Sets the linger after the normal-closure frame.
    pub fn with_close_grace(mut self, close_grace: Duration) -> Self {
        self.close_grace = close_grace;
        self
    }

    /// Checks that the parameters can drive a session.
    pub fn validate(&self) -> Result<()> {
        if self.max_message_size == 0 {
            return Err(ProtocolError::InvalidTiming(
                "max_message_size must be greater than 0".to_string(),
            ));
        }

        let durations = [
            ("write_wait", self.write_wait),
            ("pong_wait", self.pong_wait),
            ("ping_period", self.ping_period),
            ("kill_grace", self.kill_grace),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(ProtocolError::InvalidTiming(format!(
                    "{} must be non-zero",
                    name
                )));
            }
        }

        let bounded = [
            ("write_wait", self.write_wait),
            ("pong_wait", self.pong_wait),
            ("kill_grace", self.kill_grace),
            ("close_grace", self.close_grace),
        ];
        for (name, value) in bounded {
            if value > MAX_TIMEOUT {
                return Err(ProtocolError::InvalidTiming(format!(
                    "{} ({:?}) must not exceed {:?}",
                    name, value, MAX_TIMEOUT
                )));
            }
        }

        if self.ping_period >= self.pong_wait {
            return Err(ProtocolError::InvalidTiming(format!(
                "ping_period ({:?}) must be less than pong_wait ({:?})",
                self.ping_period, self.pong_wait
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing() {
        let timing = Timing::default();
        assert_eq!(timing.max_message_size, 8192);
        assert_eq!(timing.write_wait, Duration::from_secs(10));
        assert_eq!(timing.pong_wait, Duration::from_secs(60));
        assert_eq!(timing.ping_period, Duration::from_secs(54));
        assert_eq!(timing.kill_grace, Duration::from_secs(1));
        assert_eq!(timing.close_grace, Duration::from_secs(10));
        assert!(timing.validate().is_ok());
    }

    #[test]
    fn test_ping_period_is_nine_tenths() {
        assert_eq!(PING_PERIOD, Duration::from_secs(54));
        assert_eq!(
            Timing::ping_period_for(Duration::from_millis(1000)),
            Duration::from_millis(900)
        );
    }

    #[test]
    fn test_with_pong_wait_recomputes_ping_period() {
        let timing = Timing::default().with_pong_wait(Duration::from_secs(10));
        assert_eq!(timing.pong_wait, Duration::from_secs(10));
        assert_eq!(timing.ping_period, Duration::from_secs(9));
    }

    #[test]
    fn test_validate_rejects_ping_after_pong() {
        let mut timing = Timing::default();
        timing.ping_period = timing.pong_wait;
        let err = timing.validate().unwrap_err();
        assert!(err.to_string().contains("ping_period"));
    }

    #[test]
    fn test_validate_rejects_zero_durations() {
        let timing = Timing::default().with_write_wait(Duration::ZERO);
        assert!(timing.validate().is_err());

        let timing = Timing::default().with_kill_grace(Duration::ZERO);
        assert!(timing.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_huge_durations() {
        let timing = Timing::default().with_pong_wait(Duration::from_secs(u64::MAX));
        assert!(timing.ping_period < timing.pong_wait);
        let err = timing.validate().unwrap_err();
        assert!(err.to_string().contains("pong_wait"));

        let timing = Timing::default().with_close_grace(MAX_TIMEOUT + Duration::from_secs(1));
        assert!(timing.validate().is_err());

        let timing = Timing::default().with_pong_wait(MAX_TIMEOUT);
        assert!(timing.validate().is_ok());
    }

    #[test]
    fn test_validate_allows_zero_close_grace() {
        let timing = Timing::default().with_close_grace(Duration::ZERO);
        assert!(timing.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_message_size() {
        let timing = Timing {
            max_message_size: 0,
            ..Timing::default()
        };
        assert!(matches!(
            timing.validate(),
            Err(ProtocolError::InvalidTiming(_))
        ));
    }
}
