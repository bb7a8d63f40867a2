//! Keepalive driver.

use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::completion::CompletionWaiter;
use crate::network::transport::{Io, TransportWriter};

/// Why the keepalive driver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveExit {
    /// The output direction completed.
    Completed,
    /// A ping could not be written.
    ProbeFailed,
}

/// Sends a ping every `period` until the output direction completes.
///
/// The first ping goes out one period after start. A failed ping stops the
/// driver without closing the transport; the failure surfaces through the
/// pumps instead.
pub async fn run_keepalive<S: Io>(
    writer: TransportWriter<S>,
    mut completion: CompletionWaiter,
    period: Duration,
) -> KeepaliveExit {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = completion.wait() => return KeepaliveExit::Completed,
            _ = ticker.tick() => {
                if let Err(e) = writer.send_ping().await {
                    tracing::debug!(error = %e, "keepalive ping failed");
                    return KeepaliveExit::ProbeFailed;
                }
                tracing::trace!("keepalive ping sent");
            }
        }
    }
}
