//! Upgrade listener.
//!
//! Accepts TCP connections, upgrades the ones addressed to the configured
//! path, and runs a bridge session for each on a tracked task.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use protocol::Timing;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use super::transport;
use crate::config::Config;
use crate::session::{CommandSpec, Session};

/// Pause after a failed accept, e.g. when the process is out of descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A listener bridging every accepted websocket to a fresh child process.
pub struct BridgeServer {
    listener: TcpListener,
    path: Arc<str>,
    command: Arc<CommandSpec>,
    timing: Timing,
    tracker: TaskTracker,
}

impl BridgeServer {
    /// Binds the listener configured in `config.server`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(config: &Config, command: CommandSpec) -> io::Result<Self> {
        let listener = TcpListener::bind(&config.server.address).await?;

        Ok(Self {
            listener,
            path: Arc::from(config.server.path.as_str()),
            command: Arc::new(command),
            timing: config.timing(),
            tracker: TaskTracker::new(),
        })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept loop until `shutdown` is cancelled, then waits for
    /// in-flight sessions.
    ///
    /// Cancelling `shutdown` also closes every session's transport, which
    /// drives each one through its normal teardown.
    pub async fn run(self, shutdown: CancellationToken) -> io::Result<()> {
        tracing::info!(
            address = %self.listener.local_addr()?,
            path = %self.path,
            command = %self.command.program().display(),
            "listening"
        );

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            self.tracker.spawn(handle_connection(
                stream,
                peer,
                Arc::clone(&self.path),
                Arc::clone(&self.command),
                self.timing,
                shutdown.child_token(),
            ));
        }

        self.tracker.close();
        if !self.tracker.is_empty() {
            tracing::info!(sessions = self.tracker.len(), "waiting for sessions to finish");
        }
        self.tracker.wait().await;
        tracing::info!("listener stopped");

        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    path: Arc<str>,
    command: Arc<CommandSpec>,
    timing: Timing,
    closed: CancellationToken,
) {
    let websocket = match transport::accept(stream, &path, &timing).await {
        Ok(websocket) => websocket,
        Err(e) => {
            tracing::debug!(%peer, error = %e, "upgrade failed");
            return;
        }
    };

    let session = Session::new(websocket, command, timing).with_closed_token(closed);
    let span = tracing::info_span!("session", session_id = %session.id(), %peer);
    session.run().instrument(span).await;
}
