//! Input pump: websocket messages to child stdin lines.

use protocol::encode_input_line;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::network::transport::{Io, TransportError, TransportReader, TransportWriter};

/// Why the input pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputExit {
    /// The peer closed the connection.
    PeerClosed,
    /// The transport was closed from this side.
    Closed,
    /// No pong arrived within the read window.
    ReadDeadline,
    /// The websocket failed, e.g. an oversized message.
    TransportFailed,
    /// The child's stdin could not be written.
    StdinClosed,
}

impl From<&TransportError> for InputExit {
    fn from(err: &TransportError) -> Self {
        match err {
            TransportError::PeerClosed => InputExit::PeerClosed,
            TransportError::Closed => InputExit::Closed,
            TransportError::ReadDeadline(_) => InputExit::ReadDeadline,
            _ => InputExit::TransportFailed,
        }
    }
}

/// Result of a finished input pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputReport {
    /// Lines written to stdin.
    pub lines: u64,
    /// Exit path taken.
    pub exit: InputExit,
}

/// Writes every inbound message to `stdin` followed by a newline.
///
/// Arms the read deadline before the first read. Stops at the first read or
/// write failure and closes the transport on the way out. A stdin write that
/// blocks is abandoned once the transport closes or the read deadline passes.
/// `stdin` itself is left open for the caller to close.
pub async fn run_input_pump<S, W>(
    mut reader: TransportReader<S>,
    writer: &TransportWriter<S>,
    stdin: &mut W,
) -> InputReport
where
    S: Io,
    W: AsyncWrite + Unpin,
{
    reader.extend_read_deadline();
    let mut lines = 0u64;

    let exit = loop {
        let message = match reader.read_message().await {
            Ok(message) => message,
            Err(e) => {
                let exit = InputExit::from(&e);
                match exit {
                    InputExit::PeerClosed | InputExit::Closed => {
                        tracing::debug!(error = %e, "input stopped")
                    }
                    _ => tracing::debug!(error = %e, "failed to read message"),
                }
                break exit;
            }
        };

        // A child that stops reading can block this write indefinitely, and
        // no read is pending to notice a close or a silent peer meanwhile.
        let deadline = reader.read_deadline();
        let encoded = encode_input_line(&message);
        tokio::select! {
            result = stdin.write_all(&encoded) => {
                if let Err(e) = result {
                    tracing::debug!(error = %e, "failed to write to stdin");
                    break InputExit::StdinClosed;
                }
            }
            _ = writer.closed() => {
                tracing::debug!("input stopped while writing to stdin");
                break InputExit::Closed;
            }
            _ = tokio::time::sleep_until(deadline) => {
                tracing::debug!("read deadline passed while writing to stdin");
                break InputExit::ReadDeadline;
            }
        }
        lines += 1;
    };

    writer.close().await;

    tracing::debug!(lines, exit = ?exit, "input pump finished");
    InputReport { lines, exit }
}
