//! Output pump: child output lines to websocket text frames.

use std::time::Duration;

use protocol::{decode_output_text, LineReader};
use tokio::io::{AsyncRead, BufReader};

use super::completion::Completion;
use crate::network::transport::{Io, TransportWriter};

/// Why the output pump stopped forwarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputExit {
    /// The child closed its output.
    EndOfStream,
    /// The output could not be split into lines.
    ScanFailed,
    /// A frame could not be written to the peer.
    TransportFailed,
}

/// Result of a finished output pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputReport {
    /// Lines forwarded as text frames.
    pub lines: u64,
    /// Exit path taken.
    pub exit: OutputExit,
}

/// Forwards every line of `output` as a text frame.
///
/// `completion` is signalled once the output stream is exhausted, on every
/// exit path. After a transport failure the remaining output is discarded
/// until end-of-stream first, so a signalled completion always means the
/// child has closed its output. On a clean end-of-stream the pump sends a
/// normal-closure frame and lingers for `close_grace` (or until the
/// transport closes) so the close handshake can flush. The transport is
/// always closed on exit.
pub async fn run_output_pump<R, S>(
    output: R,
    writer: TransportWriter<S>,
    completion: Completion,
    close_grace: Duration,
) -> OutputReport
where
    R: AsyncRead + Unpin,
    S: Io,
{
    let mut lines = LineReader::new(BufReader::new(output));
    let mut forwarded = 0u64;

    let exit = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Err(e) = writer.send_text(decode_output_text(&line)).await {
                    tracing::debug!(error = %e, "failed to forward output");
                    writer.close().await;
                    break OutputExit::TransportFailed;
                }
                forwarded += 1;
            }
            Ok(None) => break OutputExit::EndOfStream,
            Err(e) => {
                tracing::debug!(error = %e, "failed to scan output");
                break OutputExit::ScanFailed;
            }
        }
    };

    if exit != OutputExit::EndOfStream {
        let mut rest = lines.into_inner();
        match tokio::io::copy(&mut rest, &mut tokio::io::sink()).await {
            Ok(discarded) => tracing::debug!(bytes = discarded, "discarded remaining output"),
            Err(e) => tracing::debug!(error = %e, "failed to drain output"),
        }
    }

    completion.signal();
    drop(completion);

    if exit != OutputExit::TransportFailed {
        match writer.send_close_normal().await {
            Ok(()) => {
                tokio::select! {
                    _ = tokio::time::sleep(close_grace) => {}
                    _ = writer.closed() => {}
                }
            }
            Err(e) => tracing::debug!(error = %e, "failed to send close frame"),
        }
    }

    writer.close().await;

    tracing::debug!(lines = forwarded, exit = ?exit, "output pump finished");
    OutputReport {
        lines: forwarded,
        exit,
    }
}
