//! Websocket transport for one bridge session.
//!
//! An upgraded [`WebSocketStream`] is split into:
//! - a [`TransportWriter`], shared by the output pump, the keepalive driver
//!   and the coordinator, where every write is bounded by the write deadline;
//! - a [`TransportReader`], owned by the input pump, where every read is
//!   bounded by a read deadline that only a pong extends.
//!
//! Closing is idempotent and wakes a pending read, so whichever direction
//! fails first tears the whole session down.

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use protocol::Timing;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};
use tokio_util::sync::CancellationToken;

/// Byte streams a transport can run over.
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Errors surfaced by the transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport was closed locally.
    #[error("transport closed")]
    Closed,

    /// The peer sent a close frame or the stream ended.
    #[error("peer closed the connection")]
    PeerClosed,

    /// No pong arrived within the read window.
    #[error("read deadline of {0:?} exceeded")]
    ReadDeadline(Duration),

    /// A frame could not be written within the write deadline.
    #[error("write deadline of {0:?} exceeded")]
    WriteDeadline(Duration),

    /// The websocket handshake did not complete in time.
    #[error("websocket upgrade timed out after {0:?}")]
    UpgradeTimeout(Duration),

    /// The websocket handshake failed.
    #[error("websocket upgrade failed: {0}")]
    Upgrade(#[source] WsError),

    /// Websocket protocol or I/O error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),
}

/// Builds the websocket configuration enforcing the inbound size ceiling.
pub fn websocket_config(timing: &Timing) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(timing.max_message_size);
    config.max_frame_size = Some(timing.max_message_size);
    config
}

/// Performs the server side of the websocket upgrade.
///
/// Requests for any path other than `path` are answered with 404.
pub async fn accept<S: Io>(
    stream: S,
    path: &str,
    timing: &Timing,
) -> Result<WebSocketStream<S>, TransportError> {
    let expected = path.to_string();
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if request.uri().path() == expected {
            Ok(response)
        } else {
            tracing::debug!(path = %request.uri().path(), "rejecting upgrade for unknown path");
            Err(not_found())
        }
    };

    let handshake = accept_hdr_async_with_config(stream, callback, Some(websocket_config(timing)));
    match timeout(timing.write_wait, handshake).await {
        Ok(result) => result.map_err(TransportError::Upgrade),
        Err(_) => Err(TransportError::UpgradeTimeout(timing.write_wait)),
    }
}

fn not_found() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("Not found".to_string()));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

/// Splits an upgraded stream into its writer and reader.
///
/// Cancelling `closed` (or any parent of it) closes the transport.
pub fn open<S: Io>(
    stream: WebSocketStream<S>,
    timing: &Timing,
    closed: CancellationToken,
) -> (TransportWriter<S>, TransportReader<S>) {
    let (sink, stream) = stream.split();

    let writer = TransportWriter {
        inner: Arc::new(WriterInner {
            sink: Mutex::new(sink),
            closed: closed.clone(),
            close_started: AtomicBool::new(false),
            write_wait: timing.write_wait,
        }),
    };

    let reader = TransportReader {
        stream,
        closed,
        pong_wait: timing.pong_wait,
        deadline: Instant::now() + timing.pong_wait,
    };

    (writer, reader)
}

struct WriterInner<S> {
    sink: Mutex<SplitSink<WebSocketStream<S>, WsMessage>>,
    closed: CancellationToken,
    close_started: AtomicBool,
    write_wait: Duration,
}

/// Write half of a transport. Clones share the same connection.
pub struct TransportWriter<S> {
    inner: Arc<WriterInner<S>>,
}

impl<S> Clone for TransportWriter<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Io> TransportWriter<S> {
    /// Sends one text frame.
    pub async fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.send(WsMessage::Text(text)).await
    }

    /// Sends a keepalive ping.
    pub async fn send_ping(&self) -> Result<(), TransportError> {
        self.send(WsMessage::Ping(Vec::new())).await
    }

    /// Sends a close frame with the normal-closure code and an empty reason.
    pub async fn send_close_normal(&self) -> Result<(), TransportError> {
        self.send(WsMessage::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: Cow::Borrowed(""),
        })))
        .await
    }

    async fn send(&self, message: WsMessage) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let write = async { self.inner.sink.lock().await.send(message).await };
        match timeout(self.inner.write_wait, write).await {
            Ok(result) => result.map_err(TransportError::from),
            Err(_) => Err(TransportError::WriteDeadline(self.inner.write_wait)),
        }
    }

    /// Closes the transport.
    ///
    /// Marks it closed right away, waking any pending read, then flushes a
    /// close frame on a best-effort basis. Later calls return immediately.
    pub async fn close(&self) {
        self.inner.closed.cancel();
        if self.inner.close_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let close = async { self.inner.sink.lock().await.close().await };
        match timeout(self.inner.write_wait, close).await {
            Ok(Ok(())) => tracing::debug!("transport closed"),
            Ok(Err(e)) => tracing::debug!(error = %e, "error while closing transport"),
            Err(_) => tracing::debug!("timed out flushing close frame"),
        }
    }

    /// Returns whether the transport has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Resolves once the transport has been closed.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }
}

/// Read half of a transport.
pub struct TransportReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
    closed: CancellationToken,
    pong_wait: Duration,
    deadline: Instant,
}

impl<S: Io> TransportReader<S> {
    /// Pushes the read deadline one pong window into the future.
    pub fn extend_read_deadline(&mut self) {
        self.deadline = Instant::now() + self.pong_wait;
    }

    /// Returns the current read deadline.
    pub fn read_deadline(&self) -> Instant {
        self.deadline
    }

    /// Reads the next data message, returning its payload.
    ///
    /// Pongs extend the read deadline and are otherwise swallowed, as are
    /// pings (answered by the websocket layer).
    pub async fn read_message(&mut self) -> Result<Vec<u8>, TransportError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Err(TransportError::Closed),
                next = timeout_at(self.deadline, self.stream.next()) => next,
            };

            let message = match next {
                Err(_) => return Err(TransportError::ReadDeadline(self.pong_wait)),
                Ok(None) => return Err(TransportError::PeerClosed),
                Ok(Some(result)) => result?,
            };

            match message {
                WsMessage::Text(text) => return Ok(text.into_bytes()),
                WsMessage::Binary(data) => return Ok(data),
                WsMessage::Pong(_) => {
                    self.extend_read_deadline();
                    tracing::trace!("pong received");
                }
                WsMessage::Close(frame) => {
                    tracing::debug!(frame = ?frame, "peer sent close frame");
                    return Err(TransportError::PeerClosed);
                }
                WsMessage::Ping(_) | WsMessage::Frame(_) => {}
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tokio::io::DuplexStream;
    use tokio_tungstenite::tungstenite::protocol::Role;

    /// Server and client ends of an in-memory websocket.
    pub(crate) async fn websocket_pair(
        timing: &Timing,
        buffer: usize,
    ) -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (server_io, client_io) = tokio::io::duplex(buffer);
        let server =
            WebSocketStream::from_raw_socket(server_io, Role::Server, Some(websocket_config(timing)))
                .await;
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        (server, client)
    }

    /// Timing with windows short enough for tests.
    pub(crate) fn fast_timing() -> Timing {
        Timing::default()
            .with_pong_wait(Duration::from_secs(5))
            .with_write_wait(Duration::from_secs(2))
            .with_kill_grace(Duration::from_millis(500))
            .with_close_grace(Duration::from_millis(500))
    }
}
