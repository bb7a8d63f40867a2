//! Line-oriented framing between a process's byte streams and text messages.
//!
//! # Output direction
//!
//! The child's combined stdout/stderr is split on `\n`. Each line becomes one
//! text message, without the delimiter. A trailing `\r` is dropped as well so
//! CRLF output produces the same messages as LF output. A final line that is
//! not terminated is still delivered once the stream ends.
//!
//! # Input direction
//!
//! Every inbound message is written to the child's stdin followed by exactly
//! one `\n`.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::{ProtocolError, Result};

/// Longest output line accepted before scanning fails (64 KiB).
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Line delimiter for both directions.
pub const LINE_DELIMITER: u8 = b'\n';

/// Splits a buffered byte stream into lines.
#[derive(Debug)]
pub struct LineReader<R> {
    inner: R,
    max_line_length: usize,
    pending: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    /// Create a reader enforcing [`MAX_LINE_LENGTH`].
    pub fn new(inner: R) -> Self {
        Self::with_max_line_length(inner, MAX_LINE_LENGTH)
    }

    /// Create a reader with a custom line length ceiling.
    pub fn with_max_line_length(inner: R, max_line_length: usize) -> Self {
        Self {
            inner,
            max_line_length,
            pending: Vec::new(),
        }
    }

    /// Read the next line.
    ///
    /// Returns `Ok(None)` at end-of-stream once every buffered byte has been
    /// handed out.
    pub async fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            let available = self.inner.fill_buf().await?;

            if available.is_empty() {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(finish_line(std::mem::take(&mut self.pending))));
            }

            let (consumed, complete) =
                match available.iter().position(|&b| b == LINE_DELIMITER) {
                    Some(index) => {
                        self.pending.extend_from_slice(&available[..index]);
                        (index + 1, true)
                    }
                    None => {
                        self.pending.extend_from_slice(available);
                        (available.len(), false)
                    }
                };
            self.inner.consume(consumed);

            if self.pending.len() > self.max_line_length {
                let size = self.pending.len();
                self.pending.clear();
                return Err(ProtocolError::LineTooLong {
                    size,
                    max: self.max_line_length,
                });
            }

            if complete {
                return Ok(Some(finish_line(std::mem::take(&mut self.pending))));
            }
        }
    }

    /// Give back the underlying reader, discarding any partial line.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

fn finish_line(mut line: Vec<u8>) -> Vec<u8> {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    line
}

/// Encode an inbound message as one stdin line.
pub fn encode_input_line(message: &[u8]) -> Vec<u8> {
    let mut line = Vec::with_capacity(message.len() + 1);
    line.extend_from_slice(message);
    line.push(LINE_DELIMITER);
    line
}

/// Convert an output line into text frame content.
///
/// Text frames must carry UTF-8; invalid sequences are replaced.
pub fn decode_output_text(line: &[u8]) -> String {
    String::from_utf8_lossy(line).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn collect_lines(data: &[u8], capacity: usize) -> Vec<Vec<u8>> {
        let mut reader = LineReader::new(BufReader::with_capacity(capacity, data));
        let mut lines = Vec::new();
        while let Some(line) = reader.next_line().await.unwrap() {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn test_splits_on_newline() {
        let lines = collect_lines(b"hello\nworld\n", 64).await;
        assert_eq!(lines, vec![b"hello".to_vec(), b"world".to_vec()]);
    }

    #[tokio::test]
    async fn test_lines_spanning_buffer_refills() {
        // A 3-byte buffer forces every line to be assembled from pieces.
        let lines = collect_lines(b"first line\nsecond\n", 3).await;
        assert_eq!(lines, vec![b"first line".to_vec(), b"second".to_vec()]);
    }

    #[tokio::test]
    async fn test_unterminated_final_line_is_delivered() {
        let lines = collect_lines(b"one\ntwo", 64).await;
        assert_eq!(lines, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[tokio::test]
    async fn test_crlf_is_stripped() {
        let lines = collect_lines(b"dos\r\nunix\n", 2).await;
        assert_eq!(lines, vec![b"dos".to_vec(), b"unix".to_vec()]);
    }

    #[tokio::test]
    async fn test_empty_lines_are_kept() {
        let lines = collect_lines(b"\n\nx\n", 64).await;
        assert_eq!(lines, vec![Vec::new(), Vec::new(), b"x".to_vec()]);
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let lines = collect_lines(b"", 64).await;
        assert!(lines.is_empty());
    }

    #[tokio::test]
    async fn test_line_too_long() {
        let data = vec![b'a'; 100];
        let mut reader = LineReader::with_max_line_length(BufReader::with_capacity(16, &data[..]), 32);
        let err = reader.next_line().await.unwrap_err();
        match err {
            ProtocolError::LineTooLong { size, max } => {
                assert!(size > 32);
                assert_eq!(max, 32);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_line_at_limit_is_accepted() {
        let mut data = vec![b'a'; 32];
        data.push(b'\n');
        let mut reader = LineReader::with_max_line_length(&data[..], 32);
        let line = reader.next_line().await.unwrap().unwrap();
        assert_eq!(line.len(), 32);
        assert!(reader.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_into_inner_returns_unread_bytes() {
        let data = b"head\ntail bytes";
        let mut reader = LineReader::new(&data[..]);
        assert_eq!(reader.next_line().await.unwrap().unwrap(), b"head");
        let rest = reader.into_inner();
        assert_eq!(rest, b"tail bytes");
    }

    #[test]
    fn test_encode_input_line_appends_single_newline() {
        assert_eq!(encode_input_line(b"hello"), b"hello\n");
        assert_eq!(encode_input_line(b""), b"\n");
        assert_eq!(encode_input_line(b"already\n"), b"already\n\n");
    }

    #[test]
    fn test_decode_output_text_replaces_invalid_utf8() {
        assert_eq!(decode_output_text(b"plain"), "plain");
        assert_eq!(decode_output_text(&[b'a', 0xff, b'b']), "a\u{fffd}b");
    }
}
