//! # cmdbridge Protocol Library
//!
//! Wire-level pieces shared by the cmdbridge daemon: the timing constants of
//! the keepalive and shutdown discipline, and the line framing used between
//! a child process's byte streams and websocket text messages.
//!
//! ## Overview
//!
//! ```text
//! ┌──────────────┐  text frame   ┌───────────────┐  line + '\n'  ┌─────────┐
//! │ remote peer  │ ────────────▶ │  input pump   │ ────────────▶ │  stdin  │
//! │              │ ◀──────────── │  output pump  │ ◀──────────── │ out+err │
//! └──────────────┘  text frame   └───────────────┘  split on \n  └─────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{encode_input_line, Timing};
//!
//! let timing = Timing::default();
//! assert!(timing.ping_period < timing.pong_wait);
//!
//! assert_eq!(encode_input_line(b"ls"), b"ls\n");
//! ```
//!
//! ## Modules
//!
//! - [`timing`]: Deadlines, keepalive period and shutdown grace windows
//! - [`framing`]: Line reader and line encoding
//! - [`error`]: Error types

pub mod error;
pub mod framing;
pub mod timing;

pub use error::{ProtocolError, Result};
pub use framing::{
    decode_output_text, encode_input_line, LineReader, LINE_DELIMITER, MAX_LINE_LENGTH,
};
pub use timing::{
    Timing, CLOSE_GRACE, KILL_GRACE, MAX_MESSAGE_SIZE, MAX_TIMEOUT, PING_PERIOD, PONG_WAIT,
    WRITE_WAIT,
};
