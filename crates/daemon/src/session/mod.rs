//! Bridge sessions.
//!
//! This module provides child process spawning over plain pipes and the
//! per-connection session: three pumps (output, keepalive, input) and the
//! coordinator that runs them and sequences shutdown.

pub mod completion;
pub mod coordinator;
pub mod input;
pub mod keepalive;
pub mod output;
pub mod process;

pub use completion::{Completion, CompletionWaiter};
pub use coordinator::{ProcessExit, Session, SessionSummary, INTERNAL_ERROR_TEXT};
pub use input::{InputExit, InputReport};
pub use keepalive::KeepaliveExit;
pub use output::{OutputExit, OutputReport};
pub use process::{CommandSpec, PipePair, ProcessHandle, ProcessPipes, SessionError, SessionId};
