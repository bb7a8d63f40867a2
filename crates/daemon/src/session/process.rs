//! Child process spawning over plain pipes.
//!
//! A bridged process does not get a terminal. Its stdin is the read end of
//! one pipe and both stdout and stderr share the write end of a second pipe,
//! so the single reader observes the two streams in the order they were
//! written.

use std::io::{PipeReader, PipeWriter};
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};

/// Unique identifier for a session.
pub type SessionId = String;

/// Errors that can occur while setting up or tearing down a child process.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The command could not be found on `PATH`.
    #[error("command not found: {name}: {reason}")]
    CommandNotFound {
        /// The name as given on the command line.
        name: String,
        /// Lookup failure description.
        reason: String,
    },

    /// Creating a pipe failed.
    #[error("failed to create pipe: {0}")]
    PipeFailed(#[source] std::io::Error),

    /// Failed to spawn the process.
    #[error("failed to spawn {program}: {source}")]
    SpawnFailed {
        /// Resolved executable path.
        program: PathBuf,
        /// Underlying spawn error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to deliver a signal.
    #[error("failed to send {signal} to process {pid}: {source}")]
    SignalFailed {
        /// Signal being delivered.
        signal: Signal,
        /// Target process.
        pid: u32,
        /// Error reported by the kernel.
        #[source]
        source: nix::errno::Errno,
    },

    /// The process has already been reaped.
    #[error("process already reaped")]
    AlreadyReaped,

    /// Waiting for the process failed.
    #[error("failed to wait for process: {0}")]
    WaitFailed(#[source] std::io::Error),
}

/// An executable resolved once at startup, plus the arguments passed to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Name given on the command line; becomes the child's argv[0].
    name: String,
    /// Resolved executable path.
    program: PathBuf,
    /// Remaining arguments.
    args: Vec<String>,
}

impl CommandSpec {
    /// Resolves `name` through `PATH` (or as a path when it contains a `/`).
    pub fn resolve(name: impl Into<String>, args: Vec<String>) -> Result<Self, SessionError> {
        let name = name.into();
        let program = which::which(&name).map_err(|e| SessionError::CommandNotFound {
            name: name.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            name,
            program,
            args,
        })
    }

    /// Builds the command from a command line (`argv[0]` followed by its arguments).
    pub fn from_argv(argv: &[String]) -> Result<Self, SessionError> {
        let (name, args) = argv.split_first().ok_or_else(|| SessionError::CommandNotFound {
            name: String::new(),
            reason: "empty command line".to_string(),
        })?;
        Self::resolve(name.clone(), args.to_vec())
    }

    /// Returns the command name as given.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the resolved executable path.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Returns the arguments following the command name.
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// A unidirectional OS pipe. Both ends are close-on-exec in the parent.
#[derive(Debug)]
pub struct PipePair {
    /// Read end.
    pub reader: PipeReader,
    /// Write end.
    pub writer: PipeWriter,
}

impl PipePair {
    /// Allocates a new pipe.
    pub fn new() -> Result<Self, SessionError> {
        let (reader, writer) = std::io::pipe().map_err(SessionError::PipeFailed)?;
        Ok(Self { reader, writer })
    }
}

/// Parent-side pipe ends of a running child.
#[derive(Debug)]
pub struct ProcessPipes {
    /// Write end of the child's stdin.
    pub stdin: pipe::Sender,
    /// Read end of the child's combined stdout/stderr.
    pub output: pipe::Receiver,
}

/// A spawned child process.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pid: Option<u32>,
}

impl ProcessHandle {
    /// Spawns `command` wired to the given pipes.
    ///
    /// The child receives `stdin.reader` as stdin and `output.writer` as both
    /// stdout and stderr. Those ends are closed in the parent before this
    /// returns; otherwise the parent's duplicates would keep the child's
    /// stdin open and hide end-of-stream on its output.
    pub fn spawn(
        command: &CommandSpec,
        stdin: PipePair,
        output: PipePair,
    ) -> Result<(Self, ProcessPipes), SessionError> {
        let PipePair {
            reader: stdin_reader,
            writer: stdin_writer,
        } = stdin;
        let PipePair {
            reader: output_reader,
            writer: output_writer,
        } = output;
        let stderr_writer = output_writer
            .try_clone()
            .map_err(SessionError::PipeFailed)?;

        let mut cmd = Command::new(command.program());
        cmd.arg0(command.name())
            .args(command.args())
            .stdin(Stdio::from(stdin_reader))
            .stdout(Stdio::from(output_writer))
            .stderr(Stdio::from(stderr_writer))
            .kill_on_drop(true);

        let spawned = cmd.spawn();
        // The command owns the child's pipe ends until it is dropped.
        drop(cmd);
        let child = spawned.map_err(|source| SessionError::SpawnFailed {
            program: command.program().to_path_buf(),
            source,
        })?;
        let pid = child.id();

        let stdin = pipe::Sender::from_owned_fd(OwnedFd::from(stdin_writer))
            .map_err(SessionError::PipeFailed)?;
        let output = pipe::Receiver::from_owned_fd(OwnedFd::from(output_reader))
            .map_err(SessionError::PipeFailed)?;

        tracing::debug!(pid = ?pid, program = %command.program().display(), "spawned process");

        Ok((Self { child, pid }, ProcessPipes { stdin, output }))
    }

    /// Returns the process ID captured at spawn time.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Sends SIGINT.
    pub fn interrupt(&self) -> Result<(), SessionError> {
        self.signal(Signal::SIGINT)
    }

    /// Sends SIGKILL.
    pub fn kill(&self) -> Result<(), SessionError> {
        self.signal(Signal::SIGKILL)
    }

    fn signal(&self, signal: Signal) -> Result<(), SessionError> {
        // Once reaped the pid may already belong to another process.
        let pid = self.child.id().ok_or(SessionError::AlreadyReaped)?;
        kill(Pid::from_raw(pid as i32), signal).map_err(|source| SessionError::SignalFailed {
            signal,
            pid,
            source,
        })
    }

    /// Waits for the process to exit and reaps it.
    pub async fn wait(&mut self) -> Result<ExitStatus, SessionError> {
        self.child.wait().await.map_err(SessionError::WaitFailed)
    }
}
