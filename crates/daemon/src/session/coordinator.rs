//! Session coordinator.
//!
//! Owns one upgraded connection and one child process for their whole
//! lifetime: spawns the child, runs the three pumps, and drives the
//! shutdown sequence once the input direction ends.
//!
//! Shutdown order:
//! 1. close the child's stdin
//! 2. send SIGINT
//! 3. wait up to `kill_grace` for the output to complete, else SIGKILL and
//!    wait again without a bound
//! 4. reap the child
//! 5. join the output and keepalive tasks, then close the transport

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::Arc;

use protocol::Timing;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::completion::Completion;
use super::input::{run_input_pump, InputExit};
use super::keepalive::run_keepalive;
use super::output::{run_output_pump, OutputExit};
use super::process::{CommandSpec, PipePair, ProcessHandle, ProcessPipes, SessionError, SessionId};
use crate::network::transport::{self, Io, TransportWriter};

/// Text sent to the peer when the child cannot be started.
pub const INTERNAL_ERROR_TEXT: &str = "Internal server error.";

/// How the child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// The process exited with a code.
    Exited(i32),
    /// The process was terminated by a signal.
    Signaled(i32),
    /// The process never started or could not be reaped.
    Unknown,
}

impl From<ExitStatus> for ProcessExit {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => ProcessExit::Exited(code),
            (None, Some(signal)) => ProcessExit::Signaled(signal),
            (None, None) => ProcessExit::Unknown,
        }
    }
}

/// What happened during a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Session identifier.
    pub session_id: SessionId,
    /// Lines written to the child's stdin.
    pub lines_in: u64,
    /// Lines forwarded from the child's output.
    pub lines_out: u64,
    /// How the child ended.
    pub process_exit: ProcessExit,
    /// Whether SIGKILL was needed.
    pub forced_kill: bool,
    /// Why the input pump stopped; `None` if the child never started.
    pub input_exit: Option<InputExit>,
    /// Why the output pump stopped; `None` if it never ran to completion.
    pub output_exit: Option<OutputExit>,
}

impl SessionSummary {
    fn aborted(session_id: SessionId) -> Self {
        Self {
            session_id,
            lines_in: 0,
            lines_out: 0,
            process_exit: ProcessExit::Unknown,
            forced_kill: false,
            input_exit: None,
            output_exit: None,
        }
    }

    /// Returns whether the child was started.
    pub fn started(&self) -> bool {
        self.input_exit.is_some()
    }
}

/// A bridge between one websocket and one child process.
pub struct Session<S> {
    id: SessionId,
    websocket: WebSocketStream<S>,
    command: Arc<CommandSpec>,
    timing: Timing,
    closed: CancellationToken,
}

impl<S: Io> Session<S> {
    /// Creates a session for an upgraded connection.
    pub fn new(websocket: WebSocketStream<S>, command: Arc<CommandSpec>, timing: Timing) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            websocket,
            command,
            timing,
            closed: CancellationToken::new(),
        }
    }

    /// Uses `token` as the transport's close flag, so cancelling it (or a
    /// parent) tears the session down.
    pub fn with_closed_token(mut self, token: CancellationToken) -> Self {
        self.closed = token;
        self
    }

    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Runs the session to completion.
    ///
    /// Never fails: every error is logged and turned into teardown.
    pub async fn run(self) -> SessionSummary {
        let Session {
            id,
            websocket,
            command,
            timing,
            closed,
        } = self;
        let (writer, reader) = transport::open(websocket, &timing, closed);

        let (mut process, pipes) = match start_process(&command) {
            Ok(started) => started,
            Err(e) => {
                tracing::error!(error = %e, command = %command.name(), "failed to start process");
                abort(&writer).await;
                return SessionSummary::aborted(id);
            }
        };
        let ProcessPipes { mut stdin, output } = pipes;
        tracing::info!(pid = ?process.pid(), command = %command.name(), "session started");

        let completion = Completion::new();
        let mut done = completion.waiter();

        let output_task = tokio::spawn(
            run_output_pump(output, writer.clone(), completion, timing.close_grace)
                .in_current_span(),
        );
        let keepalive_task = tokio::spawn(
            run_keepalive(writer.clone(), done.clone(), timing.ping_period).in_current_span(),
        );

        let input = run_input_pump(reader, &writer, &mut stdin).await;

        // Many commands exit once stdin closes.
        drop(stdin);

        if let Err(e) = process.interrupt() {
            tracing::warn!(error = %e, "failed to interrupt process");
        }

        let mut forced_kill = false;
        if timeout(timing.kill_grace, done.wait()).await.is_err() {
            tracing::info!(grace = ?timing.kill_grace, "process did not stop after interrupt, killing");
            forced_kill = true;
            if let Err(e) = process.kill() {
                tracing::warn!(error = %e, "failed to kill process");
            }
            done.wait().await;
        }

        let process_exit = match process.wait().await {
            Ok(status) => ProcessExit::from(status),
            Err(e) => {
                tracing::warn!(error = %e, "failed to wait for process");
                ProcessExit::Unknown
            }
        };

        let output = match output_task.await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::warn!(error = %e, "output pump task failed");
                None
            }
        };
        if let Err(e) = keepalive_task.await {
            tracing::warn!(error = %e, "keepalive task failed");
        }

        writer.close().await;

        let summary = SessionSummary {
            session_id: id,
            lines_in: input.lines,
            lines_out: output.map_or(0, |report| report.lines),
            process_exit,
            forced_kill,
            input_exit: Some(input.exit),
            output_exit: output.map(|report| report.exit),
        };
        tracing::info!(
            lines_in = summary.lines_in,
            lines_out = summary.lines_out,
            exit = ?summary.process_exit,
            forced_kill = summary.forced_kill,
            input_exit = ?input.exit,
            "session finished"
        );
        summary
    }
}

fn start_process(command: &CommandSpec) -> Result<(ProcessHandle, ProcessPipes), SessionError> {
    let stdin = PipePair::new()?;
    let output = PipePair::new()?;
    ProcessHandle::spawn(command, stdin, output)
}

async fn abort<S: Io>(writer: &TransportWriter<S>) {
    if let Err(e) = writer.send_text(INTERNAL_ERROR_TEXT.to_string()).await {
        tracing::debug!(error = %e, "failed to report internal error");
    }
    writer.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::transport::test_support::{fast_timing, websocket_pair};
    use futures_util::{SinkExt, StreamExt};
    use nix::sys::signal::Signal;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::Message;

    fn command(argv: &[&str]) -> Arc<CommandSpec> {
        let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        Arc::new(CommandSpec::from_argv(&argv).unwrap())
    }

    #[tokio::test]
    async fn test_cat_echoes_until_peer_closes() {
        let timing = fast_timing();
        let (server, mut client) = websocket_pair(&timing, 64 * 1024).await;
        let session = Session::new(server, command(&["cat"]), timing);
        let run = tokio::spawn(session.run());

        client.send(Message::Text("hello".to_string())).await.unwrap();
        assert_eq!(
            client.next().await.unwrap().unwrap(),
            Message::Text("hello".to_string())
        );
        client.close(None).await.unwrap();

        let summary = timeout(Duration::from_secs(5), run)
            .await
            .expect("session must tear down after the peer closes")
            .unwrap();

        assert!(summary.started());
        assert_eq!(summary.lines_in, 1);
        assert_eq!(summary.lines_out, 1);
        assert_eq!(summary.input_exit, Some(InputExit::PeerClosed));
        assert!(!summary.forced_kill);
        assert_ne!(summary.process_exit, ProcessExit::Unknown);
    }

    #[tokio::test]
    async fn test_immediate_exit_sends_normal_close() {
        let timing = fast_timing();
        let (server, mut client) = websocket_pair(&timing, 64 * 1024).await;
        let session = Session::new(server, command(&["true"]), timing);
        let run = tokio::spawn(session.run());

        let message = timeout(Duration::from_secs(2), client.next())
            .await
            .expect("close frame within the write deadline")
            .unwrap()
            .unwrap();
        match message {
            Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Normal),
            other => panic!("expected close frame, got {:?}", other),
        }
        // Reading on flushes our close reply.
        while let Some(Ok(_)) = client.next().await {}

        let summary = timeout(Duration::from_secs(5), run).await.unwrap().unwrap();
        assert_eq!(summary.process_exit, ProcessExit::Exited(0));
        assert_eq!(summary.output_exit, Some(OutputExit::EndOfStream));
        assert_eq!(summary.lines_out, 0);
        assert!(!summary.forced_kill);
    }

    #[tokio::test]
    async fn test_output_order_with_stderr_and_partial_line() {
        let timing = fast_timing();
        let (server, mut client) = websocket_pair(&timing, 64 * 1024).await;
        let session = Session::new(
            server,
            command(&["sh", "-c", "echo a; echo b 1>&2; echo c; printf d"]),
            timing,
        );
        let run = tokio::spawn(session.run());

        let mut texts = Vec::new();
        while let Some(Ok(message)) = client.next().await {
            if let Message::Text(text) = message {
                texts.push(text);
            }
        }

        assert_eq!(texts, ["a", "b", "c", "d"]);
        let summary = timeout(Duration::from_secs(5), run).await.unwrap().unwrap();
        assert_eq!(summary.lines_out, 4);
    }

    #[tokio::test]
    async fn test_stubborn_child_is_killed() {
        let timing = fast_timing();
        let (server, mut client) = websocket_pair(&timing, 64 * 1024).await;
        let session = Session::new(
            server,
            command(&["sh", "-c", "trap '' INT; exec sleep 30"]),
            timing,
        );
        let run = tokio::spawn(session.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        client.close(None).await.unwrap();

        let summary = timeout(Duration::from_secs(5), run)
            .await
            .expect("kill escalation must bound teardown")
            .unwrap();

        assert!(summary.forced_kill);
        assert_eq!(
            summary.process_exit,
            ProcessExit::Signaled(Signal::SIGKILL as i32)
        );
    }

    #[tokio::test]
    async fn test_silent_peer_hits_read_deadline() {
        let timing = fast_timing().with_pong_wait(Duration::from_millis(300));
        let (server, _client) = websocket_pair(&timing, 64 * 1024).await;
        let session = Session::new(server, command(&["cat"]), timing);

        let summary = timeout(Duration::from_secs(5), session.run())
            .await
            .expect("session must end after the read deadline");

        assert_eq!(summary.input_exit, Some(InputExit::ReadDeadline));
    }

    #[tokio::test]
    async fn test_closed_token_tears_session_down() {
        let timing = fast_timing();
        let (server, _client) = websocket_pair(&timing, 64 * 1024).await;
        let shutdown = CancellationToken::new();
        let session =
            Session::new(server, command(&["cat"]), timing).with_closed_token(shutdown.child_token());
        let run = tokio::spawn(session.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();

        let summary = timeout(Duration::from_secs(5), run).await.unwrap().unwrap();
        assert_eq!(summary.input_exit, Some(InputExit::Closed));
    }

    #[tokio::test]
    async fn test_closed_token_tears_down_child_that_never_reads() {
        let timing = fast_timing();
        let (server, mut client) = websocket_pair(&timing, 64 * 1024).await;
        let shutdown = CancellationToken::new();
        let session = Session::new(server, command(&["sleep", "1000"]), timing)
            .with_closed_token(shutdown.child_token());
        let run = tokio::spawn(session.run());

        // More than the pipe holds, so the stdin write blocks.
        for _ in 0..12 {
            client.send(Message::Text("x".repeat(8000))).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.cancel();
        drop(client);

        let summary = timeout(Duration::from_secs(5), run)
            .await
            .expect("session must end once its transport is closed")
            .unwrap();

        assert_eq!(summary.input_exit, Some(InputExit::Closed));
        assert!(summary.lines_in < 12);
        assert!(summary.process_exit != ProcessExit::Unknown);
    }

    #[tokio::test]
    async fn test_spawn_failure_reports_internal_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("vanishing");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let spec = CommandSpec::resolve(script.to_string_lossy(), vec![]).unwrap();
        std::fs::remove_file(&script).unwrap();

        let timing = fast_timing();
        let (server, mut client) = websocket_pair(&timing, 64 * 1024).await;
        let summary = Session::new(server, Arc::new(spec), timing).run().await;

        assert!(!summary.started());
        assert_eq!(
            client.next().await.unwrap().unwrap(),
            Message::Text(INTERNAL_ERROR_TEXT.to_string())
        );
        assert!(matches!(
            client.next().await.unwrap().unwrap(),
            Message::Close(_)
        ));
    }

    #[test]
    fn test_process_exit_from_status() {
        assert_eq!(
            ProcessExit::from(ExitStatus::from_raw(3 << 8)),
            ProcessExit::Exited(3)
        );
        assert_eq!(
            ProcessExit::from(ExitStatus::from_raw(9)),
            ProcessExit::Signaled(9)
        );
    }
}
