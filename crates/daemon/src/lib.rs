//! # cmdbridge Daemon Library
//!
//! This crate bridges a command's standard streams to websocket clients.
//!
//! ## Overview
//!
//! Every accepted connection gets its own child process:
//!
//! - **Input**: each websocket message becomes one line on the child's stdin
//! - **Output**: each line the child writes to stdout or stderr becomes one
//!   text message
//! - **Keepalive**: pings every 9/10 of the read deadline; a connection
//!   without pongs is torn down
//! - **Shutdown**: stdin is closed, then SIGINT, then SIGKILL after a grace
//!   window, and the child is always reaped
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       BridgeServer                           │
//! │          accept ─▶ upgrade (/ws) ─▶ one task per session     │
//! ├──────────────────────────────────────────────────────────────┤
//! │                         Session                              │
//! │  ┌─────────────┐   ┌──────────────┐   ┌──────────────────┐  │
//! │  │ input pump  │   │ output pump  │   │ keepalive driver │  │
//! │  │ ws ─▶ stdin │   │ out ─▶ ws    │   │ ping every 54s   │  │
//! │  └─────────────┘   └──────┬───────┘   └────────▲─────────┘  │
//! │                           └── completion ──────┘            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::{BridgeServer, CommandSpec, Config};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let command = CommandSpec::resolve("cat", vec![])?;
//!
//!     let server = BridgeServer::bind(&config, command).await?;
//!     server.run(CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`network`]: Upgrade listener and websocket transport
//! - [`session`]: Child processes, pumps and the session coordinator

pub mod config;
pub mod network;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::Config;

// Re-export network types for convenience
pub use network::{BridgeServer, TransportError};

// Re-export session types for convenience
pub use session::{CommandSpec, ProcessExit, Session, SessionError, SessionId, SessionSummary};
