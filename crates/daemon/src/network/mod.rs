//! Network module for websocket sessions.
//!
//! This module provides:
//! - the upgrade listener that accepts TCP connections and hands each
//!   upgraded connection to its own bridge session
//! - the transport wrapping one upgraded connection with size limits and
//!   read/write deadlines

pub mod server;
pub mod transport;

pub use server::BridgeServer;
pub use transport::{TransportError, TransportReader, TransportWriter};
