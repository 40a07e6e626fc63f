//! # Error Types
//!
//! Error handling for the messaging substrate.
//!
//! ## Error Categories
//! - **Transport Errors**: resolve, connect, accept, read and write failures. These always
//!   tear the affected connection down and are never retried.
//! - **Handshake Errors**: the peer answered the challenge with the wrong value or took too long.
//! - **Framing Errors**: unknown message kinds and payloads above the configured cap.
//! - **Caller Errors**: extracting more payload than present, sending on a closed connection.
//!
//! All errors implement `std::error::Error` for interoperability.
//!
//! ## Example Usage
//! ```rust
//! use duplex_net::core::envelope::{Envelope, StandardKind};
//! use duplex_net::error::{ProtocolError, Result};
//!
//! fn read_counter(envelope: &mut Envelope<StandardKind>) -> Result<u32> {
//!     envelope.extract::<u32>()
//! }
//!
//! let mut empty = Envelope::new(StandardKind::ServerMessage);
//! assert!(matches!(
//!     read_counter(&mut empty),
//!     Err(ProtocolError::PayloadUnderflow { requested: 4, available: 0 })
//! ));
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Transport errors
    pub const ERR_NO_ENDPOINTS: &str = "Host resolved to no endpoints";

    /// Handshake errors
    pub const ERR_HANDSHAKE_HANGUP: &str = "Peer closed the connection during the handshake";

    /// I/O context errors
    pub const ERR_IO_CONTEXT_STOPPED: &str = "I/O context stopped before the operation completed";
    pub const ERR_BLOCKING_IN_RUNTIME: &str =
        "Blocking call made from inside an async runtime; call it from a plain thread";
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),

    #[error("Failed to resolve {0}")]
    Resolve(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Not connected")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Handshake mismatch: expected {expected:#018x}, received {received:#018x}")]
    HandshakeMismatch { expected: u64, received: u64 },

    #[error("Timeout occurred")]
    Timeout,

    #[error("Unknown message kind: {0}")]
    UnknownMessageKind(u32),

    #[error("Payload too large: {0} bytes")]
    OversizedPayload(usize),

    #[error("Payload underflow: requested {requested} bytes, {available} available")]
    PayloadUnderflow { requested: usize, available: usize },

    #[error("Outbound queue full ({0} messages pending)")]
    Backpressure(usize),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
