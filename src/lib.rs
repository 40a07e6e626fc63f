#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

//! # duplex-net
//!
//! Asynchronous TCP messaging between a server and many clients.
//!
//! Messages are [`Envelope`]s: a 4-byte kind tag, a 4-byte length, and a payload
//! that plain-old-data values are pushed onto and popped off like a stack. A peer
//! only exchanges envelopes after answering an 8-byte challenge from the server.
//!
//! Each role runs its sockets on one dedicated I/O thread. Application threads
//! talk to it through thread-safe queues: outbound per connection, inbound per role.
//!
//! ## Modules
//! - [`core`]: envelope, wire codec, concurrent queue
//! - [`protocol`]: handshake and connection state machine
//! - [`transport`]: TCP helpers and the per-role I/O thread
//! - [`service`]: [`Server`] and [`Client`]
//! - [`config`], [`error`], [`utils`]: configuration, errors, logging, metrics
//!
//! ## Example
//! ```rust,no_run
//! use duplex_net::{Client, Envelope, NetworkConfig, StandardKind};
//!
//! let client = Client::<StandardKind>::new(NetworkConfig::default());
//! client.connect("127.0.0.1", 60000)?;
//!
//! let mut ping = Envelope::new(StandardKind::ServerPing);
//! ping.append(&42u64);
//! client.send(ping)?;
//!
//! client.incoming().wait();
//! let reply = client.incoming().pop_front();
//! # Ok::<(), duplex_net::ProtocolError>(())
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::config::NetworkConfig;
pub use crate::core::envelope::{Envelope, MessageKind, OwnedMessage, StandardKind};
pub use crate::core::queue::TsQueue;
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::connection::{Connection, ConnectionId, ConnectionState, Role};
pub use crate::service::{Client, Server, ServerHandler};
