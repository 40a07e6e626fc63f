//! # Initiator Role
//!
//! A [`Client`] holds at most one connection to a server. `connect` blocks until
//! the TCP connection is up; the handshake then completes in the background on
//! the client's I/O thread. Envelopes sent before that are delivered once the
//! server has validated the client. Received envelopes land in [`Client::incoming`].

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, instrument};

use crate::config::NetworkConfig;
use crate::core::envelope::{Envelope, MessageKind, OwnedMessage};
use crate::core::queue::TsQueue;
use crate::error::{ProtocolError, Result};
use crate::protocol::connection::{Connection, Role};
use crate::transport::io_context::IoContext;
use crate::transport::tcp;

pub struct Client<T: MessageKind> {
    config: NetworkConfig,
    inbound: Arc<TsQueue<OwnedMessage<T>>>,
    io: Mutex<Option<IoContext>>,
    connection: Mutex<Option<Arc<Connection<T>>>>,
}

impl<T: MessageKind> Client<T> {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            inbound: Arc::new(TsQueue::new()),
            io: Mutex::new(None),
            connection: Mutex::new(None),
        }
    }

    /// Resolve `host`, connect to the first endpoint that answers, and start the handshake.
    ///
    /// Blocks the calling thread, so it must be called from outside any tokio
    /// runtime. From async code, wrap it in `tokio::task::spawn_blocking`.
    ///
    /// # Errors
    /// - `AlreadyConnected` while a connection is open
    /// - `TransportError` when called from inside a tokio runtime
    /// - `Resolve` if the host names no endpoint
    /// - `Io` / `Timeout` if no endpoint accepts within `connect_timeout`
    #[instrument(skip(self))]
    pub fn connect(&self, host: &str, port: u16) -> Result<()> {
        if self.is_connected() {
            return Err(ProtocolError::AlreadyConnected);
        }
        // tear down whatever a previous, now dead, connection left behind
        self.disconnect();

        let io = IoContext::start("duplex-net-client")?;
        let connect_timeout = self.config.client.connect_timeout;
        let target = host.to_string();
        let mut stream = io.run_blocking(async move {
            let endpoints = tcp::resolve(&target, port).await?;
            tcp::connect_any(&endpoints, connect_timeout).await
        })?;

        let conn = Connection::new(Role::Initiator, stream.peer_addr()?, &self.config.transport);
        let handshake_timeout = self.config.client.handshake_timeout;
        let inbound = Arc::clone(&self.inbound);
        let task_conn = Arc::clone(&conn);
        io.spawn(async move {
            if task_conn
                .initiate_handshake(&mut stream, handshake_timeout)
                .await
                .is_ok()
            {
                task_conn.run_pipelines(stream, &inbound).await;
            }
        });

        info!(peer = %conn.peer_addr(), "Connected");
        *self.connection.lock() = Some(conn);
        *self.io.lock() = Some(io);
        Ok(())
    }

    /// Close the connection and join the I/O thread. Safe to call when never connected.
    pub fn disconnect(&self) {
        if let Some(conn) = self.connection.lock().take() {
            conn.close();
            info!(peer = %conn.peer_addr(), "Disconnected");
        }
        if let Some(mut io) = self.io.lock().take() {
            io.stop();
            debug!("Client I/O context released");
        }
    }

    /// True while a connection exists and has not closed, handshake included.
    pub fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .as_ref()
            .is_some_and(|conn| conn.is_open())
    }

    /// The current connection, open or not.
    pub fn connection(&self) -> Option<Arc<Connection<T>>> {
        self.connection.lock().clone()
    }

    /// Queue an envelope for the server.
    ///
    /// # Errors
    /// `NotConnected` without an open connection, otherwise whatever
    /// [`Connection::send`] refuses with.
    pub fn send(&self, envelope: Envelope<T>) -> Result<()> {
        match self.connection.lock().as_ref() {
            Some(conn) if conn.is_open() => conn.send(envelope),
            _ => Err(ProtocolError::NotConnected),
        }
    }

    /// Envelopes received from the server, oldest first.
    pub fn incoming(&self) -> &TsQueue<OwnedMessage<T>> {
        &self.inbound
    }
}

impl<T: MessageKind> Drop for Client<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
