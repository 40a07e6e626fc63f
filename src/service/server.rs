//! # Acceptor Role
//!
//! A [`Server`] listens on one TCP port, challenges every peer that connects, and
//! keeps the ones that pass in its [`Registry`]. All socket work happens on the
//! server's own I/O thread; messages are handed to the application through a
//! shared inbound queue and delivered to [`ServerHandler::on_message`] by
//! [`Server::dispatch`], on whichever thread calls it.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use duplex_net::config::NetworkConfig;
//! use duplex_net::core::envelope::{Envelope, StandardKind};
//! use duplex_net::protocol::connection::Connection;
//! use duplex_net::service::server::{Server, ServerHandler};
//!
//! struct Echo;
//!
//! impl ServerHandler<StandardKind> for Echo {
//!     fn on_message(
//!         &self,
//!         _server: &Server<StandardKind, Self>,
//!         conn: &Arc<Connection<StandardKind>>,
//!         envelope: Envelope<StandardKind>,
//!     ) {
//!         let _ = conn.send(envelope);
//!     }
//! }
//!
//! let server = Server::new(NetworkConfig::default(), Echo);
//! server.start()?;
//! loop {
//!     server.dispatch(None, true);
//! }
//! # Ok::<(), duplex_net::error::ProtocolError>(())
//! ```

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, instrument, warn};

use crate::config::NetworkConfig;
use crate::core::envelope::{Envelope, MessageKind, OwnedMessage};
use crate::core::queue::TsQueue;
use crate::error::{ProtocolError, Result};
use crate::protocol::connection::{Connection, ConnectionId, Role};
use crate::service::registry::Registry;
use crate::transport::io_context::IoContext;
use crate::transport::tcp;
use crate::utils::metrics::global_metrics;
use crate::utils::timeout::ACCEPT_BACKOFF;

/// Application callbacks for a [`Server`].
///
/// `on_connect_requested` and `on_validated` run on the server's I/O thread and
/// should return quickly. `on_disconnected` runs on the thread that discovered the
/// dead connection (a `send_to` or `broadcast` caller). `on_message` runs on the
/// thread calling [`Server::dispatch`].
pub trait ServerHandler<T: MessageKind>: Send + Sync + Sized + 'static {
    /// A socket was accepted. Return `false` to drop it before the handshake.
    ///
    /// Envelopes sent on `conn` here are delivered once the peer validates.
    fn on_connect_requested(&self, _conn: &Connection<T>) -> bool {
        true
    }

    /// The peer passed the handshake and now has an id.
    fn on_validated(&self, _conn: &Connection<T>) {}

    /// A registered connection was found dead and evicted. Called once per connection.
    fn on_disconnected(&self, _conn: &Connection<T>) {}

    fn on_message(&self, server: &Server<T, Self>, conn: &Arc<Connection<T>>, envelope: Envelope<T>);
}

struct Shared<T, H> {
    config: NetworkConfig,
    handler: H,
    registry: Registry<T>,
    inbound: TsQueue<OwnedMessage<T>>,
    /// Accepted peers still in their handshake.
    handshaking: Arc<AtomicUsize>,
}

/// Holds one of `max_connections` for a peer until it is admitted or dropped.
struct HandshakeSlot(Arc<AtomicUsize>);

impl HandshakeSlot {
    fn claim(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for HandshakeSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct Server<T: MessageKind, H: ServerHandler<T>> {
    shared: Arc<Shared<T, H>>,
    io: Mutex<Option<IoContext>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl<T: MessageKind, H: ServerHandler<T>> Server<T, H> {
    pub fn new(config: NetworkConfig, handler: H) -> Self {
        let registry = Registry::new(config.server.first_connection_id);
        Self {
            shared: Arc::new(Shared {
                config,
                handler,
                registry,
                inbound: TsQueue::new(),
                handshaking: Arc::new(AtomicUsize::new(0)),
            }),
            io: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Bind the configured address and start accepting.
    ///
    /// Calling `start` on a running server does nothing. Blocks until the listener is
    /// bound, so like [`Client::connect`](crate::Client::connect) it must be called
    /// from outside any tokio runtime.
    ///
    /// # Errors
    /// Fails if the I/O thread cannot be started or the address cannot be bound,
    /// and with `TransportError` when called from inside a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut io_slot = self.io.lock();
        if io_slot.is_some() {
            warn!("Server already started");
            return Ok(());
        }

        let io = IoContext::start("duplex-net-server")?;
        let address = self.shared.config.server.address.clone();
        let listener = io.run_blocking(async move { tcp::bind(&address).await })?;
        let local = listener.local_addr()?;

        io.spawn(accept_loop(listener, Arc::clone(&self.shared)));
        info!(address = %local, "Server listening");

        *self.local_addr.lock() = Some(local);
        *io_slot = Some(io);
        Ok(())
    }

    /// Close every connection, stop listening and join the I/O thread. Idempotent.
    ///
    /// Must not be called from a handler running on the I/O thread.
    pub fn stop(&self) {
        let Some(mut io) = self.io.lock().take() else {
            return;
        };

        let closed = self.shared.registry.drain();
        for conn in &closed {
            conn.close();
        }
        io.stop();

        *self.local_addr.lock() = None;
        info!(connections = closed.len(), "Server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.io.lock().as_ref().is_some_and(IoContext::is_running)
    }

    /// The bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn handler(&self) -> &H {
        &self.shared.handler
    }

    /// Queue an envelope for one connection.
    ///
    /// A connection found closed is evicted and reported through
    /// [`ServerHandler::on_disconnected`].
    ///
    /// # Errors
    /// `ConnectionClosed` if `id` is unknown or dead, or whatever
    /// [`Connection::send`] refuses with.
    pub fn send_to(&self, id: ConnectionId, envelope: Envelope<T>) -> Result<()> {
        let Some(conn) = self.shared.registry.get(id) else {
            return Err(ProtocolError::ConnectionClosed);
        };

        match conn.send(envelope) {
            Err(ProtocolError::ConnectionClosed) => {
                self.evict(id);
                Err(ProtocolError::ConnectionClosed)
            }
            other => other,
        }
    }

    /// Queue a copy of `envelope` for every open connection except `exclude`.
    ///
    /// Connections found closed during the pass are evicted together once it
    /// finishes. Returns the number of connections the envelope was queued for.
    pub fn broadcast(&self, envelope: &Envelope<T>, exclude: Option<ConnectionId>) -> usize {
        let mut dead = Vec::new();
        let mut delivered = 0;

        for (id, conn) in self.shared.registry.snapshot() {
            if !conn.is_open() {
                dead.push(id);
                continue;
            }
            if exclude == Some(id) {
                continue;
            }

            match conn.send(envelope.clone()) {
                Ok(()) => delivered += 1,
                Err(ProtocolError::ConnectionClosed) => dead.push(id),
                Err(e) => debug!(id, error = %e, "Broadcast skipped connection"),
            }
        }

        if !dead.is_empty() {
            for conn in self.shared.registry.evict_all(&dead) {
                self.notify_disconnected(&conn);
            }
        }
        delivered
    }

    /// Hand queued inbound messages to [`ServerHandler::on_message`] in arrival order.
    ///
    /// With `block` set, first waits until at least one message is queued. Handles at
    /// most `max` messages (all queued ones when `None`) and returns how many were
    /// taken off the queue. Messages from connections that were evicted meanwhile
    /// are discarded.
    pub fn dispatch(&self, max: Option<usize>, block: bool) -> usize {
        if block {
            self.shared.inbound.wait();
        }

        let limit = max.unwrap_or(usize::MAX);
        let mut taken = 0;
        while taken < limit {
            let Some(message) = self.shared.inbound.pop_front() else {
                break;
            };
            taken += 1;

            let origin = message.origin;
            match origin.and_then(|id| self.shared.registry.get(id)) {
                Some(conn) => self.shared.handler.on_message(self, &conn, message.envelope),
                None => debug!(origin = ?origin, "Dropping message from evicted connection"),
            }
        }
        taken
    }

    /// Like `dispatch(max, true)`, but gives up waiting after `timeout`.
    pub fn dispatch_timeout(&self, max: Option<usize>, timeout: Duration) -> usize {
        if !self.shared.inbound.wait_timeout(timeout) {
            return 0;
        }
        self.dispatch(max, false)
    }

    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection<T>>> {
        self.shared.registry.get(id)
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.shared.registry.ids()
    }

    /// Registered connections, including dead ones not yet evicted.
    pub fn connection_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// The inbound queue shared by every connection.
    pub fn incoming(&self) -> &TsQueue<OwnedMessage<T>> {
        &self.shared.inbound
    }

    fn evict(&self, id: ConnectionId) {
        if let Some(conn) = self.shared.registry.evict(id) {
            self.notify_disconnected(&conn);
        }
    }

    fn notify_disconnected(&self, conn: &Connection<T>) {
        info!(id = ?conn.id(), peer = %conn.peer_addr(), "Connection removed");
        self.shared.handler.on_disconnected(conn);
    }
}

impl<T: MessageKind, H: ServerHandler<T>> Drop for Server<T, H> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop<T, H>(listener: TcpListener, shared: Arc<Shared<T, H>>)
where
    T: MessageKind,
    H: ServerHandler<T>,
{
    loop {
        let (stream, peer) = accept_retrying(|| listener.accept()).await;

        // peers still handshaking count, or a burst of connects could all slip in
        let limit = shared.config.server.max_connections;
        let in_use = shared.registry.open_count() + shared.handshaking.load(Ordering::Acquire);
        if in_use >= limit {
            global_metrics().connection_rejected();
            warn!(%peer, limit, "Connection limit reached, refusing peer");
            continue;
        }

        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "Could not disable Nagle");
        }

        let conn = Connection::new(Role::Acceptor, peer, &shared.config.transport);
        if !shared.handler.on_connect_requested(&conn) {
            global_metrics().connection_rejected();
            info!(%peer, "Connection refused by handler");
            conn.close();
            continue;
        }

        debug!(%peer, "Connection accepted");
        let slot = HandshakeSlot::claim(&shared.handshaking);
        tokio::spawn(serve_connection(Arc::clone(&shared), conn, stream, slot));
    }
}

/// Await the next accepted socket. Failed accepts (EMFILE and the like) are
/// counted and retried after [`ACCEPT_BACKOFF`].
async fn accept_retrying<S, F, Fut>(mut accept: F) -> S
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<S>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(e) => {
                global_metrics().connection_error();
                warn!(error = %e, backoff = ?ACCEPT_BACKOFF, "Accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

#[instrument(level = "debug", skip_all, fields(peer = %conn.peer_addr()))]
async fn serve_connection<T, H>(
    shared: Arc<Shared<T, H>>,
    conn: Arc<Connection<T>>,
    mut stream: TcpStream,
    slot: HandshakeSlot,
) where
    T: MessageKind,
    H: ServerHandler<T>,
{
    let limit = shared.config.server.handshake_timeout;
    if let Err(e) = conn.accept_handshake(&mut stream, limit).await {
        warn!(peer = %conn.peer_addr(), error = %e, "Handshake rejected");
        return;
    }

    let admitted = shared.registry.admit(&conn);
    // registered now, so open_count covers it
    drop(slot);
    let Some(id) = admitted else {
        global_metrics().connection_rejected();
        warn!(peer = %conn.peer_addr(), "Connection ids exhausted, refusing peer");
        conn.close();
        return;
    };
    info!(peer = %conn.peer_addr(), id, "Connection validated");
    shared.handler.on_validated(&conn);

    conn.run_pipelines(stream, &shared.inbound).await;
}
