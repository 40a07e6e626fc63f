//! # Connection
//!
//! Per-peer protocol state machine.
//!
//! ```text
//! Handshaking ──(handshake ok)──> Validated ──(I/O failure / close)──> Closed
//!      └──────────(mismatch / timeout / I/O failure)───────────────────┘
//! ```
//!
//! A connection is shared as `Arc<Connection<T>>` between its owning role and the
//! task running it on the role's I/O thread. Application threads only ever touch
//! the atomic state and the outbound queue; the socket lives inside the task.
//!
//! Once validated, two pipelines run side by side on the I/O thread:
//! - **read**: header, then payload if the header announces one, then hand the
//!   envelope to the role's inbound queue and go again;
//! - **write**: header of the front envelope, then its payload, then pop it and
//!   continue while the outbound queue is non-empty.
//!
//! Cancelling the connection's token is the single teardown action. Both
//! pipelines observe it, stop, and drop their socket half.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::config::TransportConfig;
use crate::core::codec::EnvelopeCodec;
use crate::core::envelope::{Envelope, MessageKind, OwnedMessage, HEADER_SIZE};
use crate::core::queue::TsQueue;
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::{answer_challenge, AcceptorHandshake};
use crate::utils::metrics::global_metrics;
use crate::utils::timeout::with_timeout_error;

/// Registry-assigned identifier of an acceptor-side connection.
pub type ConnectionId = u32;

/// Which side of the socket a connection sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Connected out to a server; never assigned an id.
    Initiator,
    /// Accepted by a server; gets an id once validated.
    Acceptor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Handshaking = 0,
    Validated = 1,
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectionState::Handshaking,
            1 => ConnectionState::Validated,
            _ => ConnectionState::Closed,
        }
    }
}

pub struct Connection<T> {
    role: Role,
    peer_addr: SocketAddr,
    id: OnceLock<ConnectionId>,
    state: AtomicU8,
    outbound: TsQueue<Envelope<T>>,
    write_ready: Notify,
    shutdown: CancellationToken,
    limits: TransportConfig,
}

impl<T: MessageKind> Connection<T> {
    /// Wrap a freshly connected or accepted socket's peer. Starts in `Handshaking`.
    pub fn new(role: Role, peer_addr: SocketAddr, limits: &TransportConfig) -> Arc<Self> {
        global_metrics().connection_established();
        Arc::new(Self {
            role,
            peer_addr,
            id: OnceLock::new(),
            state: AtomicU8::new(ConnectionState::Handshaking as u8),
            outbound: TsQueue::new(),
            write_ready: Notify::new(),
            shutdown: CancellationToken::new(),
            limits: limits.clone(),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Registry id; `None` for initiator connections and before validation.
    pub fn id(&self) -> Option<ConnectionId> {
        self.id.get().copied()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True until the connection is closed, handshake included.
    pub fn is_open(&self) -> bool {
        self.state() != ConnectionState::Closed
    }

    pub fn is_validated(&self) -> bool {
        self.state() == ConnectionState::Validated
    }

    /// Envelopes accepted by `send` but not yet fully written.
    pub fn pending(&self) -> usize {
        self.outbound.len()
    }

    /// Queue an envelope for delivery to the peer.
    ///
    /// Returns as soon as the envelope is queued. Envelopes sent on one connection
    /// reach the peer in the order they were sent; envelopes queued during the
    /// handshake go out once the connection is validated.
    ///
    /// # Errors
    /// - `ConnectionClosed` if the connection is closed
    /// - `OversizedPayload` if the payload exceeds `max_payload_size`
    /// - `Backpressure` if `max_outbound_queue` envelopes are already waiting
    pub fn send(&self, envelope: Envelope<T>) -> Result<()> {
        if !self.is_open() {
            return Err(ProtocolError::ConnectionClosed);
        }

        if let Some(limit) = self.limits.max_payload_size {
            if envelope.len() > limit {
                return Err(ProtocolError::OversizedPayload(envelope.len()));
            }
        }

        let queued = match self.limits.max_outbound_queue {
            Some(limit) => self
                .outbound
                .push_back_bounded(envelope, limit)
                .map_err(|(_, pending)| ProtocolError::Backpressure(pending))?,
            None => self.outbound.push_back(envelope),
        };

        // close() may have run between the state check and the push
        if !self.is_open() {
            self.outbound.clear();
            return Err(ProtocolError::ConnectionClosed);
        }

        // only the push that fills an empty queue needs to wake the writer
        if queued == 1 {
            self.write_ready.notify_one();
        }
        Ok(())
    }

    /// Tear the connection down. Idempotent.
    ///
    /// Pending reads and writes stop, the socket is dropped by the I/O task, and
    /// envelopes still waiting in the outbound queue are discarded.
    pub fn close(&self) {
        let previous = self
            .state
            .swap(ConnectionState::Closed as u8, Ordering::AcqRel);
        if previous == ConnectionState::Closed as u8 {
            return;
        }

        self.shutdown.cancel();
        let dropped = self.outbound.len();
        self.outbound.clear();
        global_metrics().connection_closed();
        debug!(peer = %self.peer_addr, id = ?self.id(), dropped, "Connection closed");
    }

    pub(crate) fn assign_id(&self, id: ConnectionId) {
        if self.id.set(id).is_err() {
            warn!(peer = %self.peer_addr, ?id, "Connection already has an id");
        }
    }

    /// `Handshaking -> Validated`; false if the connection closed meanwhile.
    pub(crate) fn mark_validated(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Handshaking as u8,
                ConnectionState::Validated as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Acceptor side: challenge the peer and check its answer.
    ///
    /// A wrong answer, a timeout or an I/O failure closes the connection.
    #[instrument(level = "debug", skip(self, stream), fields(peer = %self.peer_addr))]
    pub(crate) async fn accept_handshake<S>(&self, stream: &mut S, limit: Duration) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        global_metrics().handshake_attempt();
        let handshake = AcceptorHandshake::new();
        let outcome = tokio::select! {
            _ = self.shutdown.cancelled() => Err(ProtocolError::ConnectionClosed),
            result = with_timeout_error(limit, handshake.run(stream)) => result,
        };
        self.finish_handshake(outcome)
    }

    /// Initiator side: answer the server's challenge.
    #[instrument(level = "debug", skip(self, stream), fields(peer = %self.peer_addr))]
    pub(crate) async fn initiate_handshake<S>(&self, stream: &mut S, limit: Duration) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        global_metrics().handshake_attempt();
        let outcome = tokio::select! {
            _ = self.shutdown.cancelled() => Err(ProtocolError::ConnectionClosed),
            result = with_timeout_error(limit, answer_challenge(stream)) => result.map(|_| ()),
        };
        self.finish_handshake(outcome)
    }

    fn finish_handshake(&self, outcome: Result<()>) -> Result<()> {
        match outcome {
            Ok(()) if self.mark_validated() => {
                global_metrics().handshake_success();
                Ok(())
            }
            Ok(()) => Err(ProtocolError::ConnectionClosed),
            Err(e) => {
                global_metrics().handshake_failed();
                debug!(peer = %self.peer_addr, error = %e, "Handshake failed");
                self.close();
                Err(e)
            }
        }
    }

    /// Run the read and write pipelines until the connection closes.
    ///
    /// Received envelopes are pushed onto `inbound`, tagged with this connection's
    /// id when it sits on the acceptor side.
    #[instrument(level = "debug", skip_all, fields(peer = %self.peer_addr, id = ?self.id()))]
    pub(crate) async fn run_pipelines<S>(&self, stream: S, inbound: &TsQueue<OwnedMessage<T>>)
    where
        S: AsyncRead + AsyncWrite,
    {
        let (reader, writer) = tokio::io::split(stream);
        tokio::join!(self.read_pipeline(reader, inbound), self.write_pipeline(writer));
        self.close();
    }

    async fn read_pipeline<R>(&self, reader: R, inbound: &TsQueue<OwnedMessage<T>>)
    where
        R: AsyncRead + Unpin,
    {
        let codec = EnvelopeCodec::new().with_max_payload_size(self.limits.max_payload_size);
        let mut frames = FramedRead::new(reader, codec);
        let origin = match self.role {
            Role::Acceptor => self.id(),
            Role::Initiator => None,
        };

        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = frames.next() => next,
            };

            match next {
                Some(Ok(envelope)) => {
                    global_metrics().message_received(envelope.total_size() as u64);
                    trace!(%envelope, "Envelope received");
                    inbound.push_back(OwnedMessage::new(envelope, origin));
                }
                Some(Err(ProtocolError::Io(e))) => {
                    global_metrics().connection_error();
                    debug!(error = %e, "Read failed");
                    break;
                }
                Some(Err(e)) => {
                    global_metrics().protocol_error();
                    warn!(error = %e, "Malformed frame from peer");
                    break;
                }
                None => {
                    debug!("Peer closed the connection");
                    break;
                }
            }
        }

        self.close();
    }

    async fn write_pipeline<W>(&self, mut writer: W)
    where
        W: AsyncWrite + Unpin,
    {
        loop {
            let front = self
                .outbound
                .with_front(|e| (e.header().to_bytes(), Bytes::copy_from_slice(e.payload())));

            let Some((header, payload)) = front else {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = self.write_ready.notified() => {}
                }
                continue;
            };

            let written = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = write_envelope(&mut writer, &header, &payload) => result,
            };

            if let Err(e) = written {
                global_metrics().connection_error();
                debug!(error = %e, "Write failed");
                break;
            }

            global_metrics().message_sent((HEADER_SIZE + payload.len()) as u64);
            self.outbound.pop_front();
        }

        self.close();
    }
}

async fn write_envelope<W>(
    writer: &mut W,
    header: &[u8; HEADER_SIZE],
    payload: &[u8],
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(header).await?;
    if !payload.is_empty() {
        writer.write_all(payload).await?;
    }
    writer.flush().await
}

impl<T> Drop for Connection<T> {
    fn drop(&mut self) {
        // dropped without close(), e.g. mid-handshake when the I/O thread stops
        if *self.state.get_mut() != ConnectionState::Closed as u8 {
            global_metrics().connection_closed();
        }
    }
}

impl<T> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("peer_addr", &self.peer_addr)
            .field("id", &self.id.get())
            .field("state", &ConnectionState::from_u8(self.state.load(Ordering::Acquire)))
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::core::envelope::StandardKind;
    use futures::SinkExt;
    use tokio::io::duplex;
    use tokio_util::codec::{FramedRead, FramedWrite};

    fn peer() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn numbered(i: u32) -> Envelope<StandardKind> {
        let mut e = Envelope::new(StandardKind::ServerMessage);
        e.append(&i);
        e
    }

    #[tokio::test]
    async fn test_send_order_is_preserved() {
        let (local, remote) = duplex(256);
        let conn = Connection::new(Role::Initiator, peer(), &TransportConfig::default());
        assert!(conn.mark_validated());

        let inbound = Arc::new(TsQueue::new());
        let task = tokio::spawn({
            let conn = conn.clone();
            let inbound = inbound.clone();
            async move { conn.run_pipelines(local, &inbound).await }
        });

        for i in 0..200 {
            conn.send(numbered(i)).unwrap();
        }

        let mut frames = FramedRead::new(remote, EnvelopeCodec::<StandardKind>::new());
        for i in 0..200 {
            let mut e = frames.next().await.unwrap().unwrap();
            assert_eq!(e.extract::<u32>().unwrap(), i);
        }

        conn.close();
        task.await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_envelopes_queued_during_handshake_are_flushed() {
        let (local, remote) = duplex(256);
        let conn = Connection::new(Role::Acceptor, peer(), &TransportConfig::default());

        conn.send(Envelope::new(StandardKind::ServerAccept)).unwrap();
        conn.send(numbered(1)).unwrap();
        assert_eq!(conn.pending(), 2);

        assert!(conn.mark_validated());
        let inbound = TsQueue::new();
        let conn2 = conn.clone();
        let run = async move { conn2.run_pipelines(local, &inbound).await };
        let check = async {
            let mut frames = FramedRead::new(remote, EnvelopeCodec::<StandardKind>::new());
            let first = frames.next().await.unwrap().unwrap();
            assert_eq!(first.kind(), StandardKind::ServerAccept);
            assert!(first.is_empty());
            let mut second = frames.next().await.unwrap().unwrap();
            assert_eq!(second.extract::<u32>().unwrap(), 1);
            conn.close();
        };
        tokio::join!(run, check);
    }

    #[tokio::test]
    async fn test_received_envelopes_carry_origin_id() {
        let (local, remote) = duplex(256);
        let conn = Connection::new(Role::Acceptor, peer(), &TransportConfig::default());
        conn.assign_id(10_000);
        assert!(conn.mark_validated());

        let inbound = Arc::new(TsQueue::new());
        let task = tokio::spawn({
            let conn = conn.clone();
            let inbound = inbound.clone();
            async move { conn.run_pipelines(local, &inbound).await }
        });

        let mut sink = FramedWrite::new(remote, EnvelopeCodec::<StandardKind>::new());
        sink.send(numbered(5)).await.unwrap();
        sink.send(Envelope::new(StandardKind::ServerAll)).await.unwrap();

        // dropping the sink closes the stream and ends the read pipeline
        drop(sink);
        task.await.unwrap();

        let first = inbound.pop_front().unwrap();
        assert_eq!(first.origin, Some(10_000));
        assert_eq!(first.envelope, numbered(5));
        let second = inbound.pop_front().unwrap();
        assert_eq!(second.envelope.kind(), StandardKind::ServerAll);
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn test_peer_hangup_closes_connection() {
        let (local, remote) = duplex(64);
        let conn = Connection::<StandardKind>::new(Role::Initiator, peer(), &TransportConfig::default());
        assert!(conn.mark_validated());
        drop(remote);

        let inbound = TsQueue::new();
        conn.run_pipelines(local, &inbound).await;

        assert!(!conn.is_open());
        assert!(inbound.is_empty());
        assert!(matches!(
            conn.send(numbered(1)),
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_handshake_between_connections() {
        let (mut a, mut b) = duplex(64);
        let acceptor = Connection::<StandardKind>::new(Role::Acceptor, peer(), &TransportConfig::default());
        let initiator = Connection::<StandardKind>::new(Role::Initiator, peer(), &TransportConfig::default());

        let (ra, rb) = tokio::join!(
            acceptor.accept_handshake(&mut a, Duration::from_secs(1)),
            initiator.initiate_handshake(&mut b, Duration::from_secs(1))
        );
        ra.unwrap();
        rb.unwrap();
        assert!(acceptor.is_validated());
        assert!(initiator.is_validated());
    }

    #[tokio::test]
    async fn test_silent_peer_times_out_and_closes() {
        let (mut a, _silent) = duplex(64);
        let acceptor = Connection::<StandardKind>::new(Role::Acceptor, peer(), &TransportConfig::default());

        let result = acceptor
            .accept_handshake(&mut a, Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));
        assert_eq!(acceptor.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_close_is_idempotent_and_drops_queue() {
        let conn = Connection::new(Role::Acceptor, peer(), &TransportConfig::default());
        conn.send(numbered(1)).unwrap();
        conn.close();
        conn.close();
        assert_eq!(conn.pending(), 0);
        assert!(!conn.mark_validated());
    }

    #[test]
    fn test_outbound_cap_holds_for_concurrent_senders() {
        let limits = TransportConfig {
            max_payload_size: None,
            max_outbound_queue: Some(10),
        };
        let conn = Connection::new(Role::Initiator, peer(), &limits);

        let accepted: usize = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        (0..50u32)
                            .filter(|&i| conn.send(numbered(i)).is_ok())
                            .count()
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).sum()
        });

        assert_eq!(accepted, 10);
        assert_eq!(conn.pending(), 10);
    }

    #[test]
    fn test_send_racing_close_leaves_nothing_queued() {
        let conn = Connection::new(Role::Acceptor, peer(), &TransportConfig::default());

        std::thread::scope(|scope| {
            let sender = scope.spawn(|| {
                let mut refused = false;
                for i in 0..10_000u32 {
                    if conn.send(numbered(i)).is_err() {
                        refused = true;
                        break;
                    }
                }
                refused
            });
            std::thread::sleep(Duration::from_millis(1));
            conn.close();
            sender.join().unwrap();
        });

        assert!(!conn.is_open());
        assert_eq!(conn.pending(), 0);
        assert!(matches!(
            conn.send(numbered(0)),
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_outbound_limits() {
        let limits = TransportConfig {
            max_payload_size: Some(2),
            max_outbound_queue: Some(1),
        };
        let conn = Connection::new(Role::Initiator, peer(), &limits);

        assert!(matches!(
            conn.send(numbered(1)),
            Err(ProtocolError::OversizedPayload(4))
        ));
        conn.send(Envelope::new(StandardKind::ServerPing)).unwrap();
        assert!(matches!(
            conn.send(Envelope::new(StandardKind::ServerPing)),
            Err(ProtocolError::Backpressure(1))
        ));
    }
}
