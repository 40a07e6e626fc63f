//! Shared loopback harness for the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use duplex_net::{
    Client, Connection, ConnectionId, Envelope, NetworkConfig, Server, ServerHandler, StandardKind,
};
use parking_lot::Mutex;

pub const PATIENCE: Duration = Duration::from_secs(5);

/// Chat-style handler: greets every peer, echoes pings, relays "message all"
/// requests, and records what it sees.
#[derive(Default)]
pub struct ChatHandler {
    pub refuse: AtomicBool,
    pub validated: AtomicUsize,
    pub disconnected: Mutex<Vec<ConnectionId>>,
    pub received: Mutex<Vec<u32>>,
}

impl ServerHandler<StandardKind> for ChatHandler {
    fn on_connect_requested(&self, conn: &Connection<StandardKind>) -> bool {
        if self.refuse.load(Ordering::SeqCst) {
            return false;
        }
        conn.send(Envelope::new(StandardKind::ServerAccept)).is_ok()
    }

    fn on_validated(&self, _conn: &Connection<StandardKind>) {
        self.validated.fetch_add(1, Ordering::SeqCst);
    }

    fn on_disconnected(&self, conn: &Connection<StandardKind>) {
        if let Some(id) = conn.id() {
            self.disconnected.lock().push(id);
        }
    }

    fn on_message(
        &self,
        server: &Server<StandardKind, Self>,
        conn: &Arc<Connection<StandardKind>>,
        mut envelope: Envelope<StandardKind>,
    ) {
        match envelope.kind() {
            StandardKind::ServerPing => {
                let _ = conn.send(envelope);
            }
            StandardKind::ServerAll => {
                let Some(id) = conn.id() else { return };
                let mut relay = Envelope::new(StandardKind::ServerAll);
                relay.append(&id);
                server.broadcast(&relay, Some(id));
            }
            StandardKind::ServerMessage => {
                if let Ok(value) = envelope.extract::<u32>() {
                    self.received.lock().push(value);
                }
            }
            _ => {}
        }
    }
}

/// A running server plus a thread pumping `dispatch`.
pub struct Harness {
    pub server: Arc<Server<StandardKind, ChatHandler>>,
    running: Arc<AtomicBool>,
    pump: Option<JoinHandle<()>>,
}

impl Harness {
    pub fn start() -> Self {
        Self::start_with(|_| {})
    }

    pub fn start_with(tweak: impl FnOnce(&mut NetworkConfig)) -> Self {
        let config = NetworkConfig::default_with_overrides(|c| {
            c.server.address = "127.0.0.1:0".to_string();
            c.server.handshake_timeout = Duration::from_secs(2);
            tweak(c);
        });
        Self::start_with_handler(config, ChatHandler::default())
    }

    pub fn start_with_handler(config: NetworkConfig, handler: ChatHandler) -> Self {
        let server = Arc::new(Server::new(config, handler));
        server.start().expect("server should start");

        let running = Arc::new(AtomicBool::new(true));
        let pump = std::thread::spawn({
            let server = Arc::clone(&server);
            let running = Arc::clone(&running);
            move || {
                while running.load(Ordering::SeqCst) {
                    server.dispatch_timeout(None, Duration::from_millis(20));
                }
            }
        });

        Self {
            server,
            running,
            pump: Some(pump),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.server.local_addr().expect("server should be bound")
    }

    pub fn handler(&self) -> &ChatHandler {
        self.server.handler()
    }

    /// Connect a client and wait for its greeting, which also means it is registered.
    pub fn client(&self) -> Client<StandardKind> {
        let client = Client::new(NetworkConfig::default());
        client.connect("127.0.0.1", self.addr().port()).unwrap();

        let greeting = recv(&client, PATIENCE).expect("client should be greeted");
        assert_eq!(greeting.kind(), StandardKind::ServerAccept);
        assert!(greeting.is_empty());
        client
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(pump) = self.pump.take() {
            let _ = pump.join();
        }
        self.server.stop();
    }
}

/// Next envelope on the client's inbound queue, or `None` after `within`.
pub fn recv(client: &Client<StandardKind>, within: Duration) -> Option<Envelope<StandardKind>> {
    let deadline = Instant::now() + within;
    loop {
        if let Some(message) = client.incoming().pop_front() {
            return Some(message.envelope);
        }
        let left = deadline.checked_duration_since(Instant::now())?;
        if !client.incoming().wait_timeout(left) {
            return None;
        }
    }
}

/// Poll `condition` until it holds or `PATIENCE` runs out.
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + PATIENCE;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
