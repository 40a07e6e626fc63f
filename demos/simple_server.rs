//! Example: chat-style server
//!
//! Greets every client, echoes pings, and relays "message all" requests to every
//! other client.
//!
//! Run with: `cargo run --example simple_server`
//! (override the listen address with `DUPLEX_NET_SERVER_ADDRESS`)

use std::sync::Arc;

use duplex_net::utils::logging::init_logging;
use duplex_net::utils::metrics::global_metrics;
use duplex_net::{Connection, Envelope, NetworkConfig, Server, ServerHandler, StandardKind};

struct ChatServer;

impl ServerHandler<StandardKind> for ChatServer {
    fn on_connect_requested(&self, conn: &Connection<StandardKind>) -> bool {
        conn.send(Envelope::new(StandardKind::ServerAccept)).is_ok()
    }

    fn on_validated(&self, conn: &Connection<StandardKind>) {
        println!("[{}] Validated ({})", conn.id().unwrap_or_default(), conn.peer_addr());
    }

    fn on_disconnected(&self, conn: &Connection<StandardKind>) {
        println!("Removing client [{}]", conn.id().unwrap_or_default());
    }

    fn on_message(
        &self,
        server: &Server<StandardKind, Self>,
        conn: &Arc<Connection<StandardKind>>,
        envelope: Envelope<StandardKind>,
    ) {
        let id = conn.id().unwrap_or_default();
        match envelope.kind() {
            StandardKind::ServerPing => {
                println!("[{id}]: Server ping");
                let _ = conn.send(envelope);
            }
            StandardKind::ServerAll => {
                println!("[{id}]: Message all");
                let mut relay = Envelope::new(StandardKind::ServerAll);
                relay.append(&id);
                server.broadcast(&relay, Some(id));
            }
            other => println!("[{id}]: Ignoring {other:?}"),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = NetworkConfig::from_env()?;
    config.validate_strict()?;
    init_logging(&config.logging)?;

    let server = Server::new(config, ChatServer);
    server.start()?;
    println!("Listening on {}", server.local_addr().map(|a| a.to_string()).unwrap_or_default());

    loop {
        if server.dispatch(None, true) > 0 {
            global_metrics().log_metrics();
        }
    }
}
