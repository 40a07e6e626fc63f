//! Connection accounting in the global metrics.
//!
//! Kept in its own test binary: the counters are process-wide, so nothing else
//! may open connections while these assertions run.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use std::io::Read;
use std::net::TcpStream;
use std::time::Duration;

use common::{eventually, Harness, PATIENCE};
use duplex_net::config::TransportConfig;
use duplex_net::utils::metrics::global_metrics;
use duplex_net::{Connection, Role, StandardKind};

fn active() -> u64 {
    global_metrics().snapshot().connections_active
}

#[test]
fn test_active_connections_settle_after_stop() {
    let baseline = active();

    // dropped without ever being closed
    let stray = Connection::<StandardKind>::new(
        Role::Acceptor,
        "127.0.0.1:1".parse().unwrap(),
        &TransportConfig::default(),
    );
    assert_eq!(active(), baseline + 1);
    drop(stray);
    assert_eq!(active(), baseline);

    let harness = Harness::start_with(|c| c.server.handshake_timeout = Duration::from_secs(30));
    let client = harness.client();

    // a peer parked mid-handshake when the server stops
    let mut silent = TcpStream::connect(harness.addr()).unwrap();
    silent.set_read_timeout(Some(PATIENCE)).unwrap();
    let mut challenge = [0u8; 8];
    silent.read_exact(&mut challenge).unwrap();

    // client side, its server side, and the silent peer
    assert!(eventually(|| active() == baseline + 3));

    drop(harness);
    drop(client);
    assert!(eventually(|| active() == baseline));
}
