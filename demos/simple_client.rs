//! Example: interactive client for `simple_server`
//!
//! Type a command and press enter:
//! - `1` ping the server and print the round-trip time
//! - `2` ask the server to tell every other client about us
//! - `3` quit
//!
//! Run with: `cargo run --example simple_client [host] [port]`

use std::io::BufRead;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use duplex_net::utils::logging::init_logging;
use duplex_net::{Client, Envelope, NetworkConfig, StandardKind};

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

fn drain_incoming(client: &Client<StandardKind>) {
    while let Some(message) = client.incoming().pop_front() {
        let mut envelope = message.into_envelope();
        match envelope.kind() {
            StandardKind::ServerAccept => println!("Server accepted connection"),
            StandardKind::ServerPing => match envelope.extract::<u64>() {
                Ok(then) => {
                    let rtt = Duration::from_nanos(now_nanos().saturating_sub(then));
                    println!("Ping: {rtt:?}");
                }
                Err(e) => println!("Malformed ping reply: {e}"),
            },
            StandardKind::ServerAll => match envelope.extract::<u32>() {
                Ok(id) => println!("Hello from [{id}]"),
                Err(e) => println!("Malformed relay: {e}"),
            },
            other => println!("Unexpected {other:?}: {envelope}"),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port = args.next().map(|p| p.parse()).transpose()?.unwrap_or(60000);

    let config = NetworkConfig::from_env()?;
    init_logging(&config.logging)?;

    let client = Client::<StandardKind>::new(config);
    client.connect(&host, port)?;

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        drain_incoming(&client);
        if !client.is_connected() {
            println!("Server down");
            break;
        }

        match line?.trim() {
            "1" => {
                let mut ping = Envelope::new(StandardKind::ServerPing);
                ping.append(&now_nanos());
                client.send(ping)?;
            }
            "2" => client.send(Envelope::new(StandardKind::ServerAll))?,
            "3" => break,
            "" => {}
            other => println!("Unknown command {other:?} (1 = ping, 2 = message all, 3 = quit)"),
        }

        // give replies a moment so they print before the next prompt
        if client.incoming().wait_timeout(Duration::from_millis(250)) {
            drain_incoming(&client);
        }
    }

    client.disconnect();
    Ok(())
}
