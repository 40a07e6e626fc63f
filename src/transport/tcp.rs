//! TCP transport: name resolution, outbound connect over an endpoint list,
//! and listener binding.
//!
//! Everything here must run on a role's I/O thread so the sockets register with
//! that thread's reactor.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, instrument};

use crate::error::{constants, ProtocolError, Result};
use crate::utils::timeout::with_timeout;

/// Resolve `host:port` to every endpoint it names.
#[instrument(level = "debug")]
pub async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let endpoints: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| ProtocolError::Resolve(format!("{host}:{port}: {e}")))?
        .collect();

    if endpoints.is_empty() {
        return Err(ProtocolError::Resolve(format!(
            "{host}:{port}: {}",
            constants::ERR_NO_ENDPOINTS
        )));
    }
    Ok(endpoints)
}

/// Try each endpoint in order and return the first socket that connects.
///
/// Each attempt is bounded by `limit`. The last failure is returned if none succeed.
#[instrument(level = "debug", skip(endpoints), fields(candidates = endpoints.len()))]
pub async fn connect_any(endpoints: &[SocketAddr], limit: Duration) -> Result<TcpStream> {
    let mut last_error = ProtocolError::Resolve(constants::ERR_NO_ENDPOINTS.to_string());

    for endpoint in endpoints {
        match with_timeout(limit, TcpStream::connect(endpoint)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                debug!(%endpoint, "Connected");
                return Ok(stream);
            }
            Ok(Err(e)) => {
                debug!(%endpoint, error = %e, "Connect attempt failed");
                last_error = ProtocolError::Io(e);
            }
            Err(e) => {
                debug!(%endpoint, "Connect attempt timed out");
                last_error = e;
            }
        }
    }

    Err(last_error)
}

/// Bind a listener on `address` (`host:port`; port 0 picks a free one).
pub async fn bind(address: &str) -> Result<TcpListener> {
    TcpListener::bind(address)
        .await
        .map_err(|e| ProtocolError::TransportError(format!("bind {address}: {e}")))
}
