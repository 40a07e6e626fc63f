//! Timeout defaults and async timeout wrappers.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Default bound on connecting to a remote endpoint
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on the challenge/response exchange
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause before re-arming a listener whose last `accept` failed
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// How long the I/O thread gets to wind down spawned tasks on stop
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);

/// Await `fut`, failing with `ProtocolError::Timeout` once `duration` elapses.
pub async fn with_timeout<F, T>(duration: Duration, fut: F) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, fut)
        .await
        .map_err(|_| ProtocolError::Timeout)
}

/// Like [`with_timeout`] for fallible futures, flattening the inner error.
pub async fn with_timeout_error<F, T>(duration: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    with_timeout(duration, fut).await?
}
