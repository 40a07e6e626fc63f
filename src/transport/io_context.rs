//! Single-threaded I/O execution context.
//!
//! Each role owns one `IoContext`: a current-thread tokio runtime driven by one
//! dedicated OS thread for the role's lifetime. Every socket operation and every
//! connection task of that role runs there, so connection-private state is only
//! ever touched from that thread. Application threads reach it by spawning
//! tasks through the context's handle.

use std::future::Future;
use std::thread::JoinHandle;

use tokio::runtime::{Builder, Handle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::{constants, ProtocolError, Result};
use crate::utils::timeout::SHUTDOWN_TIMEOUT;

pub struct IoContext {
    handle: Handle,
    shutdown: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl IoContext {
    /// Build the runtime and start its worker thread.
    pub fn start(name: &str) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let handle = runtime.handle().clone();
        let shutdown = CancellationToken::new();

        let stop = shutdown.clone();
        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                runtime.block_on(stop.cancelled());
                // pending connection tasks are dropped here, closing their sockets
                runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
            })?;

        debug!(thread = name, "I/O context started");
        Ok(Self {
            handle,
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some() && !self.shutdown.is_cancelled()
    }

    /// Schedule `fut` on the I/O thread.
    pub fn spawn<F>(&self, fut: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(fut)
    }

    /// Run `fut` on the I/O thread and block the calling thread for its result.
    ///
    /// # Errors
    /// `TransportError` when called from a thread that is driving a tokio runtime
    /// (the I/O thread included), or when the context stops before `fut` finishes.
    pub fn run_blocking<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if Handle::try_current().is_ok() {
            return Err(ProtocolError::TransportError(
                constants::ERR_BLOCKING_IN_RUNTIME.to_string(),
            ));
        }

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.spawn(async move {
            let _ = tx.send(fut.await);
        });
        rx.blocking_recv().map_err(|_| {
            ProtocolError::TransportError(constants::ERR_IO_CONTEXT_STOPPED.to_string())
        })?
    }

    /// Stop the event loop and join the worker thread. Idempotent.
    pub fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("I/O thread panicked");
            } else {
                debug!("I/O context stopped");
            }
        }
    }
}

impl Drop for IoContext {
    fn drop(&mut self) {
        self.stop();
    }
}
