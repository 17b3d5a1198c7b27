//! Broadcast shutdown signaling.
//!
//! A single [`ShutdownTx`] can stop any number of read-ahead producers and working directory
//! loops. Receivers can be checked synchronously from plain threads with
//! [`ShutdownRx::is_shutdown`] or awaited inside `tokio::select!` with
//! [`ShutdownRx::wait_for_shutdown`].

use tokio::sync::watch;

/// Transmitter side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

impl ShutdownTx {
    /// Signals shutdown to every current and future receiver.
    ///
    /// Signaling is idempotent and works even when no receiver is alive.
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }

    /// Creates a new receiver subscription.
    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

/// Receiver side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownRx {
    /// Returns `true` once shutdown was signaled.
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    /// Waits until shutdown is signaled.
    ///
    /// If every transmitter is dropped without signaling, this never resolves: a dropped
    /// transmitter is not a shutdown request.
    pub async fn wait_for_shutdown(&mut self) {
        if self.0.wait_for(|stopped| *stopped).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Creates a new shutdown channel in the running state.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(tx), ShutdownRx(rx))
}
