//! Signal handling for graceful shutdown.
//!
//! Signals only flip a [`ShutdownToken`]. Tearing down the firewall state runs
//! ipset/iptables, which is done by the main task after it notices the token,
//! never from the signal listener itself.

use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// A token that can be shared across tasks to request and observe shutdown.
#[derive(Clone, Debug)]
pub struct ShutdownToken {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Check if shutdown has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Request shutdown. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Wait until shutdown is requested.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail while we wait
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Listens for SIGINT and SIGTERM and cancels the token on the first one.
/// The listener stops when the guard is dropped.
pub struct ShutdownGuard {
    task: JoinHandle<()>,
}

impl ShutdownGuard {
    /// Start listening. Must be called from within a tokio runtime.
    ///
    /// Handlers are registered before this returns. If a handler cannot be
    /// registered (e.g., in restricted environments), the guard is still
    /// created but that signal is ignored.
    pub fn install(token: ShutdownToken) -> Self {
        let sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!("Failed to register SIGINT handler: {}", e);
                None
            }
        };

        let sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!("Failed to register SIGTERM handler: {}", e);
                None
            }
        };

        let task = tokio::spawn(async move {
            match (sigint, sigterm) {
                (Some(mut int), Some(mut term)) => {
                    tokio::select! {
                        _ = int.recv() => info!("Received SIGINT, shutting down"),
                        _ = term.recv() => info!("Received SIGTERM, shutting down"),
                    }
                    token.cancel();
                }
                (Some(mut int), None) => {
                    int.recv().await;
                    info!("Received SIGINT, shutting down");
                    token.cancel();
                }
                (None, Some(mut term)) => {
                    term.recv().await;
                    info!("Received SIGTERM, shutting down");
                    token.cancel();
                }
                (None, None) => {
                    tracing::warn!("No signal handlers registered - graceful shutdown disabled");
                }
            }
        });

        Self { task }
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}
