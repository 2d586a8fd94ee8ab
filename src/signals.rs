//! Signal handling for graceful shutdown.
//!
//! SIGINT (Ctrl-C) and SIGTERM both flip the same shutdown flag. Only the
//! first request does anything; later ones are logged and ignored.
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

/// Shared, idempotent shutdown flag.
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Request shutdown. Returns `true` only for the call that started it.
    pub fn trigger(&self, reason: &str) -> bool {
        let started = self.tx.send_if_modified(|stop| !std::mem::replace(stop, true));
        if started {
            tracing::info!(reason, "shutting down gracefully");
        } else {
            tracing::debug!(reason, "shutdown already in progress, ignoring");
        }
        started
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Route SIGINT and SIGTERM to `trigger` from a background task.
    pub fn install(&self) -> std::io::Result<()> {
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let handle = self.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(()) = sigint.recv() => {
                        handle.trigger("SIGINT");
                    }
                    Some(()) = sigterm.recv() => {
                        handle.trigger("SIGTERM");
                    }
                    else => break,
                }
            }
        });
        Ok(())
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
