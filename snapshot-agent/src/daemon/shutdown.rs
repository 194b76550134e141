//! Interrupt handling for SIGTERM and SIGINT.
//!
//! A snapshot run is not cancelled in-process: when a signal arrives the CLI
//! stops waiting for it and exits, leaving the staging area marked
//! resumable so the next run continues the transfer.

use std::fmt;
use std::io;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Which signal ended the wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl ShutdownSignal {
    /// Conventional exit code (128 + signal number)
    pub fn exit_code(self) -> i32 {
        match self {
            ShutdownSignal::Interrupt => 130,
            ShutdownSignal::Terminate => 143,
        }
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => f.write_str("SIGINT"),
            ShutdownSignal::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Shutdown coordinator
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { shutdown_tx }
    }

    /// Get a shutdown receiver
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.shutdown_tx.subscribe()
    }

    /// Wait for SIGTERM or SIGINT and broadcast it to subscribers.
    pub async fn wait_for_signal(&self) -> io::Result<ShutdownSignal> {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;

        let received = tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                ShutdownSignal::Interrupt
            }
            _ = terminate.recv() => ShutdownSignal::Terminate,
        };
        info!("Received {}, shutting down", received);

        self.trigger(received);
        Ok(received)
    }

    /// Broadcast a shutdown without a signal
    pub fn trigger(&self, signal: ShutdownSignal) {
        if let Err(e) = self.shutdown_tx.send(signal) {
            warn!("Failed to broadcast shutdown signal: {}", e);
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
