//! Signal handling for rescan and shutdown.
//!
//! Bridges OS signals with the async runtime: SIGHUP triggers a rescan of
//! the watch directory, SIGTERM/SIGINT a graceful shutdown.

use std::io;
use std::thread;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// Signal type for cross-thread communication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalType {
    /// Rescan the watch directory (SIGHUP)
    Rescan,
    /// Graceful shutdown (SIGTERM/SIGINT)
    Shutdown,
}

/// Signal manager for handling OS signals with async integration
///
/// A dedicated thread iterates the registered signals and forwards them
/// into a channel the supervisor awaits.
pub struct SignalManager {
    tx: mpsc::UnboundedSender<SignalType>,
    rx: mpsc::UnboundedReceiver<SignalType>,
    handle: Option<Handle>,
}

impl SignalManager {
    /// Register SIGTERM, SIGINT and SIGHUP and start forwarding them
    pub fn install() -> io::Result<Self> {
        let mut manager = Self::detached();
        let mut signals = Signals::new([SIGTERM, SIGINT, SIGHUP])?;
        manager.handle = Some(signals.handle());

        let tx = manager.sender();
        thread::Builder::new()
            .name("certsync-signals".to_string())
            .spawn(move || {
                for sig in signals.forever() {
                    let signal = match sig {
                        SIGTERM | SIGINT => {
                            info!("Received shutdown signal, initiating graceful shutdown");
                            SignalType::Shutdown
                        }
                        SIGHUP => {
                            info!("Received SIGHUP, triggering certificate rescan");
                            SignalType::Rescan
                        }
                        _ => continue,
                    };
                    if tx.send(signal).is_err() {
                        break;
                    }
                }
                trace!("Signal thread exiting");
            })?;

        debug!("Signal handlers installed");
        Ok(manager)
    }

    /// A manager with no OS handlers; signals arrive only through
    /// [`SignalManager::sender`]
    pub fn detached() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            handle: None,
        }
    }

    /// Get a sender for injecting signals
    pub fn sender(&self) -> mpsc::UnboundedSender<SignalType> {
        self.tx.clone()
    }

    /// Wait for the next signal
    pub async fn recv(&mut self) -> Option<SignalType> {
        let signal = self.rx.recv().await;
        if let Some(ref s) = signal {
            debug!(signal = ?s, "Received signal");
        }
        signal
    }
}

impl Drop for SignalManager {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.close();
        }
    }
}

impl std::fmt::Debug for SignalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalManager")
            .field("installed", &self.handle.is_some())
            .finish()
    }
}
