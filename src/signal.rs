//! Log rotation on SIGHUP.
//!
//! While the phases run, a [`SignalMonitor`] listens for SIGHUP and asks the
//! [`Logger`] to rotate its file. Signals never change the outcome of a run.
//! On platforms without Unix signals the monitor is a no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::logging::Logger;

/// Listens for SIGHUP and rotates the log file.
#[derive(Debug)]
pub struct SignalMonitor {
    logger: Logger,
    handling_signals: AtomicBool,
}

impl SignalMonitor {
    /// Create a monitor for `logger`.
    #[must_use]
    pub const fn new(logger: Logger) -> Self {
        Self {
            logger,
            handling_signals: AtomicBool::new(false),
        }
    }

    /// Handle signals until [`SignalMonitor::stop`] is called.
    ///
    /// Returns immediately if the monitor is already running.
    ///
    /// # Errors
    ///
    /// Returns an error if the SIGHUP handler cannot be registered.
    pub async fn handle_signals(&self) -> Result<()> {
        if self
            .handling_signals
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Signal monitor already running");
            return Ok(());
        }

        #[cfg(unix)]
        {
            self.handle_unix_signals().await
        }

        #[cfg(not(unix))]
        {
            debug!("No rotation signal on this platform");
            Ok(())
        }
    }

    /// Stop handling signals.
    pub fn stop(&self) {
        self.handling_signals.store(false, Ordering::Release);
        debug!("Signal monitor stopped");
    }

    /// Check if signal handling is active.
    pub fn is_handling(&self) -> bool {
        self.handling_signals.load(Ordering::Acquire)
    }

    /// Run the monitor on a background task.
    #[must_use]
    pub fn spawn(self: &Arc<Self>) -> SignalTask {
        let monitor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            if let Err(e) = monitor.handle_signals().await {
                warn!(error = %e, "Signal monitor failed");
            }
        });
        SignalTask {
            monitor: Arc::clone(self),
            handle,
        }
    }

    fn rotate(&self) {
        info!(signal = "SIGHUP", "Rotating log file");
        if let Err(e) = self.logger.rotate() {
            warn!(error = %e, "Log rotation failed");
        }
    }
}

#[cfg(unix)]
impl SignalMonitor {
    async fn handle_unix_signals(&self) -> Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sighup = signal(SignalKind::hangup()).map_err(|e| {
            self.handling_signals.store(false, Ordering::Release);
            crate::Error::signal_with_source("Failed to register SIGHUP handler", e)
        })?;

        debug!("SIGHUP handler registered");

        while self.is_handling() {
            if sighup.recv().await.is_none() {
                break;
            }
            if !self.is_handling() {
                break;
            }
            self.rotate();
        }

        Ok(())
    }
}

/// A monitor running in the background.
#[derive(Debug)]
pub struct SignalTask {
    monitor: Arc<SignalMonitor>,
    handle: JoinHandle<()>,
}

impl SignalTask {
    /// Stop the monitor and wait for its task to end.
    pub async fn stop(self) {
        self.monitor.stop();
        self.handle.abort();
        let _ = self.handle.await;
    }
}
