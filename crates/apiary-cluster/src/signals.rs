//! Stop requests from the operating system.
//!
//! A Ctrl-C typed in the controlling terminal arrives as SIGINT, since the
//! terminal stays in canonical mode.

use tokio::sync::mpsc;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// SIGINT
    Interrupt,
    /// SIGTERM
    Terminate,
}

/// Stream of stop requests from SIGINT and SIGTERM. Leaves stdin alone, so
/// workers can read control messages from it. Must be called inside a
/// tokio runtime.
pub fn stop_signals() -> mpsc::UnboundedReceiver<StopReason> {
    let (tx, rx) = mpsc::unbounded_channel();

    let sigint = tx.clone();
    tokio::spawn(async move {
        loop {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received SIGINT");
                    if sigint.send(StopReason::Interrupt).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to listen for SIGINT");
                    break;
                }
            }
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                while signal.recv().await.is_some() {
                    info!("Received SIGTERM");
                    if tx.send(StopReason::Terminate).is_err() {
                        break;
                    }
                }
            }
            Err(e) => error!(error = %e, "Failed to listen for SIGTERM"),
        }
    });

    rx
}
