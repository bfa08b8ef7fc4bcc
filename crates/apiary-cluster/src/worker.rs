//! Worker handles and the supervisor-to-worker control channel.

use std::io::BufRead;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::SupervisorError;

/// Message sent from the supervisor to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    Shutdown,
}

impl ControlMessage {
    /// Wire form, one message per line.
    pub fn as_line(&self) -> &'static str {
        match self {
            Self::Shutdown => "shutdown\n",
        }
    }

    pub fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "shutdown" => Some(Self::Shutdown),
            _ => None,
        }
    }
}

/// A launched worker.
pub struct Worker {
    pub pid: Option<u32>,
    /// Delivers control messages to the worker.
    pub control: mpsc::UnboundedSender<ControlMessage>,
    /// Resolves with the exit code once the worker is gone; `None` when it
    /// was killed by a signal.
    pub exit: BoxFuture<'static, Option<i32>>,
}

/// Starts a worker for a slot.
pub trait Launch: Send {
    fn launch(&mut self, slot: usize) -> Result<Worker, SupervisorError>;
}

/// Control messages read from this process's stdin, for use inside a worker.
///
/// Stdin is read on a dedicated thread; unknown lines are ignored and the
/// channel closes at end of input.
pub fn stdin_control() -> mpsc::UnboundedReceiver<ControlMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match ControlMessage::parse(&line) {
                Some(message) => {
                    if tx.send(message).is_err() {
                        break;
                    }
                }
                None => debug!(line = %line.trim(), "Ignoring unknown control line"),
            }
        }
    });
    rx
}
