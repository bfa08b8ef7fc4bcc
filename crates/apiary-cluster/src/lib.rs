//! Apiary worker supervisor.
//!
//! Runs a fixed number of worker processes, restarts the ones that crash
//! and forwards stop requests to every live worker as a `shutdown` message.

pub mod error;
pub mod process;
pub mod signals;
pub mod supervisor;
pub mod worker;

pub use error::SupervisorError;
pub use process::ProcessLauncher;
pub use signals::{StopReason, stop_signals};
pub use supervisor::{Supervisor, SupervisorStatus};
pub use worker::{ControlMessage, Launch, Worker, stdin_control};
