//! Keeps a fixed number of workers alive.
//!
//! A worker that exits with a non-zero code (or by signal) is replaced in
//! the same slot. A clean exit retires the slot; once every slot is retired
//! the supervisor returns. Stop requests are forwarded to every live worker
//! as a `shutdown` message. Workers crashing after a stop are not replaced
//! and make the final exit code 1.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::FutureExt;
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::error::SupervisorError;
use crate::signals::StopReason;
use crate::worker::{ControlMessage, Launch, Worker};

/// Live counters of a running supervisor.
#[derive(Debug, Clone, Default)]
pub struct SupervisorStatus {
    active: Arc<AtomicUsize>,
    spawned: Arc<AtomicUsize>,
}

impl SupervisorStatus {
    /// Slots not yet retired by a clean exit.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Workers launched so far, replacements included.
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }
}

type Exit = BoxFuture<'static, (usize, Option<i32>)>;

pub struct Supervisor<L> {
    launcher: L,
    thread_count: usize,
    status: SupervisorStatus,
}

impl<L: Launch> Supervisor<L> {
    pub fn new(launcher: L, thread_count: usize) -> Self {
        Self {
            launcher,
            thread_count,
            status: SupervisorStatus::default(),
        }
    }

    pub fn status(&self) -> SupervisorStatus {
        self.status.clone()
    }

    /// Run until every slot is retired. Returns the process exit code.
    ///
    /// Failing to launch the initial workers is an error; failing to launch
    /// a replacement loses that slot.
    pub async fn run(
        mut self,
        mut stop: mpsc::UnboundedReceiver<StopReason>,
    ) -> Result<i32, SupervisorError> {
        if self.thread_count == 0 {
            return Err(SupervisorError::NoWorkers);
        }

        let mut controls: Vec<Option<mpsc::UnboundedSender<ControlMessage>>> =
            vec![None; self.thread_count];
        let mut exits: FuturesUnordered<Exit> = FuturesUnordered::new();
        self.status.active.store(self.thread_count, Ordering::SeqCst);

        for slot in 0..self.thread_count {
            let worker = self.launcher.launch(slot)?;
            self.track(slot, worker, &mut controls, &mut exits);
        }
        info!(workers = self.thread_count, "Supervisor started");

        let mut stopping = false;
        let mut failed = false;

        loop {
            tokio::select! {
                Some(reason) = stop.recv(), if !stopping => {
                    info!(?reason, "Stopping workers");
                    stopping = true;
                    for control in controls.iter().flatten() {
                        let _ = control.send(ControlMessage::Shutdown);
                    }
                }

                Some((slot, code)) = exits.next() => {
                    controls[slot] = None;
                    if code == Some(0) {
                        self.retire();
                        info!(slot, active = self.status.active(), "Worker exited");
                    } else if stopping {
                        warn!(slot, ?code, "Worker failed during shutdown");
                        failed = true;
                        self.retire();
                    } else {
                        warn!(slot, ?code, "Worker crashed, restarting");
                        match self.launcher.launch(slot) {
                            Ok(worker) => self.track(slot, worker, &mut controls, &mut exits),
                            Err(e) => {
                                error!(slot, "Failed to restart worker: {e}");
                                failed = true;
                                self.retire();
                            }
                        }
                    }

                    if self.status.active() == 0 {
                        break;
                    }
                }

                else => break,
            }
        }

        let code = i32::from(failed);
        info!(code, "Supervisor finished");
        Ok(code)
    }

    fn track(
        &self,
        slot: usize,
        worker: Worker,
        controls: &mut [Option<mpsc::UnboundedSender<ControlMessage>>],
        exits: &mut FuturesUnordered<Exit>,
    ) {
        self.status.spawned.fetch_add(1, Ordering::SeqCst);
        controls[slot] = Some(worker.control);
        exits.push(worker.exit.map(move |code| (slot, code)).boxed());
    }

    fn retire(&self) {
        let _ = self
            .status
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)));
    }
}
