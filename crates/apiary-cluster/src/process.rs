//! Worker processes spawned with `tokio::process`.

use std::path::PathBuf;
use std::process::Stdio;

use futures_util::FutureExt;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::error::SupervisorError;
use crate::worker::{ControlMessage, Launch, Worker};

/// Environment variable carrying the 1-based worker id.
pub const WORKER_ID_ENV: &str = "APIARY_WORKER_ID";

/// Launches `exec args..` as a child process with a piped stdin used for
/// control messages. Output goes to the supervisor's own stdout/stderr.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    exec: PathBuf,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl ProcessLauncher {
    pub fn new(exec: impl Into<PathBuf>) -> Self {
        Self {
            exec: exec.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

impl Launch for ProcessLauncher {
    fn launch(&mut self, slot: usize) -> Result<Worker, SupervisorError> {
        let mut cmd = Command::new(&self.exec);
        cmd.args(&self.args)
            .env(WORKER_ID_ENV, (slot + 1).to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(false);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|source| SupervisorError::Spawn { slot, source })?;
        let pid = child.id();
        info!(slot, pid = ?pid, "Worker started");

        let (control, mut messages) = mpsc::unbounded_channel::<ControlMessage>();
        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                while let Some(message) = messages.recv().await {
                    if let Err(e) = stdin.write_all(message.as_line().as_bytes()).await {
                        debug!(slot, "Worker stdin closed: {e}");
                        break;
                    }
                    let _ = stdin.flush().await;
                }
            });
        }

        let exit = async move {
            match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    error!(slot, "Failed to wait for worker: {e}");
                    None
                }
            }
        }
        .boxed();

        Ok(Worker { pid, control, exit })
    }
}
