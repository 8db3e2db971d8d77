//! A running tunnel process and its process group
//!
//! The child is spawned as the leader of a new process group, so its pid is
//! also the group id. Signals are always delivered to the whole group, which
//! reaches anything the tunnel itself spawned (proxy commands, control
//! masters, ...).

use crate::command::TunnelCommand;
use chrono::{DateTime, Utc};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::fmt;
use std::os::unix::process::CommandExt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Spawned `{command}` but the OS reported no pid")]
    MissingPid { command: String },

    #[error("Failed to send {signal:?} to process group {pgid}: {source}")]
    Signal {
        pgid: u32,
        signal: Signal,
        #[source]
        source: nix::Error,
    },
}

/// How a tunnel process ended
#[derive(Debug, Clone)]
pub enum ProcessExit {
    Exited(ExitStatus),
    /// Waiting on the child failed; it is treated as gone
    WaitFailed(String),
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        matches!(self, ProcessExit::Exited(status) if status.success())
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessExit::Exited(status) => write!(f, "{}", status),
            ProcessExit::WaitFailed(reason) => write!(f, "wait failed: {}", reason),
        }
    }
}

/// Handle on a spawned tunnel process.
///
/// The child itself is owned by a background waiter task; this handle only
/// observes its exit and signals its group.
#[derive(Debug)]
pub struct TunnelProcess {
    pid: u32,
    started_at: DateTime<Utc>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
}

impl TunnelProcess {
    /// Spawn `command` in its own process group.
    ///
    /// With `silent`, stdin/stdout/stderr are attached to the null device.
    /// Must be called from within a tokio runtime.
    pub fn spawn(command: &TunnelCommand, silent: bool) -> Result<Self, ProcessError> {
        let mut std_cmd = std::process::Command::new(&command.program);
        std_cmd.args(&command.args).process_group(0);

        if silent {
            std_cmd
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
        }

        let mut cmd = Command::from(std_cmd);
        cmd.kill_on_drop(false);

        let mut child = cmd.spawn().map_err(|e| ProcessError::Spawn {
            command: command.to_string(),
            source: e,
        })?;

        let pid = child.id().ok_or_else(|| ProcessError::MissingPid {
            command: command.to_string(),
        })?;

        let (exit_tx, exit_rx) = watch::channel(None);

        tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => ProcessExit::Exited(status),
                Err(e) => ProcessExit::WaitFailed(e.to_string()),
            };

            if exit.success() {
                info!("Tunnel process {} finished: {}", pid, exit);
            } else {
                warn!("Tunnel process {} finished with error: {}", pid, exit);
            }

            // Clean up anything the leader left behind in its group
            if let Err(e) = signal_group(pid, Signal::SIGKILL) {
                debug!("Process group {} cleanup: {}", pid, e);
            }

            let _ = exit_tx.send(Some(exit));
        });

        Ok(Self {
            pid,
            started_at: Utc::now(),
            exit_rx,
        })
    }

    /// Pid of the leader, which is also the process group id
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn exit(&self) -> Option<ProcessExit> {
        self.exit_rx.borrow().clone()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    /// Deliver `signal` to every process in the group
    pub fn signal(&self, signal: Signal) -> Result<(), ProcessError> {
        signal_group(self.pid, signal)
    }

    /// Wait up to `timeout` for the leader to exit. Returns whether it did.
    pub async fn wait_for_exit(&self, timeout: Duration) -> bool {
        let mut exit_rx = self.exit_rx.clone();
        // Err from wait_for means the waiter task went away without reporting
        let exited = matches!(
            tokio::time::timeout(timeout, exit_rx.wait_for(|exit| exit.is_some())).await,
            Ok(Ok(_))
        );
        exited
    }
}

fn signal_group(pgid: u32, signal: Signal) -> Result<(), ProcessError> {
    killpg(Pid::from_raw(pgid as i32), signal).map_err(|source| ProcessError::Signal {
        pgid,
        signal,
        source,
    })
}
