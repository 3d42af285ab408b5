//! Node process spawning and control.
//!
//! The [`tokio::process::Child`] is moved into a background task that owns
//! it for its whole life; the supervisor keeps a [`ChildHandle`] to request
//! termination and observe the exit.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{oneshot, watch};

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The binary was not found.
    #[error("Node binary not found")]
    NotFound,
    /// Permission denied when spawning.
    #[error("Permission denied")]
    PermissionDenied,
    /// The child did not expose the requested pipes.
    #[error("Node output pipes not available")]
    NoPipes,
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    /// Create a `SpawnError` from an I/O error, classifying common cases.
    fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound,
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            _ => Self::Io(err),
        }
    }
}

/// Signal used to ask the node to terminate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StopSignal {
    #[default]
    Term,
    Int,
    Hup,
    Kill,
}

/// How the node process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReport {
    /// Exited on its own with this code.
    Code(i32),
    /// Terminated by this signal number.
    Signal(i32),
    /// Waiting on the process failed at the OS level.
    WaitFailed(String),
}

impl ExitReport {
    fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signal(signal);
            }
        }
        Self::WaitFailed(format!("unrecognized exit status: {status}"))
    }
}

impl fmt::Display for ExitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exited with code: {code}"),
            Self::Signal(signal) => write!(f, "received signal: {signal}"),
            Self::WaitFailed(reason) => write!(f, "wait failed: {reason}"),
        }
    }
}

/// Command line for one node launch.
#[derive(Debug, Clone)]
pub struct NodeCommand {
    binary: PathBuf,
    args: Vec<String>,
}

impl NodeCommand {
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            args,
        }
    }

    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Build the command: piped output, own process group.
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }
}

/// Output pipes of a freshly spawned node.
#[derive(Debug)]
pub struct NodePipes {
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Supervisor-side handle to a running node process.
#[derive(Debug)]
pub struct ChildHandle {
    pid: Option<u32>,
    stop_tx: Option<oneshot::Sender<StopSignal>>,
    exit_rx: watch::Receiver<Option<ExitReport>>,
}

impl ChildHandle {
    /// Spawn the node and start the task owning the child.
    ///
    /// After a stop request the task waits `grace` for the exit before
    /// force-killing.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn.
    pub fn spawn(command: &NodeCommand, grace: Duration) -> Result<(Self, NodePipes), SpawnError> {
        let mut child = command.command().spawn().map_err(SpawnError::from_io)?;
        let pipes = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => NodePipes { stdout, stderr },
            _ => {
                let _ = child.start_kill();
                return Err(SpawnError::NoPipes);
            }
        };

        let pid = child.id();
        let (stop_tx, stop_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(own_child(child, stop_rx, exit_tx, grace));

        tracing::info!(
            pid,
            binary = %command.binary().display(),
            args = ?command.args(),
            "Node process spawned"
        );
        Ok((
            Self {
                pid,
                stop_tx: Some(stop_tx),
                exit_rx,
            },
            pipes,
        ))
    }

    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    #[must_use]
    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    /// Receiver that resolves to `Some(report)` once the process is gone.
    #[must_use]
    pub fn exit_watch(&self) -> watch::Receiver<Option<ExitReport>> {
        self.exit_rx.clone()
    }

    /// Signal the node and wait until its exit has been observed.
    pub async fn terminate(&mut self, signal: StopSignal) -> Option<ExitReport> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(signal);
        }
        let mut exit_rx = self.exit_rx.clone();
        let report = exit_rx.wait_for(Option::is_some).await.ok()?.clone();
        report
    }
}

async fn own_child(
    mut child: Child,
    mut stop_rx: oneshot::Receiver<StopSignal>,
    exit_tx: watch::Sender<Option<ExitReport>>,
    grace: Duration,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        Ok(signal) = &mut stop_rx => {
            send_signal(&mut child, signal);
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    tracing::warn!(pid = child.id(), ?grace, "Node ignored stop signal, killing");
                    let _ = child.kill().await;
                    child.wait().await
                }
            }
        }
    };

    let report = match status {
        Ok(status) => ExitReport::from_status(status),
        Err(e) => ExitReport::WaitFailed(e.to_string()),
    };
    tracing::debug!(%report, "Node process finished");
    let _ = exit_tx.send(Some(report));
}

#[cfg(unix)]
fn send_signal(child: &mut Child, signal: StopSignal) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    let signal = match signal {
        StopSignal::Term => Signal::SIGTERM,
        StopSignal::Int => Signal::SIGINT,
        StopSignal::Hup => Signal::SIGHUP,
        StopSignal::Kill => Signal::SIGKILL,
    };
    let nix_pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
    if let Err(e) = kill(nix_pid, signal) {
        tracing::warn!(pid, ?signal, error = %e, "Failed to signal node process");
    }
}

#[cfg(not(unix))]
fn send_signal(child: &mut Child, _signal: StopSignal) {
    if let Err(e) = child.start_kill() {
        tracing::warn!(error = %e, "Failed to kill node process");
    }
}
