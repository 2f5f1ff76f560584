//! Thin wrapper over a spawned shell command.
//!
//! [`spawn`] starts `<shell> -c <command>` in its own process group and hands
//! back the pid, the three standard streams, a one-shot exit notification and
//! a [`ProcessHandle`] that can kill the whole group.

use std::path::Path;
use std::process::{ExitStatus, Stdio};

use tokio::process::{ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;

/// How a process ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitOutcome {
    pub code: Option<i32>,
    pub signal: Option<String>,
}

impl ExitOutcome {
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signalled(signal: impl Into<String>) -> Self {
        Self {
            code: None,
            signal: Some(signal.into()),
        }
    }

    fn from_status(status: std::io::Result<ExitStatus>) -> Self {
        match status {
            Ok(status) => Self {
                code: status.code(),
                signal: exit_signal_name(&status),
            },
            Err(e) => {
                tracing::warn!("Failed to wait on child process: {}", e);
                Self::default()
            }
        }
    }
}

/// Kill switch for a spawned process.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Forcefully terminate the process and its process group.
    ///
    /// Returns false if the handle was already used.
    pub fn kill(&mut self) -> bool {
        let Some(tx) = self.kill_tx.take() else {
            return false;
        };
        if let Some(pid) = self.pid {
            kill_process_group(pid);
        }
        // The waiter task may already have observed the exit.
        let _ = tx.send(());
        true
    }
}

/// A freshly spawned process and its plumbing.
pub struct SpawnedProcess {
    pub handle: ProcessHandle,
    pub stdin: Option<ChildStdin>,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
    /// Resolves once the process has exited and been reaped.
    pub exit: oneshot::Receiver<ExitOutcome>,
}

/// Spawn `<shell> -c <command>` in `cwd`.
pub fn spawn(shell: &str, command: &str, cwd: &Path) -> std::io::Result<SpawnedProcess> {
    let mut cmd = Command::new(shell);
    cmd.arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn()?;
    let pid = child.id();
    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
    let (exit_tx, exit_rx) = oneshot::channel();

    tokio::spawn(async move {
        let outcome = tokio::select! {
            status = child.wait() => ExitOutcome::from_status(status),
            Ok(()) = &mut kill_rx => {
                if let Err(e) = child.start_kill() {
                    tracing::debug!("start_kill after group kill: {}", e);
                }
                ExitOutcome::from_status(child.wait().await)
            }
        };
        let _ = exit_tx.send(outcome);
    });

    Ok(SpawnedProcess {
        handle: ProcessHandle {
            pid,
            kill_tx: Some(kill_tx),
        },
        stdin,
        stdout,
        stderr,
        exit: exit_rx,
    })
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => tracing::debug!(pid, "killpg failed: {}", e),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

#[cfg(unix)]
fn exit_signal_name(status: &ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;

    let sig = status.signal()?;
    Some(
        nix::sys::signal::Signal::try_from(sig)
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|_| format!("SIG{}", sig)),
    )
}

#[cfg(not(unix))]
fn exit_signal_name(_status: &ExitStatus) -> Option<String> {
    None
}
