//! Process supervision for the external download tool
//!
//! The child runs in its own process group with stdout and stderr merged into
//! one pipe. A watcher task owns the child and the read end of the pipe: it
//! forwards output chunks as they become readable and, once the pipe hangs
//! up, reaps the child and reports how it exited. All state changes happen on
//! the engine side when those events are applied.

use crate::error::{DataReelError, Result};
use crate::types::JobId;
use std::io::ErrorKind;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Bytes read from the pipe per readiness notification
pub const READ_CHUNK_SIZE: usize = 4096;

/// How a supervised process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited normally with this code
    Exited(i32),
    /// Terminated by this signal
    Signaled(i32),
    /// The pipe closed but the exit could not be collected in time
    Unconfirmed,
}

impl ExitOutcome {
    fn from_status(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => Self::Exited(code),
            (None, Some(signal)) => Self::Signaled(signal),
            (None, None) => Self::Unconfirmed,
        }
    }
}

/// What a watcher observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEventKind {
    Output(Vec<u8>),
    Exited(ExitOutcome),
}

/// Message from a watcher task to the engine loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEvent {
    pub job: JobId,
    /// Spawn generation of the item; stale generations are discarded
    pub generation: u64,
    pub kind: ProcessEventKind,
}

/// Signals the supervisor delivers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Terminate,
    Stop,
    Continue,
}

impl Signal {
    fn raw(self) -> libc::c_int {
        match self {
            Self::Terminate => libc::SIGTERM,
            Self::Stop => libc::SIGSTOP,
            Self::Continue => libc::SIGCONT,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Terminate => "SIGTERM",
            Self::Stop => "SIGSTOP",
            Self::Continue => "SIGCONT",
        }
    }
}

/// A running child owned by a download item.
///
/// Dropping the handle aborts the watcher, which drops the child; the child is
/// spawned with `kill_on_drop`, so nothing outlives its item.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    watcher: JoinHandle<()>,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Deliver a signal to the child's process group.
    pub fn signal(&self, signal: Signal) -> Result<()> {
        send_signal(self.pid, signal)
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

/// Spawn `program` with `args`, wiring stdout and stderr into one pipe.
///
/// Errors creating the pipe or spawning are returned synchronously and no
/// watcher is started. On success the watcher reports through `events`,
/// tagging every message with `job` and `generation`.
pub fn spawn(
    program: &Path,
    args: &[String],
    job: JobId,
    generation: u64,
    reap_grace: Duration,
    events: UnboundedSender<ProcessEvent>,
) -> Result<ProcessHandle> {
    // Read end stays non-blocking for the watcher; both pipe ends are
    // close-on-exec, so the child only keeps the write end dup'ed onto 1 and 2.
    let (writer, reader) = pipe::pipe().map_err(DataReelError::Pipe)?;
    let stdout = writer.into_blocking_fd().map_err(DataReelError::Pipe)?;
    let stderr = stdout.try_clone().map_err(DataReelError::Pipe)?;

    // The command holds the parent's copies of the write end; it has to be
    // dropped before the watcher can ever see end-of-file.
    let child = {
        let mut std_command = std::process::Command::new(program);
        std_command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .process_group(0);
        let mut command = Command::from(std_command);
        command.kill_on_drop(true);
        command.spawn()
    }
    .map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            DataReelError::MissingDependency(program.display().to_string())
        } else {
            DataReelError::Spawn(format!("Failed to start {}: {}", program.display(), e))
        }
    })?;

    let pid = child
        .id()
        .ok_or_else(|| DataReelError::Spawn("child exited before its pid was read".into()))?;

    info!(%job, pid, program = %program.display(), "Download process started");

    let watcher = tokio::spawn(watch(child, reader, job, generation, reap_grace, events));
    Ok(ProcessHandle { pid, watcher })
}

async fn watch(
    mut child: Child,
    reader: pipe::Receiver,
    job: JobId,
    generation: u64,
    reap_grace: Duration,
    events: UnboundedSender<ProcessEvent>,
) {
    let send = |kind| {
        events
            .send(ProcessEvent {
                job,
                generation,
                kind,
            })
            .is_ok()
    };

    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        if let Err(e) = reader.readable().await {
            warn!(%job, error = %e, "Output pipe error");
            break;
        }
        match reader.try_read(&mut buf) {
            Ok(0) => {
                debug!(%job, "Output pipe hung up");
                break;
            }
            Ok(n) => {
                if !send(ProcessEventKind::Output(buf[..n].to_vec())) {
                    // Engine is gone; dropping the child kills it
                    return;
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(%job, error = %e, "Failed to read process output");
                break;
            }
        }
    }
    drop(reader);

    let outcome = reap(&mut child, reap_grace).await;
    info!(%job, ?outcome, "Download process exited");
    send(ProcessEventKind::Exited(outcome));
}

/// Collect the exit status without blocking; if the child has not exited yet,
/// give it `grace` to do so before reporting the exit as unconfirmed.
async fn reap(child: &mut Child, grace: Duration) -> ExitOutcome {
    match child.try_wait() {
        Ok(Some(status)) => return ExitOutcome::from_status(status),
        Ok(None) => {}
        Err(e) => {
            warn!(error = %e, "Non-blocking wait failed");
            return ExitOutcome::Unconfirmed;
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => ExitOutcome::from_status(status),
        Ok(Err(e)) => {
            warn!(error = %e, "Wait failed");
            ExitOutcome::Unconfirmed
        }
        Err(_) => {
            warn!(grace_ms = grace.as_millis() as u64, "Process still running after output closed");
            ExitOutcome::Unconfirmed
        }
    }
}

/// Send `signal` to the process group led by `pid`.
pub fn send_signal(pid: u32, signal: Signal) -> Result<()> {
    let pgid = libc::pid_t::try_from(pid).map_err(|_| DataReelError::Signal {
        signal: signal.name(),
        pid,
        source: std::io::Error::from(ErrorKind::InvalidInput),
    })?;

    // SAFETY: kill(2) has no memory-safety preconditions; a negative pid
    // addresses the process group.
    let rc = unsafe { libc::kill(-pgid, signal.raw()) };
    if rc == 0 {
        debug!(pid, signal = signal.name(), "Signal delivered");
        Ok(())
    } else {
        Err(DataReelError::Signal {
            signal: signal.name(),
            pid,
            source: std::io::Error::last_os_error(),
        })
    }
}
