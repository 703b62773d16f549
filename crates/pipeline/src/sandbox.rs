//! Isolated subprocess execution for untrusted scene code.
//!
//! [`run_isolated`] spawns the prepared [`Command`] in its own process
//! group with stdin closed, captures stdout/stderr in background tasks and
//! races the child against a wall-clock timeout and a cancellation token.
//! Whatever ends the race first decides the outcome; a child that has to be
//! stopped is killed together with everything it spawned.

use std::io;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Maximum stdout or stderr size captured per stream (10 MiB).
pub const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// How often a running child is checked for exit.
#[cfg(unix)]
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Lines of each stream kept in failure diagnostics.
const DIAGNOSTIC_TAIL_LINES: usize = 200;

/// Resource bounds for one sandboxed process.
#[derive(Debug, Clone)]
pub struct SandboxLimits {
    /// Wall-clock limit for the whole run.
    pub timeout: Duration,
    /// How long a killed process may take to be reaped.
    pub cancel_grace: Duration,
    /// Address-space limit applied with `RLIMIT_AS` (Unix only).
    pub memory_limit_bytes: Option<u64>,
    pub max_output_bytes: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            cancel_grace: Duration::from_secs(5),
            memory_limit_bytes: None,
            max_output_bytes: MAX_OUTPUT_BYTES,
        }
    }
}

/// A process that ran to completion, successfully or not.
#[derive(Debug, Clone)]
pub struct SandboxOutput {
    pub stdout: String,
    pub stderr: String,
    /// `-1` when the process was terminated by a signal.
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl SandboxOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn diagnostics(&self) -> String {
        diagnostics(&self.stdout, &self.stderr)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Failed to start process: {0}")]
    Spawn(#[source] io::Error),

    #[error("I/O error while waiting for process: {0}")]
    Io(#[source] io::Error),

    #[error("Process exceeded its time limit after {elapsed_ms} ms")]
    Timeout {
        elapsed_ms: u64,
        stdout: String,
        stderr: String,
    },

    #[error("Process cancelled after {elapsed_ms} ms")]
    Cancelled { elapsed_ms: u64 },

    #[error("Process was not reaped within {grace_ms} ms of being killed")]
    KillTimeout { grace_ms: u64 },
}

/// Combined tail of both streams, stderr first.
pub fn diagnostics(stdout: &str, stderr: &str) -> String {
    let mut out = String::new();
    for (label, text) in [("stderr", stderr), ("stdout", stdout)] {
        let text = text.trim_end();
        if text.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("--- {label} ---\n"));
        out.push_str(&tail_lines(text, DIAGNOSTIC_TAIL_LINES));
        out.push('\n');
    }
    out
}

fn tail_lines(text: &str, max: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let skip = lines.len().saturating_sub(max);
    lines[skip..].join("\n")
}

enum Outcome {
    Exited,
    TimedOut,
    Cancelled,
}

/// Run `cmd` under `limits`, stopping it when `cancel` fires.
///
/// The caller sets the program, arguments, environment and working
/// directory. I/O wiring and process-group isolation are applied here.
pub async fn run_isolated(
    mut cmd: Command,
    limits: &SandboxLimits,
    cancel: &CancellationToken,
) -> Result<SandboxOutput, SandboxError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    {
        cmd.process_group(0);
        if let Some(bytes) = limits.memory_limit_bytes {
            // SAFETY: the closure only calls `setrlimit`, which is
            // async-signal-safe, and allocates nothing.
            unsafe {
                cmd.pre_exec(move || limit_address_space(bytes));
            }
        }
    }

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(SandboxError::Spawn)?;
    let pid = child.id();

    let cap = limits.max_output_bytes;
    let mut stdout_task = tokio::spawn(read_capped(child.stdout.take(), cap));
    let mut stderr_task = tokio::spawn(read_capped(child.stderr.take(), cap));

    let outcome = tokio::select! {
        exited = wait_exited(&mut child, pid) => {
            exited.map_err(SandboxError::Io)?;
            Outcome::Exited
        }
        _ = tokio::time::sleep(limits.timeout) => Outcome::TimedOut,
        _ = cancel.cancelled() => Outcome::Cancelled,
    };

    match outcome {
        Outcome::Exited => {
            let duration_ms = start.elapsed().as_millis() as u64;
            // The child is not reaped yet, so its group id is still ours.
            // Stray background processes would keep the pipes open.
            kill_group(pid);
            let status = child.wait().await.map_err(SandboxError::Io)?;
            let stdout = collect(&mut stdout_task, limits.cancel_grace).await;
            let stderr = collect(&mut stderr_task, limits.cancel_grace).await;
            Ok(SandboxOutput {
                stdout,
                stderr,
                exit_code: status.code().unwrap_or(-1),
                duration_ms,
            })
        }
        Outcome::TimedOut => {
            let elapsed_ms = start.elapsed().as_millis() as u64;
            tracing::warn!(pid, elapsed_ms, "Sandboxed process timed out, killing");
            if !terminate(&mut child, pid, limits.cancel_grace).await {
                abort_readers(&stdout_task, &stderr_task);
                return Err(kill_timeout(limits));
            }
            let stdout = collect(&mut stdout_task, limits.cancel_grace).await;
            let stderr = collect(&mut stderr_task, limits.cancel_grace).await;
            Err(SandboxError::Timeout {
                elapsed_ms,
                stdout,
                stderr,
            })
        }
        Outcome::Cancelled => {
            tracing::info!(pid, "Sandboxed process cancelled, killing");
            let confirmed = terminate(&mut child, pid, limits.cancel_grace).await;
            abort_readers(&stdout_task, &stderr_task);
            if !confirmed {
                return Err(kill_timeout(limits));
            }
            Err(SandboxError::Cancelled {
                elapsed_ms: start.elapsed().as_millis() as u64,
            })
        }
    }
}

fn kill_timeout(limits: &SandboxLimits) -> SandboxError {
    SandboxError::KillTimeout {
        grace_ms: limits.cancel_grace.as_millis() as u64,
    }
}

/// Resolve once the child has exited, leaving it unreaped.
///
/// A zombie keeps its pid, so the group id cannot be handed to another
/// process before [`kill_group`] runs. [`Child::wait`] reaps afterwards.
#[cfg(unix)]
async fn wait_exited(_child: &mut Child, pid: Option<u32>) -> io::Result<()> {
    let Some(pid) = pid else {
        return Ok(());
    };
    loop {
        // SAFETY: `info` is a zeroed plain-data out-parameter owned by this
        // frame; WNOWAIT leaves the child waitable.
        let exited = {
            let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
            let rc = unsafe {
                libc::waitid(
                    libc::P_PID,
                    pid as libc::id_t,
                    &mut info,
                    libc::WEXITED | libc::WNOWAIT | libc::WNOHANG,
                )
            };
            if rc == -1 {
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(libc::EINTR) => continue,
                    // Already reaped elsewhere; `Child::wait` reports the status.
                    Some(libc::ECHILD) => return Ok(()),
                    _ => return Err(err),
                }
            }
            info.si_signo == libc::SIGCHLD
        };
        if exited {
            return Ok(());
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }
}

#[cfg(not(unix))]
async fn wait_exited(child: &mut Child, _pid: Option<u32>) -> io::Result<()> {
    child.wait().await.map(|_| ())
}

/// Kill the whole process group and wait up to `grace` for the child.
///
/// Returns `true` once the child has been reaped.
async fn terminate(child: &mut Child, pid: Option<u32>, grace: Duration) -> bool {
    kill_group(pid);
    if let Err(e) = child.start_kill() {
        // Already exited; `wait` below still reaps it.
        tracing::debug!(error = %e, "start_kill failed");
    }
    matches!(tokio::time::timeout(grace, child.wait()).await, Ok(Ok(_)))
}

/// SIGKILL every process in the child's group.
fn kill_group(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        // SAFETY: plain syscall; the group id is the child's pid because it
        // was spawned with `process_group(0)`.
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Join a reader task, giving up after `grace`.
///
/// Grandchildren that inherited the pipes can keep them open after the
/// child itself exits.
async fn collect(task: &mut JoinHandle<Vec<u8>>, grace: Duration) -> String {
    match tokio::time::timeout(grace, &mut *task).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(_join)) => String::new(),
        Err(_elapsed) => {
            task.abort();
            String::new()
        }
    }
}

fn abort_readers(stdout: &JoinHandle<Vec<u8>>, stderr: &JoinHandle<Vec<u8>>) {
    stdout.abort();
    stderr.abort();
}

/// Read a stream to its end, keeping at most `cap` bytes.
///
/// Reading continues past the cap so a chatty child never blocks on a full
/// pipe.
async fn read_capped<R: AsyncRead + Unpin>(handle: Option<R>, cap: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    let Some(mut reader) = handle else {
        return buf;
    };
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = cap.saturating_sub(buf.len());
                buf.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
    buf
}

#[cfg(unix)]
fn limit_address_space(bytes: u64) -> io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: bytes as libc::rlim_t,
        rlim_max: bytes as libc::rlim_t,
    };
    // SAFETY: `limit` is a valid, initialized rlimit.
    if unsafe { libc::setrlimit(libc::RLIMIT_AS, &limit) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
