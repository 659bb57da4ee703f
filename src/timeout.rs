//! Wall-clock guard around a single interpreter process.
//!
//! Every process is started as the leader of a fresh process group. When the
//! deadline passes the whole group is killed, so anything the interpreter
//! forked dies with it. The CPU rlimit always sits above the deadline, and a
//! process the kernel stops for exceeding it is reported as a timeout.

use crate::{config::ResourceLimits, engine::Invocation};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tracing::{debug, warn};

/// Captured result of one guarded process run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    /// Launch or I/O failure; the process output is meaningless when set
    pub process_error: Option<String>,
    /// Exit code, `None` when killed by a signal or never started
    pub exit_status: Option<i32>,
}

impl ExecutionOutcome {
    fn timed_out() -> Self {
        Self {
            timed_out: true,
            ..Default::default()
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            process_error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Combined stdout and stderr text.
    pub fn raw_output(&self) -> String {
        let mut raw = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !raw.is_empty() && !raw.ends_with('\n') {
                raw.push('\n');
            }
            raw.push_str(&self.stderr);
        }
        raw
    }
}

/// Learner-facing message for a run that hit the deadline.
pub fn timeout_message(duration: Duration) -> String {
    format!(
        "Code took more than {} seconds to run. You probably have an infinite loop in your code.",
        format_seconds(duration)
    )
}

fn format_seconds(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        duration.as_secs().to_string()
    } else {
        duration.as_secs_f64().to_string()
    }
}

/// Races a child process against a deadline.
#[derive(Debug, Clone)]
pub struct TimeoutGuard {
    duration: Duration,
    limits: ResourceLimits,
}

impl TimeoutGuard {
    pub fn new(duration: Duration, limits: ResourceLimits) -> Self {
        Self { duration, limits }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Run `invocation` to completion or until the deadline, whichever comes
    /// first. Never returns an error: launch failures are reported through
    /// [`ExecutionOutcome::process_error`].
    pub async fn with_timeout(&self, invocation: &Invocation) -> ExecutionOutcome {
        let mut cmd = invocation.command();
        cmd.stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        apply_process_limits(&mut cmd, &self.limits, self.duration);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(
                    "[TIMEOUT] Failed to spawn {:?}: {}",
                    invocation.program, e
                );
                return ExecutionOutcome::failed(e.to_string());
            }
        };
        let pid = child.id();
        debug!("[TIMEOUT] Spawned {:?} (pid={:?})", invocation.program, pid);

        let feed = feed_stdin(child.stdin.take(), invocation.stdin.clone());
        let read_stdout = read_pipe(child.stdout.take());
        let read_stderr = read_pipe(child.stderr.take());

        // Pipes first: the leader stays unreaped until its output is drained,
        // so its pid cannot be handed to another process group meanwhile.
        let run = async {
            let (stdout, stderr, ()) = tokio::try_join!(read_stdout, read_stderr, feed)?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, stdout, stderr))
        };
        let result = tokio::time::timeout(self.duration, run).await;

        match result {
            Ok(Ok((status, stdout, stderr))) => {
                if killed_by_cpu_limit(&status) {
                    warn!(
                        "[TIMEOUT] pid {:?} stopped by the CPU limit before {:?}",
                        pid, self.duration
                    );
                    return ExecutionOutcome::timed_out();
                }
                ExecutionOutcome {
                    stdout: String::from_utf8_lossy(&stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                    timed_out: false,
                    process_error: None,
                    exit_status: status.code(),
                }
            }
            Ok(Err(e)) => {
                warn!("[TIMEOUT] I/O error while running pid {:?}: {}", pid, e);
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                let _ = child.kill().await;
                ExecutionOutcome::failed(e.to_string())
            }
            Err(_) => {
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                warn!(
                    "[TIMEOUT] pid {:?} exceeded {:?}, process group killed",
                    pid, self.duration
                );
                let _ = child.kill().await;
                ExecutionOutcome::timed_out()
            }
        }
    }
}

async fn read_pipe<R>(pipe: Option<R>) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

async fn feed_stdin(pipe: Option<ChildStdin>, input: Option<String>) -> std::io::Result<()> {
    if let (Some(mut pipe), Some(input)) = (pipe, input) {
        // The child may exit without reading everything.
        match pipe.write_all(input.as_bytes()).await {
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
            other => other?,
        }
    }
    Ok(())
}

/// CPU budget for one run. Never below the wall-clock deadline, so a busy
/// loop always reaches the deadline first. Zero leaves the limit unset.
fn cpu_limit_seconds(limits: &ResourceLimits, deadline: Duration) -> u64 {
    if limits.cpu_seconds == 0 {
        return 0;
    }
    let deadline_secs = deadline.as_secs() + u64::from(deadline.subsec_nanos() > 0);
    limits.cpu_seconds.max(deadline_secs + 1)
}

#[cfg(unix)]
fn killed_by_cpu_limit(status: &std::process::ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;

    // SIGXCPU at the soft limit, SIGKILL at the hard one
    matches!(status.signal(), Some(libc::SIGXCPU) | Some(libc::SIGKILL))
}

#[cfg(not(unix))]
fn killed_by_cpu_limit(_status: &std::process::ExitStatus) -> bool {
    false
}

#[cfg(unix)]
fn apply_process_limits(cmd: &mut Command, limits: &ResourceLimits, deadline: Duration) {
    let cpu_seconds = cpu_limit_seconds(limits, deadline);
    #[cfg(not(target_os = "macos"))]
    let memory_bytes = limits.memory_mb.saturating_mul(1024 * 1024);

    unsafe {
        cmd.pre_exec(move || {
            // New process group so the guard can kill every descendant
            if libc::setpgid(0, 0) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            // macOS doesn't support RLIMIT_AS properly
            #[cfg(not(target_os = "macos"))]
            {
                if memory_bytes > 0 {
                    let rlimit = libc::rlimit {
                        rlim_cur: memory_bytes as libc::rlim_t,
                        rlim_max: memory_bytes as libc::rlim_t,
                    };
                    if libc::setrlimit(libc::RLIMIT_AS, &rlimit) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                }
            }

            if cpu_seconds > 0 {
                let rlimit = libc::rlimit {
                    rlim_cur: cpu_seconds as libc::rlim_t,
                    rlim_max: (cpu_seconds + 1) as libc::rlim_t,
                };
                if libc::setrlimit(libc::RLIMIT_CPU, &rlimit) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
            }

            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn apply_process_limits(_cmd: &mut Command, _limits: &ResourceLimits, _deadline: Duration) {
    // No process groups or rlimits; the deadline still applies to the child.
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("[TIMEOUT] Failed to kill process group {}: {}", pid, e),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}
