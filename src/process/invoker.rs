//! External process execution
//!
//! Runs one invocation to completion, consuming stdout and stderr line by
//! line while the process runs. Every outcome, including a missing
//! executable, comes back as an `ExecutionResult`; nothing here returns
//! `Err` or panics because of what the tool printed.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use chrono::Local;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use uuid::Uuid;

use super::{resolve_program, CancelToken, ExecutionResult, Invocation, OutputLine, OutputStream};
use crate::error::InvokeError;

/// How long output is still read after the tool exits
///
/// A backgrounded grandchild can hold the pipes open indefinitely; once this
/// passes the rest of the process group is killed and the result returned.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Accumulates one output stream and splits it into lines
struct StreamCapture<R> {
    reader: BufReader<R>,
    stream: OutputStream,
    pending: Vec<u8>,
    collected: String,
    open: bool,
}

impl<R: AsyncRead + Unpin> StreamCapture<R> {
    fn new(reader: R, stream: OutputStream) -> Self {
        Self {
            reader: BufReader::new(reader),
            stream,
            pending: Vec::new(),
            collected: String::new(),
            open: true,
        }
    }

    /// Handle a finished `read_until`, returning the completed line if any
    ///
    /// Partial reads from a cancelled `read_until` stay in `pending` and are
    /// continued by the next call, so no bytes are lost between select rounds.
    fn absorb(&mut self, read: io::Result<usize>, invocation_id: Uuid) -> Option<OutputLine> {
        match read {
            Ok(0) => self.open = false,
            Ok(_) => {}
            Err(e) => {
                log::debug!("[{}] {:?} read error: {}", invocation_id, self.stream, e);
                self.open = false;
            }
        }

        if self.pending.is_empty() {
            return None;
        }
        let raw = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        self.collected.push_str(&raw);

        let text = raw.trim_end_matches(['\n', '\r']).to_string();
        Some(OutputLine {
            invocation_id,
            stream: self.stream,
            text,
        })
    }
}

impl<R> StreamCapture<R> {
    /// Keep an unterminated tail that was still being read when the loop stopped
    fn keep_partial(&mut self) {
        if !self.pending.is_empty() {
            self.collected.push_str(&String::from_utf8_lossy(&self.pending));
            self.pending.clear();
        }
    }
}

/// Kill the child and everything it spawned, then reap it
async fn terminate(child: &mut Child, pgid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pgid) = pgid {
        // Negative pid addresses the whole process group
        unsafe {
            libc::kill(-(pgid as libc::pid_t), libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = pgid;

    if let Err(e) = child.kill().await {
        log::debug!("kill after termination request failed: {}", e);
    }
}

/// Run an invocation and capture its output
pub async fn run(invocation: &Invocation, cancel: &CancelToken) -> ExecutionResult {
    run_streaming(invocation, cancel, |_| {}).await
}

/// Run an invocation, handing each output line to `on_line` as it arrives
///
/// The complete stdout/stderr text is still collected into the result.
pub async fn run_streaming<F>(
    invocation: &Invocation,
    cancel: &CancelToken,
    mut on_line: F,
) -> ExecutionResult
where
    F: FnMut(OutputLine),
{
    let started_at = Local::now();
    let id = invocation.id();
    let name = invocation.program_name();

    if cancel.is_cancelled() {
        log::info!("[{}] {} cancelled before start", id, name);
        return ExecutionResult::failed(invocation, started_at, InvokeError::Cancelled);
    }

    let program = match resolve_program(invocation.program(), invocation.get_search_path()) {
        Ok(path) => path,
        Err(e) => {
            log::warn!("[{}] {}", id, e);
            return ExecutionResult::failed(invocation, started_at, e);
        }
    };

    let mut command = Command::new(&program);
    command
        .args(invocation.get_args())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = invocation.working_dir() {
        command.current_dir(dir);
    }
    for (key, value) in invocation.envs() {
        command.env(key, value);
    }
    #[cfg(unix)]
    command.process_group(0);

    log::debug!("[{}] spawning: {}", id, invocation.display());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let err = InvokeError::not_found(&invocation.program().to_string_lossy());
            log::warn!("[{}] {}", id, err);
            return ExecutionResult::failed(invocation, started_at, err);
        }
        Err(e) => {
            let err = InvokeError::io(format!("Failed to spawn {}: {}", name, e));
            log::warn!("[{}] {}", id, err);
            return ExecutionResult::failed(invocation, started_at, err);
        }
    };
    let pgid = child.id();

    let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
        (Some(out), Some(err)) => (out, err),
        _ => {
            terminate(&mut child, pgid).await;
            let err = InvokeError::io("child output streams were not captured");
            return ExecutionResult::failed(invocation, started_at, err);
        }
    };
    let mut out = StreamCapture::new(stdout, OutputStream::Stdout);
    let mut err = StreamCapture::new(stderr, OutputStream::Stderr);

    let timeout = invocation.get_timeout();
    let deadline = async move {
        match timeout {
            Some(t) => tokio::time::sleep(t).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let mut exit_status: Option<ExitStatus> = None;
    let mut drain_until: Option<tokio::time::Instant> = None;

    // Keep reading until the process has exited and both pipes are closed
    let outcome: Result<ExitStatus, InvokeError> = loop {
        if let Some(status) = exit_status {
            if !out.open && !err.open {
                break Ok(status);
            }
        }

        tokio::select! {
            read = out.reader.read_until(b'\n', &mut out.pending), if out.open => {
                if let Some(line) = out.absorb(read, id) {
                    on_line(line);
                }
            }
            read = err.reader.read_until(b'\n', &mut err.pending), if err.open => {
                if let Some(line) = err.absorb(read, id) {
                    on_line(line);
                }
            }
            status = child.wait(), if exit_status.is_none() => {
                match status {
                    Ok(status) => {
                        exit_status = Some(status);
                        drain_until = Some(tokio::time::Instant::now() + PIPE_DRAIN_GRACE);
                    }
                    Err(e) => break Err(InvokeError::io(format!("Failed to wait for {}: {}", name, e))),
                }
            }
            _ = cancel.cancelled() => {
                break Err(InvokeError::Cancelled);
            }
            _ = async move {
                match drain_until {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            }, if drain_until.is_some() => {
                if let Some(status) = exit_status {
                    log::debug!("[{}] {} exited but its output is still open, stopping the group", id, name);
                    break Ok(status);
                }
            }
            _ = &mut deadline => {
                break Err(InvokeError::TimedOut {
                    after: timeout.unwrap_or_default(),
                });
            }
        }
    };

    let result = match outcome {
        Ok(status) => {
            if out.open || err.open {
                terminate(&mut child, pgid).await;
                out.keep_partial();
                err.keep_partial();
            }
            let code = status.code();
            let error = if status.success() {
                None
            } else {
                Some(InvokeError::ProcessFailed {
                    code,
                    stderr: err.collected.clone(),
                })
            };
            ExecutionResult::new(invocation, started_at, code, out.collected, err.collected, error)
        }
        Err(e) => {
            terminate(&mut child, pgid).await;
            let code = match exit_status {
                Some(status) => status.code(),
                None => child.try_wait().ok().flatten().and_then(|s| s.code()),
            };
            ExecutionResult::new(invocation, started_at, code, out.collected, err.collected, Some(e))
        }
    };

    match result.error() {
        None => log::info!(
            "[{}] {} completed in {:.1}s",
            id,
            name,
            result.duration().num_milliseconds() as f64 / 1000.0
        ),
        Some(e) => log::warn!("[{}] {}: {}", id, name, e),
    }

    result
}
