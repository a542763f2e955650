//! Captured outcome of one invocation

use chrono::{DateTime, Local};
use uuid::Uuid;

use super::Invocation;
use crate::error::InvokeError;

/// Which standard stream a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line of process output, delivered while the process runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub invocation_id: Uuid,
    pub stream: OutputStream,
    pub text: String,
}

/// Result of running an invocation
///
/// Exactly one is produced per invocation, whatever happened to the process.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    invocation_id: Uuid,
    program: String,
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
    error: Option<InvokeError>,
    started_at: DateTime<Local>,
    finished_at: DateTime<Local>,
}

impl ExecutionResult {
    pub(crate) fn new(
        invocation: &Invocation,
        started_at: DateTime<Local>,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
        error: Option<InvokeError>,
    ) -> Self {
        Self {
            invocation_id: invocation.id(),
            program: invocation.program_name(),
            exit_code,
            stdout,
            stderr,
            error,
            started_at,
            finished_at: Local::now(),
        }
    }

    /// A result for an invocation that never produced a process
    pub(crate) fn failed(invocation: &Invocation, started_at: DateTime<Local>, error: InvokeError) -> Self {
        Self::new(invocation, started_at, None, String::new(), String::new(), Some(error))
    }

    pub fn invocation_id(&self) -> Uuid {
        self.invocation_id
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    pub fn error(&self) -> Option<&InvokeError> {
        self.error.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Local> {
        self.finished_at
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.exit_code == Some(0)
    }

    /// One-line summary for a status bar
    pub fn status_line(&self) -> String {
        match &self.error {
            None => match self.exit_code {
                Some(code) => format!("{} finished (exit {})", self.program, code),
                None => format!("{} finished", self.program),
            },
            Some(InvokeError::ProcessFailed { code, stderr }) => {
                let code = match code {
                    Some(code) => format!("exit {}", code),
                    None => "killed".to_string(),
                };
                match stderr.lines().rev().find(|l| !l.trim().is_empty()) {
                    Some(line) => format!("{} failed ({}): {}", self.program, code, line.trim()),
                    None => format!("{} failed ({})", self.program, code),
                }
            }
            Some(err @ InvokeError::NotFound { .. }) | Some(err @ InvokeError::Cancelled) => {
                format!("{} {}", self.program, err.kind())
            }
            Some(err) => format!("{}: {}", self.program, err),
        }
    }
}
