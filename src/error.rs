//! Error types carried inside execution results

use std::error::Error;
use std::fmt::Display;
use std::time::Duration;

/// Why an invocation did not produce a clean exit
///
/// These travel as data inside `ExecutionResult` and `DownloadReport`;
/// they are never thrown across the worker/UI boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeError {
    /// The executable could not be resolved or spawned because it does not exist
    NotFound { program: String },
    /// The process ran and exited unsuccessfully
    ProcessFailed { code: Option<i32>, stderr: String },
    /// A download-style operation failed at the transport or HTTP level
    Network { message: String },
    /// The operation was cancelled through its token
    Cancelled,
    /// The invocation outlived its timeout and was killed
    TimedOut { after: Duration },
    /// Local I/O failure (spawn permission, file write, ...)
    Io { message: String },
    /// The request was rejected before anything ran
    InvalidRequest { message: String },
}

impl InvokeError {
    pub fn not_found(program: &str) -> Self {
        InvokeError::NotFound {
            program: String::from(program),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        InvokeError::Io {
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        InvokeError::Network {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        InvokeError::InvalidRequest {
            message: message.into(),
        }
    }

    /// Short label used in status lines and logs
    pub fn kind(&self) -> &'static str {
        match self {
            InvokeError::NotFound { .. } => "not found",
            InvokeError::ProcessFailed { .. } => "failed",
            InvokeError::Network { .. } => "network error",
            InvokeError::Cancelled => "cancelled",
            InvokeError::TimedOut { .. } => "timed out",
            InvokeError::Io { .. } => "i/o error",
            InvokeError::InvalidRequest { .. } => "invalid request",
        }
    }
}

impl Error for InvokeError {}

impl Display for InvokeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvokeError::NotFound { program } => write!(f, "executable not found: {}", program),
            InvokeError::ProcessFailed { code, stderr } => {
                let last = stderr.lines().rev().find(|l| !l.trim().is_empty());
                match code {
                    Some(code) => write!(f, "process exited with status {}", code)?,
                    None => write!(f, "process terminated by signal")?,
                }
                if let Some(line) = last {
                    write!(f, ": {}", line.trim())?;
                }
                Ok(())
            }
            InvokeError::Network { message } => write!(f, "network error: {}", message),
            InvokeError::Cancelled => write!(f, "cancelled"),
            InvokeError::TimedOut { after } => {
                write!(f, "timed out after {:.1}s", after.as_secs_f64())
            }
            InvokeError::Io { message } => write!(f, "i/o error: {}", message),
            InvokeError::InvalidRequest { message } => write!(f, "invalid request: {}", message),
        }
    }
}

/// Failure to make sense of a tool's output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    tool: String,
    msg: String,
}

impl ParseError {
    pub fn for_tool(tool: &str, msg: &str) -> Self {
        ParseError {
            tool: String::from(tool),
            msg: String::from(msg),
        }
    }
}

impl Error for ParseError {}

impl Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Error parsing {} output: {}", &self.tool, &self.msg)
    }
}
