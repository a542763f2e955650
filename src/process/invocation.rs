//! A fully specified request to run one external process

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::Duration;

use uuid::Uuid;

/// One external-process call
///
/// Built with the chained setters below, then moved into a runner.
/// Arguments are passed to the OS verbatim; callers validate them.
#[derive(Debug, Clone)]
pub struct Invocation {
    id: Uuid,
    program: PathBuf,
    args: Vec<OsString>,
    working_dir: Option<PathBuf>,
    envs: Vec<(OsString, OsString)>,
    timeout: Option<Duration>,
    search_path: Option<OsString>,
}

impl Invocation {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            id: Uuid::new_v4(),
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            working_dir: None,
            envs: Vec::new(),
            timeout: None,
            search_path: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Apply a fallback timeout unless one is already set
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        if self.timeout.is_none() {
            self.timeout = timeout;
        }
        self
    }

    /// Resolve bare program names against this list instead of `PATH`
    pub fn search_path(mut self, paths: impl AsRef<OsStr>) -> Self {
        self.search_path = Some(paths.as_ref().to_os_string());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Short name for status lines: the program's file name
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.to_string_lossy().into_owned())
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    pub fn envs(&self) -> &[(OsString, OsString)] {
        &self.envs
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn get_search_path(&self) -> Option<&OsStr> {
        self.search_path.as_deref()
    }

    /// Command line for logs, quoting arguments that contain whitespace
    pub fn display(&self) -> String {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args_lossy())
            .map(|part| quote(&part))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn quote(part: &str) -> String {
    if part.is_empty() {
        "''".to_string()
    } else if part.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"') {
        format!("'{}'", part.replace('\'', r"'\''"))
    } else {
        part.to_string()
    }
}
