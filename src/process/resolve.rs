//! Locating executables before spawning them

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use crate::error::InvokeError;

/// Check that a path is a regular file we are allowed to execute
pub fn is_executable(path: &Path) -> bool {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return false,
    };
    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Extensions tried for bare names (Windows only)
fn executable_suffixes() -> Vec<OsString> {
    let mut suffixes = vec![OsString::new()];
    if cfg!(windows) {
        let pathext = std::env::var_os("PATHEXT")
            .unwrap_or_else(|| OsString::from(".COM;.EXE;.BAT;.CMD"));
        suffixes.extend(
            pathext
                .to_string_lossy()
                .split(';')
                .filter(|ext| !ext.is_empty())
                .map(OsString::from),
        );
    }
    suffixes
}

/// Resolve a program to the file that would be executed
///
/// Anything with a directory component is checked as given. A bare name is
/// searched for in `search_path` (or `PATH` when none is given).
pub fn resolve_program(program: &Path, search_path: Option<&OsStr>) -> Result<PathBuf, InvokeError> {
    let display = program.to_string_lossy();
    if display.is_empty() {
        return Err(InvokeError::not_found(""));
    }

    if program.components().count() > 1 || program.is_absolute() {
        if is_executable(program) {
            return Ok(program.to_path_buf());
        }
        return Err(InvokeError::not_found(&display));
    }

    let paths = match search_path {
        Some(p) => p.to_os_string(),
        None => std::env::var_os("PATH").unwrap_or_default(),
    };

    let suffixes = executable_suffixes();
    for dir in std::env::split_paths(&paths) {
        if dir.as_os_str().is_empty() {
            continue;
        }
        for suffix in &suffixes {
            let mut name = program.as_os_str().to_os_string();
            name.push(suffix);
            let candidate = dir.join(&name);
            if is_executable(&candidate) {
                log::debug!("Resolved {} to {:?}", display, candidate);
                return Ok(candidate);
            }
        }
    }

    Err(InvokeError::not_found(&display))
}
