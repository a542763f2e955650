//! Argument builders and output parsers for the external tools

pub mod downloader;
pub mod encoder;
pub mod http;
pub mod prober;

use crate::config::{AppConfig, Tool};
use crate::error::ParseError;
use crate::process::Invocation;

/// Flags every ffmpeg-family call gets when quiet output is configured
pub(crate) const FFMPEG_QUIET_FLAGS: [&str; 3] = ["-hide_banner", "-loglevel", "error"];

/// Invocation asking a tool for its version
pub fn version_invocation(config: &AppConfig, tool: Tool) -> Invocation {
    let flag = match tool {
        Tool::Encoder | Tool::Prober => "-version",
        Tool::Downloader => "--version",
    };
    Invocation::new(config.tool_program(tool))
        .arg(flag)
        .with_default_timeout(config.default_timeout())
}

/// Extract a version string from `-version` / `--version` output
///
/// Handles both "ffmpeg version 6.1.1-3ubuntu5 Copyright ..." and a bare
/// "2024.03.10" line.
pub fn parse_version(stdout: &str) -> Result<String, ParseError> {
    let first = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| ParseError::for_tool("version", "empty output"))?;

    let mut words = first.split_whitespace();
    while let Some(word) = words.next() {
        if word.eq_ignore_ascii_case("version") {
            return words
                .next()
                .map(str::to_string)
                .ok_or_else(|| ParseError::for_tool("version", "nothing after 'version'"));
        }
    }

    if first.starts_with(|c: char| c.is_ascii_digit()) {
        return Ok(first.split_whitespace().next().unwrap_or(first).to_string());
    }

    Err(ParseError::for_tool(
        "version",
        &format!("no version in '{}'", first),
    ))
}
