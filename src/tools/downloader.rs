//! Downloader (yt-dlp) invocations

use url::Url;

use crate::config::{AppConfig, Tool};
use crate::error::InvokeError;
use crate::process::Invocation;

/// What a panel asks the downloader to fetch
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    pub url: String,
    /// yt-dlp output template, e.g. `%(title)s.%(ext)s`
    pub output_template: Option<String>,
    /// Format selector passed to `-f`
    pub format: Option<String>,
    /// Keep only the audio track (`-x`)
    pub extract_audio: bool,
    pub audio_format: Option<String>,
    /// Let the tool print warnings and chatter
    pub verbose: bool,
}

impl DownloadOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn to_invocation(&self, config: &AppConfig) -> Result<Invocation, InvokeError> {
        let url = validate_url(&self.url)?;
        if self.audio_format.is_some() && !self.extract_audio {
            return Err(InvokeError::invalid("audio format requires audio extraction"));
        }

        let mut inv = Invocation::new(config.tool_program(Tool::Downloader));
        if config.quiet_tools && !self.verbose {
            inv = inv.args(["--quiet", "--no-warnings"]);
        }
        // Progress on its own lines so it can be streamed; final path on stdout
        inv = inv.args(["--progress", "--newline", "--print", "after_move:filepath"]);

        if let Some(format) = &self.format {
            inv = inv.args(["-f", format.as_str()]);
        }
        if self.extract_audio {
            inv = inv.arg("-x");
            if let Some(audio_format) = &self.audio_format {
                inv = inv.args(["--audio-format", audio_format.as_str()]);
            }
        }

        let template = match &self.output_template {
            Some(t) => t.clone(),
            None => config
                .output_dir
                .join("%(title)s.%(ext)s")
                .to_string_lossy()
                .into_owned(),
        };
        inv = inv.args(["-o", template.as_str()]);

        Ok(inv
            .arg("--")
            .arg(url.as_str())
            .with_default_timeout(config.default_timeout()))
    }
}

/// Accept only absolute http(s) URLs
pub fn validate_url(raw: &str) -> Result<Url, InvokeError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| InvokeError::invalid(format!("invalid URL '{}': {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(InvokeError::invalid(format!(
            "unsupported URL scheme '{}'",
            other
        ))),
    }
}

/// Percentage from a `[download]  42.3% of ...` progress line
pub fn parse_progress(line: &str) -> Option<f32> {
    let rest = line.trim_start().strip_prefix("[download]")?.trim_start();
    let (number, _) = rest.split_once('%')?;
    number.trim().parse::<f32>().ok()
}

/// Final file path printed by `--print after_move:filepath`
pub fn downloaded_path(stdout: &str) -> Option<&str> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('['))
        .last()
}
