//! Encoder (ffmpeg) invocations

use std::path::PathBuf;
use std::time::Duration;

use super::FFMPEG_QUIET_FLAGS;
use crate::config::{AppConfig, Tool};
use crate::error::InvokeError;
use crate::process::Invocation;

/// What a panel asks the encoder to do
#[derive(Debug, Clone, Default)]
pub struct EncodeRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Replace an existing output (`-y`) instead of refusing (`-n`)
    pub overwrite: bool,
    /// Drop video streams (`-vn`)
    pub audio_only: bool,
    pub audio_codec: Option<String>,
    pub audio_bitrate_kbps: Option<u32>,
    pub video_codec: Option<String>,
    /// Seek position in the input
    pub start: Option<Duration>,
    /// Length of output to produce
    pub duration: Option<Duration>,
    /// Appended verbatim before the output path
    pub extra_args: Vec<String>,
}

impl EncodeRequest {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            ..Self::default()
        }
    }

    /// Build the encoder invocation
    ///
    /// Argument order: global flags, overwrite flag, seek, input, duration,
    /// codec options, extra args, output.
    pub fn to_invocation(&self, config: &AppConfig) -> Result<Invocation, InvokeError> {
        if self.input.as_os_str().is_empty() || self.output.as_os_str().is_empty() {
            return Err(InvokeError::invalid("input and output paths are required"));
        }
        if self.input == self.output {
            return Err(InvokeError::invalid(format!(
                "output would overwrite the input: {}",
                self.input.display()
            )));
        }
        if self.audio_only && self.video_codec.is_some() {
            return Err(InvokeError::invalid("audio-only output cannot set a video codec"));
        }
        if self.audio_bitrate_kbps == Some(0) {
            return Err(InvokeError::invalid("audio bitrate must be positive"));
        }

        let mut inv = Invocation::new(config.tool_program(Tool::Encoder));
        if config.quiet_tools {
            inv = inv.args(FFMPEG_QUIET_FLAGS);
        }
        inv = inv.arg(if self.overwrite { "-y" } else { "-n" });

        if let Some(start) = self.start {
            inv = inv.args(["-ss".to_string(), format_timestamp(start)]);
        }
        inv = inv.arg("-i").arg(&self.input);
        if let Some(duration) = self.duration {
            inv = inv.args(["-t".to_string(), format_timestamp(duration)]);
        }

        if self.audio_only {
            inv = inv.arg("-vn");
        }
        if let Some(codec) = &self.video_codec {
            inv = inv.args(["-c:v", codec.as_str()]);
        }
        if let Some(codec) = &self.audio_codec {
            inv = inv.args(["-c:a", codec.as_str()]);
        }
        if let Some(kbps) = self.audio_bitrate_kbps {
            inv = inv.args(["-b:a".to_string(), format!("{}k", kbps)]);
        }

        Ok(inv
            .args(&self.extra_args)
            .arg(&self.output)
            .with_default_timeout(config.default_timeout()))
    }
}

/// Format a duration as ffmpeg's `HH:MM:SS.mmm`
pub fn format_timestamp(d: Duration) -> String {
    let total_ms = d.as_millis();
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let seconds = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
}
