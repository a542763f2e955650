//! Prober (ffprobe) invocations and JSON output parsing

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::FFMPEG_QUIET_FLAGS;
use crate::config::{AppConfig, Tool};
use crate::error::ParseError;
use crate::process::Invocation;

/// Summary of a probed media file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaInfo {
    pub format_name: String,
    pub duration_secs: Option<f64>,
    pub bit_rate: Option<u64>,
    pub streams: Vec<StreamInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamInfo {
    pub index: u32,
    pub codec_type: String,
    pub codec_name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
}

impl MediaInfo {
    pub fn video_streams(&self) -> impl Iterator<Item = &StreamInfo> {
        self.streams.iter().filter(|s| s.codec_type == "video")
    }

    pub fn audio_streams(&self) -> impl Iterator<Item = &StreamInfo> {
        self.streams.iter().filter(|s| s.codec_type == "audio")
    }

    pub fn has_video(&self) -> bool {
        self.video_streams().next().is_some()
    }
}

// ffprobe reports most numbers as strings
#[derive(Deserialize, Debug)]
struct FFProbeJsonOutput {
    format: Option<FFProbeJsonFormat>,
    #[serde(default)]
    streams: Vec<FFProbeJsonStream>,
}

#[derive(Deserialize, Debug)]
struct FFProbeJsonFormat {
    format_name: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Deserialize, Debug)]
struct FFProbeJsonStream {
    index: u32,
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    sample_rate: Option<String>,
    channels: Option<u32>,
}

/// Invocation that dumps format and stream info as JSON
pub fn probe_invocation(config: &AppConfig, input: &Path) -> Invocation {
    let mut inv = Invocation::new(config.tool_program(Tool::Prober));
    if config.quiet_tools {
        inv = inv.args(FFMPEG_QUIET_FLAGS);
    }
    inv.args(["-of", "json", "-show_format", "-show_streams"])
        .arg(input)
        .with_default_timeout(config.default_timeout())
}

/// Parse ffprobe's `-of json -show_format -show_streams` output
pub fn parse_probe(stdout: &str) -> Result<MediaInfo, ParseError> {
    let parsed: FFProbeJsonOutput = serde_json::from_str(stdout)
        .map_err(|e| ParseError::for_tool("ffprobe", &e.to_string()))?;

    let format = parsed
        .format
        .ok_or_else(|| ParseError::for_tool("ffprobe", "missing format section"))?;

    let streams = parsed
        .streams
        .into_iter()
        .map(|s| StreamInfo {
            index: s.index,
            codec_type: s.codec_type.unwrap_or_else(|| "unknown".to_string()),
            codec_name: s.codec_name,
            width: s.width,
            height: s.height,
            sample_rate: s.sample_rate.and_then(|r| r.parse().ok()),
            channels: s.channels,
        })
        .collect();

    Ok(MediaInfo {
        format_name: format.format_name.unwrap_or_default(),
        duration_secs: format.duration.and_then(|d| d.parse().ok()),
        bit_rate: format.bit_rate.and_then(|b| b.parse().ok()),
        streams,
    })
}
