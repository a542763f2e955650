//! Application configuration
//!
//! Persisted to `<config dir>/mediawrap/config.json`. Built once at startup
//! and handed to the runner and tool builders; nothing reads it globally.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// External tools the application drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    Encoder,
    Prober,
    Downloader,
}

impl Tool {
    /// Program name looked up on PATH when no explicit path is configured
    pub fn default_program(&self) -> &'static str {
        match self {
            Tool::Encoder => "ffmpeg",
            Tool::Prober => "ffprobe",
            Tool::Downloader => "yt-dlp",
        }
    }
}

/// Calculate the default job limit from CPU cores
fn default_max_concurrent_jobs() -> usize {
    let available = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);

    // Use 75% of cores, clamped between 2 and 8
    ((available as f32 * 0.75).ceil() as usize).clamp(2, 8)
}

fn default_quiet_tools() -> bool {
    true
}

fn default_output_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| std::env::temp_dir().join("mediawrap_output"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Explicit encoder path (None = "ffmpeg" on PATH)
    #[serde(default)]
    pub encoder_path: Option<PathBuf>,
    /// Explicit prober path (None = "ffprobe" on PATH)
    #[serde(default)]
    pub prober_path: Option<PathBuf>,
    /// Explicit downloader path (None = "yt-dlp" on PATH)
    #[serde(default)]
    pub downloader_path: Option<PathBuf>,
    /// Upper bound on jobs running at once
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Timeout applied to invocations that don't set their own
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,
    /// Pass the quiet/log-level flags to the tools
    #[serde(default = "default_quiet_tools")]
    pub quiet_tools: bool,
    /// Where downloads and encodes land by default
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            encoder_path: None,
            prober_path: None,
            downloader_path: None,
            max_concurrent_jobs: default_max_concurrent_jobs(),
            default_timeout_secs: None,
            quiet_tools: default_quiet_tools(),
            output_dir: default_output_dir(),
        }
    }
}

impl AppConfig {
    const CONFIG_FILE: &'static str = "config.json";

    /// Get the config directory (e.g. ~/.config/mediawrap/)
    pub fn config_dir() -> Result<PathBuf, String> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| "Could not determine config directory".to_string())?;
        Ok(config_dir.join("mediawrap"))
    }

    /// Default location of the config file
    pub fn default_path() -> Result<PathBuf, String> {
        Ok(Self::config_dir()?.join(Self::CONFIG_FILE))
    }

    /// Load config from the default location, or return defaults if not found
    pub fn load() -> Self {
        let loaded = Self::default_path().and_then(|path| Self::load_from(&path));
        match loaded {
            Ok(config) => {
                log::debug!("Loaded configuration from disk");
                config
            }
            Err(e) => {
                log::debug!("Using default configuration: {}", e);
                Self::default()
            }
        }
    }

    /// Load config from an explicit file
    pub fn load_from(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Err(format!("Config file not found: {}", path.display()));
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config: {}", e))?;

        let mut config: Self = serde_json::from_str(&contents)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        config.max_concurrent_jobs = config.max_concurrent_jobs.max(1);
        Ok(config)
    }

    /// Save config to an explicit file, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("Failed to create config directory: {}", e))?;
            }
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        std::fs::write(path, json).map_err(|e| format!("Failed to write config: {}", e))?;

        log::debug!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Program to invoke for a tool: configured path or bare default name
    pub fn tool_program(&self, tool: Tool) -> PathBuf {
        let configured = match tool {
            Tool::Encoder => &self.encoder_path,
            Tool::Prober => &self.prober_path,
            Tool::Downloader => &self.downloader_path,
        };
        configured
            .clone()
            .unwrap_or_else(|| PathBuf::from(tool.default_program()))
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_job_limit_is_clamped() {
        let config = AppConfig::default();
        assert!(config.max_concurrent_jobs >= 2 && config.max_concurrent_jobs <= 8);
        assert!(config.quiet_tools);
        assert!(config.default_timeout().is_none());
    }

    #[test]
    fn test_tool_program_defaults_to_bare_names() {
        let config = AppConfig::default();
        assert_eq!(config.tool_program(Tool::Encoder), PathBuf::from("ffmpeg"));
        assert_eq!(config.tool_program(Tool::Prober), PathBuf::from("ffprobe"));
        assert_eq!(config.tool_program(Tool::Downloader), PathBuf::from("yt-dlp"));
    }

    #[test]
    fn test_tool_program_uses_configured_path() {
        let config = AppConfig {
            encoder_path: Some(PathBuf::from("/opt/ffmpeg/bin/ffmpeg")),
            ..AppConfig::default()
        };
        assert_eq!(
            config.tool_program(Tool::Encoder),
            PathBuf::from("/opt/ffmpeg/bin/ffmpeg")
        );
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = AppConfig {
            downloader_path: Some(PathBuf::from("/usr/local/bin/yt-dlp")),
            max_concurrent_jobs: 3,
            default_timeout_secs: Some(90),
            quiet_tools: false,
            output_dir: PathBuf::from("/tmp/out"),
            ..AppConfig::default()
        };

        config.save_to(&path).unwrap();
        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.default_timeout(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "prober_path": "/bin/ffprobe", "max_concurrent_jobs": 0 }"#)
            .unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.prober_path, Some(PathBuf::from("/bin/ffprobe")));
        assert!(loaded.quiet_tools);
        // Zero would deadlock the runner
        assert_eq!(loaded.max_concurrent_jobs, 1);
    }

    #[test]
    fn test_load_from_missing_file_errors() {
        let result = AppConfig::load_from(Path::new("/nonexistent/mediawrap/config.json"));
        assert!(result.unwrap_err().contains("not found"));
    }

    #[test]
    fn test_load_from_garbage_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(AppConfig::load_from(&path).unwrap_err().contains("Failed to parse"));
    }
}
