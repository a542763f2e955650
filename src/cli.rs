//! Command line front end
//!
//! Each subcommand plays the part of a panel: it submits one job through the
//! application root, waits for that job's event and prints its status.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use mediawrap::runner::output_channel;
use mediawrap::tools::downloader::{self, DownloadOptions};
use mediawrap::tools::encoder::EncodeRequest;
use mediawrap::tools::http::DownloadRequest;
use mediawrap::tools::{self, prober};
use mediawrap::{logging, App, AppConfig, Event, Tool};

/// How long the CLI waits for a job when no timeout is configured
const NO_TIMEOUT_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Parser)]
#[command(
    name = "mediawrap",
    version,
    about = "Run ffmpeg, ffprobe and yt-dlp jobs in the background"
)]
pub struct Cli {
    /// Read configuration from this file instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Kill tool invocations that run longer than this many seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Debug output on the terminal
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the version of an external tool
    Version {
        #[arg(long, value_enum, default_value_t = ToolArg::Encoder)]
        tool: ToolArg,
    },
    /// Describe the streams of a media file
    Probe { input: PathBuf },
    /// Transcode a media file
    Encode {
        input: PathBuf,
        output: PathBuf,
        /// Replace the output if it exists
        #[arg(long)]
        overwrite: bool,
        /// Drop video streams
        #[arg(long)]
        audio_only: bool,
        /// Audio bitrate in kbit/s
        #[arg(long)]
        bitrate: Option<u32>,
    },
    /// Fetch a video page through yt-dlp
    Fetch {
        url: String,
        /// yt-dlp output template
        #[arg(short, long)]
        output: Option<String>,
        /// Keep only the audio track
        #[arg(long)]
        audio: bool,
    },
    /// Download a URL to a file
    Download { url: String, dest: PathBuf },
    /// Compare this build with the release manifest at a URL
    CheckUpdate { manifest_url: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ToolArg {
    Encoder,
    Prober,
    Downloader,
}

impl From<ToolArg> for Tool {
    fn from(arg: ToolArg) -> Self {
        match arg {
            ToolArg::Encoder => Tool::Encoder,
            ToolArg::Prober => Tool::Prober,
            ToolArg::Downloader => Tool::Downloader,
        }
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig, String> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load(),
    };
    if let Some(secs) = cli.timeout {
        config.default_timeout_secs = Some(secs);
    }
    Ok(config)
}

pub fn run(cli: Cli) -> ExitCode {
    logging::init_logging(cli.verbose);

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let app = match App::new(config) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let code = match dispatch(&app, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{}", message);
            ExitCode::FAILURE
        }
    };
    app.shutdown();
    code
}

fn wait_limit(app: &App) -> Duration {
    // Leave room for the runner's own timeout to fire and report first
    app.config()
        .default_timeout()
        .map(|t| t + Duration::from_secs(5))
        .unwrap_or(NO_TIMEOUT_WAIT)
}

fn dispatch(app: &App, command: Command) -> Result<(), String> {
    let config = app.config();
    let wait = wait_limit(app);

    match command {
        Command::Version { tool } => {
            let invocation = tools::version_invocation(config, tool.into());
            let result = finished(app.run_to_completion("version", |r| r.submit("version", invocation), wait))?;
            match tools::parse_version(result.stdout()) {
                Ok(version) => println!("{}", version),
                Err(e) => {
                    log::warn!("{}", e);
                    print!("{}", result.stdout());
                }
            }
            Ok(())
        }
        Command::Probe { input } => {
            let invocation = prober::probe_invocation(config, &input);
            let result = finished(app.run_to_completion("probe", |r| r.submit("probe", invocation), wait))?;
            let info = prober::parse_probe(result.stdout()).map_err(|e| e.to_string())?;
            let json = serde_json::to_string_pretty(&info).map_err(|e| e.to_string())?;
            println!("{}", json);
            Ok(())
        }
        Command::Encode {
            input,
            output,
            overwrite,
            audio_only,
            bitrate,
        } => {
            let request = EncodeRequest {
                overwrite,
                audio_only,
                audio_bitrate_kbps: bitrate,
                ..EncodeRequest::new(input, output)
            };
            let invocation = request.to_invocation(config).map_err(|e| e.to_string())?;
            let result = finished(app.run_to_completion("encode", |r| r.submit("encode", invocation), wait))?;
            println!("{}", result.status_line());
            Ok(())
        }
        Command::Fetch { url, output, audio } => {
            let options = DownloadOptions {
                output_template: output,
                extract_audio: audio,
                ..DownloadOptions::new(url)
            };
            let invocation = options.to_invocation(config).map_err(|e| e.to_string())?;

            let _progress = app.notifier().subscribe(&output_channel("fetch"), |event: &Event| {
                if let Event::Output { line, .. } = event {
                    if let Some(percent) = downloader::parse_progress(&line.text) {
                        eprintln!("{:5.1}%", percent);
                    }
                }
            });
            let result = finished(app.run_to_completion("fetch", |r| r.submit_streaming("fetch", invocation), wait))?;
            match downloader::downloaded_path(result.stdout()) {
                Some(path) => println!("{}", path),
                None => println!("{}", result.status_line()),
            }
            Ok(())
        }
        Command::Download { url, dest } => {
            let request = DownloadRequest::new(url, dest);
            match app.run_to_completion("download", |r| r.submit_download("download", request), wait) {
                Some(Event::Downloaded { report, .. }) if report.is_success() => {
                    println!("{}", report.status_line());
                    Ok(())
                }
                Some(event) => Err(event.status_line()),
                None => Err("download did not finish".to_string()),
            }
        }
        Command::CheckUpdate { manifest_url } => {
            let current = env!("CARGO_PKG_VERSION");
            match app.run_to_completion("update", |r| r.submit_update_check("update", &manifest_url), wait) {
                Some(Event::UpdateChecked { outcome: Ok(manifest), .. }) => {
                    if manifest.is_newer_than(current) {
                        println!("mediawrap {} is available (running {}): {}", manifest.version, current, manifest.url);
                        if let Some(notes) = &manifest.notes {
                            println!("{}", notes);
                        }
                    } else {
                        println!("mediawrap {} is up to date", current);
                    }
                    Ok(())
                }
                Some(event) => Err(event.status_line()),
                None => Err("update check did not finish".to_string()),
            }
        }
    }
}

/// Unwrap a successful process result or turn the event into an error message
fn finished(event: Option<Event>) -> Result<mediawrap::process::ExecutionResult, String> {
    match event {
        Some(Event::Finished { result, .. }) if result.is_success() => Ok(result),
        Some(event) => Err(event.status_line()),
        None => Err("job did not finish".to_string()),
    }
}
