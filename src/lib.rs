//! mediawrap: the engine behind a desktop front end for ffmpeg, ffprobe
//! and yt-dlp
//!
//! External tools run on a background runner; their results come back to
//! the UI thread through a named-channel notifier.

pub mod app;
pub mod config;
pub mod error;
pub mod logging;
pub mod notifier;
pub mod process;
pub mod runner;
pub mod tools;
pub mod ui_loop;

#[cfg(test)]
mod test_fixtures;

pub use app::App;
pub use config::{AppConfig, Tool};
pub use error::{InvokeError, ParseError};
pub use runner::{BackgroundRunner, Event, JobHandle};
