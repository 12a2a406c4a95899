pub mod extractor;
pub mod links;
pub mod ytdlp;

use async_trait::async_trait;
use std::path::Path;

use crate::core::model::{DownloadOptions, VideoEntry};

#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("extraction failed: {0}")]
    Fetch(String),
}

#[derive(thiserror::Error, Debug)]
pub enum DownloadError {
    #[error("failed to launch downloader: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("downloader i/o error: {0}")]
    Io(#[source] std::io::Error),

    #[error("download failed: {0}")]
    Failed(String),
}

/// Site access needed by the extraction phase. Login happens before every
/// fetch, mirroring the site's per-session authentication; errors are split
/// so the orchestrator can report auth trouble distinctly.
#[async_trait]
pub trait SiteClient: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<(), ExtractError>;

    async fn fetch_episode(&self, url: &str) -> Result<VideoEntry, ExtractError>;

    /// Flat ordered episode feed across all seasons of a series.
    async fn fetch_series(&self, url: &str) -> Result<Vec<VideoEntry>, ExtractError>;
}

/// Fixed behaviour flags handed to the downloader for every item.
#[derive(Debug, Clone)]
pub struct DownloadPolicy {
    pub ignore_errors: bool,
    pub no_overwrites: bool,
    pub continue_partial: bool,
    pub embed_subtitles: bool,
}

impl Default for DownloadPolicy {
    fn default() -> Self {
        Self {
            ignore_errors: true,
            no_overwrites: true,
            continue_partial: true,
            embed_subtitles: true,
        }
    }
}

/// The download capability. `on_finished` is invoked with the name of every
/// file the downloader reports as fully written; skipped files (already
/// present on disk) never reach the hook.
#[async_trait]
pub trait MediaSink: Send + Sync {
    async fn download(
        &self,
        url: &str,
        options: &DownloadOptions,
        on_finished: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> Result<(), DownloadError>;
}

/// Extensions of fully merged media files. Only files landing in this set
/// advance the run's completed counter.
pub const KNOWN_MEDIA_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "webm", "m4v", "mov", "avi", "flv", "ts", "3gp", "m4a", "mp3", "aac", "ogg",
    "opus", "flac", "wav",
];

pub fn is_known_media(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| KNOWN_MEDIA_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
