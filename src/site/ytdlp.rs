use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::core::model::{Credentials, DownloadOptions, VideoEntry};
use crate::site::{DownloadError, DownloadPolicy, ExtractError, MediaSink, SiteClient};

const DEFAULT_BINARY: &str = "yt-dlp";
const SOCKET_TIMEOUT_SECS: u64 = 30;

/// Both external capabilities (metadata extraction and media download) are
/// realized by one yt-dlp binary. Extraction uses `-J` dumps; downloads run
/// with the fixed policy flags and progress parsed off stdout.
#[derive(Clone)]
pub struct YtDlp {
    binary: PathBuf,
    credentials: Credentials,
    destination: PathBuf,
    ffmpeg_location: String,
    policy: DownloadPolicy,
}

impl YtDlp {
    pub fn new(
        credentials: Credentials,
        destination: PathBuf,
        ffmpeg_location: String,
        policy: DownloadPolicy,
    ) -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_BINARY),
            credentials,
            destination,
            ffmpeg_location,
            policy,
        }
    }

    async fn dump_json(&self, extra: &[&str], url: &str) -> Result<serde_json::Value, ExtractError> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-J")
            .arg("--no-warnings")
            .arg("--socket-timeout")
            .arg(SOCKET_TIMEOUT_SECS.to_string())
            .arg("--username")
            .arg(&self.credentials.username)
            .arg("--password")
            .arg(&self.credentials.password);
        for arg in extra {
            cmd.arg(arg);
        }
        cmd.arg(url);
        cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

        let output = cmd.output().await.map_err(|e| {
            ExtractError::Fetch(format!("spawn {}: {e}", self.binary.display()))
        })?;
        if !output.status.success() {
            return Err(classify_failure(&String::from_utf8_lossy(&output.stderr)));
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|e| ExtractError::Fetch(format!("metadata parse: {e}")))
    }

    fn download_args(&self, url: &str, options: &DownloadOptions) -> Vec<String> {
        let mut args = vec![
            "--newline".to_string(),
            "--no-warnings".to_string(),
            "--socket-timeout".to_string(),
            SOCKET_TIMEOUT_SECS.to_string(),
            "--username".to_string(),
            self.credentials.username.clone(),
            "--password".to_string(),
            self.credentials.password.clone(),
            "--ffmpeg-location".to_string(),
            self.ffmpeg_location.clone(),
            "--paths".to_string(),
            self.destination.to_string_lossy().to_string(),
            "--all-subs".to_string(),
            "--write-subs".to_string(),
        ];
        if self.policy.ignore_errors {
            args.push("--ignore-errors".to_string());
        }
        if self.policy.no_overwrites {
            args.push("--no-overwrites".to_string());
        }
        if self.policy.continue_partial {
            args.push("--continue".to_string());
        }
        if self.policy.embed_subtitles {
            args.push("--embed-subs".to_string());
        }
        for (name, value) in options.iter() {
            // config files may write args without the leading dashes
            if name.starts_with('-') {
                args.push(name.clone());
            } else {
                args.push(format!("--{name}"));
            }
            if !value.is_empty() {
                args.push(value.clone());
            }
        }
        args.push(url.to_string());
        args
    }
}

#[async_trait]
impl SiteClient for YtDlp {
    /// The site login runs inside every yt-dlp invocation; a standalone probe
    /// would double the request volume for no extra signal. Reject unusable
    /// credentials here and let the first fetch surface real failures.
    async fn login(&self, username: &str, password: &str) -> Result<(), ExtractError> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(ExtractError::Auth(
                "username and password must be non-empty".to_string(),
            ));
        }
        Ok(())
    }

    async fn fetch_episode(&self, url: &str) -> Result<VideoEntry, ExtractError> {
        let value = self.dump_json(&["--no-playlist"], url).await?;
        let raw: RawEntry = serde_json::from_value(value)
            .map_err(|e| ExtractError::Fetch(format!("episode metadata: {e}")))?;
        entry_from_raw(raw)
            .ok_or_else(|| ExtractError::Fetch("episode metadata missing id or title".to_string()))
    }

    async fn fetch_series(&self, url: &str) -> Result<Vec<VideoEntry>, ExtractError> {
        let value = self.dump_json(&["--flat-playlist"], url).await?;
        let feed: RawFeed = serde_json::from_value(value)
            .map_err(|e| ExtractError::Fetch(format!("series metadata: {e}")))?;
        Ok(feed.entries.into_iter().filter_map(entry_from_raw).collect())
    }
}

#[async_trait]
impl MediaSink for YtDlp {
    async fn download(
        &self,
        url: &str,
        options: &DownloadOptions,
        on_finished: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> Result<(), DownloadError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(self.download_args(url, options));
        cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(DownloadError::Spawn)?;
        let stdout = child.stdout.take().expect("stdout piped");
        let mut stderr = child.stderr.take().expect("stderr piped");

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut current: Option<String> = None;
        while let Some(line) = lines.next_line().await.map_err(DownloadError::Io)? {
            match classify_line(&line) {
                ProgressLine::Destination(path) => current = Some(path),
                ProgressLine::Finished => {
                    if let Some(path) = current.take() {
                        // format-split halves (.fNNN.ext) are intermediate;
                        // the merger reports the real file
                        if !is_format_split(&path) {
                            on_finished(&path);
                        }
                    }
                }
                ProgressLine::Merged(path) => {
                    current = None;
                    on_finished(&path);
                }
                ProgressLine::AlreadyDownloaded(_) => current = None,
                ProgressLine::Other => {}
            }
        }

        let status = child.wait().await.map_err(DownloadError::Io)?;
        let stderr_text = stderr_task.await.unwrap_or_default();
        if status.success() {
            Ok(())
        } else {
            Err(DownloadError::Failed(last_error_line(&stderr_text)))
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawFeed {
    #[serde(default)]
    entries: Vec<RawEntry>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    id: Option<String>,
    title: Option<String>,
    season_number: Option<u32>,
    episode_number: Option<u32>,
    webpage_url: Option<String>,
    url: Option<String>,
}

fn entry_from_raw(raw: RawEntry) -> Option<VideoEntry> {
    let id = raw.id?;
    let title = raw.title?;
    let url = raw.webpage_url.or(raw.url).unwrap_or_default();
    Some(VideoEntry {
        id,
        season: raw.season_number,
        episode: raw.episode_number,
        title,
        url,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ProgressLine {
    Destination(String),
    Finished,
    Merged(String),
    AlreadyDownloaded(String),
    Other,
}

/// Classify one `--newline` stdout line. Only the handful of shapes the
/// progress tracking needs are recognized; everything else is noise.
fn classify_line(line: &str) -> ProgressLine {
    if let Some(rest) = line.strip_prefix("[download] Destination: ") {
        return ProgressLine::Destination(rest.trim().to_string());
    }
    if let Some(rest) = line.strip_prefix("[Merger] Merging formats into \"") {
        if let Some(path) = rest.strip_suffix('"') {
            return ProgressLine::Merged(path.to_string());
        }
    }
    if let Some(rest) = line.strip_prefix("[download] ") {
        if let Some(path) = rest.strip_suffix(" has already been downloaded") {
            return ProgressLine::AlreadyDownloaded(path.trim().to_string());
        }
        // the final summary line has no ETA field
        if rest.starts_with("100% of ") && !rest.contains("ETA") {
            return ProgressLine::Finished;
        }
    }
    ProgressLine::Other
}

// yt-dlp names per-format halves `<name>.f<id>.<ext>` before merging
fn is_format_split(path: &str) -> bool {
    let stem = path.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(path);
    match stem.rsplit_once('.') {
        Some((_, marker)) => {
            marker.len() > 1
                && marker.starts_with('f')
                && marker[1..].chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

fn classify_failure(stderr: &str) -> ExtractError {
    const AUTH_MARKERS: &[&str] = &[
        "username/password",
        "wrong email/password",
        "invalid username",
        "unable to log in",
        "login failed",
        "401",
    ];
    let lower = stderr.to_ascii_lowercase();
    if AUTH_MARKERS.iter().any(|marker| lower.contains(marker)) {
        ExtractError::Auth(last_error_line(stderr))
    } else {
        ExtractError::Fetch(last_error_line(stderr))
    }
}

fn last_error_line(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("downloader reported no error output")
        .trim()
        .to_string()
}
