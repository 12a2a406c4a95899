use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::core::model::{Credentials, DownloadOptions, DownloadRequest};
use crate::site::links;

pub const DEFAULT_THREADS: usize = 5;
pub const MAX_THREADS: usize = 10;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid `{field}`: {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.into(),
        reason: reason.into(),
    }
}

/// Validated run description. Read-only to everything downstream of the CLI.
#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,
    pub destination: PathBuf,
    pub ffmpeg_location: String,
    pub threads: usize,
    pub verbosity: bool,
    pub requests: Vec<DownloadRequest>,
}

impl Config {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(text)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        if raw.username.trim().is_empty() {
            return Err(invalid("username", "must be non-empty"));
        }
        if raw.password.is_empty() {
            return Err(invalid("password", "must be non-empty"));
        }
        if raw.ffmpeg_location.trim().is_empty() {
            return Err(invalid("ffmpeg_location", "must be non-empty"));
        }

        let destination = raw.destination;
        if !destination.exists() {
            return Err(invalid(
                "destination",
                format!("path does not exist: {}", destination.display()),
            ));
        }

        let threads = match raw.threads {
            None => DEFAULT_THREADS,
            Some(n) => {
                let n = n as usize;
                if !(1..=MAX_THREADS).contains(&n) {
                    return Err(invalid(
                        "threads",
                        format!("valid range is 1-{MAX_THREADS}, received {n}"),
                    ));
                }
                n
            }
        };

        // series first, then episodes, matching submission order
        let mut requests = Vec::new();
        for series in raw.download.series {
            if !links::is_series_url(&series.url) {
                return Err(invalid(
                    "download.series.url",
                    format!("not a valid series URL: {}", series.url),
                ));
            }
            if series.season == 0 {
                return Err(invalid("download.series.season", "must be positive"));
            }
            let (start, end) = normalize_range(series.start, series.end)
                .map_err(|reason| invalid("download.series", reason))?;
            requests.push(DownloadRequest::Series {
                url: series.url,
                season: series.season,
                episode_start: start,
                episode_end: end,
                options: options_from_args(series.args),
            });
        }
        for episode in raw.download.episodes {
            if !links::is_episode_url(&episode.url) {
                return Err(invalid(
                    "download.episodes.url",
                    format!("not a valid episode URL: {}", episode.url),
                ));
            }
            requests.push(DownloadRequest::Episode {
                url: episode.url,
                options: options_from_args(episode.args),
            });
        }

        Ok(Self {
            credentials: Credentials {
                username: raw.username,
                password: raw.password,
            },
            destination,
            ffmpeg_location: raw.ffmpeg_location,
            threads,
            verbosity: raw.verbosity,
            requests,
        })
    }
}

/// Zero bounds are rejected; an inverted range clamps to `end = start`, the
/// same treatment the CLI range parser applies.
fn normalize_range(start: u32, end: u32) -> Result<(u32, u32), String> {
    if start == 0 || end == 0 {
        return Err("episode range bounds must be positive".to_string());
    }
    Ok((start, end.max(start)))
}

fn options_from_args(args: Vec<RawArg>) -> DownloadOptions {
    DownloadOptions::from_pairs(args.into_iter().map(|a| (a.arg, a.value)).collect())
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    username: String,
    password: String,
    destination: PathBuf,
    ffmpeg_location: String,
    #[serde(default)]
    verbosity: bool,
    threads: Option<u32>,
    #[serde(default)]
    download: RawDownload,
}

#[derive(Debug, Deserialize, Default)]
struct RawDownload {
    #[serde(default)]
    series: Vec<RawSeries>,
    #[serde(default)]
    episodes: Vec<RawEpisode>,
}

#[derive(Debug, Deserialize)]
struct RawSeries {
    url: String,
    #[serde(default = "one")]
    season: u32,
    #[serde(default = "one")]
    start: u32,
    #[serde(default = "one")]
    end: u32,
    #[serde(default)]
    args: Vec<RawArg>,
}

#[derive(Debug, Deserialize)]
struct RawEpisode {
    url: String,
    #[serde(default)]
    args: Vec<RawArg>,
}

#[derive(Debug, Deserialize)]
struct RawArg {
    arg: String,
    value: String,
}

fn one() -> u32 {
    1
}

/// `"<start>[-<end>]"`, optional parens, `-`/`,`/`|` separators. `"5-4"`
/// clamps to `(5,5)`; any zero bound is rejected.
pub fn parse_episode_range(input: &str) -> Result<(u32, u32), String> {
    let trimmed = input.trim();
    let trimmed = trimmed.strip_prefix('(').unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix(')').unwrap_or(trimmed);
    let (start_text, end_text) = match trimmed.find(['-', ',', '|']) {
        Some(at) => (&trimmed[..at], &trimmed[at + 1..]),
        None => (trimmed, ""),
    };
    let parse = |text: &str| -> Result<u32, String> {
        text.trim().parse::<u32>().map_err(|_| {
            format!("'{input}' is not an episode range; expected forms like '2' or '6-8'")
        })
    };
    let start = parse(start_text)?;
    let end = if end_text.trim().is_empty() {
        start
    } else {
        parse(end_text)?
    };
    if start == 0 || end == 0 {
        return Err("episode range bounds must be positive".to_string());
    }
    Ok((start, end.max(start)))
}

pub fn parse_positive(input: &str) -> Result<u32, String> {
    match input.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("expected positive integer, received '{input}'")),
    }
}

pub fn parse_thread_count(input: &str) -> Result<usize, String> {
    let n: usize = input
        .trim()
        .parse()
        .map_err(|_| format!("expected integer between 1 and {MAX_THREADS}, received '{input}'"))?;
    if !(1..=MAX_THREADS).contains(&n) {
        return Err(format!(
            "expected integer between 1 and {MAX_THREADS}, received '{input}'"
        ));
    }
    Ok(n)
}

pub fn parse_destination(input: &str) -> Result<PathBuf, String> {
    let path = Path::new(input);
    if !path.exists() {
        return Err(format!("path does not exist: {input}"));
    }
    Ok(path.to_path_buf())
}
