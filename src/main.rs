mod core;
mod site;
mod ui;

use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command};
use indicatif::ProgressBar;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::core::config::{self, Config};
use crate::core::engine::Engine;
use crate::core::events::EngineEvent;
use crate::core::history::HistoryStore;
use crate::core::model::{Credentials, DownloadOptions, DownloadRequest};
use crate::site::links;
use crate::site::ytdlp::YtDlp;
use crate::site::{DownloadPolicy, MediaSink, SiteClient};
use crate::ui::StdinConfirm;

const HISTORY_FILE: &str = ".crunchy_dl.sqlite";

fn with_common_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("username")
            .short('u')
            .long("username")
            .help("Valid CrunchyRoll username")
            .required(true),
    )
    .arg(
        Arg::new("password")
            .short('p')
            .long("password")
            .help("Valid CrunchyRoll password")
            .required(true),
    )
    .arg(
        Arg::new("url")
            .short('l')
            .long("url")
            .help("Valid CrunchyRoll series/episode link")
            .required(true),
    )
    .arg(
        Arg::new("threads")
            .short('t')
            .long("threads")
            .help("Number of concurrent tasks (1 - 10)")
            .default_value("5")
            .value_parser(config::parse_thread_count),
    )
    .arg(
        Arg::new("destination")
            .short('d')
            .long("destination")
            .help("Where to save downloads (defaults to the current directory)")
            .value_parser(config::parse_destination),
    )
    .arg(
        Arg::new("verbose")
            .long("verbose")
            .help("Verbosity of downloader output")
            .action(ArgAction::SetTrue),
    )
    .arg(
        Arg::new("ffmpeg")
            .short('f')
            .long("ffmpeg")
            .help("Location of ffmpeg on this machine")
            .required(true),
    )
    .arg(
        Arg::new("downloader_args")
            .help("Extra downloader arguments after --, forwarded verbatim")
            .num_args(0..)
            .last(true)
            .allow_hyphen_values(true),
    )
}

fn build_cli() -> Command {
    let episode = with_common_args(Command::new("episode").about("Download a single anime episode"));
    let series = with_common_args(Command::new("series").about("Download an anime series"))
        .arg(
            Arg::new("range")
                .short('r')
                .long("range")
                .help("Range of episodes to download, e.g. '4' or '2-6'")
                .default_value("1")
                .value_parser(config::parse_episode_range),
        )
        .arg(
            Arg::new("season")
                .short('s')
                .long("season")
                .help("Season of the series")
                .default_value("1")
                .value_parser(config::parse_positive),
        );
    let config_cmd = Command::new("config")
        .about("Describe the downloads in a separate config file")
        .arg(
            Arg::new("config_file")
                .help("Path to the YAML config file")
                .required(true),
        );

    Command::new("crunchy-dl")
        .about("Concurrent CrunchyRoll episode/series downloader")
        .arg(
            Arg::new("version")
                .short('v')
                .long("version")
                .help("Print version")
                .action(ArgAction::SetTrue),
        )
        .subcommand(episode)
        .subcommand(series)
        .subcommand(config_cmd)
}

fn config_from_matches(matches: &ArgMatches, series: bool) -> anyhow::Result<Config> {
    let url = matches.get_one::<String>("url").unwrap().clone();
    if series && !links::is_series_url(&url) {
        anyhow::bail!("'{url}' is not a valid CrunchyRoll series URL");
    }
    if !series && !links::is_episode_url(&url) {
        anyhow::bail!("'{url}' is not a valid CrunchyRoll episode URL");
    }

    let destination = match matches.get_one::<PathBuf>("destination") {
        Some(path) => path.clone(),
        None => std::env::current_dir().context("resolve current directory")?,
    };

    let options = DownloadOptions::from_cli_tokens(
        matches
            .get_many::<String>("downloader_args")
            .map(|values| values.cloned().collect::<Vec<_>>())
            .unwrap_or_default(),
    );

    let request = if series {
        let (episode_start, episode_end) = *matches.get_one::<(u32, u32)>("range").unwrap();
        DownloadRequest::Series {
            url,
            season: *matches.get_one::<u32>("season").unwrap(),
            episode_start,
            episode_end,
            options,
        }
    } else {
        DownloadRequest::Episode { url, options }
    };

    Ok(Config {
        credentials: Credentials {
            username: matches.get_one::<String>("username").unwrap().clone(),
            password: matches.get_one::<String>("password").unwrap().clone(),
        },
        destination,
        ffmpeg_location: matches.get_one::<String>("ffmpeg").unwrap().clone(),
        threads: *matches.get_one::<usize>("threads").unwrap(),
        verbosity: matches.get_flag("verbose"),
        requests: vec![request],
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = build_cli().get_matches();

    if matches.get_flag("version") {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = match matches.subcommand() {
        Some(("episode", m)) => config_from_matches(m, false)?,
        Some(("series", m)) => config_from_matches(m, true)?,
        Some(("config", m)) => {
            let path = m.get_one::<String>("config_file").unwrap();
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("read config file {path}"))?;
            Config::from_yaml(&text)?
        }
        _ => {
            let mut cli = build_cli();
            cli.print_help()?;
            std::process::exit(2);
        }
    };

    run(config).await
}

async fn run(config: Config) -> anyhow::Result<()> {
    let tool = YtDlp::new(
        config.credentials.clone(),
        config.destination.clone(),
        config.ffmpeg_location.clone(),
        DownloadPolicy::default(),
    );
    let client: Arc<dyn SiteClient> = Arc::new(tool.clone());
    let sink: Arc<dyn MediaSink> = Arc::new(tool);

    let mut engine = Engine::new(client, sink, config.credentials.clone(), config.threads);
    match HistoryStore::open(&config.destination.join(HISTORY_FILE)).await {
        Ok(store) => engine = engine.with_history(store),
        Err(e) => {
            if config.verbosity {
                eprintln!("[WARN] history disabled: {e:#}");
            }
        }
    }

    let rx = engine.subscribe();
    let ui_task = tokio::spawn(consume_events(rx, config.verbosity));

    let summary = engine.run(&config.requests, &StdinConfirm).await?;

    drop(engine);
    ui_task.await?;

    if summary.confirmed {
        println!(
            "Downloaded {} of {} item(s) to {}",
            summary.completed,
            summary.resolved,
            config.destination.display()
        );
    } else {
        println!("[EXITED]");
    }
    Ok(())
}

/// Prints engine events. Per-item failures are part of normal operation and
/// stay silent unless verbosity is on; finished files always print.
async fn consume_events(mut rx: broadcast::Receiver<EngineEvent>, verbose: bool) {
    let mut spinner: Option<ProgressBar> = None;

    let print_line = |spinner: &Option<ProgressBar>, line: String| match spinner {
        Some(pb) => pb.println(line),
        None => println!("{line}"),
    };

    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            EngineEvent::ResolveStarted { url } => {
                if verbose {
                    print_line(&spinner, format!("Resolving {url}"));
                }
            }
            EngineEvent::ItemResolved { title, .. } => {
                if verbose {
                    print_line(&spinner, format!("Resolved {title}"));
                }
            }
            EngineEvent::ResolveFailed { url, message } => {
                if verbose {
                    print_line(&spinner, format!("[ERR] resolve {url}: {message}"));
                }
            }
            EngineEvent::DownloadStarted { url, .. } => {
                if spinner.is_none() {
                    spinner = Some(ui::download_spinner());
                }
                if verbose {
                    print_line(&spinner, format!("Downloading {url}"));
                }
            }
            EngineEvent::FileFinished { filename, counted } => {
                if counted {
                    let name = std::path::Path::new(&filename)
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or(filename);
                    print_line(&spinner, format!("Finished downloading {name}"));
                } else if verbose {
                    print_line(&spinner, format!("Finished auxiliary file {filename}"));
                }
            }
            EngineEvent::DownloadFailed { message, .. } => {
                if verbose {
                    print_line(&spinner, format!("[ERR] download: {message}"));
                }
            }
            EngineEvent::Error { scope, message } => {
                if verbose {
                    print_line(&spinner, format!("[ERR] {scope}: {message}"));
                }
            }
            EngineEvent::Info { scope, message } => {
                if verbose {
                    print_line(&spinner, format!("[INFO] {scope}: {message}"));
                }
            }
        }
    }

    if let Some(pb) = spinner {
        pb.finish_with_message("Finished Downloading!");
    }
}
