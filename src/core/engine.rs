use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::core::events::EngineEvent;
use crate::core::history::HistoryStore;
use crate::core::model::{
    Credentials, DownloadRequest, ResolvedItem, RunSummary, Worklist,
};
use crate::site::extractor::Extractor;
use crate::site::{is_known_media, MediaSink, SiteClient};

/// Asks the user whether the resolved worklist should be downloaded. Called
/// exactly once, after resolution has fully drained; its answer is the sole
/// precondition for the download phase.
pub trait ConfirmGate: Send + Sync {
    fn confirm(&self, worklist: &[ResolvedItem]) -> anyhow::Result<bool>;
}

#[derive(Clone)]
pub struct Engine {
    extractor: Arc<Extractor>,
    sink: Arc<dyn MediaSink>,
    threads: usize,
    event_tx: broadcast::Sender<EngineEvent>,
    history: Option<HistoryStore>,
}

impl Engine {
    pub fn new(
        client: Arc<dyn SiteClient>,
        sink: Arc<dyn MediaSink>,
        credentials: Credentials,
        threads: usize,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            extractor: Arc::new(Extractor::new(client, credentials)),
            sink,
            threads: threads.clamp(1, 10),
            event_tx,
            history: None,
        }
    }

    pub fn with_history(mut self, store: HistoryStore) -> Self {
        self.history = Some(store);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    /// Resolution phase: one extraction task per request, at most `threads`
    /// in flight. Results are appended in completion order. A failed request
    /// is reported and contributes zero entries while its siblings keep
    /// going; this is deliberate per-request fault isolation, not error
    /// hiding.
    pub async fn resolve(&self, requests: &[DownloadRequest]) -> Worklist {
        let mut outcomes = stream::iter(requests.iter().cloned())
            .map(|request| {
                let extractor = self.extractor.clone();
                let tx = self.event_tx.clone();
                async move {
                    let _ = tx.send(EngineEvent::ResolveStarted {
                        url: request.url().to_string(),
                    });
                    let outcome = extractor.extract(&request).await;
                    (request, outcome)
                }
            })
            .buffer_unordered(self.threads);

        let mut worklist = Worklist::new();
        while let Some((request, outcome)) = outcomes.next().await {
            match outcome {
                Ok(entries) => {
                    for entry in entries {
                        let item_id = Uuid::new_v4();
                        let _ = self.event_tx.send(EngineEvent::ItemResolved {
                            item_id,
                            title: entry.title.clone(),
                        });
                        worklist.push(ResolvedItem {
                            item_id,
                            entry,
                            options: request.options().clone(),
                        });
                    }
                }
                Err(e) => {
                    let _ = self.event_tx.send(EngineEvent::ResolveFailed {
                        url: request.url().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        worklist
    }

    /// Download phase: bounded fan-out over the confirmed worklist. The only
    /// shared state is the completed counter; per-item errors are folded into
    /// events and never abort the batch.
    pub async fn download(&self, worklist: &[ResolvedItem]) -> u64 {
        let completed = Arc::new(AtomicU64::new(0));

        stream::iter(worklist.iter().cloned())
            .map(|item| {
                let sink = self.sink.clone();
                let tx = self.event_tx.clone();
                let completed = completed.clone();
                async move {
                    let _ = tx.send(EngineEvent::DownloadStarted {
                        item_id: item.item_id,
                        url: item.entry.url.clone(),
                    });

                    let hook_tx = tx.clone();
                    let hook_completed = completed.clone();
                    let on_finished = move |filename: &str| {
                        let counted = is_known_media(filename);
                        if counted {
                            hook_completed.fetch_add(1, Ordering::Relaxed);
                        }
                        let _ = hook_tx.send(EngineEvent::FileFinished {
                            filename: filename.to_string(),
                            counted,
                        });
                    };

                    if let Err(e) = sink
                        .download(&item.entry.url, &item.options, &on_finished)
                        .await
                    {
                        let _ = tx.send(EngineEvent::DownloadFailed {
                            item_id: item.item_id,
                            message: e.to_string(),
                        });
                    }
                }
            })
            .buffer_unordered(self.threads)
            .collect::<Vec<()>>()
            .await;

        completed.load(Ordering::Relaxed)
    }

    /// Full pipeline: resolve, gate, download, record. Declining at the gate
    /// is a normal outcome, not an error.
    pub async fn run(
        &self,
        requests: &[DownloadRequest],
        gate: &dyn ConfirmGate,
    ) -> anyhow::Result<RunSummary> {
        let worklist = self.resolve(requests).await;

        if !gate.confirm(&worklist)? {
            return Ok(RunSummary {
                resolved: worklist.len(),
                confirmed: false,
                completed: 0,
            });
        }

        let completed = self.download(&worklist).await;
        let summary = RunSummary {
            resolved: worklist.len(),
            confirmed: true,
            completed,
        };

        if let Some(history) = &self.history {
            if let Err(e) = history.record_run(&worklist, &summary).await {
                let _ = self.event_tx.send(EngineEvent::Error {
                    scope: "history".to_string(),
                    message: format!("{e:#}"),
                });
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{DownloadOptions, VideoEntry};
    use crate::site::{DownloadError, ExtractError};
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    fn entry(id: &str, season: u32, episode: u32) -> VideoEntry {
        VideoEntry {
            id: id.to_string(),
            season: Some(season),
            episode: Some(episode),
            title: format!("{id} title"),
            url: format!("https://beta.crunchyroll.com/watch/{id}/slug"),
        }
    }

    struct FakeSite {
        feeds: HashMap<String, Vec<VideoEntry>>,
        failing: HashSet<String>,
    }

    #[async_trait]
    impl SiteClient for FakeSite {
        async fn login(&self, _username: &str, _password: &str) -> Result<(), ExtractError> {
            Ok(())
        }

        async fn fetch_episode(&self, url: &str) -> Result<VideoEntry, ExtractError> {
            if self.failing.contains(url) {
                return Err(ExtractError::Fetch("watch page unavailable".to_string()));
            }
            Ok(self.feeds[url][0].clone())
        }

        async fn fetch_series(&self, url: &str) -> Result<Vec<VideoEntry>, ExtractError> {
            if self.failing.contains(url) {
                return Err(ExtractError::Fetch("series page unavailable".to_string()));
            }
            Ok(self.feeds[url].clone())
        }
    }

    /// Pretends to be the downloader: honors no-overwrite for URLs listed in
    /// `existing`, fails for URLs in `failing`, otherwise reports one
    /// finished file named after the entry id.
    struct FakeSink {
        attempts: Mutex<Vec<String>>,
        existing: HashSet<String>,
        failing: HashSet<String>,
        finished_ext: &'static str,
    }

    impl FakeSink {
        fn new() -> Self {
            Self {
                attempts: Mutex::new(Vec::new()),
                existing: HashSet::new(),
                failing: HashSet::new(),
                finished_ext: "mkv",
            }
        }
    }

    #[async_trait]
    impl MediaSink for FakeSink {
        async fn download(
            &self,
            url: &str,
            _options: &DownloadOptions,
            on_finished: &(dyn for<'a> Fn(&'a str) + Send + Sync),
        ) -> Result<(), DownloadError> {
            if self.existing.contains(url) {
                // file already on disk and non-empty: nothing is attempted
                return Ok(());
            }
            self.attempts.lock().unwrap().push(url.to_string());
            if self.failing.contains(url) {
                return Err(DownloadError::Failed("connection reset".to_string()));
            }
            let name = url.rsplit('/').nth(1).unwrap_or("download");
            on_finished(&format!("{name}.{}", self.finished_ext));
            Ok(())
        }
    }

    struct CannedGate {
        answer: bool,
        seen: Mutex<Option<usize>>,
    }

    impl CannedGate {
        fn new(answer: bool) -> Self {
            Self {
                answer,
                seen: Mutex::new(None),
            }
        }
    }

    impl ConfirmGate for CannedGate {
        fn confirm(&self, worklist: &[ResolvedItem]) -> anyhow::Result<bool> {
            *self.seen.lock().unwrap() = Some(worklist.len());
            Ok(self.answer)
        }
    }

    fn creds() -> Credentials {
        Credentials {
            username: "user".to_string(),
            password: "pass".to_string(),
        }
    }

    fn series_url(n: u32) -> String {
        format!("https://beta.crunchyroll.com/series/S{n}/slug")
    }

    fn series_request(n: u32) -> DownloadRequest {
        DownloadRequest::Series {
            url: series_url(n),
            season: 1,
            episode_start: 1,
            episode_end: 10,
            options: DownloadOptions::default(),
        }
    }

    fn resolved(id: &str) -> ResolvedItem {
        ResolvedItem {
            item_id: Uuid::new_v4(),
            entry: entry(id, 1, 1),
            options: DownloadOptions::default(),
        }
    }

    #[tokio::test]
    async fn failed_requests_do_not_abort_their_siblings() {
        let mut feeds = HashMap::new();
        feeds.insert(series_url(1), vec![entry("a", 1, 1), entry("b", 1, 2)]);
        feeds.insert(series_url(3), vec![entry("c", 1, 1)]);
        let site = FakeSite {
            feeds,
            failing: HashSet::from([series_url(2)]),
        };
        let engine = Engine::new(Arc::new(site), Arc::new(FakeSink::new()), creds(), 4);

        let worklist = engine
            .resolve(&[series_request(1), series_request(2), series_request(3)])
            .await;

        // sum over succeeding requests only
        assert_eq!(worklist.len(), 3);
        let ids: HashSet<_> = worklist.iter().map(|i| i.entry.id.as_str()).collect();
        assert_eq!(ids, HashSet::from(["a", "b", "c"]));
    }

    #[tokio::test]
    async fn resolution_failure_is_reported_on_the_event_bus() {
        let site = FakeSite {
            feeds: HashMap::new(),
            failing: HashSet::from([series_url(1)]),
        };
        let engine = Engine::new(Arc::new(site), Arc::new(FakeSink::new()), creds(), 2);
        let mut rx = engine.subscribe();

        let worklist = engine.resolve(&[series_request(1)]).await;
        assert!(worklist.is_empty());

        let mut saw_failure = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, EngineEvent::ResolveFailed { .. }) {
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }

    #[tokio::test]
    async fn declining_the_gate_schedules_no_downloads() {
        let mut feeds = HashMap::new();
        feeds.insert(series_url(1), vec![entry("a", 1, 1)]);
        let site = FakeSite {
            feeds,
            failing: HashSet::new(),
        };
        let sink = Arc::new(FakeSink::new());
        let engine = Engine::new(Arc::new(site), sink.clone(), creds(), 2);
        let gate = CannedGate::new(false);

        let summary = engine.run(&[series_request(1)], &gate).await.unwrap();

        assert!(!summary.confirmed);
        assert_eq!(summary.resolved, 1);
        assert_eq!(summary.completed, 0);
        assert!(sink.attempts.lock().unwrap().is_empty());
        // the gate saw the fully drained worklist
        assert_eq!(*gate.seen.lock().unwrap(), Some(1));
    }

    #[tokio::test]
    async fn existing_files_are_skipped_and_failures_are_isolated() {
        let mut sink = FakeSink::new();
        let skip_url = "https://beta.crunchyroll.com/watch/skip/slug".to_string();
        let fail_url = "https://beta.crunchyroll.com/watch/fail/slug".to_string();
        sink.existing.insert(skip_url.clone());
        sink.failing.insert(fail_url.clone());
        let sink = Arc::new(sink);

        let site = FakeSite {
            feeds: HashMap::new(),
            failing: HashSet::new(),
        };
        let engine = Engine::new(Arc::new(site), sink.clone(), creds(), 3);

        let worklist = vec![resolved("skip"), resolved("fail"), resolved("good")];
        let completed = engine.download(&worklist).await;

        // only the genuinely finished item counts
        assert_eq!(completed, 1);
        let attempts = sink.attempts.lock().unwrap();
        assert!(!attempts.iter().any(|u| u == &skip_url));
        assert!(attempts.iter().any(|u| u == &fail_url));
    }

    #[tokio::test]
    async fn unknown_extensions_do_not_advance_the_counter() {
        let mut sink = FakeSink::new();
        sink.finished_ext = "description";
        let site = FakeSite {
            feeds: HashMap::new(),
            failing: HashSet::new(),
        };
        let engine = Engine::new(Arc::new(site), Arc::new(sink), creds(), 1);

        let completed = engine.download(&[resolved("a")]).await;
        assert_eq!(completed, 0);
    }

    #[tokio::test]
    async fn confirmed_run_downloads_everything_resolved() {
        let mut feeds = HashMap::new();
        feeds.insert(
            series_url(1),
            vec![entry("a", 1, 1), entry("b", 1, 2), entry("c", 1, 3)],
        );
        let site = FakeSite {
            feeds,
            failing: HashSet::new(),
        };
        let sink = Arc::new(FakeSink::new());
        let engine = Engine::new(Arc::new(site), sink.clone(), creds(), 2);
        let gate = CannedGate::new(true);

        let summary = engine.run(&[series_request(1)], &gate).await.unwrap();

        assert!(summary.confirmed);
        assert_eq!(summary.resolved, 3);
        assert_eq!(summary.completed, 3);
        assert_eq!(sink.attempts.lock().unwrap().len(), 3);
    }
}
