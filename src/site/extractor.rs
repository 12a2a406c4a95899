use std::collections::HashSet;
use std::sync::Arc;

use crate::core::model::{Credentials, DownloadRequest, VideoEntry};
use crate::site::{ExtractError, SiteClient};

/// Turns one request into its video entries. Both request shapes share this
/// single operation; the match below is the whole dispatch.
pub struct Extractor {
    client: Arc<dyn SiteClient>,
    credentials: Credentials,
}

impl Extractor {
    pub fn new(client: Arc<dyn SiteClient>, credentials: Credentials) -> Self {
        Self {
            client,
            credentials,
        }
    }

    /// Login, then fetch. Errors propagate unchanged; retrying and fault
    /// isolation are the orchestrator's business.
    pub async fn extract(&self, request: &DownloadRequest) -> Result<Vec<VideoEntry>, ExtractError> {
        self.client
            .login(&self.credentials.username, &self.credentials.password)
            .await?;

        match request {
            DownloadRequest::Episode { url, .. } => {
                let mut entry = self.client.fetch_episode(url).await?;
                // the download source stays the URL the user asked for, not
                // whatever the site redirected to
                entry.url = url.clone();
                Ok(vec![entry])
            }
            DownloadRequest::Series {
                url,
                season,
                episode_start,
                episode_end,
                ..
            } => {
                let feed = self.client.fetch_series(url).await?;
                Ok(filter_series_entries(feed, *season, *episode_start, *episode_end))
            }
        }
    }
}

/// Single left-to-right pass over the flat cross-season feed: keep entries in
/// the requested season whose episode falls in `[start, end]`. The feed can
/// repeat a (season, episode) pair; the first occurrence wins.
pub fn filter_series_entries(
    feed: Vec<VideoEntry>,
    season: u32,
    start: u32,
    end: u32,
) -> Vec<VideoEntry> {
    let mut seen: HashSet<(u32, u32)> = HashSet::new();
    let mut kept = Vec::new();
    for entry in feed {
        let (Some(entry_season), Some(entry_episode)) = (entry.season, entry.episode) else {
            continue;
        };
        if entry_season == season
            && (start..=end).contains(&entry_episode)
            && seen.insert((entry_season, entry_episode))
        {
            kept.push(entry);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn entry(id: &str, season: u32, episode: u32) -> VideoEntry {
        VideoEntry {
            id: id.to_string(),
            season: Some(season),
            episode: Some(episode),
            title: format!("Episode {episode}"),
            url: format!("https://beta.crunchyroll.com/watch/{id}/episode-{episode}"),
        }
    }

    struct FakeSite {
        feed: Vec<VideoEntry>,
        reject_login: bool,
    }

    #[async_trait]
    impl SiteClient for FakeSite {
        async fn login(&self, _username: &str, _password: &str) -> Result<(), ExtractError> {
            if self.reject_login {
                Err(ExtractError::Auth("invalid credentials".to_string()))
            } else {
                Ok(())
            }
        }

        async fn fetch_episode(&self, _url: &str) -> Result<VideoEntry, ExtractError> {
            // canonicalized URL, unlike the one the request carried
            let mut single = self.feed[0].clone();
            single.url = "https://beta.crunchyroll.com/en/watch/CANON/canonical-slug".to_string();
            Ok(single)
        }

        async fn fetch_series(&self, _url: &str) -> Result<Vec<VideoEntry>, ExtractError> {
            Ok(self.feed.clone())
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            username: "user".to_string(),
            password: "pass".to_string(),
        }
    }

    fn series_request(season: u32, start: u32, end: u32) -> DownloadRequest {
        DownloadRequest::Series {
            url: "https://beta.crunchyroll.com/series/GJ0H7QX0Z/tomodachi-game".to_string(),
            season,
            episode_start: start,
            episode_end: end,
            options: Default::default(),
        }
    }

    #[test]
    fn filtering_keeps_season_and_range_only() {
        let feed = vec![
            entry("a", 1, 1),
            entry("b", 1, 2),
            entry("c", 2, 2),
            entry("d", 1, 5),
        ];
        let kept = filter_series_entries(feed, 1, 1, 2);
        let ids: Vec<_> = kept.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn filtering_dedupes_first_occurrence_wins() {
        let mut duplicate = entry("later", 1, 2);
        duplicate.title = "duplicate feed row".to_string();
        let feed = vec![entry("first", 1, 2), duplicate, entry("other", 1, 3)];
        let kept = filter_series_entries(feed, 1, 1, 3);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].id, "first");
        assert_eq!(kept[1].id, "other");
    }

    #[test]
    fn filtering_is_idempotent() {
        let feed = vec![entry("a", 1, 1), entry("a2", 1, 1), entry("b", 1, 2)];
        let once = filter_series_entries(feed.clone(), 1, 1, 2);
        let twice = filter_series_entries(once.clone(), 1, 1, 2);
        assert_eq!(once, twice);
        let mut pairs: Vec<_> = once.iter().map(|e| (e.season, e.episode)).collect();
        pairs.dedup();
        assert_eq!(pairs.len(), once.len());
    }

    #[test]
    fn filtering_skips_entries_without_numbering() {
        let mut unnumbered = entry("x", 1, 1);
        unnumbered.season = None;
        let kept = filter_series_entries(vec![unnumbered, entry("y", 1, 1)], 1, 1, 1);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "y");
    }

    #[tokio::test]
    async fn episode_extraction_preserves_request_url() {
        let site = FakeSite {
            feed: vec![entry("a", 1, 1)],
            reject_login: false,
        };
        let extractor = Extractor::new(Arc::new(site), credentials());
        let request_url = "https://beta.crunchyroll.com/watch/GRWEXZWJR/original-slug";
        let request = DownloadRequest::Episode {
            url: request_url.to_string(),
            options: Default::default(),
        };
        let entries = extractor.extract(&request).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].url, request_url);
    }

    #[tokio::test]
    async fn login_failure_propagates_as_auth_error() {
        let site = FakeSite {
            feed: vec![],
            reject_login: true,
        };
        let extractor = Extractor::new(Arc::new(site), credentials());
        let err = extractor.extract(&series_request(1, 1, 1)).await.unwrap_err();
        assert!(matches!(err, ExtractError::Auth(_)));
    }

    #[tokio::test]
    async fn series_extraction_applies_filter() {
        let site = FakeSite {
            feed: vec![entry("a", 1, 1), entry("b", 2, 1), entry("c", 1, 9)],
            reject_login: false,
        };
        let extractor = Extractor::new(Arc::new(site), credentials());
        let entries = extractor.extract(&series_request(1, 1, 3)).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "a");
    }
}
