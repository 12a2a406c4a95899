use uuid::Uuid;

pub type ItemId = Uuid;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Ordered pass-through arguments for the underlying downloader. The core
/// never interprets them; each pair travels with the request that carried it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadOptions(Vec<(String, String)>);

impl DownloadOptions {
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        Self(pairs)
    }

    /// Pair up trailing CLI tokens: a dashed token takes the following
    /// non-dashed token as its value, everything else becomes a bare flag.
    pub fn from_cli_tokens<I>(tokens: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut pairs = Vec::new();
        let mut iter = tokens.into_iter().peekable();
        while let Some(token) = iter.next() {
            if token.starts_with('-') && iter.peek().map_or(false, |next| !next.starts_with('-')) {
                let value = iter.next().unwrap_or_default();
                pairs.push((token, value));
            } else {
                pairs.push((token, String::new()));
            }
        }
        Self(pairs)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// What the user asked for. Closed sum: there are exactly two request shapes
/// and one extraction operation over both.
#[derive(Debug, Clone)]
pub enum DownloadRequest {
    Episode {
        url: String,
        options: DownloadOptions,
    },
    Series {
        url: String,
        season: u32,
        episode_start: u32,
        episode_end: u32,
        options: DownloadOptions,
    },
}

impl DownloadRequest {
    pub fn url(&self) -> &str {
        match self {
            Self::Episode { url, .. } | Self::Series { url, .. } => url,
        }
    }

    pub fn options(&self) -> &DownloadOptions {
        match self {
            Self::Episode { options, .. } | Self::Series { options, .. } => options,
        }
    }
}

/// One downloadable video, as resolved by the extraction phase. Immutable
/// once produced; `url` is what the download phase will be handed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoEntry {
    pub id: String,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub title: String,
    pub url: String,
}

/// A video entry paired with the options of the request that produced it.
#[derive(Debug, Clone)]
pub struct ResolvedItem {
    pub item_id: ItemId,
    pub entry: VideoEntry,
    pub options: DownloadOptions,
}

pub type Worklist = Vec<ResolvedItem>;

#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub resolved: usize,
    pub confirmed: bool,
    pub completed: u64,
}
