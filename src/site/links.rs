use url::Url;

const SITE_HOST: &str = "beta.crunchyroll.com";

/// `https?://beta.crunchyroll.com/[<locale>/]series/<id>/<slug>`
pub fn is_series_url(raw: &str) -> bool {
    matches_site_path(raw, "series")
}

/// `https?://beta.crunchyroll.com/[<locale>/]watch/<id>/<slug>`
pub fn is_episode_url(raw: &str) -> bool {
    matches_site_path(raw, "watch")
}

fn matches_site_path(raw: &str, section: &str) -> bool {
    let Ok(url) = Url::parse(raw) else {
        return false;
    };
    if url.scheme() != "http" && url.scheme() != "https" {
        return false;
    }
    if url.host_str() != Some(SITE_HOST) {
        return false;
    }
    if url.fragment().is_some() {
        return false;
    }
    let Some(segments) = url.path_segments() else {
        return false;
    };
    let mut segments: Vec<&str> = segments.collect();
    // a trailing slash shows up as one empty segment
    if segments.last() == Some(&"") {
        segments.pop();
    }
    if segments.first().is_some_and(|first| is_locale(first)) {
        segments.remove(0);
    }
    match segments.as_slice() {
        [found, id, slug] => *found == section && is_word(id) && is_slug(slug),
        _ => false,
    }
}

fn is_locale(segment: &str) -> bool {
    (1..=2).contains(&segment.len()) && segment.chars().all(is_word_char)
}

fn is_word(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(is_word_char)
}

// slugs may be empty on the site
fn is_slug(segment: &str) -> bool {
    segment.chars().all(|c| is_word_char(c) || c == '-')
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
