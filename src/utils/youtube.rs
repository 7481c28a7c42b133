use url::Url;

use crate::error::SubmitError;

const WATCH_HOSTS: [&str; 4] = ["youtube.com", "www.youtube.com", "m.youtube.com", "music.youtube.com"];
const SHORT_HOSTS: [&str; 2] = ["youtu.be", "www.youtu.be"];

/// Validates a video link and rewrites it to `https://www.youtube.com/watch?v=<id>`.
///
/// Accepts watch pages on the known YouTube hosts and `youtu.be` short links.
/// Playlist, timestamp and tracking parameters are dropped.
pub fn normalize_watch_url(raw: &str) -> Result<String, SubmitError> {
    let invalid = || SubmitError::InvalidUrl(raw.to_string());

    let parsed = Url::parse(raw.trim()).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid());
    }
    let host = parsed.host_str().map(str::to_ascii_lowercase).ok_or_else(invalid)?;

    let video_id = if WATCH_HOSTS.contains(&host.as_str()) {
        if parsed.path().trim_end_matches('/') != "/watch" {
            return Err(invalid());
        }
        parsed
            .query_pairs()
            .find(|(key, _)| key == "v")
            .map(|(_, value)| value.into_owned())
    } else if SHORT_HOSTS.contains(&host.as_str()) {
        parsed
            .path_segments()
            .and_then(|mut segments| segments.next())
            .map(String::from)
    } else {
        None
    };

    match video_id {
        Some(id) if is_video_id(&id) => Ok(format!("https://www.youtube.com/watch?v={}", id)),
        _ => Err(invalid()),
    }
}

fn is_video_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
