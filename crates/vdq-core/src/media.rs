//! Media-source references: validation and canonical form.
//!
//! Users paste links in many shapes (`youtu.be/ID`, `m.youtube.com/watch?v=ID`,
//! `@https://...`). Every accepted reference is reduced to
//! `https://www.youtube.com/watch?v=ID` so equal videos compare equal.

use std::fmt;

use url::Url;

use crate::error::ResolutionError;

const VIDEO_ID_LEN: usize = 11;
const HOST_PREFIXES: [&str; 3] = ["www.", "m.", "music."];
const PATH_ID_PREFIXES: [&str; 5] = ["embed", "v", "shorts", "live", "e"];

/// Canonical, immutable identifier of a requested video.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaSource {
    url: String,
    video_id: String,
}

impl MediaSource {
    /// Parses free-form user text into a canonical source.
    ///
    /// Fails with `Unsupported` when the text is not a recognized video reference.
    pub fn parse(input: &str) -> Result<Self, ResolutionError> {
        let cleaned = clean_input(input);
        if cleaned.is_empty() {
            return Err(ResolutionError::unsupported("empty link"));
        }

        let with_scheme = if cleaned.contains("://") {
            cleaned.to_string()
        } else {
            format!("https://{cleaned}")
        };
        let url = Url::parse(&with_scheme)
            .map_err(|e| ResolutionError::unsupported(format!("{cleaned}: {e}")))?;

        let video_id = video_id_from_url(&url)
            .ok_or_else(|| ResolutionError::unsupported(format!("not a video link: {cleaned}")))?;

        Ok(Self {
            url: format!("https://www.youtube.com/watch?v={video_id}"),
            video_id,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Strips surrounding whitespace and any leading `@` mention markers.
fn clean_input(input: &str) -> &str {
    input
        .trim()
        .trim_start_matches(|c: char| c == '@' || c.is_whitespace())
}

fn video_id_from_url(url: &Url) -> Option<String> {
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.to_ascii_lowercase();
    let host = HOST_PREFIXES
        .iter()
        .find_map(|p| host.strip_prefix(p))
        .unwrap_or(&host);

    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    let candidate = match host {
        "youtu.be" => segments.next().map(str::to_string),
        "youtube.com" | "youtube-nocookie.com" => match segments.next() {
            Some("watch") => url
                .query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned()),
            Some(prefix) if PATH_ID_PREFIXES.contains(&prefix) => {
                segments.next().map(str::to_string)
            }
            _ => None,
        },
        _ => None,
    }?;

    is_video_id(&candidate).then_some(candidate)
}

fn is_video_id(s: &str) -> bool {
    s.len() == VIDEO_ID_LEN
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
