use std::cmp::Reverse;
use std::collections::HashMap;

use crate::error::ResolutionError;
use crate::extractor::{ExtractError, Extractor, RawStream};
use crate::media::MediaSource;

use super::ladder::{audio_label, snap_height, video_label};
use super::{AudioTrack, FormatHandle, FormatKind, FormatOption};

/// Resolves the ordered list of selectable formats for `source`.
///
/// Video options come first (highest resolution first), then audio options
/// (highest bitrate first). No retries: the caller decides whether to ask
/// the requester to try again.
pub async fn resolve(
    extractor: &dyn Extractor,
    source: &MediaSource,
) -> Result<Vec<FormatOption>, ResolutionError> {
    let streams = extractor
        .list_streams(source)
        .await
        .map_err(|e| match e {
            ExtractError::NotFound(d) => ResolutionError::not_found(d),
            ExtractError::Unsupported(d) => ResolutionError::unsupported(d),
            ExtractError::Upstream(d) => ResolutionError::upstream(d),
            ExtractError::Io(e) => ResolutionError::upstream(e.to_string()),
        })?;

    let raw_count = streams.len();
    let options = build_options(streams);
    if options.is_empty() {
        return Err(ResolutionError::not_found(format!(
            "{source}: no usable streams ({raw_count} reported)"
        )));
    }
    tracing::debug!(
        source = %source,
        raw = raw_count,
        options = options.len(),
        "resolved formats"
    );
    Ok(options)
}

/// Labels, deduplicates and orders raw streams.
///
/// Streams sharing (kind, label, container) collapse into one option. A
/// self-contained stream beats a video-only one; otherwise a variant with a
/// known byte size replaces one without. Video-only streams are then paired
/// with the best audio stream and dropped when there is none.
pub fn build_options(streams: Vec<RawStream>) -> Vec<FormatOption> {
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut index: HashMap<(FormatKind, String, String), usize> = HashMap::new();

    for stream in streams {
        let Some(candidate) = Candidate::from_stream(stream) else {
            continue;
        };
        let o = &candidate.option;
        let key = (o.kind, o.label.clone(), o.container.clone());
        match index.get(&key) {
            Some(&i) => {
                if candidate.preference() > candidates[i].preference() {
                    candidates[i] = candidate;
                }
            }
            None => {
                index.insert(key, candidates.len());
                candidates.push(candidate);
            }
        }
    }

    let audio: Vec<FormatOption> = candidates
        .iter()
        .filter(|c| c.option.kind == FormatKind::Audio)
        .map(|c| c.option.clone())
        .collect();

    let mut options: Vec<FormatOption> = Vec::with_capacity(candidates.len());
    for Candidate {
        mut option,
        video_only,
    } in candidates
    {
        if video_only {
            let Some(track) = companion(&option.container, &audio) else {
                tracing::debug!(handle = %option.handle, "video-only stream without audio, skipped");
                continue;
            };
            option.estimated_size = option
                .estimated_size
                .zip(track.estimated_size)
                .map(|(v, a)| v + a);
            option.size_exact = option.size_exact && track.size_exact;
            option.audio = Some(AudioTrack {
                handle: track.handle.clone(),
                container: track.container.clone(),
            });
        }
        options.push(option);
    }

    options.sort_by_key(|o| (o.kind, Reverse(o.rank)));
    options
}

struct Candidate {
    option: FormatOption,
    /// Video stream that carries no audio of its own.
    video_only: bool,
}

impl Candidate {
    fn from_stream(stream: RawStream) -> Option<Self> {
        let video_only = stream.has_video && !stream.has_audio;
        to_option(stream).map(|option| Self { option, video_only })
    }

    fn preference(&self) -> (bool, bool) {
        (!self.video_only, self.option.estimated_size.is_some())
    }
}

/// Best audio option for a video in `container`: same container family
/// first, then highest bitrate.
fn companion<'a>(container: &str, audio: &'a [FormatOption]) -> Option<&'a FormatOption> {
    audio
        .iter()
        .max_by_key(|a| (pairs_with(container, &a.container), a.rank))
}

fn pairs_with(video: &str, audio: &str) -> bool {
    matches!(
        (video, audio),
        ("mp4", "m4a" | "mp4") | ("webm", "webm")
    )
}

fn to_option(stream: RawStream) -> Option<FormatOption> {
    let (kind, label, rank) = if stream.has_video {
        let height = stream.height?;
        (FormatKind::Video, video_label(height), snap_height(height))
    } else if stream.has_audio {
        let kbps = stream.audio_kbps.filter(|&k| k > 0)?;
        (FormatKind::Audio, audio_label(kbps), kbps)
    } else {
        return None;
    };

    Some(FormatOption {
        kind,
        label,
        container: stream.container,
        estimated_size: stream.size,
        size_exact: stream.size.is_some() && stream.size_exact,
        handle: FormatHandle::new(stream.format_id),
        audio: None,
        rank,
    })
}
