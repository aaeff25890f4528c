//! Selectable formats of a media source.
//!
//! Raw extractor streams are labelled (`ladder`), deduplicated and ordered
//! (`resolve`) into the list offered to the requester.

mod ladder;
mod resolve;

use std::fmt;

pub use ladder::{audio_label, snap_height, video_label, STANDARD_HEIGHTS};
pub use resolve::{build_options, resolve};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FormatKind {
    Video,
    Audio,
}

impl FormatKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FormatKind::Video => "video",
            FormatKind::Audio => "audio",
        }
    }
}

/// Opaque token the extractor uses to open one specific stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FormatHandle(String);

impl FormatHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FormatHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Separate audio stream muxed into a video-only option after download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTrack {
    pub handle: FormatHandle,
    pub container: String,
}

/// One selectable encoding of a source. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatOption {
    pub kind: FormatKind,
    /// Human-readable quality: "1080p", "128kbps".
    pub label: String,
    pub container: String,
    pub estimated_size: Option<u64>,
    /// `estimated_size` is exact (every part reported an exact byte count).
    pub size_exact: bool,
    pub handle: FormatHandle,
    /// Audio companion for video-only streams; None when `handle` is self-contained.
    pub audio: Option<AudioTrack>,
    /// Ordering key within the kind: height for video, kbit/s for audio.
    pub rank: u32,
}

impl fmt::Display for FormatOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.kind.as_str(), self.label, self.container)?;
        if let Some(size) = self.estimated_size {
            let approx = if self.size_exact { "" } else { "~" };
            write!(f, " {approx}{:.1} MiB", size as f64 / 1_048_576.0)?;
        }
        Ok(())
    }
}
