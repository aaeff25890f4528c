//! Choosing how a file of a given size reaches the requester.

use crate::config::TransportConfig;
use crate::format::FormatKind;
use crate::gateway::{DeliveryRoute, FilePart};

/// Capabilities of the outbound transport, supplied by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportProfile {
    /// Largest payload of one ordinary message.
    pub standard_ceiling: u64,
    /// Ceiling of the high-ceiling (streaming upload) path, if available.
    pub high_ceiling: Option<u64>,
    /// Part size for chunked delivery, if the transport reassembles parts.
    pub chunk_bytes: Option<u64>,
    pub video_container: String,
    pub audio_container: String,
}

impl TransportProfile {
    pub fn expected_container(&self, kind: FormatKind) -> &str {
        match kind {
            FormatKind::Video => &self.video_container,
            FormatKind::Audio => &self.audio_container,
        }
    }
}

impl From<&TransportConfig> for TransportProfile {
    fn from(cfg: &TransportConfig) -> Self {
        Self {
            standard_ceiling: cfg.standard_ceiling_bytes,
            high_ceiling: cfg.high_ceiling_bytes,
            chunk_bytes: cfg.chunk_bytes,
            video_container: cfg.video_container.clone(),
            audio_container: cfg.audio_container.clone(),
        }
    }
}

impl Default for TransportProfile {
    fn default() -> Self {
        Self::from(&TransportConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryPlan {
    /// One transfer of the whole file.
    Single(DeliveryRoute),
    /// Sequential parts, in order.
    Chunked(Vec<FilePart>),
    /// No capability of the transport can carry the file.
    Rejected { size: u64, ceiling: u64 },
}

/// Picks the cheapest route that can carry `size` bytes: standard message,
/// then the high-ceiling path, then chunking.
pub fn plan(profile: &TransportProfile, size: u64) -> DeliveryPlan {
    if size <= profile.standard_ceiling {
        return DeliveryPlan::Single(DeliveryRoute::Standard);
    }
    if let Some(high) = profile.high_ceiling {
        if size <= high {
            return DeliveryPlan::Single(DeliveryRoute::HighCeiling);
        }
    }
    match profile.chunk_bytes.filter(|&c| c > 0) {
        Some(chunk) => DeliveryPlan::Chunked(split(size, chunk.min(profile.standard_ceiling.max(1)))),
        None => DeliveryPlan::Rejected {
            size,
            ceiling: profile.high_ceiling.unwrap_or(profile.standard_ceiling),
        },
    }
}

fn split(size: u64, chunk: u64) -> Vec<FilePart> {
    let total = size.div_ceil(chunk) as u32;
    (0..total)
        .map(|i| {
            let offset = i as u64 * chunk;
            FilePart {
                index: i + 1,
                total,
                offset,
                len: chunk.min(size - offset),
            }
        })
        .collect()
}
