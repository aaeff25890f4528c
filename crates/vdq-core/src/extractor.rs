//! Interface to the extraction collaborator.
//!
//! The engine never parses hosting sites itself: it asks an `Extractor` for
//! the raw streams of a source and for a byte stream of one of them.

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::format::FormatHandle;
use crate::media::MediaSource;

/// One stream as reported by the extractor, before dedup and ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct RawStream {
    /// Extractor-specific identifier, becomes the `FormatHandle`.
    pub format_id: String,
    /// File extension / container (e.g. "mp4", "webm", "m4a").
    pub container: String,
    pub has_video: bool,
    pub has_audio: bool,
    /// Frame height for video streams.
    pub height: Option<u32>,
    /// Average audio bitrate in kbit/s for audio streams.
    pub audio_kbps: Option<u32>,
    /// Exact or approximate byte size when known.
    pub size: Option<u64>,
    /// `size` is the exact byte count, not an estimate.
    pub size_exact: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("source not found: {0}")]
    NotFound(String),
    #[error("unsupported source: {0}")]
    Unsupported(String),
    #[error("extractor failed: {0}")]
    Upstream(String),
    #[error("extractor i/o: {0}")]
    Io(#[from] io::Error),
}

/// Byte stream of one selected format.
///
/// `read_chunk` returns 0 at end of stream. Implementations must be cancel
/// safe: dropping a pending `read_chunk` loses no data that was returned.
#[async_trait]
pub trait MediaStream: Send {
    /// Size announced by the source before the transfer, if any.
    fn declared_size(&self) -> Option<u64>;

    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Enumerates the raw streams available for `source`.
    async fn list_streams(&self, source: &MediaSource) -> Result<Vec<RawStream>, ExtractError>;

    /// Opens the stream identified by `handle` (as produced by `list_streams`).
    async fn open_stream(
        &self,
        source: &MediaSource,
        handle: &FormatHandle,
    ) -> Result<Box<dyn MediaStream>, ExtractError>;
}

/// Adapts any `AsyncRead` into a `MediaStream`.
pub struct ReaderStream<R> {
    reader: R,
    declared_size: Option<u64>,
}

impl<R> ReaderStream<R> {
    pub fn new(reader: R, declared_size: Option<u64>) -> Self {
        Self {
            reader,
            declared_size,
        }
    }
}

#[async_trait]
impl<R> MediaStream for ReaderStream<R>
where
    R: AsyncRead + Send + Unpin,
{
    fn declared_size(&self) -> Option<u64> {
        self.declared_size
    }

    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf).await
    }
}
