//! Boundary to the chat transport.
//!
//! The engine never talks to a concrete chat backend. It calls into a
//! [`Gateway`] to send options, statuses and files, and the transport calls
//! the engine's inbound hooks (`on_media_link`, `on_format_chosen`,
//! `on_cancel`). Tests drive the whole engine through a recording fake.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::delivery::TransportProfile;
use crate::error::{FailureReason, ResolutionError, ResolutionErrorKind};
use crate::format::{FormatKind, FormatOption};
use crate::media::MediaSource;
use crate::registry::JobId;

/// Identity the transport hands us for the person asking.
pub type RequesterId = i64;
/// Chat (conversation) the request arrived in.
pub type ConversationId = i64;

/// (requester, conversation) pair that owns selections and jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub requester: RequesterId,
    pub conversation: ConversationId,
}

impl ConversationKey {
    pub fn new(requester: RequesterId, conversation: ConversationId) -> Self {
        Self {
            requester,
            conversation,
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.requester, self.conversation)
    }
}

/// Why a request was refused before any job existed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NotFound,
    Unsupported,
    Upstream,
    Busy,
    Unavailable,
}

impl From<&ResolutionError> for RejectReason {
    fn from(e: &ResolutionError) -> Self {
        match e.kind {
            ResolutionErrorKind::NotFound => RejectReason::NotFound,
            ResolutionErrorKind::Unsupported => RejectReason::Unsupported,
            ResolutionErrorKind::Upstream => RejectReason::Upstream,
        }
    }
}

/// Progress and outcome messages shown to the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Processing,
    Queued { position: usize },
    Downloading,
    Uploading,
    Completed,
    Cancelled,
    Failed(FailureReason),
    Rejected(RejectReason),
    SelectionExpired,
}

impl Status {
    /// Statuses that close a job; at most one is sent per job.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Cancelled | Status::Failed(_))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Processing => f.write_str("Processing your link..."),
            Status::Queued { position } => {
                write!(f, "All download slots are busy. You are number {position} in line.")
            }
            Status::Downloading => f.write_str("Downloading..."),
            Status::Uploading => f.write_str("Uploading..."),
            Status::Completed => f.write_str("Done!"),
            Status::Cancelled => f.write_str("Operation cancelled."),
            Status::Failed(FailureReason::TimedOut) => {
                f.write_str("The download took too long and was stopped.")
            }
            Status::Failed(FailureReason::TooLarge) => {
                f.write_str("This file is too large to send. Try a lower quality.")
            }
            Status::Failed(FailureReason::Cancelled) => f.write_str("Operation cancelled."),
            Status::Failed(reason) => write!(f, "Failed: {reason}. Please try again."),
            Status::Rejected(RejectReason::NotFound) => {
                f.write_str("No downloadable formats were found for this video.")
            }
            Status::Rejected(RejectReason::Unsupported) => {
                f.write_str("Please send a valid YouTube link.")
            }
            Status::Rejected(RejectReason::Upstream) => {
                f.write_str("Could not get video information. Please try again later.")
            }
            Status::Rejected(RejectReason::Busy) => {
                f.write_str("Too many downloads are waiting. Please try again later.")
            }
            Status::Rejected(RejectReason::Unavailable) => {
                f.write_str("The service is shutting down.")
            }
            Status::SelectionExpired => {
                f.write_str("This selection has expired. Please send the link again.")
            }
        }
    }
}

/// How a file reaches the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryRoute {
    /// One ordinary message within the standard payload ceiling.
    Standard,
    /// Streaming upload through the high-ceiling path.
    HighCeiling,
    /// Sequential parts, each within the standard ceiling.
    Chunked,
}

/// Byte range of one part of a chunked delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePart {
    /// 1-based.
    pub index: u32,
    pub total: u32,
    pub offset: u64,
    pub len: u64,
}

/// One outbound file transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFile {
    pub job_id: JobId,
    pub path: PathBuf,
    /// Size of the whole file.
    pub declared_size: u64,
    pub kind: FormatKind,
    /// Suggested name for the requester's side.
    pub file_name: String,
    pub route: DeliveryRoute,
    pub part: Option<FilePart>,
}

impl OutboundFile {
    /// Bytes carried by this transfer.
    pub fn payload_len(&self) -> u64 {
        self.part.map_or(self.declared_size, |p| p.len)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("payload of {size} bytes exceeds the {ceiling} byte ceiling")]
    TooLarge { size: u64, ceiling: u64 },
    #[error("network error: {0}")]
    Network(String),
    #[error("rejected by transport: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Network failures may succeed on a second attempt; the rest will not.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Network(_))
    }
}

/// Outbound capability of the chat transport.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn send_options(
        &self,
        key: ConversationKey,
        source: &MediaSource,
        options: &[FormatOption],
    ) -> Result<(), TransportError>;

    async fn send_status(&self, key: ConversationKey, status: &Status)
        -> Result<(), TransportError>;

    async fn send_file(&self, key: ConversationKey, file: &OutboundFile)
        -> Result<(), TransportError>;

    /// Payload ceilings and expected containers of this transport.
    fn profile(&self) -> TransportProfile;
}
