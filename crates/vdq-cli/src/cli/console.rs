//! Console gateway: statuses and options go to stdout, files go into a
//! local directory (the "directory transport").

use async_trait::async_trait;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use vdq_core::delivery::TransportProfile;
use vdq_core::format::FormatOption;
use vdq_core::gateway::{
    ConversationKey, DeliveryRoute, Gateway, OutboundFile, Status, TransportError,
};
use vdq_core::media::MediaSource;

/// The console has exactly one requester in one conversation.
pub const CONSOLE_KEY: ConversationKey = ConversationKey {
    requester: 1,
    conversation: 1,
};

pub struct ConsoleGateway {
    out_dir: PathBuf,
    profile: TransportProfile,
    /// When false only files are written (used by `fetch`).
    verbose: bool,
}

impl ConsoleGateway {
    pub fn new(out_dir: impl Into<PathBuf>, profile: TransportProfile) -> Self {
        Self {
            out_dir: out_dir.into(),
            profile,
            verbose: true,
        }
    }

    pub fn quiet(mut self) -> Self {
        self.verbose = false;
        self
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    fn ceiling(&self, route: DeliveryRoute) -> Result<u64, TransportError> {
        match route {
            DeliveryRoute::Standard | DeliveryRoute::Chunked => Ok(self.profile.standard_ceiling),
            DeliveryRoute::HighCeiling => self
                .profile
                .high_ceiling
                .ok_or_else(|| TransportError::Rejected("no high-ceiling path".into())),
        }
    }

    async fn write_file(&self, file: &OutboundFile) -> io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.out_dir).await?;
        let dest = self.out_dir.join(&file.file_name);

        let Some(part) = file.part else {
            tokio::fs::copy(&file.path, &dest).await?;
            return Ok(dest);
        };

        let mut src = tokio::fs::File::open(&file.path).await?;
        src.seek(SeekFrom::Start(part.offset)).await?;
        let mut dst = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(part.index == 1)
            .open(&dest)
            .await?;
        dst.seek(SeekFrom::Start(part.offset)).await?;
        let copied = tokio::io::copy(&mut src.take(part.len), &mut dst).await?;
        if copied != part.len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("part {} short: {copied} of {} bytes", part.index, part.len),
            ));
        }
        dst.flush().await?;
        Ok(dest)
    }
}

fn transport_error(e: io::Error) -> TransportError {
    match e.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
            TransportError::Rejected(e.to_string())
        }
        _ => TransportError::Network(e.to_string()),
    }
}

/// Numbered option list as shown in the console; `serve` accepts these numbers.
pub fn format_options(source: &MediaSource, options: &[FormatOption]) -> String {
    let mut out = format!("Formats for {}:\n", source.video_id());
    for (i, option) in options.iter().enumerate() {
        out.push_str(&format!("  {:>2}. {}\n", i + 1, option));
    }
    out
}

#[async_trait]
impl Gateway for ConsoleGateway {
    async fn send_options(
        &self,
        _key: ConversationKey,
        source: &MediaSource,
        options: &[FormatOption],
    ) -> Result<(), TransportError> {
        if self.verbose {
            print!("{}", format_options(source, options));
        }
        Ok(())
    }

    async fn send_status(&self, _key: ConversationKey, status: &Status) -> Result<(), TransportError> {
        if self.verbose || status.is_terminal() {
            println!("{status}");
        }
        Ok(())
    }

    async fn send_file(&self, key: ConversationKey, file: &OutboundFile) -> Result<(), TransportError> {
        let ceiling = self.ceiling(file.route)?;
        let size = file.payload_len();
        if size > ceiling {
            return Err(TransportError::TooLarge { size, ceiling });
        }

        let dest = self.write_file(file).await.map_err(transport_error)?;
        tracing::debug!(
            job_id = file.job_id,
            conversation = %key,
            route = ?file.route,
            bytes = size,
            "wrote {}",
            dest.display()
        );
        match file.part {
            Some(part) if part.index < part.total => {}
            _ => println!("Saved {}", dest.display()),
        }
        Ok(())
    }

    fn profile(&self) -> TransportProfile {
        self.profile.clone()
    }
}
