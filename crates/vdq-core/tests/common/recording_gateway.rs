//! Gateway that records everything the engine sends.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use vdq_core::delivery::TransportProfile;
use vdq_core::format::FormatOption;
use vdq_core::gateway::{ConversationKey, Gateway, OutboundFile, Status, TransportError};
use vdq_core::media::MediaSource;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Options(Vec<FormatOption>),
    Status(Status),
    /// A transfer attempt and whether the file existed at that moment.
    File { file: OutboundFile, existed: bool, ok: bool },
}

pub struct RecordingGateway {
    events: Mutex<Vec<(ConversationKey, Event)>>,
    file_results: Mutex<VecDeque<Result<(), TransportError>>>,
    profile: TransportProfile,
    /// While set, `send_file` never returns.
    hold_files: AtomicBool,
    /// `send_file` calls entered, finished or not.
    pub files_started: AtomicUsize,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::with_profile(TransportProfile::default())
    }

    pub fn with_profile(profile: TransportProfile) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            file_results: Mutex::new(VecDeque::new()),
            profile,
            hold_files: AtomicBool::new(false),
            files_started: AtomicUsize::new(0),
        }
    }

    /// Make every later `send_file` hang.
    pub fn hold_files(&self) {
        self.hold_files.store(true, Ordering::SeqCst);
    }

    /// Results returned by the next `send_file` calls, in order; Ok after that.
    pub fn script_files(&self, results: impl IntoIterator<Item = Result<(), TransportError>>) {
        self.file_results.lock().unwrap().extend(results);
    }

    pub fn events(&self, key: ConversationKey) -> Vec<Event> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn statuses(&self, key: ConversationKey) -> Vec<Status> {
        self.events(key)
            .into_iter()
            .filter_map(|e| match e {
                Event::Status(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn terminal_statuses(&self, key: ConversationKey) -> Vec<Status> {
        self.statuses(key)
            .into_iter()
            .filter(Status::is_terminal)
            .collect()
    }

    /// Transfer attempts as (file, existed, ok).
    pub fn files(&self, key: ConversationKey) -> Vec<(OutboundFile, bool, bool)> {
        self.events(key)
            .into_iter()
            .filter_map(|e| match e {
                Event::File { file, existed, ok } => Some((file, existed, ok)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, key: ConversationKey, event: Event) {
        self.events.lock().unwrap().push((key, event));
    }
}

#[async_trait]
impl Gateway for RecordingGateway {
    async fn send_options(
        &self,
        key: ConversationKey,
        _source: &MediaSource,
        options: &[FormatOption],
    ) -> Result<(), TransportError> {
        self.push(key, Event::Options(options.to_vec()));
        Ok(())
    }

    async fn send_status(&self, key: ConversationKey, status: &Status) -> Result<(), TransportError> {
        self.push(key, Event::Status(*status));
        Ok(())
    }

    async fn send_file(&self, key: ConversationKey, file: &OutboundFile) -> Result<(), TransportError> {
        self.files_started.fetch_add(1, Ordering::SeqCst);
        if self.hold_files.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let existed = file.path.exists();
        let result = self
            .file_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()));
        self.push(
            key,
            Event::File {
                file: file.clone(),
                existed,
                ok: result.is_ok(),
            },
        );
        result
    }

    fn profile(&self) -> TransportProfile {
        self.profile.clone()
    }
}
