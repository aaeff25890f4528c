//! Shared fakes and helpers for engine integration tests.

#![allow(dead_code)]

pub mod fake_converter;
pub mod fake_extractor;
pub mod recording_gateway;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use vdq_core::config::VdqConfig;
use vdq_core::engine::{Collaborators, Engine};
use vdq_core::extractor::RawStream;
use vdq_core::format::FormatOption;
use vdq_core::gateway::ConversationKey;
use vdq_core::registry::{Job, JobId, JobState};

pub use fake_converter::FakeConverter;
pub use fake_extractor::{ScriptedExtractor, StreamScript};
pub use recording_gateway::{Event, RecordingGateway};

/// Real-time ceiling for waits in tests that do not pause the clock.
pub const WAIT: Duration = Duration::from_secs(10);

/// Yield until `done` holds, panicking after `WAIT`.
pub async fn until(what: &str, mut done: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !done() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

/// Config for tests: no throttle, small limits.
pub fn test_config(max_concurrent: usize) -> VdqConfig {
    VdqConfig {
        max_concurrent_jobs: max_concurrent,
        throttle_ms: 0,
        ..VdqConfig::default()
    }
}

pub struct Harness {
    pub engine: Engine,
    pub extractor: Arc<ScriptedExtractor>,
    pub gateway: Arc<RecordingGateway>,
    pub converter: Arc<FakeConverter>,
}

impl Harness {
    pub fn new(cfg: VdqConfig, dir: &Path) -> Self {
        Self::with_parts(
            cfg,
            dir,
            ScriptedExtractor::new(default_streams()),
            RecordingGateway::new(),
        )
    }

    pub fn with_parts(
        cfg: VdqConfig,
        dir: &Path,
        extractor: ScriptedExtractor,
        gateway: RecordingGateway,
    ) -> Self {
        let extractor = Arc::new(extractor);
        let gateway = Arc::new(gateway);
        let converter = Arc::new(FakeConverter::new());
        let engine = Engine::new(
            cfg,
            dir,
            Collaborators {
                extractor: extractor.clone(),
                converter: converter.clone(),
                gateway: gateway.clone(),
            },
        );
        Self {
            engine,
            extractor,
            gateway,
            converter,
        }
    }

    /// Send `video`'s link for `key` and choose the option labelled `label`.
    pub async fn request(&self, key: ConversationKey, video: &str, label: &str) -> JobId {
        let options = self
            .engine
            .on_media_link(key, &link(video))
            .await
            .expect("link resolves");
        let handle = pick(&options, label).handle.clone();
        self.engine
            .on_format_chosen(key, &handle)
            .await
            .expect("job created")
    }

    /// Wait until job `id` is exactly in `state`.
    pub async fn wait_state(&self, id: JobId, state: JobState) -> Job {
        tokio::time::timeout(
            WAIT,
            self.engine.registry().wait_until(id, |s| s == state),
        )
        .await
        .unwrap_or_else(|_| panic!("job {id} never reached {state:?}"))
        .expect("job exists")
    }

    pub async fn wait_cleanup(&self, id: JobId) -> Job {
        tokio::time::timeout(WAIT, self.engine.wait_for_cleanup(id))
            .await
            .unwrap_or_else(|_| panic!("job {id} never cleaned up"))
            .expect("job exists")
    }
}

/// An 11-character video id derived from `n`.
pub fn video(n: usize) -> String {
    format!("vid{n:08}")
}

pub fn link(video: &str) -> String {
    format!("https://youtu.be/{video}")
}

pub fn key(n: i64) -> ConversationKey {
    ConversationKey::new(n, 1000 + n)
}

pub fn pick<'a>(options: &'a [FormatOption], label: &str) -> &'a FormatOption {
    options
        .iter()
        .find(|o| o.label == label)
        .unwrap_or_else(|| panic!("no option {label} in {options:?}"))
}

/// One 720p mp4 video stream and one 128 kbit/s mp3 audio stream.
pub fn default_streams() -> Vec<RawStream> {
    vec![
        RawStream {
            format_id: "22".into(),
            container: "mp4".into(),
            has_video: true,
            has_audio: true,
            height: Some(720),
            audio_kbps: None,
            size: Some(4096),
            size_exact: true,
        },
        RawStream {
            format_id: "140".into(),
            container: "mp3".into(),
            has_video: false,
            has_audio: true,
            height: None,
            audio_kbps: Some(128),
            size: None,
            size_exact: false,
        },
        RawStream {
            format_id: "251".into(),
            container: "webm".into(),
            has_video: false,
            has_audio: true,
            height: None,
            audio_kbps: Some(160),
            size: None,
            size_exact: false,
        },
    ]
}
