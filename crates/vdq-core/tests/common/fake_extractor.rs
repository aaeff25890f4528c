//! Extractor whose listings and byte streams are scripted per video.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use vdq_core::extractor::{ExtractError, Extractor, MediaStream, RawStream};
use vdq_core::format::FormatHandle;
use vdq_core::media::MediaSource;

/// How the byte stream of one video behaves.
#[derive(Clone)]
pub struct StreamScript {
    pub len: usize,
    pub chunk: usize,
    pub declared: Option<u64>,
    /// After this many bytes, wait on `gate` (or forever when there is none).
    pub stall_at: Option<usize>,
    pub gate: Option<Arc<Semaphore>>,
    /// After this many bytes, fail with an I/O error.
    pub fail_at: Option<usize>,
}

impl StreamScript {
    pub fn bytes(len: usize) -> Self {
        Self {
            len,
            chunk: 1024,
            declared: None,
            stall_at: None,
            gate: None,
            fail_at: None,
        }
    }

    /// Stops after `at` bytes until the returned gate gets a permit.
    pub fn gated(len: usize, at: usize) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let script = Self {
            stall_at: Some(at),
            gate: Some(gate.clone()),
            ..Self::bytes(len)
        };
        (script, gate)
    }

    /// Stops after `at` bytes and never resumes.
    pub fn stalled(len: usize, at: usize) -> Self {
        Self {
            stall_at: Some(at),
            ..Self::bytes(len)
        }
    }
}

pub enum Listing {
    Streams(Vec<RawStream>),
    NotFound,
    Upstream,
}

pub struct ScriptedExtractor {
    listing: Mutex<Listing>,
    default_script: Mutex<StreamScript>,
    scripts: Mutex<HashMap<String, StreamScript>>,
    handle_scripts: Mutex<HashMap<String, StreamScript>>,
    pub list_calls: AtomicUsize,
    /// Video ids in the order their streams were opened.
    pub opened: Mutex<Vec<String>>,
    /// Format handles in the order they were opened.
    pub opened_handles: Mutex<Vec<String>>,
    /// Total bytes handed out across all streams.
    pub bytes_read: Arc<AtomicUsize>,
    pub active: Arc<AtomicUsize>,
    pub max_active: Arc<AtomicUsize>,
}

impl ScriptedExtractor {
    pub fn new(streams: Vec<RawStream>) -> Self {
        Self {
            listing: Mutex::new(Listing::Streams(streams)),
            default_script: Mutex::new(StreamScript::bytes(4096)),
            scripts: Mutex::new(HashMap::new()),
            handle_scripts: Mutex::new(HashMap::new()),
            list_calls: AtomicUsize::new(0),
            opened: Mutex::new(Vec::new()),
            opened_handles: Mutex::new(Vec::new()),
            bytes_read: Arc::new(AtomicUsize::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_listing(&self, listing: Listing) {
        *self.listing.lock().unwrap() = listing;
    }

    pub fn set_default(&self, script: StreamScript) {
        *self.default_script.lock().unwrap() = script;
    }

    pub fn script(&self, video: &str, script: StreamScript) {
        self.scripts.lock().unwrap().insert(video.to_string(), script);
    }

    /// Script for one format handle; wins over per-video scripts.
    pub fn script_handle(&self, handle: &str, script: StreamScript) {
        self.handle_scripts
            .lock()
            .unwrap()
            .insert(handle.to_string(), script);
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn opened_handles(&self) -> Vec<String> {
        self.opened_handles.lock().unwrap().clone()
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn list_streams(&self, _source: &MediaSource) -> Result<Vec<RawStream>, ExtractError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        match &*self.listing.lock().unwrap() {
            Listing::Streams(s) => Ok(s.clone()),
            Listing::NotFound => Err(ExtractError::NotFound("Video unavailable".into())),
            Listing::Upstream => Err(ExtractError::Upstream("HTTP Error 429".into())),
        }
    }

    async fn open_stream(
        &self,
        source: &MediaSource,
        handle: &FormatHandle,
    ) -> Result<Box<dyn MediaStream>, ExtractError> {
        let by_handle = self.handle_scripts.lock().unwrap().get(handle.as_str()).cloned();
        let by_video = self.scripts.lock().unwrap().get(source.video_id()).cloned();
        let script = by_handle
            .or(by_video)
            .unwrap_or_else(|| self.default_script.lock().unwrap().clone());
        self.opened.lock().unwrap().push(source.video_id().to_string());
        self.opened_handles
            .lock()
            .unwrap()
            .push(handle.as_str().to_string());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            script,
            pos: 0,
            bytes_read: self.bytes_read.clone(),
            active: self.active.clone(),
        }))
    }
}

struct FakeStream {
    script: StreamScript,
    pos: usize,
    bytes_read: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaStream for FakeStream {
    fn declared_size(&self) -> Option<u64> {
        self.script.declared
    }

    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.script.fail_at.is_some_and(|at| self.pos >= at) {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "upstream reset"));
        }
        if self.script.stall_at.is_some_and(|at| self.pos >= at) {
            match self.script.gate.clone() {
                Some(gate) => {
                    if let Ok(permit) = gate.acquire().await {
                        permit.forget();
                    }
                    self.script.stall_at = None;
                }
                None => std::future::pending::<()>().await,
            }
        }
        let mut limit = self.script.len;
        if let Some(at) = self.script.stall_at {
            limit = limit.min(at);
        }
        if let Some(at) = self.script.fail_at {
            limit = limit.min(at);
        }
        let n = self.script.chunk.min(buf.len()).min(limit.saturating_sub(self.pos));
        for (i, b) in buf[..n].iter_mut().enumerate() {
            *b = ((self.pos + i) % 251) as u8;
        }
        self.pos += n;
        self.bytes_read.fetch_add(n, Ordering::SeqCst);
        Ok(n)
    }
}

/// Byte `i` of every scripted stream.
pub fn expected_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
