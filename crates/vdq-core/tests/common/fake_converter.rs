//! Converter that copies its input (appending the audio track when there
//! is one), fails on request, or stalls until its timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use vdq_core::ffmpeg::{ConversionError, ConversionRequest, MediaConverter};

#[derive(Default)]
pub struct FakeConverter {
    pub requests: Mutex<Vec<ConversionRequest>>,
    pub fail: AtomicBool,
    pub stall: AtomicBool,
    /// Budgets passed to `convert`, in call order.
    pub timeouts: Mutex<Vec<Duration>>,
}

impl FakeConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Every later conversion hangs until its timeout runs out.
    pub fn stall(&self) {
        self.stall.store(true, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<ConversionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaConverter for FakeConverter {
    async fn convert(
        &self,
        req: &ConversionRequest,
        timeout: Duration,
    ) -> Result<(), ConversionError> {
        self.requests.lock().unwrap().push(req.clone());
        self.timeouts.lock().unwrap().push(timeout);
        if self.stall.load(Ordering::SeqCst) {
            tokio::time::sleep(timeout).await;
            return Err(ConversionError::TimedOut(timeout));
        }
        if self.fail.swap(false, Ordering::SeqCst) {
            return Err(ConversionError::Failed {
                status: "exit status: 1".into(),
                stderr: "Invalid data found when processing input".into(),
            });
        }
        let mut data = tokio::fs::read(&req.input)
            .await
            .map_err(ConversionError::Spawn)?;
        if let Some(audio) = &req.audio {
            data.extend(tokio::fs::read(audio).await.map_err(ConversionError::Spawn)?);
        }
        tokio::fs::write(&req.output, data)
            .await
            .map_err(ConversionError::Spawn)?;
        Ok(())
    }
}
