//! Detection scheduling with an in-flight guard.
//!
//! Inference runs on the blocking pool so countdown, progress and timeout
//! clocks keep ticking while a frame is processed. At most one detection is
//! in flight per poller; a tick that arrives while one is pending is
//! skipped, never queued.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use facegate_core::{
    CaptureFrame, DetectionConfig, DetectorError, FaceDetectionEngine, FaceObservation, FrameDims,
};
use tokio::task::JoinHandle;

/// Detection engine shared across sessions: models load once, then every
/// session reuses them.
pub type SharedEngine = Arc<Mutex<FaceDetectionEngine>>;

pub fn share_engine(engine: FaceDetectionEngine) -> SharedEngine {
    Arc::new(Mutex::new(engine))
}

/// Detections for one frame, with the frame's geometry. The pixels are not
/// retained.
#[derive(Debug, Clone)]
pub struct Detection {
    pub dims: FrameDims,
    pub captured_at: DateTime<Utc>,
    pub observations: Vec<FaceObservation>,
}

fn poisoned() -> DetectorError {
    DetectorError::Inference("detection engine poisoned by a previous panic".into())
}

/// Load model assets on the blocking pool. No-op once loaded.
pub async fn ensure_loaded(engine: &SharedEngine) -> Result<(), DetectorError> {
    let engine = engine.clone();
    tokio::task::spawn_blocking(move || -> Result<(), DetectorError> {
        engine.lock().map_err(|_| poisoned())?.ensure_loaded()
    })
    .await
    .map_err(|e| DetectorError::ModelLoad(format!("loader task failed: {e}")))?
}

pub struct DetectionPoller {
    engine: SharedEngine,
    config: Option<DetectionConfig>,
    in_flight: Option<JoinHandle<Result<Detection, DetectorError>>>,
    skipped: u64,
}

impl DetectionPoller {
    /// Poller filtering with the engine's own detection config.
    pub fn new(engine: SharedEngine) -> Self {
        Self {
            engine,
            config: None,
            in_flight: None,
            skipped: 0,
        }
    }

    /// Poller filtering every detection with `config`.
    pub fn with_config(engine: SharedEngine, config: DetectionConfig) -> Self {
        Self {
            engine,
            config: Some(config),
            in_flight: None,
            skipped: 0,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Ticks skipped because a detection was still running.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Start detection on `frame` unless one is already running. Returns
    /// whether the frame was accepted.
    pub fn submit(&mut self, frame: CaptureFrame) -> bool {
        if self.in_flight.is_some() {
            self.skipped += 1;
            tracing::debug!(skipped = self.skipped, "detection in flight, tick skipped");
            return false;
        }
        let engine = self.engine.clone();
        let config = self.config;
        let task = move || -> Result<Detection, DetectorError> {
            let dims = frame.dims();
            let captured_at = frame.captured_at;
            let mut engine = engine.lock().map_err(|_| poisoned())?;
            let observations = match config {
                Some(config) => engine.detect_with(&frame, &config)?,
                None => engine.detect(&frame)?,
            };
            Ok(Detection {
                dims,
                captured_at,
                observations,
            })
        };
        self.in_flight = Some(tokio::task::spawn_blocking(task));
        true
    }

    /// Wait for the in-flight detection. `None` when idle.
    ///
    /// Cancel-safe: if the returned future is dropped before completion the
    /// detection stays in flight and a later call picks up its result.
    pub async fn next_result(&mut self) -> Option<Result<Detection, DetectorError>> {
        let handle = self.in_flight.as_mut()?;
        let joined = handle.await;
        self.in_flight = None;
        Some(match joined {
            Ok(result) => result,
            Err(e) => Err(DetectorError::Inference(format!("detection task failed: {e}"))),
        })
    }

    /// Detect on `frame` and wait for the result, discarding any detection
    /// that was still pending.
    pub async fn detect_now(&mut self, frame: CaptureFrame) -> Result<Detection, DetectorError> {
        self.cancel();
        self.submit(frame);
        match self.next_result().await {
            Some(result) => result,
            None => Err(DetectorError::Inference("detection was not scheduled".into())),
        }
    }

    /// Drop any pending result. No new detection starts until the next
    /// `submit`.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
            tracing::debug!("pending detection discarded");
        }
    }
}

impl Drop for DetectionPoller {
    fn drop(&mut self) {
        self.cancel();
    }
}
