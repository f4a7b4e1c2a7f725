//! Timed liveness sampling against the live camera.

use std::time::Duration;

use facegate_core::{DetectorError, LivenessConfig, LivenessResult, LivenessSession};
use facegate_hw::{CameraError, CameraResource};
use thiserror::Error;
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::poller::DetectionPoller;

#[derive(Error, Debug)]
pub enum LivenessError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
}

/// Floor for the sampling period; a zero interval cannot drive a ticker.
const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(1);
/// Deadline used when the requested duration overflows the clock.
const MAX_SESSION: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy)]
pub struct LivenessAnalyzer {
    config: LivenessConfig,
}

impl LivenessAnalyzer {
    pub fn new(config: LivenessConfig) -> Self {
        Self { config }
    }

    /// Sample the camera at the configured interval for `duration` (the
    /// configured duration when `None`) and classify the subject.
    pub async fn run_session(
        &self,
        camera: &mut CameraResource,
        poller: &mut DetectionPoller,
        duration: Option<Duration>,
    ) -> Result<LivenessResult, LivenessError> {
        let duration = duration.unwrap_or(self.config.duration);
        let mut session = LivenessSession::new(self.config);
        let start = Instant::now();
        let deadline = start.checked_add(duration).unwrap_or(start + MAX_SESSION);

        let mut ticker = interval(self.config.sample_interval.max(MIN_SAMPLE_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if Instant::now() >= deadline {
                break;
            }
            let frame = camera.capture_frame()?;
            let detection = poller.detect_now(frame).await?;
            session.record(&detection.observations);
        }

        let result = session.verdict();
        tracing::info!(
            live = result.is_live,
            samples = result.samples,
            expression_changes = result.expression_changes,
            movements = result.movements,
            "liveness session complete"
        );
        Ok(result)
    }
}
