//! Enrollment state machine.
//!
//! ```text
//! permission -> setup -> capture -> validation -> confirm -> processing -> done
//!                          ^            |            ^            |
//!                          +-- reset ---+            +-- error ---+
//! ```
//!
//! Captures live only in the state value; cancel, failure and completion
//! all drop them. Nothing but the encrypted canonical descriptor is ever
//! handed to the backend.

use std::fmt;
use std::mem;

use chrono::{DateTime, Utc};
use facegate_core::{
    DescriptorError, DescriptorExtractor, DetectorError, Expressions, FaceDescriptor, FrameDims,
    LightingReport, LivenessResult, QualityAssessment, QualityAssessor, QualityIssue,
};
use facegate_hw::{CameraError, CameraResource, PermissionState, VideoSurface};
use serde::Serialize;
use thiserror::Error;
use tokio::time::{interval, Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::backend::{
    AuthBackend, BackendError, Credential, EnrollmentMetadata, EnrollmentReceipt,
    EnrollmentStatus, EnrollmentSubmission,
};
use crate::config::SessionConfig;
use crate::error::{ErrorKind, SessionFailure, PERMISSION_MESSAGE};
use crate::events::{EventSink, SessionEvent};
use crate::liveness::{LivenessAnalyzer, LivenessError};
use crate::poller::{self, DetectionPoller, SharedEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentPhase {
    Permission,
    Setup,
    Capture,
    Validation,
    Confirm,
    Processing,
    Done,
    Error,
}

impl fmt::Display for EnrollmentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),
    #[error("liveness error: {0}")]
    Liveness(#[from] LivenessError),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("timed out waiting for {0} good captures")]
    CaptureTimeout(usize),
    #[error("credential is required to submit enrollment")]
    MissingCredential,
    #[error("cannot {action} during the {phase} phase")]
    InvalidTransition {
        phase: EnrollmentPhase,
        action: &'static str,
    },
}

impl EnrollmentError {
    /// Taxonomy for errors that move the session into `Error`. Caller
    /// mistakes (bad transition, missing credential) have none.
    pub fn kind(&self) -> Option<ErrorKind> {
        Some(match self {
            Self::Camera(e) => camera_kind(e),
            Self::Detector(_) | Self::CaptureTimeout(_) => ErrorKind::Detection,
            Self::Descriptor(e) if e.is_security() => ErrorKind::Security,
            Self::Descriptor(_) => ErrorKind::Detection,
            Self::Liveness(LivenessError::Camera(e)) => camera_kind(e),
            Self::Liveness(LivenessError::Detector(_)) => ErrorKind::Detection,
            Self::Backend(_) => ErrorKind::Transport,
            Self::MissingCredential | Self::InvalidTransition { .. } => return None,
        })
    }
}

pub(crate) fn camera_kind(e: &CameraError) -> ErrorKind {
    match e {
        CameraError::PermissionDenied | CameraError::DeviceNotFound | CameraError::DeviceBusy => {
            ErrorKind::Permission
        }
        CameraError::NotAcquired | CameraError::Capture(_) => ErrorKind::Detection,
    }
}

/// One accepted capture.
#[derive(Debug, Clone)]
pub struct CaptureSample {
    pub descriptor: FaceDescriptor,
    pub quality: QualityAssessment,
    pub confidence: f32,
    pub captured_at: DateTime<Utc>,
    pub landmark_count: usize,
    pub expressions: Expressions,
}

/// Captures gathered in one enrollment session.
#[derive(Debug, Clone, Default)]
pub struct EnrollmentBatch {
    samples: Vec<CaptureSample>,
}

impl EnrollmentBatch {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn average_confidence(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.confidence).sum::<f32>() / self.samples.len() as f32
    }

    pub fn all_valid(&self) -> bool {
        self.samples.iter().all(|s| s.quality.is_valid)
    }

    /// Highest-confidence member.
    pub fn canonical(&self) -> Option<&CaptureSample> {
        self.samples
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }

    fn mean_expressions(&self) -> Expressions {
        let mut values = [0.0f32; 7];
        for s in &self.samples {
            for (acc, v) in values.iter_mut().zip(s.expressions.values.iter()) {
                *acc += v;
            }
        }
        let n = self.samples.len().max(1) as f32;
        for v in &mut values {
            *v /= n;
        }
        Expressions::new(values)
    }
}

/// Why a capture attempt was not added to the batch. All recoverable.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    NoFace,
    MultipleFaces(usize),
    Quality(Vec<QualityIssue>),
    NotLive(LivenessResult),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    Accepted { count: usize, required: usize },
    Rejected(RejectReason),
    /// Batch complete and valid; now in `Confirm`.
    BatchConfirmed { average_confidence: f32 },
    /// Batch complete but below the bar; back in `Capture` with no samples.
    BatchReset { average_confidence: f32 },
}

/// Where `retry` goes from `Error`.
#[derive(Debug)]
enum Resume {
    Restart,
    Setup,
    Confirm(EnrollmentBatch),
}

#[derive(Debug)]
enum EnrollmentState {
    Permission,
    Setup,
    Capture(EnrollmentBatch),
    Validation(EnrollmentBatch),
    Confirm(EnrollmentBatch),
    Processing,
    Done { pending_verification: bool },
    Error { resume: Resume },
}

impl EnrollmentState {
    fn phase(&self) -> EnrollmentPhase {
        match self {
            Self::Permission => EnrollmentPhase::Permission,
            Self::Setup => EnrollmentPhase::Setup,
            Self::Capture(_) => EnrollmentPhase::Capture,
            Self::Validation(_) => EnrollmentPhase::Validation,
            Self::Confirm(_) => EnrollmentPhase::Confirm,
            Self::Processing => EnrollmentPhase::Processing,
            Self::Done { .. } => EnrollmentPhase::Done,
            Self::Error { .. } => EnrollmentPhase::Error,
        }
    }
}

pub struct EnrollmentOrchestrator<B> {
    config: SessionConfig,
    camera: CameraResource,
    engine: SharedEngine,
    poller: DetectionPoller,
    assessor: QualityAssessor,
    extractor: DescriptorExtractor,
    liveness: LivenessAnalyzer,
    backend: B,
    events: EventSink,
    state: EnrollmentState,
    session_id: Uuid,
    lighting: Option<LightingReport>,
    resolution: Option<FrameDims>,
    last_failure: Option<SessionFailure>,
}

impl<B: AuthBackend> EnrollmentOrchestrator<B> {
    pub fn new(
        config: SessionConfig,
        camera: CameraResource,
        engine: SharedEngine,
        backend: B,
    ) -> Self {
        let extractor = DescriptorExtractor::with_cipher(config.descriptor_cipher());
        Self {
            assessor: QualityAssessor::new(config.quality),
            liveness: LivenessAnalyzer::new(config.liveness),
            poller: DetectionPoller::with_config(engine.clone(), config.detection),
            config,
            camera,
            engine,
            extractor,
            backend,
            events: EventSink::default(),
            state: EnrollmentState::Permission,
            session_id: Uuid::new_v4(),
            lighting: None,
            resolution: None,
            last_failure: None,
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_extractor(mut self, extractor: DescriptorExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn phase(&self) -> EnrollmentPhase {
        self.state.phase()
    }

    /// The failure that put the session into `Error`, if any.
    pub fn last_failure(&self) -> Option<&SessionFailure> {
        self.last_failure.as_ref()
    }

    /// Captures gathered so far in the current batch.
    pub fn batch(&self) -> Option<&EnrollmentBatch> {
        match &self.state {
            EnrollmentState::Capture(b)
            | EnrollmentState::Validation(b)
            | EnrollmentState::Confirm(b) => Some(b),
            _ => None,
        }
    }

    pub fn camera_active(&self) -> bool {
        self.camera.is_acquired()
    }

    /// `permission -> setup` when the camera permission is (or becomes) granted.
    pub async fn check_permission(&mut self) -> Result<(), EnrollmentError> {
        self.expect(EnrollmentPhase::Permission, "check camera permission")?;
        match self.camera.request_permission() {
            PermissionState::Granted => {
                self.transition(EnrollmentState::Setup);
                Ok(())
            }
            _ => {
                let err = EnrollmentError::Camera(CameraError::PermissionDenied);
                self.fail(&err, Resume::Restart);
                Err(err)
            }
        }
    }

    /// `setup -> capture`: acquire the camera, load detection assets, measure
    /// lighting.
    pub async fn start_capture(&mut self) -> Result<(), EnrollmentError> {
        self.expect(EnrollmentPhase::Setup, "start capture")?;
        if let Err(err) = self.acquire().await {
            let resume = match err.kind() {
                Some(ErrorKind::Permission) => Resume::Restart,
                _ => Resume::Setup,
            };
            self.fail(&err, resume);
            return Err(err);
        }
        self.transition(EnrollmentState::Capture(EnrollmentBatch::default()));
        Ok(())
    }

    async fn acquire(&mut self) -> Result<(), EnrollmentError> {
        let surface = VideoSurface::new(self.config.surface_id.clone());
        self.resolution = Some(self.camera.acquire(&surface)?);
        poller::ensure_loaded(&self.engine).await?;
        match self.camera.measure_lighting() {
            Ok(report) => {
                self.events.emit(SessionEvent::Lighting { report });
                self.lighting = Some(report);
            }
            Err(e) => tracing::warn!(error = %e, "lighting check failed"),
        }
        Ok(())
    }

    /// Take one capture attempt. Accepted samples grow the batch; a full
    /// batch is validated immediately.
    pub async fn capture_sample(&mut self) -> Result<CaptureOutcome, EnrollmentError> {
        self.expect(EnrollmentPhase::Capture, "capture")?;
        match self.try_capture().await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.fail(&err, Resume::Setup);
                Err(err)
            }
        }
    }

    async fn try_capture(&mut self) -> Result<CaptureOutcome, EnrollmentError> {
        let frame = self.camera.capture_frame()?;
        let detection = self.poller.detect_now(frame).await?;

        let obs = match detection.observations.as_slice() {
            [] => return Ok(self.reject(RejectReason::NoFace)),
            [single] => single.clone(),
            many => return Ok(self.reject(RejectReason::MultipleFaces(many.len()))),
        };

        let quality = self.assessor.assess(&obs, detection.dims);
        if !quality.is_valid {
            self.events.emit(SessionEvent::QualityFeedback {
                issues: quality.messages(),
            });
            return Ok(self.reject(RejectReason::Quality(quality.issues)));
        }

        if self.config.enrollment.liveness_per_capture {
            let result = self
                .liveness
                .run_session(&mut self.camera, &mut self.poller, None)
                .await?;
            self.events.emit(SessionEvent::LivenessChecked { result });
            if !result.is_live {
                return Ok(self.reject(RejectReason::NotLive(result)));
            }
        }

        let descriptor = self.extractor.extract(&detection.observations)?;
        let sample = CaptureSample {
            descriptor,
            quality,
            confidence: obs.confidence,
            captured_at: detection.captured_at,
            landmark_count: obs.landmarks.len(),
            expressions: obs.expressions,
        };

        let required = self.config.enrollment.required_captures;
        let count = match &mut self.state {
            EnrollmentState::Capture(batch) => {
                batch.samples.push(sample);
                batch.len()
            }
            _ => return Err(self.invalid("capture")),
        };
        tracing::info!(count, required, confidence = obs.confidence, "enroll: capture accepted");
        self.events.emit(SessionEvent::CaptureAccepted { count, required });

        if count >= required {
            return self.validate();
        }
        Ok(CaptureOutcome::Accepted { count, required })
    }

    fn reject(&self, reason: RejectReason) -> CaptureOutcome {
        tracing::debug!(?reason, "enroll: capture rejected");
        CaptureOutcome::Rejected(reason)
    }

    /// `capture -> validation -> {confirm | capture}`.
    fn validate(&mut self) -> Result<CaptureOutcome, EnrollmentError> {
        let batch = match self.take_state() {
            EnrollmentState::Capture(batch) => batch,
            other => {
                self.state = other;
                return Err(self.invalid("validate"));
            }
        };
        let average_confidence = batch.average_confidence();
        let passes = batch.all_valid()
            && average_confidence >= self.config.enrollment.quality_threshold;
        self.transition(EnrollmentState::Validation(batch));

        let batch = match self.take_state() {
            EnrollmentState::Validation(batch) => batch,
            other => {
                self.state = other;
                return Err(self.invalid("validate"));
            }
        };

        if passes {
            tracing::info!(average_confidence, captures = batch.len(), "enroll: batch validated");
            self.transition(EnrollmentState::Confirm(batch));
            // Capture is over; the stream is not needed for confirm/submit.
            self.poller.cancel();
            self.camera.release();
            Ok(CaptureOutcome::BatchConfirmed { average_confidence })
        } else {
            tracing::warn!(average_confidence, "enroll: batch below quality bar, resetting");
            drop(batch);
            self.transition(EnrollmentState::Capture(EnrollmentBatch::default()));
            Ok(CaptureOutcome::BatchReset { average_confidence })
        }
    }

    /// Keep capturing at the configured interval until the batch is
    /// confirmed. Returns the batch average confidence.
    pub async fn capture_batch(&mut self) -> Result<f32, EnrollmentError> {
        self.expect(EnrollmentPhase::Capture, "capture")?;
        let required = self.config.enrollment.required_captures;
        let deadline = Instant::now() + self.config.enrollment.capture_window;
        let mut ticker = interval(self.config.enrollment.capture_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if Instant::now() >= deadline {
                let err = EnrollmentError::CaptureTimeout(required);
                self.fail(&err, Resume::Setup);
                return Err(err);
            }
            if let CaptureOutcome::BatchConfirmed { average_confidence } =
                self.capture_sample().await?
            {
                return Ok(average_confidence);
            }
        }
    }

    /// Drive `permission -> setup -> capture -> confirm`.
    pub async fn prepare(&mut self) -> Result<f32, EnrollmentError> {
        self.check_permission().await?;
        self.start_capture().await?;
        self.capture_batch().await
    }

    /// `confirm -> processing -> {done | error}` after credential re-entry.
    pub async fn submit(
        &mut self,
        credential: Credential,
    ) -> Result<EnrollmentReceipt, EnrollmentError> {
        self.expect(EnrollmentPhase::Confirm, "submit")?;
        if credential.is_empty() {
            return Err(EnrollmentError::MissingCredential);
        }
        let batch = match self.take_state() {
            EnrollmentState::Confirm(batch) => batch,
            other => {
                self.state = other;
                return Err(self.invalid("submit"));
            }
        };
        self.transition(EnrollmentState::Processing);

        let request = match self.build_submission(&batch, credential) {
            Ok(request) => request,
            Err(err) => {
                self.fail(&err, Resume::Restart);
                return Err(err);
            }
        };

        match self.backend.submit_enrollment(request).await {
            Ok(receipt) if receipt.success => {
                tracing::info!(
                    session = %self.session_id,
                    pending = receipt.pending_verification,
                    "enrolled successfully"
                );
                self.transition(EnrollmentState::Done {
                    pending_verification: receipt.pending_verification,
                });
                Ok(receipt)
            }
            Ok(receipt) => {
                let message = receipt
                    .message
                    .unwrap_or_else(|| "enrollment was rejected".to_string());
                let err = EnrollmentError::Backend(BackendError::Rejected(message));
                self.fail(&err, Resume::Confirm(batch));
                Err(err)
            }
            Err(e) => {
                let err = EnrollmentError::Backend(e);
                self.fail(&err, Resume::Confirm(batch));
                Err(err)
            }
        }
    }

    fn build_submission(
        &self,
        batch: &EnrollmentBatch,
        credential: Credential,
    ) -> Result<EnrollmentSubmission, EnrollmentError> {
        let canonical = batch
            .canonical()
            .ok_or(EnrollmentError::Descriptor(DescriptorError::NoFace))?;
        let encrypted_descriptor = self.extractor.encrypt(&canonical.descriptor)?;
        let (dominant_expression, expression_confidence) = batch.mean_expressions().dominant();

        Ok(EnrollmentSubmission {
            encrypted_descriptor,
            metadata: EnrollmentMetadata {
                session_id: self.session_id,
                capture_count: batch.len(),
                average_confidence: batch.average_confidence(),
                landmark_count: canonical.landmark_count,
                dominant_expression: dominant_expression.to_string(),
                expression_confidence,
                device_label: self.camera.device_label(),
                resolution: self.resolution,
                lighting: self.lighting.map(|l| l.condition),
                captured_at: canonical.captured_at,
            },
            confidence: canonical.confidence,
            credential,
        })
    }

    /// Leave `Error` for the state recorded when the failure happened.
    pub fn retry(&mut self) -> Result<EnrollmentPhase, EnrollmentError> {
        let next = match self.take_state() {
            EnrollmentState::Error { resume } => match resume {
                Resume::Restart => EnrollmentState::Permission,
                Resume::Setup => EnrollmentState::Setup,
                Resume::Confirm(batch) => EnrollmentState::Confirm(batch),
            },
            other => {
                self.state = other;
                return Err(self.invalid("retry"));
            }
        };
        self.last_failure = None;
        self.transition(next);
        Ok(self.phase())
    }

    /// Abandon the flow: release the camera, drop every capture, start over.
    pub fn cancel(&mut self) {
        self.poller.cancel();
        self.camera.release();
        self.lighting = None;
        self.resolution = None;
        self.last_failure = None;
        self.session_id = Uuid::new_v4();
        self.transition(EnrollmentState::Permission);
        tracing::info!("enrollment cancelled");
    }

    pub async fn status(&self) -> Result<EnrollmentStatus, EnrollmentError> {
        Ok(self.backend.fetch_status().await?)
    }

    /// Remove the stored enrollment. Requires the account credential.
    pub async fn remove(&self, credential: &Credential) -> Result<bool, EnrollmentError> {
        if credential.is_empty() {
            return Err(EnrollmentError::MissingCredential);
        }
        let removed = self.backend.delete_enrollment(credential).await?;
        tracing::info!(removed, "enrollment removal requested");
        Ok(removed)
    }

    // ── State helpers ─────────────────────────────────────────────────────────

    fn expect(&self, phase: EnrollmentPhase, action: &'static str) -> Result<(), EnrollmentError> {
        if self.phase() == phase {
            Ok(())
        } else {
            Err(self.invalid(action))
        }
    }

    fn invalid(&self, action: &'static str) -> EnrollmentError {
        EnrollmentError::InvalidTransition {
            phase: self.phase(),
            action,
        }
    }

    /// Move the state out. The caller must install a successor.
    fn take_state(&mut self) -> EnrollmentState {
        mem::replace(&mut self.state, EnrollmentState::Processing)
    }

    fn transition(&mut self, next: EnrollmentState) {
        let to = next.phase();
        tracing::debug!(session = %self.session_id, phase = %to, "enroll: transition");
        self.state = next;
        self.events.emit(SessionEvent::EnrollmentPhase { phase: to });
    }

    fn fail(&mut self, err: &EnrollmentError, resume: Resume) {
        let kind = err.kind().unwrap_or(ErrorKind::Detection);
        let denied = matches!(err, EnrollmentError::Camera(CameraError::PermissionDenied));
        let message = match kind {
            ErrorKind::Permission if denied => PERMISSION_MESSAGE.to_string(),
            _ => err.to_string(),
        };
        tracing::error!(session = %self.session_id, %kind, error = %err, "enroll failed");
        self.poller.cancel();
        self.camera.release();
        self.last_failure = Some(SessionFailure::new(kind, message));
        self.transition(EnrollmentState::Error { resume });
    }
}
