//! Verification state machine.
//!
//! ```text
//! idle -> initializing -> ready(countdown) -> scanning -> verifying -> success
//!                            ^                   |            |
//!                            +---- retry --- error <----------+
//!                                                |
//!                                          abandoned (attempt cap)
//! ```
//!
//! One `run` drives a whole login attempt. Every exit path (success,
//! fallback, fatal error, cancel) clears the detection poller and releases
//! the camera before returning.

use std::sync::Arc;
use std::time::Duration;

use facegate_core::{
    DescriptorError, DescriptorExtractor, DetectorError, QualityAssessor,
};
use facegate_hw::{CameraError, CameraResource, PermissionState, VideoSurface};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{interval, sleep, sleep_until, Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::backend::{
    AuthBackend, BackendError, CredentialToken, VerificationMetadata, VerificationSubmission,
};
use crate::config::SessionConfig;
use crate::enrollment::camera_kind;
use crate::error::{ErrorKind, SessionFailure, PERMISSION_MESSAGE};
use crate::events::{EventSink, SessionEvent};
use crate::liveness::{LivenessAnalyzer, LivenessError};
use crate::poller::{self, Detection, DetectionPoller, SharedEngine};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VerificationPhase {
    Idle,
    Initializing,
    Ready { remaining_secs: u64 },
    Scanning { progress: u8 },
    Verifying,
    Success,
    Error { attempt: u32, failure: SessionFailure },
    /// Attempt cap reached; fall back to another login method.
    Abandoned { attempts: u32 },
    Cancelled,
}

impl VerificationPhase {
    fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::Ready { .. } => "ready",
            Self::Scanning { .. } => "scanning",
            Self::Verifying => "verifying",
            Self::Success => "success",
            Self::Error { .. } => "error",
            Self::Abandoned { .. } => "abandoned",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Abandoned { .. } | Self::Cancelled
        )
    }
}

#[derive(Error, Debug)]
pub enum VerificationError {
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
    #[error("cannot start verification from the {0} state")]
    InvalidTransition(&'static str),
}

impl VerificationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Camera(e) | Self::Liveness(LivenessError::Camera(e)) => camera_kind(e),
            Self::Detector(_) | Self::Liveness(LivenessError::Detector(_)) => ErrorKind::Detection,
            Self::Descriptor(e) if e.is_security() => ErrorKind::Security,
            Self::Descriptor(_) => ErrorKind::Detection,
            Self::Backend(_) => ErrorKind::Transport,
            Self::InvalidTransition(_) => ErrorKind::Detection,
        }
    }

    fn user_message(&self) -> String {
        match self {
            Self::Camera(CameraError::PermissionDenied) => PERMISSION_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerificationOutcome {
    Authenticated {
        token: CredentialToken,
        user_profile: serde_json::Value,
        attempts: u32,
    },
    /// Every attempt failed; use a non-biometric login path.
    FallbackRequired { attempts: u32 },
    Cancelled,
}

/// Cancels a running verification from another task.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

enum ScanEnd {
    Triggered,
    /// Window closed. `face_seen` when a single subject was tracked at any
    /// point; `issues` are the quality issues of the latest tracked frame.
    TimedOut { face_seen: bool, issues: Vec<String> },
    Cancelled,
}

enum AttemptEnd {
    Authenticated(CredentialToken, serde_json::Value),
    Failed(SessionFailure),
    Cancelled,
}

pub struct VerificationOrchestrator<B> {
    config: SessionConfig,
    camera: CameraResource,
    engine: SharedEngine,
    poller: DetectionPoller,
    assessor: QualityAssessor,
    extractor: DescriptorExtractor,
    liveness: LivenessAnalyzer,
    backend: B,
    events: EventSink,
    phase: VerificationPhase,
    attempts: u32,
    session_id: Uuid,
    credential: Option<CredentialToken>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl<B: AuthBackend> VerificationOrchestrator<B> {
    pub fn new(
        config: SessionConfig,
        camera: CameraResource,
        engine: SharedEngine,
        backend: B,
    ) -> Self {
        let (tx, rx) = watch::channel(false);
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
            phase: VerificationPhase::Idle,
            attempts: 0,
            session_id: Uuid::new_v4(),
            credential: None,
            cancel_tx: Arc::new(tx),
            cancel_rx: rx,
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

    pub fn phase(&self) -> &VerificationPhase {
        &self.phase
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Token stored by the last successful verification.
    pub fn credential(&self) -> Option<&CredentialToken> {
        self.credential.as_ref()
    }

    pub fn camera_active(&self) -> bool {
        self.camera.is_acquired()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: self.cancel_tx.clone(),
        }
    }

    /// Run a full verification session from `idle`.
    pub async fn run(&mut self) -> Result<VerificationOutcome, VerificationError> {
        if self.phase != VerificationPhase::Idle {
            return Err(VerificationError::InvalidTransition(self.phase.name()));
        }
        let result = self.drive().await;
        self.cleanup();
        result
    }

    /// Stop everything now. Safe to call at any point, including after
    /// dropping an unfinished `run` future.
    pub fn cancel(&mut self) {
        self.cancel_tx.send_replace(true);
        self.cleanup();
        if !self.phase.is_terminal() {
            self.set_phase(VerificationPhase::Cancelled);
        }
    }

    /// Back to `idle` for a fresh session.
    pub fn reset(&mut self) {
        self.cleanup();
        self.cancel_tx.send_replace(false);
        self.attempts = 0;
        self.credential = None;
        self.session_id = Uuid::new_v4();
        self.set_phase(VerificationPhase::Idle);
    }

    async fn drive(&mut self) -> Result<VerificationOutcome, VerificationError> {
        let mut rx = self.cancel_rx.clone();
        self.set_phase(VerificationPhase::Initializing);

        tokio::select! {
            biased;
            _ = cancelled(&mut rx) => return Ok(self.finish_cancelled()),
            init = self.initialize() => {
                if let Err(e) = init {
                    self.fail_fatal(&e);
                    return Err(e);
                }
            }
        }

        let max_attempts = self.config.verification.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            self.attempts = attempt;
            let end = match self.attempt(attempt, &mut rx).await {
                Ok(end) => end,
                Err(e) if e.kind().is_fatal() => {
                    self.fail_fatal(&e);
                    return Err(e);
                }
                Err(e) => AttemptEnd::Failed(SessionFailure::new(e.kind(), e.to_string())),
            };

            match end {
                AttemptEnd::Authenticated(token, user_profile) => {
                    tracing::info!(session = %self.session_id, attempt, "verified successfully");
                    self.credential = Some(token.clone());
                    self.set_phase(VerificationPhase::Success);
                    self.events.emit(SessionEvent::Authenticated {
                        user_profile: user_profile.clone(),
                    });
                    return Ok(VerificationOutcome::Authenticated {
                        token,
                        user_profile,
                        attempts: attempt,
                    });
                }
                AttemptEnd::Cancelled => return Ok(self.finish_cancelled()),
                AttemptEnd::Failed(failure) => {
                    tracing::warn!(
                        session = %self.session_id,
                        attempt,
                        max_attempts,
                        kind = %failure.kind,
                        "verification attempt failed: {}",
                        failure.message
                    );
                    self.events.emit(SessionEvent::AttemptFailed {
                        attempt,
                        max_attempts,
                        kind: failure.kind,
                        message: failure.message.clone(),
                    });
                    self.set_phase(VerificationPhase::Error { attempt, failure });
                    if attempt == max_attempts {
                        break;
                    }
                    tokio::select! {
                        biased;
                        _ = cancelled(&mut rx) => return Ok(self.finish_cancelled()),
                        _ = sleep(self.config.verification.retry_delay) => {}
                    }
                }
            }
        }

        let attempts = self.attempts;
        tracing::warn!(session = %self.session_id, attempts, "attempt cap reached, falling back");
        self.set_phase(VerificationPhase::Abandoned { attempts });
        self.events.emit(SessionEvent::FallbackRequired { attempts });
        Ok(VerificationOutcome::FallbackRequired { attempts })
    }

    async fn initialize(&mut self) -> Result<(), VerificationError> {
        if self.camera.request_permission() != PermissionState::Granted {
            return Err(CameraError::PermissionDenied.into());
        }
        let surface = VideoSurface::new(self.config.surface_id.clone());
        self.camera.acquire(&surface)?;
        poller::ensure_loaded(&self.engine).await?;
        Ok(())
    }

    async fn attempt(
        &mut self,
        attempt: u32,
        rx: &mut watch::Receiver<bool>,
    ) -> Result<AttemptEnd, VerificationError> {
        if !self.countdown(rx).await {
            return Ok(AttemptEnd::Cancelled);
        }

        match self.scan(rx).await? {
            ScanEnd::Triggered => {}
            ScanEnd::Cancelled => return Ok(AttemptEnd::Cancelled),
            ScanEnd::TimedOut {
                face_seen: false, ..
            } => {
                return Ok(AttemptEnd::Failed(SessionFailure::new(
                    ErrorKind::Detection,
                    "no face detected before the scan window closed",
                )))
            }
            ScanEnd::TimedOut { issues, .. } if issues.is_empty() => {
                return Ok(AttemptEnd::Failed(SessionFailure::new(
                    ErrorKind::Detection,
                    "face was not held steady long enough before the scan window closed",
                )))
            }
            ScanEnd::TimedOut { issues, .. } => {
                return Ok(AttemptEnd::Failed(SessionFailure::new(
                    ErrorKind::Quality,
                    format!("face did not meet capture requirements: {}", issues.join("; ")),
                )))
            }
        }

        self.poller.cancel();
        self.set_phase(VerificationPhase::Verifying);

        tokio::select! {
            biased;
            _ = cancelled(rx) => Ok(AttemptEnd::Cancelled),
            end = self.verify(attempt) => end,
        }
    }

    /// `ready`: tick the countdown down to zero. False when cancelled.
    async fn countdown(&mut self, rx: &mut watch::Receiver<bool>) -> bool {
        let mut remaining = self.config.verification.countdown;
        while !remaining.is_zero() {
            let remaining_secs = remaining.as_secs_f32().ceil() as u64;
            self.set_phase(VerificationPhase::Ready { remaining_secs });
            self.events.emit(SessionEvent::Countdown { remaining_secs });

            let step = remaining.min(Duration::from_secs(1));
            tokio::select! {
                biased;
                _ = cancelled(rx) => return false,
                _ = sleep(step) => {}
            }
            remaining -= step;
        }
        true
    }

    /// `scanning`: track the subject until a good face is held long enough,
    /// the window closes, or the session is cancelled.
    async fn scan(&mut self, rx: &mut watch::Receiver<bool>) -> Result<ScanEnd, VerificationError> {
        let cfg = self.config.verification.clone();
        let started = Instant::now();
        let deadline = started + cfg.scan_window;
        let mut ticker = interval(cfg.tracking_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut good_since: Option<Instant> = None;
        let mut last_issues: Vec<String> = Vec::new();
        let mut face_seen = false;
        let mut last_percent = 0u8;
        self.set_phase(VerificationPhase::Scanning { progress: 0 });

        loop {
            tokio::select! {
                biased;
                _ = cancelled(rx) => return Ok(ScanEnd::Cancelled),
                _ = sleep_until(deadline) => {
                    self.poller.cancel();
                    tracing::info!(
                        session = %self.session_id,
                        face_seen,
                        "scan window closed without a match"
                    );
                    return Ok(ScanEnd::TimedOut {
                        face_seen,
                        issues: last_issues,
                    });
                }
                Some(result) = self.poller.next_result(), if self.poller.is_busy() => {
                    let detection = match result {
                        Ok(detection) => detection,
                        Err(e) => {
                            tracing::warn!(error = %e, "tracking detection failed");
                            good_since = None;
                            continue;
                        }
                    };
                    face_seen |= detection.observations.len() == 1;
                    if let Some(issues) = self.disqualify(&detection) {
                        good_since = None;
                        if issues != last_issues {
                            if !issues.is_empty() {
                                self.events.emit(SessionEvent::QualityFeedback {
                                    issues: issues.clone(),
                                });
                            }
                            last_issues = issues;
                        }
                        continue;
                    }
                    last_issues.clear();
                    let now = Instant::now();
                    let held = now.duration_since(*good_since.get_or_insert(now));
                    if held >= cfg.sustain {
                        tracing::debug!(held_ms = held.as_millis() as u64, "scan auto-triggered");
                        return Ok(ScanEnd::Triggered);
                    }
                }
                _ = ticker.tick() => {
                    let elapsed = started.elapsed().as_secs_f32();
                    let window = cfg.scan_window.as_secs_f32().max(f32::EPSILON);
                    let percent = ((elapsed / window) * 100.0).min(100.0) as u8;
                    if percent != last_percent {
                        last_percent = percent;
                        self.phase = VerificationPhase::Scanning { progress: percent };
                        self.events.emit(SessionEvent::ScanProgress { percent });
                    }
                    let frame = self.camera.capture_frame()?;
                    self.poller.submit(frame);
                }
            }
        }
    }

    /// `None` when the frame counts toward the auto-trigger. Otherwise the
    /// quality issues to show, empty when there was no single subject.
    fn disqualify(&self, detection: &Detection) -> Option<Vec<String>> {
        let [obs] = detection.observations.as_slice() else {
            return Some(Vec::new());
        };
        let quality = self.assessor.assess(obs, detection.dims);
        if !quality.is_valid {
            return Some(quality.messages());
        }
        if obs.confidence <= self.config.verification.trigger_confidence {
            return Some(Vec::new());
        }
        None
    }

    /// `verifying`: liveness, descriptor, backend comparison.
    async fn verify(&mut self, attempt: u32) -> Result<AttemptEnd, VerificationError> {
        let liveness = self
            .liveness
            .run_session(&mut self.camera, &mut self.poller, None)
            .await?;
        self.events.emit(SessionEvent::LivenessChecked { result: liveness });
        if self.config.verification.require_liveness && !liveness.is_live {
            return Ok(AttemptEnd::Failed(SessionFailure::new(
                ErrorKind::Liveness,
                "liveness check failed; blink or move your head slightly and try again",
            )));
        }

        let frame = self.camera.capture_frame()?;
        let detection = self.poller.detect_now(frame).await?;
        let descriptor = self.extractor.extract(&detection.observations)?;
        let encrypted_descriptor = self.extractor.encrypt(&descriptor)?;
        let confidence = detection
            .observations
            .first()
            .map(|o| o.confidence)
            .unwrap_or_default();

        let lighting = match self.camera.measure_lighting() {
            Ok(report) => {
                self.events.emit(SessionEvent::Lighting { report });
                Some(report.condition)
            }
            Err(e) => {
                tracing::warn!(error = %e, "lighting check failed");
                None
            }
        };

        let request = VerificationSubmission {
            encrypted_descriptor,
            confidence,
            liveness_passed: liveness.is_live,
            metadata: VerificationMetadata {
                session_id: self.session_id,
                attempt,
                device_label: self.camera.device_label(),
                resolution: self.camera.resolution(),
                lighting,
                liveness,
                captured_at: detection.captured_at,
            },
        };

        let receipt = self.backend.submit_verification(request).await?;
        Ok(match (receipt.success, receipt.credential_token) {
            (true, Some(token)) => AttemptEnd::Authenticated(token, receipt.user_profile),
            (true, None) => AttemptEnd::Failed(SessionFailure::new(
                ErrorKind::Transport,
                "backend accepted the face but returned no credential",
            )),
            (false, _) => AttemptEnd::Failed(SessionFailure::new(
                ErrorKind::Transport,
                receipt
                    .message
                    .unwrap_or_else(|| "face not recognized".to_string()),
            )),
        })
    }

    fn finish_cancelled(&mut self) -> VerificationOutcome {
        tracing::info!(session = %self.session_id, "verification cancelled");
        self.cleanup();
        self.set_phase(VerificationPhase::Cancelled);
        VerificationOutcome::Cancelled
    }

    fn fail_fatal(&mut self, err: &VerificationError) {
        tracing::error!(
            session = %self.session_id,
            kind = %err.kind(),
            error = %err,
            "verification failed"
        );
        self.cleanup();
        let failure = SessionFailure::new(err.kind(), err.user_message());
        self.set_phase(VerificationPhase::Error {
            attempt: self.attempts,
            failure,
        });
    }

    fn cleanup(&mut self) {
        self.poller.cancel();
        self.camera.release();
    }

    fn set_phase(&mut self, phase: VerificationPhase) {
        if self.phase == phase {
            return;
        }
        tracing::debug!(session = %self.session_id, phase = phase.name(), "verify: transition");
        self.phase = phase.clone();
        self.events.emit(SessionEvent::VerificationPhase { phase });
    }
}
