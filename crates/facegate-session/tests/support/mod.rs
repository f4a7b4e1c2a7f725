//! Fakes shared by the session flow tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use facegate_core::{
    BoundingBox, CaptureFrame, DetectionConfig, DetectorError, Expressions, FaceDetectionEngine,
    FaceObservation, FrameDims, LandmarkModel, Point,
};
use facegate_hw::{CameraDevice, CameraError, CameraResource, PermissionState, VideoSurface};
use facegate_session::{
    share_engine, AuthBackend, BackendError, Credential, CredentialToken, DescriptorSecret,
    EnrollmentReceipt, EnrollmentStatus, EnrollmentSubmission, SessionConfig, SessionEvent,
    SharedEngine, VerificationReceipt, VerificationSubmission,
};
use image::{Rgb, RgbImage};
use tokio::sync::mpsc;

// ── Camera ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct CameraStats {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub grabs: AtomicUsize,
}

impl CameraStats {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn grabs(&self) -> usize {
        self.grabs.load(Ordering::SeqCst)
    }
}

pub struct FakeCamera {
    permission: PermissionState,
    stats: Arc<CameraStats>,
}

impl CameraDevice for FakeCamera {
    fn label(&self) -> String {
        "Integrated HD Webcam".to_string()
    }

    fn permission(&self) -> PermissionState {
        self.permission
    }

    fn request_permission(&mut self) -> PermissionState {
        if self.permission == PermissionState::Prompt {
            self.permission = PermissionState::Granted;
        }
        self.permission
    }

    fn start(&mut self, surface: &VideoSurface) -> Result<FrameDims, CameraError> {
        self.stats.starts.fetch_add(1, Ordering::SeqCst);
        Ok(surface.ideal)
    }

    fn grab(&mut self) -> Result<CaptureFrame, CameraError> {
        self.stats.grabs.fetch_add(1, Ordering::SeqCst);
        Ok(CaptureFrame::new(RgbImage::from_pixel(640, 480, Rgb([120, 120, 120]))))
    }

    fn stop(&mut self) {
        self.stats.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Camera that grants permission on first prompt.
pub fn camera() -> (CameraResource, Arc<CameraStats>) {
    camera_with(PermissionState::Prompt)
}

pub fn camera_with(permission: PermissionState) -> (CameraResource, Arc<CameraStats>) {
    let stats = Arc::new(CameraStats::default());
    let device = FakeCamera {
        permission,
        stats: stats.clone(),
    };
    (CameraResource::new(device), stats)
}

// ── Faces ─────────────────────────────────────────────────────────────────────

/// A frontal face centred at (`cx`, `cy`) with a `size` pixel box.
pub fn face(cx: f32, cy: f32, size: f32, confidence: f32, neutral: f32) -> FaceObservation {
    let half = size / 2.0;
    let mut landmarks: Vec<Point> = (0..68)
        .map(|i| {
            let t = i as f32 / 68.0;
            Point::new(cx - half + t * size, cy + (t - 0.5) * half)
        })
        .collect();
    for p in &mut landmarks[36..42] {
        *p = Point::new(cx - size * 0.2, cy - size * 0.1);
    }
    for p in &mut landmarks[42..48] {
        *p = Point::new(cx + size * 0.2, cy - size * 0.1);
    }
    landmarks[30] = Point::new(cx, cy + size * 0.05);

    FaceObservation {
        bounding_box: BoundingBox {
            x: cx - half,
            y: cy - half,
            width: size,
            height: size,
        },
        landmarks,
        confidence,
        expressions: Expressions::new([neutral, 1.0 - neutral, 0.0, 0.0, 0.0, 0.0, 0.0]),
    }
}

/// What the model sees on its `n`th call.
pub type Script = Arc<dyn Fn(usize) -> Vec<FaceObservation> + Send + Sync>;

/// A subject that shifts slightly and changes expression between frames.
pub fn live_subject(confidence: f32) -> Script {
    Arc::new(move |n| {
        let odd = n % 2 == 1;
        let cx = if odd { 326.0 } else { 320.0 };
        let neutral = if odd { 0.6 } else { 0.8 };
        vec![face(cx, 240.0, 200.0, confidence, neutral)]
    })
}

/// A perfectly still subject: passes detection, never passes liveness.
pub fn photo_subject(confidence: f32) -> Script {
    Arc::new(move |_| vec![face(320.0, 240.0, 200.0, confidence, 0.8)])
}

pub fn nobody() -> Script {
    Arc::new(|_| Vec::new())
}

pub fn crowd() -> Script {
    Arc::new(|_| {
        vec![
            face(220.0, 240.0, 150.0, 0.9, 0.8),
            face(420.0, 240.0, 150.0, 0.9, 0.8),
        ]
    })
}

struct ScriptedModel {
    script: Script,
    calls: Arc<AtomicUsize>,
}

impl LandmarkModel for ScriptedModel {
    fn infer(&mut self, _: &CaptureFrame) -> Result<Vec<FaceObservation>, DetectorError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((self.script)(n))
    }
}

pub fn engine(script: Script) -> SharedEngine {
    let calls = Arc::new(AtomicUsize::new(0));
    share_engine(FaceDetectionEngine::new(
        move || -> Result<Box<dyn LandmarkModel>, DetectorError> {
            Ok(Box::new(ScriptedModel {
                script: script.clone(),
                calls: calls.clone(),
            }))
        },
        DetectionConfig::default(),
    ))
}

pub fn config() -> SessionConfig {
    SessionConfig {
        descriptor_secret: DescriptorSecret::new("integration-test-secret"),
        ..SessionConfig::default()
    }
}

// ── Backend ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct BackendLog {
    enrollments: Vec<EnrollmentSubmission>,
    verifications: Vec<VerificationSubmission>,
    enroll_replies: VecDeque<Result<EnrollmentReceipt, BackendError>>,
    verify_replies: VecDeque<Result<VerificationReceipt, BackendError>>,
    reject_all_verifications: bool,
}

/// Records every submission. Replies come from the queues, then default to
/// acceptance.
#[derive(Clone, Default)]
pub struct FakeBackend {
    log: Arc<Mutex<BackendLog>>,
}

impl FakeBackend {
    pub fn rejecting_verifications() -> Self {
        let backend = Self::default();
        backend.log.lock().unwrap().reject_all_verifications = true;
        backend
    }

    pub fn push_enroll_reply(&self, reply: Result<EnrollmentReceipt, BackendError>) {
        self.log.lock().unwrap().enroll_replies.push_back(reply);
    }

    pub fn push_verify_reply(&self, reply: Result<VerificationReceipt, BackendError>) {
        self.log.lock().unwrap().verify_replies.push_back(reply);
    }

    pub fn enrollments(&self) -> Vec<EnrollmentSubmission> {
        self.log.lock().unwrap().enrollments.clone()
    }

    pub fn verifications(&self) -> Vec<VerificationSubmission> {
        self.log.lock().unwrap().verifications.clone()
    }
}

pub fn accepted_verification(token: &str) -> VerificationReceipt {
    VerificationReceipt {
        success: true,
        credential_token: Some(CredentialToken::new(token)),
        user_profile: serde_json::json!({ "name": "Ana Tamayo", "role": "staff" }),
        message: None,
    }
}

pub fn rejected_verification() -> VerificationReceipt {
    VerificationReceipt {
        success: false,
        credential_token: None,
        user_profile: serde_json::Value::Null,
        message: Some("face not recognized".to_string()),
    }
}

impl AuthBackend for FakeBackend {
    async fn submit_enrollment(
        &self,
        request: EnrollmentSubmission,
    ) -> Result<EnrollmentReceipt, BackendError> {
        let mut log = self.log.lock().unwrap();
        log.enrollments.push(request);
        log.enroll_replies.pop_front().unwrap_or(Ok(EnrollmentReceipt {
            success: true,
            pending_verification: true,
            message: None,
        }))
    }

    async fn submit_verification(
        &self,
        request: VerificationSubmission,
    ) -> Result<VerificationReceipt, BackendError> {
        let mut log = self.log.lock().unwrap();
        log.verifications.push(request);
        if let Some(reply) = log.verify_replies.pop_front() {
            return reply;
        }
        if log.reject_all_verifications {
            Ok(rejected_verification())
        } else {
            Ok(accepted_verification("session-token"))
        }
    }

    async fn fetch_status(&self) -> Result<EnrollmentStatus, BackendError> {
        let log = self.log.lock().unwrap();
        Ok(EnrollmentStatus {
            has_enrollment: !log.enrollments.is_empty(),
            usage_count: log.verifications.len() as u64,
            ..EnrollmentStatus::default()
        })
    }

    async fn delete_enrollment(&self, credential: &Credential) -> Result<bool, BackendError> {
        if credential.expose() != "correct horse" {
            return Err(BackendError::Rejected("invalid credential".into()));
        }
        let mut log = self.log.lock().unwrap();
        let had = !log.enrollments.is_empty();
        log.enrollments.clear();
        Ok(had)
    }
}

// ── Events ────────────────────────────────────────────────────────────────────

pub fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
