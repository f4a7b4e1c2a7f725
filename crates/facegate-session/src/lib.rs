//! facegate-session — biometric enrollment and verification sessions.
//!
//! Orchestrates the camera, the shared detection engine, the quality gate,
//! liveness sampling and descriptor encryption into two explicit state
//! machines, and hands encrypted results to an [`AuthBackend`].

pub mod backend;
pub mod config;
pub mod enrollment;
pub mod error;
pub mod events;
pub mod liveness;
pub mod poller;
pub mod verification;

pub use backend::{
    AuthBackend, BackendError, Credential, CredentialToken, EnrollmentReceipt, EnrollmentStatus,
    EnrollmentSubmission, VerificationReceipt, VerificationSubmission,
};
pub use config::{DescriptorSecret, SessionConfig};
pub use enrollment::{
    CaptureOutcome, CaptureSample, EnrollmentBatch, EnrollmentError, EnrollmentOrchestrator,
    EnrollmentPhase, RejectReason,
};
pub use error::{ErrorKind, SessionFailure};
pub use events::{EventSink, SessionEvent};
pub use liveness::LivenessAnalyzer;
pub use poller::{share_engine, Detection, DetectionPoller, SharedEngine};
pub use verification::{
    CancelHandle, VerificationError, VerificationOrchestrator, VerificationOutcome,
    VerificationPhase,
};
