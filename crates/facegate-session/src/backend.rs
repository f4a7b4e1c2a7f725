//! Backend collaborator that stores enrollments and authenticates sessions.
//!
//! Calls are fire-and-await: no retry at this layer. Retry policy lives in
//! the verification attempt counter.

use std::fmt;
use std::future::Future;

use chrono::{DateTime, Utc};
use facegate_core::{EncryptedDescriptor, FrameDims, LightingCondition, LivenessResult};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("submission rejected: {0}")]
    Rejected(String),
    #[error("backend unreachable: {0}")]
    Transport(String),
}

/// Non-biometric credential (e.g. the account password) re-entered to
/// authorise an enrollment change.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Session token returned by a successful verification.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialToken(String);

impl CredentialToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CredentialToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CredentialToken(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrollmentMetadata {
    pub session_id: Uuid,
    pub capture_count: usize,
    pub average_confidence: f32,
    pub landmark_count: usize,
    pub dominant_expression: String,
    pub expression_confidence: f32,
    pub device_label: String,
    pub resolution: Option<FrameDims>,
    pub lighting: Option<LightingCondition>,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrollmentSubmission {
    pub encrypted_descriptor: EncryptedDescriptor,
    pub metadata: EnrollmentMetadata,
    pub confidence: f32,
    pub credential: Credential,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnrollmentReceipt {
    pub success: bool,
    /// Enrollment is stored but awaits administrator approval.
    pub pending_verification: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationMetadata {
    pub session_id: Uuid,
    pub attempt: u32,
    pub device_label: String,
    pub resolution: Option<FrameDims>,
    pub lighting: Option<LightingCondition>,
    pub liveness: LivenessResult,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationSubmission {
    pub encrypted_descriptor: EncryptedDescriptor,
    pub confidence: f32,
    pub liveness_passed: bool,
    pub metadata: VerificationMetadata,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VerificationReceipt {
    pub success: bool,
    #[serde(default)]
    pub credential_token: Option<CredentialToken>,
    #[serde(default)]
    pub user_profile: serde_json::Value,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentStatus {
    pub has_enrollment: bool,
    pub is_admin_verified: bool,
    pub is_active: bool,
    pub registered_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub usage_count: u64,
    pub confidence_score: Option<f32>,
}

pub trait AuthBackend: Send + Sync {
    fn submit_enrollment(
        &self,
        request: EnrollmentSubmission,
    ) -> impl Future<Output = Result<EnrollmentReceipt, BackendError>> + Send;

    fn submit_verification(
        &self,
        request: VerificationSubmission,
    ) -> impl Future<Output = Result<VerificationReceipt, BackendError>> + Send;

    fn fetch_status(&self) -> impl Future<Output = Result<EnrollmentStatus, BackendError>> + Send;

    /// Returns whether an enrollment was removed.
    fn delete_enrollment(
        &self,
        credential: &Credential,
    ) -> impl Future<Output = Result<bool, BackendError>> + Send;
}
