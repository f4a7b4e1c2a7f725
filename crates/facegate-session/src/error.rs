use serde::Serialize;
use std::fmt;

/// Failure taxonomy shared by both orchestrators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Camera denied or unavailable. Needs user action.
    Permission,
    /// No face, several faces, model load failure.
    Detection,
    /// Capture failed the quality gate.
    Quality,
    Liveness,
    /// Backend rejected the submission or could not be reached.
    Transport,
    /// Ciphertext tampering or key mismatch.
    Security,
}

impl ErrorKind {
    /// Fatal kinds end the session without retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Permission | Self::Security)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Permission => "permission",
            Self::Detection => "detection",
            Self::Quality => "quality",
            Self::Liveness => "liveness",
            Self::Transport => "transport",
            Self::Security => "security",
        };
        f.write_str(s)
    }
}

/// What went wrong, in a form safe to show the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl SessionFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)
    }
}

pub(crate) const PERMISSION_MESSAGE: &str = "camera access was denied; allow camera access in \
     your browser or system settings to use face login";
