use facegate_core::{LightingReport, LivenessResult};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::enrollment::EnrollmentPhase;
use crate::error::ErrorKind;
use crate::verification::VerificationPhase;

/// Progress notifications for whoever renders the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    EnrollmentPhase {
        phase: EnrollmentPhase,
    },
    VerificationPhase {
        phase: VerificationPhase,
    },
    Countdown {
        remaining_secs: u64,
    },
    ScanProgress {
        percent: u8,
    },
    QualityFeedback {
        issues: Vec<String>,
    },
    Lighting {
        report: LightingReport,
    },
    CaptureAccepted {
        count: usize,
        required: usize,
    },
    LivenessChecked {
        result: LivenessResult,
    },
    AttemptFailed {
        attempt: u32,
        max_attempts: u32,
        kind: ErrorKind,
        message: String,
    },
    Authenticated {
        user_profile: serde_json::Value,
    },
    FallbackRequired {
        attempts: u32,
    },
}

/// Optional event channel. Emitting never blocks and never fails.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
