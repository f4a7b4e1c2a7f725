use std::fmt;
use std::time::Duration;

use facegate_core::{DescriptorCipher, DetectionConfig, LivenessConfig, QualityConfig};

/// Application-level secret used when `FACEGATE_DESCRIPTOR_SECRET` is unset.
const DEFAULT_DESCRIPTOR_SECRET: &str = "facegate-descriptor-v1";

#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentConfig {
    /// Good captures collected before validation.
    pub required_captures: usize,
    /// Minimum batch average confidence.
    pub quality_threshold: f32,
    pub capture_interval: Duration,
    /// Give up collecting after this long without a full batch.
    pub capture_window: Duration,
    /// Run a liveness session before accepting each capture.
    pub liveness_per_capture: bool,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            required_captures: 3,
            quality_threshold: 0.8,
            capture_interval: Duration::from_millis(500),
            capture_window: Duration::from_secs(60),
            liveness_per_capture: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerificationConfig {
    pub max_attempts: u32,
    pub countdown: Duration,
    pub tracking_interval: Duration,
    /// Confidence a single face must exceed to count toward auto-trigger.
    pub trigger_confidence: f32,
    /// How long a good face must be held before verifying.
    pub sustain: Duration,
    pub scan_window: Duration,
    pub retry_delay: Duration,
    /// Fail the attempt locally when liveness fails instead of submitting.
    pub require_liveness: bool,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            countdown: Duration::from_secs(3),
            tracking_interval: Duration::from_millis(100),
            trigger_confidence: 0.8,
            sustain: Duration::from_secs(1),
            scan_window: Duration::from_secs(5),
            retry_delay: Duration::from_millis(1500),
            require_liveness: true,
        }
    }
}

/// Upper bound accepted for any millisecond setting read from the environment.
const MAX_ENV_MILLIS: u64 = 10 * 60 * 1000;

/// Secret the descriptor key is derived from. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct DescriptorSecret(String);

impl DescriptorSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn is_builtin(&self) -> bool {
        self.0 == DEFAULT_DESCRIPTOR_SECRET
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl Default for DescriptorSecret {
    fn default() -> Self {
        Self::new(DEFAULT_DESCRIPTOR_SECRET)
    }
}

impl fmt::Debug for DescriptorSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_builtin() {
            f.write_str("DescriptorSecret(builtin)")
        } else {
            f.write_str("DescriptorSecret(***)")
        }
    }
}

/// Session configuration, loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub surface_id: String,
    /// Filters each session applies to raw detections.
    pub detection: DetectionConfig,
    pub quality: QualityConfig,
    pub liveness: LivenessConfig,
    pub enrollment: EnrollmentConfig,
    pub verification: VerificationConfig,
    pub descriptor_secret: DescriptorSecret,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            surface_id: "face-preview".to_string(),
            detection: DetectionConfig::default(),
            quality: QualityConfig::default(),
            liveness: LivenessConfig::default(),
            enrollment: EnrollmentConfig::default(),
            verification: VerificationConfig::default(),
            descriptor_secret: DescriptorSecret::default(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let d = Self::default();
        let (det, qual, live) = (d.detection, d.quality, d.liveness);
        let (enr, ver) = (d.enrollment, d.verification);
        Self {
            surface_id: std::env::var("FACEGATE_SURFACE_ID").unwrap_or(d.surface_id),
            detection: DetectionConfig {
                min_confidence: env_f32("FACEGATE_DETECTION_MIN_CONFIDENCE", det.min_confidence),
                min_face_size: env_f32("FACEGATE_MIN_FACE_SIZE", det.min_face_size),
                max_face_size: env_f32("FACEGATE_MAX_FACE_SIZE", det.max_face_size),
                ..det
            },
            quality: QualityConfig {
                min_face_size: env_f32("FACEGATE_QUALITY_MIN_FACE_SIZE", qual.min_face_size),
                min_confidence: env_f32("FACEGATE_QUALITY_MIN_CONFIDENCE", qual.min_confidence),
                ..qual
            },
            liveness: LivenessConfig {
                sample_interval: env_millis("FACEGATE_LIVENESS_INTERVAL_MS", live.sample_interval),
                duration: env_millis("FACEGATE_LIVENESS_DURATION_MS", live.duration),
                ..live
            },
            enrollment: EnrollmentConfig {
                required_captures: env_usize("FACEGATE_ENROLL_CAPTURES", enr.required_captures),
                quality_threshold: env_f32(
                    "FACEGATE_ENROLL_QUALITY_THRESHOLD",
                    enr.quality_threshold,
                ),
                liveness_per_capture: env_bool(
                    "FACEGATE_ENROLL_LIVENESS",
                    enr.liveness_per_capture,
                ),
                ..enr
            },
            verification: VerificationConfig {
                max_attempts: env_u32("FACEGATE_VERIFY_MAX_ATTEMPTS", ver.max_attempts),
                scan_window: env_millis("FACEGATE_VERIFY_SCAN_WINDOW_MS", ver.scan_window),
                require_liveness: env_bool(
                    "FACEGATE_VERIFY_REQUIRE_LIVENESS",
                    ver.require_liveness,
                ),
                ..ver
            },
            descriptor_secret: std::env::var("FACEGATE_DESCRIPTOR_SECRET")
                .ok()
                .filter(|v| !v.is_empty())
                .map(DescriptorSecret::new)
                .unwrap_or(d.descriptor_secret),
        }
    }

    /// Cipher keyed from the configured secret.
    pub fn descriptor_cipher(&self) -> DescriptorCipher {
        if self.descriptor_secret.is_builtin() {
            tracing::warn!("using built-in descriptor secret; set FACEGATE_DESCRIPTOR_SECRET");
        }
        DescriptorCipher::from_secret(self.descriptor_secret.expose())
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<f32>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Milliseconds in `1..=MAX_ENV_MILLIS`; anything else keeps the default.
fn env_millis(key: &str, default: Duration) -> Duration {
    match std::env::var(key).ok().map(|v| v.parse::<u64>()) {
        None => default,
        Some(Ok(ms)) if (1..=MAX_ENV_MILLIS).contains(&ms) => Duration::from_millis(ms),
        Some(_) => {
            tracing::warn!(key, max = MAX_ENV_MILLIS, "ignoring out-of-range duration");
            default
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key).map(|v| v != "0").unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let c = SessionConfig::default();
        assert_eq!(c.enrollment.required_captures, 3);
        assert_eq!(c.verification.max_attempts, 3);
        assert_eq!(c.verification.countdown, Duration::from_secs(3));
        assert_eq!(c.verification.scan_window, Duration::from_secs(5));
        assert_eq!(c.quality.min_frame_width, 640);
    }

    #[test]
    fn env_overrides_and_bad_values_fall_back() {
        std::env::set_var("FACEGATE_VERIFY_MAX_ATTEMPTS", "5");
        std::env::set_var("FACEGATE_ENROLL_CAPTURES", "not-a-number");
        std::env::set_var("FACEGATE_VERIFY_REQUIRE_LIVENESS", "0");
        let c = SessionConfig::from_env();
        std::env::remove_var("FACEGATE_VERIFY_MAX_ATTEMPTS");
        std::env::remove_var("FACEGATE_ENROLL_CAPTURES");
        std::env::remove_var("FACEGATE_VERIFY_REQUIRE_LIVENESS");

        assert_eq!(c.verification.max_attempts, 5);
        assert_eq!(c.enrollment.required_captures, 3);
        assert!(!c.verification.require_liveness);
    }

    #[test]
    fn debug_output_hides_the_secret() {
        let c = SessionConfig {
            descriptor_secret: DescriptorSecret::new("super-secret-key-material"),
            ..SessionConfig::default()
        };
        let dump = format!("{c:#?}");
        assert!(!dump.contains("super-secret-key-material"));
        assert!(dump.contains("DescriptorSecret(***)"));
        assert!(format!("{:?}", SessionConfig::default()).contains("DescriptorSecret(builtin)"));
    }

    #[test]
    fn zero_and_oversized_durations_keep_defaults() {
        std::env::set_var("FACEGATE_LIVENESS_INTERVAL_MS", "0");
        std::env::set_var("FACEGATE_LIVENESS_DURATION_MS", "18446744073709551615");
        std::env::set_var("FACEGATE_VERIFY_SCAN_WINDOW_MS", "7000");
        let c = SessionConfig::from_env();
        std::env::remove_var("FACEGATE_LIVENESS_INTERVAL_MS");
        std::env::remove_var("FACEGATE_LIVENESS_DURATION_MS");
        std::env::remove_var("FACEGATE_VERIFY_SCAN_WINDOW_MS");

        let d = LivenessConfig::default();
        assert_eq!(c.liveness.sample_interval, d.sample_interval);
        assert_eq!(c.liveness.duration, d.duration);
        assert_eq!(c.verification.scan_window, Duration::from_millis(7000));
    }

    #[test]
    fn detection_filters_come_from_env() {
        std::env::set_var("FACEGATE_MIN_FACE_SIZE", "300");
        std::env::set_var("FACEGATE_DETECTION_MIN_CONFIDENCE", "NaN");
        let c = SessionConfig::from_env();
        std::env::remove_var("FACEGATE_MIN_FACE_SIZE");
        std::env::remove_var("FACEGATE_DETECTION_MIN_CONFIDENCE");

        assert_eq!(c.detection.min_face_size, 300.0);
        assert_eq!(c.detection.min_confidence, DetectionConfig::default().min_confidence);
    }
}
