//! Quality gate for a single observation against its source frame.

use serde::Serialize;
use std::fmt;

use crate::types::{FaceObservation, FrameDims};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityConfig {
    pub min_frame_width: u32,
    pub min_frame_height: u32,
    /// Kept above [`DetectionConfig::min_face_size`] so faces in between are
    /// still detected and reported as [`QualityIssue::FaceTooSmall`] ("move
    /// closer") instead of vanishing from the frame.
    ///
    /// [`DetectionConfig::min_face_size`]: crate::DetectionConfig::min_face_size
    pub min_face_size: f32,
    /// Maximum face-centre offset from frame centre, as a fraction of the
    /// frame dimension on each axis.
    pub max_center_offset: f32,
    pub min_confidence: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_frame_width: 640,
            min_frame_height: 480,
            min_face_size: 120.0,
            max_center_offset: 0.2,
            min_confidence: 0.8,
        }
    }
}

/// One actionable problem with a capture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QualityIssue {
    LowResolution {
        width: u32,
        height: u32,
        min_width: u32,
        min_height: u32,
    },
    FaceTooSmall { size: f32 },
    OffCenter { dx: f32, dy: f32 },
    LowConfidence { confidence: f32 },
}

impl fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LowResolution {
                width,
                height,
                min_width,
                min_height,
            } => write!(
                f,
                "camera resolution {width}x{height} is below {min_width}x{min_height}"
            ),
            Self::FaceTooSmall { .. } => {
                f.write_str("face is too small, move closer to the camera")
            }
            Self::OffCenter { .. } => f.write_str("face is not centered in the frame"),
            Self::LowConfidence { confidence } => {
                write!(f, "face detection confidence too low ({:.0}%)", confidence * 100.0)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityAssessment {
    pub is_valid: bool,
    pub issues: Vec<QualityIssue>,
}

impl QualityAssessment {
    pub fn messages(&self) -> Vec<String> {
        self.issues.iter().map(ToString::to_string).collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QualityAssessor {
    config: QualityConfig,
}

impl QualityAssessor {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    pub fn assess(&self, obs: &FaceObservation, frame: FrameDims) -> QualityAssessment {
        let c = &self.config;
        let mut issues = Vec::new();

        if frame.width < c.min_frame_width || frame.height < c.min_frame_height {
            issues.push(QualityIssue::LowResolution {
                width: frame.width,
                height: frame.height,
                min_width: c.min_frame_width,
                min_height: c.min_frame_height,
            });
        }

        let size = obs.bounding_box.max_dimension();
        if size < c.min_face_size {
            issues.push(QualityIssue::FaceTooSmall { size });
        }

        let center = obs.bounding_box.center();
        let (w, h) = (frame.width.max(1) as f32, frame.height.max(1) as f32);
        let dx = (center.x - w / 2.0).abs() / w;
        let dy = (center.y - h / 2.0).abs() / h;
        if dx > c.max_center_offset || dy > c.max_center_offset {
            issues.push(QualityIssue::OffCenter { dx, dy });
        }

        if obs.confidence < c.min_confidence {
            issues.push(QualityIssue::LowConfidence {
                confidence: obs.confidence,
            });
        }

        QualityAssessment {
            is_valid: issues.is_empty(),
            issues,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::tests::face_at;
    use crate::DetectionConfig;

    const VGA: FrameDims = FrameDims {
        width: 640,
        height: 480,
    };

    #[test]
    fn good_capture_is_valid() {
        let assessor = QualityAssessor::default();
        for &(cx, cy, size, conf) in &[
            (320.0, 240.0, 200.0, 0.8),
            (400.0, 300.0, 150.0, 0.95),
            (200.0, 160.0, 120.0, 0.99),
        ] {
            let a = assessor.assess(&face_at(cx, cy, size, conf), VGA);
            assert!(a.is_valid, "{cx},{cy} {size} {conf}: {:?}", a.issues);
            assert!(a.issues.is_empty());
        }
    }

    #[test]
    fn every_failed_rule_reports_its_own_issue() {
        let assessor = QualityAssessor::default();
        let small_frame = FrameDims {
            width: 320,
            height: 240,
        };
        let a = assessor.assess(&face_at(20.0, 20.0, 40.0, 0.5), small_frame);
        assert!(!a.is_valid);
        assert_eq!(a.issues.len(), 4);
        assert!(matches!(a.issues[0], QualityIssue::LowResolution { width: 320, .. }));
        assert!(matches!(a.issues[1], QualityIssue::FaceTooSmall { .. }));
        assert!(matches!(a.issues[2], QualityIssue::OffCenter { .. }));
        assert!(matches!(a.issues[3], QualityIssue::LowConfidence { .. }));
    }

    #[test]
    fn resolution_message_uses_configured_minimum() {
        let assessor = QualityAssessor::new(QualityConfig {
            min_frame_width: 1280,
            min_frame_height: 720,
            ..QualityConfig::default()
        });
        let a = assessor.assess(&face_at(320.0, 240.0, 200.0, 0.9), VGA);
        assert_eq!(
            a.messages(),
            vec!["camera resolution 640x480 is below 1280x720".to_string()]
        );
    }

    #[test]
    fn detectable_but_small_face_gets_move_closer_feedback() {
        let detection = DetectionConfig::default();
        let quality = QualityConfig::default();
        assert!(detection.min_face_size < quality.min_face_size);

        let obs = face_at(320.0, 240.0, 110.0, 0.9);
        assert_eq!(detection.rejection(&obs), None);
        let a = QualityAssessor::new(quality).assess(&obs, VGA);
        assert!(matches!(a.issues.as_slice(), [QualityIssue::FaceTooSmall { .. }]));
        assert_eq!(a.messages(), vec!["face is too small, move closer to the camera"]);
    }

    #[test]
    fn off_center_on_one_axis() {
        let assessor = QualityAssessor::default();
        // dx = 150/640 = 0.23
        let a = assessor.assess(&face_at(470.0, 240.0, 200.0, 0.9), VGA);
        assert_eq!(a.issues.len(), 1);
        assert!(matches!(a.issues[0], QualityIssue::OffCenter { .. }));
    }

    #[test]
    fn messages_are_human_readable() {
        let assessor = QualityAssessor::default();
        let a = assessor.assess(&face_at(320.0, 240.0, 200.0, 0.6), VGA);
        assert_eq!(a.messages(), vec!["face detection confidence too low (60%)".to_string()]);
    }
}
