//! Passive liveness detection via temporal variance.
//!
//! A printed photograph or a frozen frame yields near-identical expression
//! probabilities and a fixed face position across samples. A live person
//! exhibits small involuntary expression shifts and head drift over a few
//! seconds, even when holding still.
//!
//! A [`LivenessSession`] collects single-subject samples at a fixed interval
//! and is consumed once to produce a verdict.
//!
//! # Threat Coverage
//!
//! - **Blocks:** Printed photographs and static images held in front of the camera.
//! - **Does not block:** Video replay, 3D masks, or adversarial displays. This is a
//!   heuristic deterrent, not a cryptographic liveness proof.

use std::time::Duration;

use serde::Serialize;

use crate::types::{Expressions, FaceObservation, Point};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LivenessConfig {
    pub sample_interval: Duration,
    pub duration: Duration,
    /// Sessions with fewer valid samples are never live.
    pub min_samples: usize,
    /// Summed absolute expression delta that counts as a change.
    pub expression_epsilon: f32,
    pub min_expression_changes: usize,
    /// Centroid displacement in pixels that counts as movement.
    pub movement_threshold: f32,
    pub min_movements: usize,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_millis(200),
            duration: Duration::from_millis(2500),
            min_samples: 5,
            expression_epsilon: 0.02,
            min_expression_changes: 2,
            movement_threshold: 2.0,
            min_movements: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct LivenessSample {
    expressions: Expressions,
    centroid: Point,
}

/// Result of a temporal variance check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LivenessResult {
    /// Whether the samples passed (true = likely live).
    pub is_live: bool,
    pub samples: usize,
    /// Consecutive sample pairs whose expression delta exceeded epsilon.
    pub expression_changes: usize,
    /// Consecutive sample pairs whose centroid moved beyond the threshold.
    pub movements: usize,
}

#[derive(Debug, Clone)]
pub struct LivenessSession {
    config: LivenessConfig,
    samples: Vec<LivenessSample>,
}

/// Most samples reserved up front; longer sessions grow the buffer.
const PREALLOCATED_SAMPLES: u128 = 256;

impl LivenessSession {
    pub fn new(config: LivenessConfig) -> Self {
        let expected = config.duration.as_millis() / config.sample_interval.as_millis().max(1);
        let capacity = expected.min(PREALLOCATED_SAMPLES) as usize + 1;
        Self {
            config,
            samples: Vec::with_capacity(capacity),
        }
    }

    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    /// Record one detection result. Only frames with exactly one observation
    /// count; returns whether the sample was kept.
    pub fn record(&mut self, observations: &[FaceObservation]) -> bool {
        let [obs] = observations else {
            return false;
        };
        self.samples.push(LivenessSample {
            expressions: obs.expressions,
            centroid: obs.bounding_box.center(),
        });
        true
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Consume the session and classify it.
    pub fn verdict(self) -> LivenessResult {
        let c = self.config;
        let samples = self.samples.len();

        let mut expression_changes = 0usize;
        let mut movements = 0usize;
        for pair in self.samples.windows(2) {
            let (prev, curr) = (&pair[0], &pair[1]);
            if curr.expressions.delta(&prev.expressions) > c.expression_epsilon {
                expression_changes += 1;
            }
            if curr.centroid.distance(&prev.centroid) > c.movement_threshold {
                movements += 1;
            }
        }

        let is_live = samples >= c.min_samples
            && expression_changes >= c.min_expression_changes
            && movements >= c.min_movements;

        LivenessResult {
            is_live,
            samples,
            expression_changes,
            movements,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::tests::face_at;

    fn obs(cx: f32, neutral: f32) -> FaceObservation {
        let mut o = face_at(cx, 240.0, 200.0, 0.9);
        o.expressions = Expressions::new([neutral, 1.0 - neutral, 0.0, 0.0, 0.0, 0.0, 0.0]);
        o
    }

    fn session_of(samples: &[FaceObservation]) -> LivenessSession {
        let mut s = LivenessSession::new(LivenessConfig::default());
        for o in samples {
            assert!(s.record(std::slice::from_ref(o)));
        }
        s
    }

    #[test]
    fn degenerate_timing_does_not_overallocate() {
        let config = LivenessConfig {
            sample_interval: Duration::ZERO,
            duration: Duration::MAX,
            ..LivenessConfig::default()
        };
        let mut s = LivenessSession::new(config);
        assert!(s.samples.capacity() <= PREALLOCATED_SAMPLES as usize + 1);
        assert!(s.record(&[obs(320.0, 0.8)]));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn fewer_than_five_samples_never_live() {
        // Plenty of variance, but only 4 samples.
        let s = session_of(&[obs(300.0, 0.9), obs(310.0, 0.6), obs(320.0, 0.9), obs(330.0, 0.5)]);
        let r = s.verdict();
        assert!(!r.is_live);
        assert_eq!(r.samples, 4);
        assert_eq!(r.expression_changes, 3);
    }

    #[test]
    fn empty_session_not_live() {
        let r = LivenessSession::new(LivenessConfig::default()).verdict();
        assert!(!r.is_live);
        assert_eq!(r.samples, 0);
    }

    #[test]
    fn static_image_rejected() {
        let still = obs(320.0, 0.9);
        let r = session_of(&vec![still; 10]).verdict();
        assert!(!r.is_live);
        assert_eq!(r.expression_changes, 0);
        assert_eq!(r.movements, 0);
    }

    #[test]
    fn expression_without_movement_rejected() {
        let seq: Vec<_> = (0..8).map(|i| obs(320.0, 0.5 + 0.05 * i as f32)).collect();
        let r = session_of(&seq).verdict();
        assert!(r.expression_changes >= 2);
        assert_eq!(r.movements, 0);
        assert!(!r.is_live);
    }

    #[test]
    fn movement_without_expression_rejected() {
        let seq: Vec<_> = (0..8).map(|i| obs(300.0 + 5.0 * i as f32, 0.9)).collect();
        let r = session_of(&seq).verdict();
        assert_eq!(r.expression_changes, 0);
        assert!(!r.is_live);
    }

    #[test]
    fn natural_variation_passes() {
        let seq = [
            obs(320.0, 0.90),
            obs(320.5, 0.85),
            obs(324.0, 0.86),
            obs(323.0, 0.80),
            obs(323.5, 0.80),
            obs(321.0, 0.84),
        ];
        let r = session_of(&seq).verdict();
        assert_eq!(r.samples, 6);
        assert!(r.expression_changes >= 2);
        assert!(r.movements >= 1);
        assert!(r.is_live);
    }

    #[test]
    fn multi_face_and_empty_frames_not_recorded() {
        let mut s = LivenessSession::new(LivenessConfig::default());
        assert!(!s.record(&[]));
        assert!(!s.record(&[obs(200.0, 0.9), obs(440.0, 0.9)]));
        assert!(s.is_empty());
        assert!(s.record(&[obs(320.0, 0.9)]));
        assert_eq!(s.len(), 1);
    }
}
