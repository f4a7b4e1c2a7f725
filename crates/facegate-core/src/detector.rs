//! Face detection engine: lazy model loading plus geometric filtering.
//!
//! The raw landmark/expression model sits behind [`LandmarkModel`]; the
//! engine owns the policy that decides which raw observations count as
//! detections. Observations failing any filter are dropped silently.

use std::path::{Path, PathBuf};

use facegate_models::{AssetManifest, ModelIntegrityError};
use thiserror::Error;

use crate::types::{CaptureFrame, FaceObservation};

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("failed to load detection model: {0}")]
    ModelLoad(String),
    #[error("detection assets failed verification: {0}")]
    Assets(#[from] ModelIntegrityError),
    #[error("inference failed: {0}")]
    Inference(String),
}

impl DetectorError {
    pub fn is_model_load(&self) -> bool {
        matches!(self, Self::ModelLoad(_) | Self::Assets(_))
    }
}

/// Raw inference backend: one call per frame, no filtering.
pub trait LandmarkModel: Send {
    fn infer(&mut self, frame: &CaptureFrame) -> Result<Vec<FaceObservation>, DetectorError>;
}

/// Produces a ready [`LandmarkModel`]. Called at most once per engine
/// unless loading fails.
pub trait ModelSource: Send {
    fn load(&self) -> Result<Box<dyn LandmarkModel>, DetectorError>;
}

impl<F> ModelSource for F
where
    F: Fn() -> Result<Box<dyn LandmarkModel>, DetectorError> + Send,
{
    fn load(&self) -> Result<Box<dyn LandmarkModel>, DetectorError> {
        self()
    }
}

type ModelFactory =
    dyn Fn(&Path, &AssetManifest) -> Result<Box<dyn LandmarkModel>, DetectorError> + Send;

/// Verifies the asset directory against its manifest before handing it to
/// the backend factory.
pub struct ManifestModelSource {
    model_dir: PathBuf,
    factory: Box<ModelFactory>,
}

impl ManifestModelSource {
    pub fn new<F>(model_dir: impl Into<PathBuf>, factory: F) -> Self
    where
        F: Fn(&Path, &AssetManifest) -> Result<Box<dyn LandmarkModel>, DetectorError>
            + Send
            + 'static,
    {
        Self {
            model_dir: model_dir.into(),
            factory: Box::new(factory),
        }
    }
}

impl ModelSource for ManifestModelSource {
    fn load(&self) -> Result<Box<dyn LandmarkModel>, DetectorError> {
        let manifest = facegate_models::verify_models_dir(&self.model_dir)?;
        tracing::info!(
            dir = %self.model_dir.display(),
            assets = manifest.assets.len(),
            "detection assets verified"
        );
        (self.factory)(&self.model_dir, &manifest)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionConfig {
    /// Observations below this confidence are discarded.
    pub min_confidence: f32,
    /// Bounds on the bounding box's larger side, in pixels.
    pub min_face_size: f32,
    pub max_face_size: f32,
    /// Maximum normalised nose offset from the inter-eye midpoint.
    pub max_frontal_offset: f32,
    /// Expression probabilities must sum above this.
    pub min_expression_sum: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            min_face_size: 100.0,
            max_face_size: 500.0,
            max_frontal_offset: 0.3,
            min_expression_sum: 0.5,
        }
    }
}

/// Why a raw observation was not reported as a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    LowConfidence,
    IncompleteLandmarks,
    SizeOutOfRange,
    NonFrontal,
    FlatExpression,
}

impl DetectionConfig {
    pub fn rejection(&self, obs: &FaceObservation) -> Option<Rejection> {
        if !(obs.confidence >= self.min_confidence) {
            return Some(Rejection::LowConfidence);
        }
        if !obs.has_full_landmarks() {
            return Some(Rejection::IncompleteLandmarks);
        }
        let size = obs.bounding_box.max_dimension();
        if size < self.min_face_size || size > self.max_face_size {
            return Some(Rejection::SizeOutOfRange);
        }
        match obs.frontal_offset() {
            Some(offset) if offset <= self.max_frontal_offset => {}
            _ => return Some(Rejection::NonFrontal),
        }
        if !(obs.expressions.sum() > self.min_expression_sum) {
            return Some(Rejection::FlatExpression);
        }
        None
    }
}

/// Load-once detection engine shared across sessions.
pub struct FaceDetectionEngine {
    source: Box<dyn ModelSource>,
    model: Option<Box<dyn LandmarkModel>>,
    config: DetectionConfig,
}

impl FaceDetectionEngine {
    pub fn new(source: impl ModelSource + 'static, config: DetectionConfig) -> Self {
        Self {
            source: Box::new(source),
            model: None,
            config,
        }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Load model assets on first use; no-op afterwards.
    pub fn ensure_loaded(&mut self) -> Result<(), DetectorError> {
        if self.model.is_some() {
            return Ok(());
        }
        let model = self.source.load().map_err(|e| match e {
            DetectorError::Inference(msg) => DetectorError::ModelLoad(msg),
            other => other,
        })?;
        tracing::info!("detection model loaded");
        self.model = Some(model);
        Ok(())
    }

    /// Detect faces in a frame, returning only observations that pass every
    /// filter.
    pub fn detect(&mut self, frame: &CaptureFrame) -> Result<Vec<FaceObservation>, DetectorError> {
        let config = self.config;
        self.detect_with(frame, &config)
    }

    /// Like [`detect`](Self::detect), filtering with `config` instead of the
    /// engine's own filters. Lets sessions with different settings share one
    /// loaded model.
    pub fn detect_with(
        &mut self,
        frame: &CaptureFrame,
        config: &DetectionConfig,
    ) -> Result<Vec<FaceObservation>, DetectorError> {
        self.ensure_loaded()?;
        let model = self
            .model
            .as_mut()
            .ok_or_else(|| DetectorError::ModelLoad("model unavailable".into()))?;

        let raw = model.infer(frame)?;
        let raw_count = raw.len();
        let kept: Vec<FaceObservation> = raw
            .into_iter()
            .filter(|obs| match config.rejection(obs) {
                None => true,
                Some(reason) => {
                    tracing::trace!(?reason, confidence = obs.confidence, "observation dropped");
                    false
                }
            })
            .collect();

        tracing::debug!(raw = raw_count, kept = kept.len(), "detect");
        Ok(kept)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{BoundingBox, Expressions, Point, LANDMARK_COUNT};
    use image::RgbImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// A frontal face of the given size centred at (cx, cy).
    pub(crate) fn face_at(cx: f32, cy: f32, size: f32, confidence: f32) -> FaceObservation {
        let half = size / 2.0;
        let eye_dx = size * 0.2;
        let eye_y = cy - size * 0.1;
        let mut landmarks = Vec::with_capacity(LANDMARK_COUNT);
        for i in 0..LANDMARK_COUNT {
            // jaw and brows spread across the box, deterministic per index
            let t = i as f32 / LANDMARK_COUNT as f32;
            landmarks.push(Point::new(cx - half + t * size, cy + (t - 0.5) * half));
        }
        for p in &mut landmarks[36..42] {
            *p = Point::new(cx - eye_dx, eye_y);
        }
        for p in &mut landmarks[42..48] {
            *p = Point::new(cx + eye_dx, eye_y);
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
            expressions: Expressions::new([0.8, 0.1, 0.05, 0.02, 0.01, 0.01, 0.01]),
        }
    }

    struct Fixed(Vec<FaceObservation>);

    impl LandmarkModel for Fixed {
        fn infer(&mut self, _: &CaptureFrame) -> Result<Vec<FaceObservation>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    fn fixed_source(observations: Vec<FaceObservation>) -> impl ModelSource {
        move || -> Result<Box<dyn LandmarkModel>, DetectorError> {
            Ok(Box::new(Fixed(observations.clone())))
        }
    }

    fn engine_with(observations: Vec<FaceObservation>) -> FaceDetectionEngine {
        FaceDetectionEngine::new(fixed_source(observations), DetectionConfig::default())
    }

    fn frame() -> CaptureFrame {
        CaptureFrame::new(RgbImage::new(640, 480))
    }

    #[test]
    fn keeps_valid_face() {
        let mut engine = engine_with(vec![face_at(320.0, 240.0, 200.0, 0.9)]);
        assert_eq!(engine.detect(&frame()).unwrap().len(), 1);
    }

    #[test]
    fn detect_with_applies_caller_filters() {
        let mut engine = engine_with(vec![face_at(320.0, 240.0, 200.0, 0.9)]);
        let strict = DetectionConfig {
            min_face_size: 300.0,
            ..DetectionConfig::default()
        };
        assert!(engine.detect_with(&frame(), &strict).unwrap().is_empty());
        assert_eq!(engine.detect(&frame()).unwrap().len(), 1);
    }

    #[test]
    fn drops_faces_outside_size_bounds() {
        let mut engine = engine_with(vec![
            face_at(320.0, 240.0, 60.0, 0.9),
            face_at(320.0, 240.0, 700.0, 0.9),
        ]);
        assert!(engine.detect(&frame()).unwrap().is_empty());
    }

    #[test]
    fn drops_turned_head() {
        let mut obs = face_at(320.0, 240.0, 200.0, 0.9);
        // eye distance 80, nose 30px off-centre -> 0.375
        obs.landmarks[30].x += 30.0;
        assert_eq!(
            DetectionConfig::default().rejection(&obs),
            Some(Rejection::NonFrontal)
        );
    }

    #[test]
    fn drops_flat_expression_output() {
        let mut obs = face_at(320.0, 240.0, 200.0, 0.9);
        obs.expressions = Expressions::new([0.05; 7]);
        assert_eq!(
            DetectionConfig::default().rejection(&obs),
            Some(Rejection::FlatExpression)
        );
    }

    #[test]
    fn drops_low_confidence_and_partial_landmarks() {
        let config = DetectionConfig::default();
        let low = face_at(320.0, 240.0, 200.0, 0.3);
        assert_eq!(config.rejection(&low), Some(Rejection::LowConfidence));

        let mut partial = face_at(320.0, 240.0, 200.0, 0.9);
        partial.landmarks.truncate(5);
        assert_eq!(config.rejection(&partial), Some(Rejection::IncompleteLandmarks));
    }

    #[test]
    fn loads_model_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let mut engine = FaceDetectionEngine::new(
            move || -> Result<Box<dyn LandmarkModel>, DetectorError> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(Fixed(Vec::new())))
            },
            DetectionConfig::default(),
        );
        assert!(!engine.is_loaded());
        engine.detect(&frame()).unwrap();
        engine.detect(&frame()).unwrap();
        engine.ensure_loaded().unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn load_failure_is_model_load_error() {
        let mut engine = FaceDetectionEngine::new(
            || -> Result<Box<dyn LandmarkModel>, DetectorError> {
                Err(DetectorError::Inference("weights unreachable".into()))
            },
            DetectionConfig::default(),
        );
        let err = engine.detect(&frame()).unwrap_err();
        assert!(err.is_model_load());
        assert!(!engine.is_loaded());
    }

    #[test]
    fn manifest_source_rejects_missing_assets() {
        let dir = std::env::temp_dir().join(format!(
            "facegate-core-no-assets-{}",
            std::process::id()
        ));
        let source = ManifestModelSource::new(&dir, |_, _| {
            Ok(Box::new(Fixed(Vec::new())) as Box<dyn LandmarkModel>)
        });
        let err = source.load().err().unwrap();
        assert!(matches!(err, DetectorError::Assets(_)));
        assert!(err.is_model_load());
    }
}
