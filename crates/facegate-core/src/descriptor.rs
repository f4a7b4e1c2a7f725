//! Descriptor extraction, encryption round-trip and comparison.

use serde::Serialize;
use thiserror::Error;

use crate::cipher::{CipherError, DescriptorCipher};
use crate::types::{EncryptedDescriptor, FaceDescriptor, FaceObservation, LANDMARK_COUNT};

/// Euclidean distance below which two descriptors are the same subject.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Length of descriptors produced by [`LandmarkGeometryEmbedder`].
pub const GEOMETRY_DESCRIPTOR_DIM: usize = LANDMARK_COUNT * 2;

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("no face in frame")]
    NoFace,
    #[error("{0} faces in frame, exactly one subject is required")]
    AmbiguousSubject(usize),
    #[error("face landmarks are degenerate")]
    DegenerateGeometry,
    #[error("invalid descriptor dimension: {got} (expected {expected})")]
    InvalidDimension { got: usize, expected: usize },
    #[error("invalid descriptor value (NaN/Inf)")]
    InvalidValue,
    #[error(transparent)]
    Cipher(#[from] CipherError),
}

impl DescriptorError {
    /// Tampering or key mismatch. Never retried.
    pub fn is_security(&self) -> bool {
        matches!(self, Self::Cipher(_))
    }
}

/// Maps one validated observation to an identity embedding.
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;
    fn embed(&self, obs: &FaceObservation) -> Result<Vec<f32>, DescriptorError>;
}

/// Pose- and scale-normalised landmark geometry: every landmark expressed
/// relative to the inter-eye midpoint in units of inter-eye distance, then
/// L2-normalised.
#[derive(Debug, Clone, Copy, Default)]
pub struct LandmarkGeometryEmbedder;

impl Embedder for LandmarkGeometryEmbedder {
    fn dimension(&self) -> usize {
        GEOMETRY_DESCRIPTOR_DIM
    }

    fn embed(&self, obs: &FaceObservation) -> Result<Vec<f32>, DescriptorError> {
        if !obs.has_full_landmarks() {
            return Err(DescriptorError::DegenerateGeometry);
        }
        let left = obs.left_eye_center().ok_or(DescriptorError::DegenerateGeometry)?;
        let right = obs.right_eye_center().ok_or(DescriptorError::DegenerateGeometry)?;
        let scale = left.distance(&right);
        if scale <= f32::EPSILON {
            return Err(DescriptorError::DegenerateGeometry);
        }
        let origin = left.midpoint(&right);

        let mut raw = Vec::with_capacity(GEOMETRY_DESCRIPTOR_DIM);
        for p in &obs.landmarks {
            raw.push((p.x - origin.x) / scale);
            raw.push((p.y - origin.y) / scale);
        }

        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm <= f32::EPSILON {
            return Err(DescriptorError::DegenerateGeometry);
        }
        Ok(raw.iter().map(|x| x / norm).collect())
    }
}

/// Result of comparing a stored descriptor with a live one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchOutcome {
    pub matched: bool,
    /// `1 - distance`, clamped to [0, 1], as a percentage.
    pub similarity: f32,
    pub distance: f32,
}

pub struct DescriptorExtractor {
    embedder: Box<dyn Embedder>,
    cipher: DescriptorCipher,
}

impl DescriptorExtractor {
    pub fn new(embedder: impl Embedder + 'static, cipher: DescriptorCipher) -> Self {
        Self {
            embedder: Box::new(embedder),
            cipher,
        }
    }

    /// Extractor using [`LandmarkGeometryEmbedder`].
    pub fn with_cipher(cipher: DescriptorCipher) -> Self {
        Self::new(LandmarkGeometryEmbedder, cipher)
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    /// Derive a descriptor from the observations of one frame. Exactly one
    /// subject must be visible.
    pub fn extract(
        &self,
        observations: &[FaceObservation],
    ) -> Result<FaceDescriptor, DescriptorError> {
        let obs = match observations {
            [] => return Err(DescriptorError::NoFace),
            [single] => single,
            many => return Err(DescriptorError::AmbiguousSubject(many.len())),
        };
        let values = self.embedder.embed(obs)?;
        self.validate(&values)?;
        Ok(FaceDescriptor::from_validated(values))
    }

    pub fn encrypt(
        &self,
        descriptor: &FaceDescriptor,
    ) -> Result<EncryptedDescriptor, DescriptorError> {
        self.validate(descriptor.values())?;
        Ok(self.cipher.encrypt(descriptor)?)
    }

    pub fn decrypt(
        &self,
        encrypted: &EncryptedDescriptor,
    ) -> Result<FaceDescriptor, DescriptorError> {
        let values = self.cipher.decrypt_values(encrypted)?;
        // Authenticated plaintext of the wrong shape is still treated as tampering.
        if self.validate(&values).is_err() {
            return Err(CipherError::DecryptionFailed.into());
        }
        Ok(FaceDescriptor::from_validated(values))
    }

    pub fn compare(
        &self,
        stored: &EncryptedDescriptor,
        live: &FaceDescriptor,
        threshold: f32,
    ) -> Result<MatchOutcome, DescriptorError> {
        let reference = self.decrypt(stored)?;
        if live.len() != reference.len() {
            return Err(DescriptorError::InvalidDimension {
                got: live.len(),
                expected: reference.len(),
            });
        }
        let distance = reference.euclidean_distance(live);
        Ok(MatchOutcome {
            matched: distance < threshold,
            similarity: (1.0 - distance).clamp(0.0, 1.0) * 100.0,
            distance,
        })
    }

    fn validate(&self, values: &[f32]) -> Result<(), DescriptorError> {
        let expected = self.embedder.dimension();
        if values.len() != expected {
            return Err(DescriptorError::InvalidDimension {
                got: values.len(),
                expected,
            });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(DescriptorError::InvalidValue);
        }
        Ok(())
    }
}
