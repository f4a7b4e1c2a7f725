//! facegate-core — biometric face-authentication primitives.
//!
//! Wraps a pluggable landmark model with geometric filtering, scores
//! captures against a quality gate, derives and encrypts face descriptors,
//! and classifies liveness sessions from temporal variance.

pub mod cipher;
pub mod descriptor;
pub mod detector;
pub mod lighting;
pub mod liveness;
pub mod quality;
pub mod types;

pub use cipher::{CipherError, DescriptorCipher};
pub use descriptor::{
    DescriptorError, DescriptorExtractor, Embedder, LandmarkGeometryEmbedder, MatchOutcome,
    DEFAULT_MATCH_THRESHOLD,
};
pub use detector::{DetectionConfig, DetectorError, FaceDetectionEngine, LandmarkModel, ModelSource};
pub use lighting::{LightingCondition, LightingReport};
pub use liveness::{LivenessConfig, LivenessResult, LivenessSession};
pub use quality::{QualityAssessment, QualityAssessor, QualityConfig, QualityIssue};
pub use types::{
    BoundingBox, CaptureFrame, EncryptedDescriptor, Expressions, FaceDescriptor,
    FaceObservation, FrameDims, Point,
};
