use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of points in the 68-point landmark layout.
pub const LANDMARK_COUNT: usize = 68;

/// Expression categories reported by the expression head, in vector order.
pub const EXPRESSION_CATEGORIES: [&str; 7] = [
    "neutral",
    "happy",
    "sad",
    "angry",
    "fearful",
    "disgusted",
    "surprised",
];

// 68-point layout indices.
const LEFT_EYE: std::ops::Range<usize> = 36..42;
const RIGHT_EYE: std::ops::Range<usize> = 42..48;
const NOSE_TIP: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn midpoint(&self, other: &Point) -> Point {
        Point::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }
}

/// Axis-aligned face region in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Face size as used by the size filters: the larger of width and height.
    pub fn max_dimension(&self) -> f32 {
        self.width.max(self.height)
    }
}

/// Per-category expression probabilities, ordered as [`EXPRESSION_CATEGORIES`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Expressions {
    pub values: [f32; 7],
}

impl Expressions {
    pub fn new(values: [f32; 7]) -> Self {
        Self { values }
    }

    pub fn sum(&self) -> f32 {
        self.values.iter().sum()
    }

    /// Summed absolute per-category difference.
    pub fn delta(&self, other: &Expressions) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).abs())
            .sum()
    }

    /// The strongest category and its probability.
    pub fn dominant(&self) -> (&'static str, f32) {
        let mut best = 0;
        for (i, v) in self.values.iter().enumerate() {
            if *v > self.values[best] {
                best = i;
            }
        }
        (EXPRESSION_CATEGORIES[best], self.values[best])
    }
}

/// One detected face: geometry, 68 landmarks, detector confidence, expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceObservation {
    pub bounding_box: BoundingBox,
    pub landmarks: Vec<Point>,
    pub confidence: f32,
    pub expressions: Expressions,
}

impl FaceObservation {
    pub fn has_full_landmarks(&self) -> bool {
        self.landmarks.len() == LANDMARK_COUNT
    }

    pub fn left_eye_center(&self) -> Option<Point> {
        mean_point(self.landmarks.get(LEFT_EYE)?)
    }

    pub fn right_eye_center(&self) -> Option<Point> {
        mean_point(self.landmarks.get(RIGHT_EYE)?)
    }

    pub fn nose_tip(&self) -> Option<Point> {
        self.landmarks.get(NOSE_TIP).copied()
    }

    /// Horizontal nose-tip offset from the inter-eye midpoint, normalised by
    /// inter-eye distance. `None` when landmarks are missing or the eyes
    /// coincide.
    pub fn frontal_offset(&self) -> Option<f32> {
        let left = self.left_eye_center()?;
        let right = self.right_eye_center()?;
        let nose = self.nose_tip()?;
        let eye_distance = left.distance(&right);
        if eye_distance <= f32::EPSILON {
            return None;
        }
        let mid = left.midpoint(&right);
        Some((nose.x - mid.x).abs() / eye_distance)
    }
}

fn mean_point(points: &[Point]) -> Option<Point> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f32;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    Some(Point::new(sx / n, sy / n))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameDims {
    pub width: u32,
    pub height: u32,
}

/// A single camera snapshot. Consumed immediately, never retained.
#[derive(Clone)]
pub struct CaptureFrame {
    pub image: RgbImage,
    pub captured_at: DateTime<Utc>,
}

impl CaptureFrame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: Utc::now(),
        }
    }

    pub fn dims(&self) -> FrameDims {
        FrameDims {
            width: self.image.width(),
            height: self.image.height(),
        }
    }
}

impl fmt::Debug for CaptureFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureFrame")
            .field("dims", &self.dims())
            .field("captured_at", &self.captured_at)
            .finish()
    }
}

/// Fixed-length identity embedding. Plaintext only ever lives in process
/// memory; `Debug` prints the length, never the values.
#[derive(Clone, PartialEq)]
pub struct FaceDescriptor {
    values: Vec<f32>,
}

impl FaceDescriptor {
    /// Callers go through [`crate::descriptor`] validation before building one.
    pub(crate) fn from_validated(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn euclidean_distance(&self, other: &FaceDescriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }
}

impl fmt::Debug for FaceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FaceDescriptor({} values, redacted)", self.values.len())
    }
}

/// Opaque AES-256-GCM blob wrapping a serialized [`FaceDescriptor`]:
/// 12-byte nonce || ciphertext || 16-byte tag.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedDescriptor(Vec<u8>);

impl EncryptedDescriptor {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for EncryptedDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptedDescriptor({} bytes)", self.0.len())
    }
}
