//! Ambient lighting estimate from mean frame luminance.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::CaptureFrame;

/// Every Nth pixel is sampled.
const SAMPLE_STRIDE: usize = 8;

const TOO_DARK_BELOW: f32 = 40.0;
const DARK_BELOW: f32 = 80.0;
const OPTIMAL_UP_TO: f32 = 180.0;
const BRIGHT_UP_TO: f32 = 220.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightingCondition {
    TooDark,
    Dark,
    Optimal,
    Bright,
    TooBright,
}

impl LightingCondition {
    /// Classify a mean luminance value in 0..=255.
    pub fn from_brightness(brightness: f32) -> Self {
        if brightness < TOO_DARK_BELOW {
            Self::TooDark
        } else if brightness < DARK_BELOW {
            Self::Dark
        } else if brightness <= OPTIMAL_UP_TO {
            Self::Optimal
        } else if brightness <= BRIGHT_UP_TO {
            Self::Bright
        } else {
            Self::TooBright
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TooDark => "too_dark",
            Self::Dark => "dark",
            Self::Optimal => "optimal",
            Self::Bright => "bright",
            Self::TooBright => "too_bright",
        }
    }
}

impl fmt::Display for LightingCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LightingReport {
    pub brightness: f32,
    pub condition: LightingCondition,
}

impl LightingReport {
    pub fn measure(frame: &CaptureFrame) -> Self {
        let brightness = mean_luminance(frame);
        Self {
            brightness,
            condition: LightingCondition::from_brightness(brightness),
        }
    }
}

/// Rec. 601 luma averaged over a strided subsample of pixels.
pub fn mean_luminance(frame: &CaptureFrame) -> f32 {
    let mut total = 0.0f64;
    let mut count = 0u64;
    for pixel in frame.image.pixels().step_by(SAMPLE_STRIDE) {
        let [r, g, b] = pixel.0;
        total += 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64;
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }
    (total / count as f64) as f32
}
