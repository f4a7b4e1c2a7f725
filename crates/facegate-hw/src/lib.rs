//! facegate-hw — camera access for face authentication sessions.

pub mod camera;

pub use camera::{
    CameraDevice, CameraError, CameraLease, CameraResource, PermissionState, VideoSurface,
};
