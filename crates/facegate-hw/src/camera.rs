//! Exclusive ownership of the platform camera stream.
//!
//! [`CameraResource`] wraps a platform [`CameraDevice`]. At most one stream
//! is active per resource; `release` is idempotent and also runs on drop, so
//! every exit path stops the hardware exactly once.

use std::ops::{Deref, DerefMut};

use facegate_core::{CaptureFrame, FrameDims, LightingReport};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("no camera device found")]
    DeviceNotFound,
    #[error("camera is already in use")]
    DeviceBusy,
    #[error("camera has not been acquired")]
    NotAcquired,
    #[error("frame capture failed: {0}")]
    Capture(String),
}

/// Outcome of the platform media-capture permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    /// Not yet asked; the next request shows a prompt.
    Prompt,
    /// Previously denied; only a user action outside the app can change it.
    Denied,
}

/// Target for the live preview and the requested capture resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSurface {
    pub id: String,
    pub ideal: FrameDims,
}

impl VideoSurface {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ideal: FrameDims {
                width: 640,
                height: 480,
            },
        }
    }
}

/// Platform camera boundary.
pub trait CameraDevice: Send {
    /// Human-readable device label for metadata.
    fn label(&self) -> String;
    /// Current permission without prompting.
    fn permission(&self) -> PermissionState;
    /// Prompt the user if needed and return the outcome.
    fn request_permission(&mut self) -> PermissionState;
    /// Start streaming to the surface; returns the negotiated resolution.
    fn start(&mut self, surface: &VideoSurface) -> Result<FrameDims, CameraError>;
    fn grab(&mut self) -> Result<CaptureFrame, CameraError>;
    /// Stop all tracks. Called at most once per successful `start`.
    fn stop(&mut self);
}

pub struct CameraResource {
    device: Box<dyn CameraDevice>,
    active: Option<FrameDims>,
}

impl CameraResource {
    pub fn new(device: impl CameraDevice + 'static) -> Self {
        Self {
            device: Box::new(device),
            active: None,
        }
    }

    pub fn device_label(&self) -> String {
        self.device.label()
    }

    pub fn permission(&self) -> PermissionState {
        self.device.permission()
    }

    pub fn request_permission(&mut self) -> PermissionState {
        match self.device.permission() {
            PermissionState::Granted => PermissionState::Granted,
            PermissionState::Denied => PermissionState::Denied,
            PermissionState::Prompt => self.device.request_permission(),
        }
    }

    pub fn is_acquired(&self) -> bool {
        self.active.is_some()
    }

    pub fn resolution(&self) -> Option<FrameDims> {
        self.active
    }

    /// Start the hardware stream. Fails fast with `DeviceBusy` if this
    /// resource already holds a stream.
    pub fn acquire(&mut self, surface: &VideoSurface) -> Result<FrameDims, CameraError> {
        if self.active.is_some() {
            return Err(CameraError::DeviceBusy);
        }
        if self.request_permission() != PermissionState::Granted {
            tracing::warn!(surface = %surface.id, "camera permission denied");
            return Err(CameraError::PermissionDenied);
        }
        let dims = self.device.start(surface)?;
        tracing::info!(
            device = %self.device.label(),
            surface = %surface.id,
            width = dims.width,
            height = dims.height,
            "camera acquired"
        );
        self.active = Some(dims);
        Ok(dims)
    }

    /// Acquire and return a guard that releases on drop.
    pub fn lease(&mut self, surface: &VideoSurface) -> Result<CameraLease<'_>, CameraError> {
        self.acquire(surface)?;
        Ok(CameraLease { camera: self })
    }

    pub fn capture_frame(&mut self) -> Result<CaptureFrame, CameraError> {
        if self.active.is_none() {
            return Err(CameraError::NotAcquired);
        }
        self.device.grab()
    }

    /// Sample a frame and classify ambient lighting.
    pub fn measure_lighting(&mut self) -> Result<LightingReport, CameraError> {
        let frame = self.capture_frame()?;
        let report = LightingReport::measure(&frame);
        tracing::debug!(
            brightness = report.brightness,
            condition = %report.condition,
            "lighting check"
        );
        Ok(report)
    }

    /// Stop all hardware tracks. Safe to call any number of times.
    pub fn release(&mut self) {
        if self.active.take().is_some() {
            self.device.stop();
            tracing::info!(device = %self.device.label(), "camera released");
        }
    }
}

impl Drop for CameraResource {
    fn drop(&mut self) {
        self.release();
    }
}

/// Scoped acquisition: the stream is released when the lease goes out of
/// scope, whether by normal return, `?`, or unwind.
pub struct CameraLease<'a> {
    camera: &'a mut CameraResource,
}

impl Deref for CameraLease<'_> {
    type Target = CameraResource;

    fn deref(&self) -> &CameraResource {
        self.camera
    }
}

impl DerefMut for CameraLease<'_> {
    fn deref_mut(&mut self) -> &mut CameraResource {
        self.camera
    }
}

impl Drop for CameraLease<'_> {
    fn drop(&mut self) {
        self.camera.release();
    }
}
