//! Camera hardware seams and the session that owns a live capture.

pub mod relay;
pub mod session;

use async_trait::async_trait;

use crate::error::CameraError;
use crate::models::{DeviceDescriptor, Frame};

pub use relay::{PermissionState, RelayCamera, RelayError, RelayHub};
pub use session::{CameraSession, CameraStatus, DecodeCallbacks};

/// Device enumeration and capture acquisition.
#[async_trait]
pub trait CameraPlatform: Send + Sync {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, CameraError>;

    /// Acquires an exclusive capture handle on `device_id`.
    async fn open(&self, device_id: &str) -> Result<Box<dyn CaptureHandle>, CameraError>;
}

/// A live capture stream. Holding one means holding the hardware.
#[async_trait]
pub trait CaptureHandle: Send + Sync {
    /// Waits for the next frame. May never complete on hung hardware.
    async fn next_frame(&self) -> Captured;

    /// Gives the hardware back. [`CameraSession`] calls this exactly once.
    fn release(&self);
}

#[derive(Debug)]
pub enum Captured {
    Frame(Frame),
    /// Nothing usable this tick; sampling continues.
    Miss(FrameMiss),
    /// The stream is gone.
    Lost(CameraError),
}

/// A per-frame, non-fatal miss. The expected steady state while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameMiss {
    /// The decoder saw no code in the frame.
    NoCode,
    /// The platform had no frame ready.
    Dropped(String),
}

/// Resolves camera platforms per signed-in user.
pub trait CameraProvider: Send + Sync {
    fn camera_for(&self, user_id: &str) -> std::sync::Arc<dyn CameraPlatform>;
}
