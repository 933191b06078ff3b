//! Camera platform backed by the browser.
//!
//! The page owns the physical camera because permission prompts need a user
//! gesture. It announces the devices it can see plus the permission state,
//! then pushes sampled frames while a capture handle is open.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use super::{CameraPlatform, CameraProvider, CaptureHandle, Captured, FrameMiss};
use crate::error::CameraError;
use crate::models::{DeviceDescriptor, Frame};

/// Frames buffered per open capture. Older frames are never queued behind
/// newer ones; when the buffer is full the incoming frame is dropped.
const FRAME_BUFFER: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    Granted,
    Denied,
    #[default]
    Prompt,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("no camera capture is open")]
    NotStreaming,
}

/// One relay camera per signed-in user.
#[derive(Default)]
pub struct RelayHub {
    cameras: DashMap<String, Arc<RelayCamera>>,
}

impl RelayHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn camera(&self, user_id: &str) -> Arc<RelayCamera> {
        self.cameras
            .entry(user_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Forgets the user's camera unless a capture is still open. Returns
    /// whether it was dropped.
    pub fn remove_idle(&self, user_id: &str) -> bool {
        self.cameras
            .remove_if(user_id, |_, camera| camera.open_device().is_none())
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    /// Forgets the user's camera. Any open capture sees its stream end.
    pub fn remove(&self, user_id: &str) {
        if let Some((_, camera)) = self.cameras.remove(user_id) {
            camera.close();
        }
    }
}

impl CameraProvider for RelayHub {
    fn camera_for(&self, user_id: &str) -> Arc<dyn CameraPlatform> {
        self.camera(user_id)
    }
}

#[derive(Default)]
pub struct RelayCamera {
    state: Arc<Mutex<RelayState>>,
}

#[derive(Default)]
struct RelayState {
    permission: PermissionState,
    devices: Vec<DeviceDescriptor>,
    capture: Option<OpenCapture>,
    next_capture_id: u64,
}

struct OpenCapture {
    id: u64,
    device_id: String,
    frames: mpsc::Sender<Captured>,
}

fn lock(state: &Mutex<RelayState>) -> MutexGuard<'_, RelayState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RelayCamera {
    pub fn announce(&self, devices: Vec<DeviceDescriptor>, permission: PermissionState) {
        let mut state = lock(&self.state);
        tracing::debug!(devices = devices.len(), ?permission, "Browser announced cameras");
        state.devices = devices;
        state.permission = permission;
    }

    pub fn permission(&self) -> PermissionState {
        lock(&self.state).permission
    }

    /// The device currently held by a capture handle, if any.
    pub fn open_device(&self) -> Option<String> {
        lock(&self.state)
            .capture
            .as_ref()
            .map(|capture| capture.device_id.clone())
    }

    pub fn push_frame(&self, frame: Frame) -> Result<(), RelayError> {
        self.deliver(Captured::Frame(frame))
    }

    /// The page sent something that is not a usable frame.
    pub fn push_miss(&self, reason: impl Into<String>) -> Result<(), RelayError> {
        self.deliver(Captured::Miss(FrameMiss::Dropped(reason.into())))
    }

    /// The page's media track ended or errored.
    pub fn report_lost(&self, error: CameraError) -> Result<(), RelayError> {
        self.deliver(Captured::Lost(error))
    }

    fn deliver(&self, captured: Captured) -> Result<(), RelayError> {
        let state = lock(&self.state);
        let capture = state.capture.as_ref().ok_or(RelayError::NotStreaming)?;
        match capture.frames.try_send(captured) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::trace!(device_id = %capture.device_id, "Relay buffer full, frame dropped");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(RelayError::NotStreaming),
        }
    }

    fn close(&self) {
        lock(&self.state).capture = None;
    }
}

#[async_trait]
impl CameraPlatform for RelayCamera {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, CameraError> {
        let state = lock(&self.state);
        if state.permission == PermissionState::Denied {
            return Err(CameraError::PermissionDenied);
        }
        Ok(state.devices.clone())
    }

    async fn open(&self, device_id: &str) -> Result<Box<dyn CaptureHandle>, CameraError> {
        let mut state = lock(&self.state);
        match state.permission {
            PermissionState::Granted => {}
            PermissionState::Denied => return Err(CameraError::PermissionDenied),
            PermissionState::Prompt => {
                return Err(CameraError::StartFailed(
                    "camera permission has not been granted yet".into(),
                ))
            }
        }
        if !state.devices.iter().any(|device| device.device_id == device_id) {
            return Err(CameraError::NoCameraFound);
        }
        if state.capture.is_some() {
            return Err(CameraError::DeviceBusy);
        }

        state.next_capture_id += 1;
        let id = state.next_capture_id;
        let (frames, receiver) = mpsc::channel(FRAME_BUFFER);
        state.capture = Some(OpenCapture {
            id,
            device_id: device_id.to_string(),
            frames,
        });
        tracing::info!(device_id, "Relay capture opened");

        Ok(Box::new(RelayHandle {
            id,
            state: self.state.clone(),
            frames: tokio::sync::Mutex::new(receiver),
        }))
    }
}

struct RelayHandle {
    id: u64,
    state: Arc<Mutex<RelayState>>,
    frames: tokio::sync::Mutex<mpsc::Receiver<Captured>>,
}

#[async_trait]
impl CaptureHandle for RelayHandle {
    async fn next_frame(&self) -> Captured {
        match self.frames.lock().await.recv().await {
            Some(captured) => captured,
            None => Captured::Lost(CameraError::DeviceUnavailable),
        }
    }

    fn release(&self) {
        let mut state = lock(&self.state);
        if state.capture.as_ref().is_some_and(|capture| capture.id == self.id) {
            state.capture = None;
            tracing::info!("Relay capture released");
        }
    }
}
