use serde::Serialize;
use service_core::error::AppError;
use thiserror::Error;

/// Why the camera path could not produce (or keep producing) frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraError {
    #[error("camera permission was denied")]
    PermissionDenied,

    #[error("no camera was found")]
    NoCameraFound,

    #[error("the camera is in use by another application")]
    DeviceBusy,

    #[error("the camera is unavailable")]
    DeviceUnavailable,

    #[error("the camera failed to start: {0}")]
    StartFailed(String),

    /// `stop()` or `dispose()` won the race against an in-flight `start()`.
    #[error("camera start was cancelled")]
    Cancelled,

    #[error("the camera session has been disposed")]
    SessionDisposed,
}

/// What the operator can do from an error screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    Retry,
    UploadImage,
}

impl CameraError {
    pub fn kind(&self) -> &'static str {
        match self {
            CameraError::PermissionDenied => "permission_denied",
            CameraError::NoCameraFound => "no_camera_found",
            CameraError::DeviceBusy => "device_busy",
            CameraError::DeviceUnavailable => "device_unavailable",
            CameraError::StartFailed(_) => "start_failed",
            CameraError::Cancelled => "cancelled",
            CameraError::SessionDisposed => "session_disposed",
        }
    }

    /// Every error offers the still-image fallback. Retrying only makes
    /// sense when the hardware might come back without being replaced; for a
    /// denied permission the retry is the explicit re-prompt.
    pub fn next_actions(&self) -> Vec<NextAction> {
        match self {
            CameraError::NoCameraFound => vec![NextAction::UploadImage],
            _ => vec![NextAction::Retry, NextAction::UploadImage],
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("store contents could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("backend answered {status}")]
    Status { status: reqwest::StatusCode },

    /// A 4xx carrying a message meant for the user.
    #[error("{message}")]
    Rejected {
        status: reqwest::StatusCode,
        message: String,
    },

    #[error("backend response was malformed: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum ScannerError {
    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error("scanner cannot {operation} while {state}")]
    NotReady {
        operation: &'static str,
        state: &'static str,
    },

    #[error("the scan attempt was superseded")]
    Superseded,

    #[error("the uploaded image could not be read: {0}")]
    InvalidImage(String),

    #[error("no health card code was found in the image")]
    NoCodeFound,

    #[error("verification could not be saved: {0}")]
    Store(#[from] StoreError),
}

impl From<ScannerError> for AppError {
    fn from(err: ScannerError) -> Self {
        match err {
            ScannerError::NotReady { .. } | ScannerError::Superseded => {
                AppError::Conflict(anyhow::Error::new(err))
            }
            ScannerError::InvalidImage(_) => AppError::BadRequest(anyhow::Error::new(err)),
            ScannerError::NoCodeFound => AppError::UnprocessableEntity(anyhow::Error::new(err)),
            ScannerError::Camera(_) | ScannerError::Store(_) => {
                AppError::InternalError(anyhow::Error::new(err))
            }
        }
    }
}
