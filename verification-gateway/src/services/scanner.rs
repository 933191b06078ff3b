//! The operator-facing scan workflow.
//!
//! [`ScannerState`] is an explicit tagged state with a single transition
//! function, [`ScannerState::next`]. [`ScannerController`] drives a
//! [`CameraSession`] through it and turns a decoded payload into a
//! [`VerificationRecord`] write.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::config::{RouteSettings, ScannerSettings};
use crate::error::{CameraError, NextAction, ScannerError};
use crate::models::{DeviceDescriptor, Frame, VerificationRecord};
use crate::services::access::safe_local_path;
use crate::services::camera::{CameraPlatform, CameraSession, DecodeCallbacks};
use crate::services::decoder::FrameDecoder;
use crate::services::metrics;
use crate::services::verification_store::VerificationStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanSource {
    Camera,
    StillImage,
}

/// Why the scanner is showing an error screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanFault {
    Camera(CameraError),
    /// A code was decoded but the durable store refused the record.
    RecordNotSaved(String),
}

impl ScanFault {
    pub fn kind(&self) -> &'static str {
        match self {
            ScanFault::Camera(err) => err.kind(),
            ScanFault::RecordNotSaved(_) => "record_not_saved",
        }
    }

    pub fn next_actions(&self) -> Vec<NextAction> {
        match self {
            ScanFault::Camera(err) => err.next_actions(),
            ScanFault::RecordNotSaved(_) => vec![NextAction::Retry, NextAction::UploadImage],
        }
    }
}

impl std::fmt::Display for ScanFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanFault::Camera(err) => write!(f, "{err}"),
            ScanFault::RecordNotSaved(reason) => {
                write!(f, "the verification could not be saved: {reason}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSuccess {
    pub record: VerificationRecord,
    pub source: ScanSource,
    pub redirect_to: String,
    /// The success screen stays up until this instant.
    pub redirect_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScannerState {
    Ready,
    /// `device_id` is unset while the camera is being enumerated.
    Scanning { device_id: Option<String> },
    Success(ScanSuccess),
    Error { fault: ScanFault },
}

#[derive(Debug, Clone)]
pub enum ScannerEvent {
    Start,
    DeviceSelected(String),
    Decoded(ScanSuccess),
    Failed(ScanFault),
    Reset,
    Unmount,
}

impl ScannerState {
    pub fn name(&self) -> &'static str {
        match self {
            ScannerState::Ready => "ready",
            ScannerState::Scanning { .. } => "scanning",
            ScannerState::Success(_) => "success",
            ScannerState::Error { .. } => "error",
        }
    }

    /// The state `event` leads to, or `None` when the event is not valid
    /// here and must be ignored.
    pub fn next(&self, event: &ScannerEvent) -> Option<ScannerState> {
        use ScannerEvent as Event;
        use ScannerState as State;

        match (self, event) {
            (State::Ready, Event::Start) => Some(State::Scanning { device_id: None }),
            (State::Scanning { .. }, Event::DeviceSelected(device_id)) => Some(State::Scanning {
                device_id: Some(device_id.clone()),
            }),
            (State::Scanning { .. }, Event::Decoded(success))
                if success.source == ScanSource::Camera =>
            {
                Some(State::Success(success.clone()))
            }
            (State::Ready | State::Error { .. }, Event::Decoded(success))
                if success.source == ScanSource::StillImage =>
            {
                Some(State::Success(success.clone()))
            }
            (State::Scanning { .. }, Event::Failed(fault)) => Some(State::Error {
                fault: fault.clone(),
            }),
            (State::Ready | State::Error { .. }, Event::Failed(fault @ ScanFault::RecordNotSaved(_))) => {
                Some(State::Error {
                    fault: fault.clone(),
                })
            }
            (State::Ready | State::Error { .. } | State::Success(_), Event::Reset) => Some(State::Ready),
            (_, Event::Unmount) => Some(State::Ready),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorView {
    pub kind: &'static str,
    pub message: String,
}

/// What the scan page polls for.
#[derive(Debug, Clone, Serialize)]
pub struct ScannerSnapshot {
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorView>,
    pub next_actions: Vec<NextAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
    /// Set once the success screen has been shown long enough.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<String>,
}

impl ScannerSnapshot {
    pub fn of(state: &ScannerState, now: Instant) -> Self {
        let mut snapshot = Self {
            state: state.name(),
            device_id: None,
            error: None,
            next_actions: Vec::new(),
            verified_at: None,
            redirect_to: None,
        };
        match state {
            ScannerState::Ready => {}
            ScannerState::Scanning { device_id } => snapshot.device_id = device_id.clone(),
            ScannerState::Success(success) => {
                snapshot.verified_at = Some(success.record.timestamp);
                if now >= success.redirect_at {
                    snapshot.redirect_to = Some(success.redirect_to.clone());
                }
            }
            ScannerState::Error { fault } => {
                snapshot.error = Some(ErrorView {
                    kind: fault.kind(),
                    message: fault.to_string(),
                });
                snapshot.next_actions = fault.next_actions();
            }
        }
        snapshot
    }
}

#[derive(Debug, Clone)]
pub struct ScannerOptions {
    pub sample_interval: Duration,
    pub success_delay: Duration,
    pub preferred_device: Option<String>,
    /// Recorded as the record's origin path.
    pub scan_path: String,
    /// Where a successful scan goes when no `next` destination was given.
    pub landing_path: String,
}

impl ScannerOptions {
    pub fn from_settings(scanner: &ScannerSettings, routes: &RouteSettings) -> Self {
        Self {
            sample_interval: scanner.sample_interval(),
            success_delay: scanner.success_redirect_delay(),
            preferred_device: scanner.preferred_device.clone(),
            scan_path: routes.scan.clone(),
            landing_path: routes.landing.clone(),
        }
    }

    fn pick_device(&self, devices: &[DeviceDescriptor]) -> Option<String> {
        self.preferred_device
            .as_ref()
            .and_then(|preferred| devices.iter().find(|device| &device.device_id == preferred))
            .or_else(|| devices.first())
            .map(|device| device.device_id.clone())
    }
}

type SuccessHook = Arc<dyn Fn(&VerificationRecord) + Send + Sync>;

/// Cloneable handle on one user's scan workflow.
#[derive(Clone)]
pub struct ScannerController {
    core: Arc<ScannerCore>,
}

struct ScannerCore {
    camera: Arc<dyn CameraPlatform>,
    decoder: Arc<dyn FrameDecoder>,
    store: VerificationStore,
    options: ScannerOptions,
    inner: Mutex<ControllerInner>,
    on_success: Mutex<Option<SuccessHook>>,
}

struct ControllerInner {
    state: ScannerState,
    /// Bumped whenever the current attempt is abandoned. Camera callbacks
    /// carry the attempt they belong to and are ignored once it moves on.
    attempt: u64,
    session: Option<Arc<CameraSession>>,
    redirect_to: String,
}

impl ControllerInner {
    fn apply(&mut self, event: &ScannerEvent) -> bool {
        match self.state.next(event) {
            Some(next) => {
                self.state = next;
                true
            }
            None => false,
        }
    }

    fn abandon_attempt(&mut self) {
        self.attempt += 1;
        if let Some(session) = self.session.take() {
            session.dispose();
        }
    }
}

impl ScannerController {
    pub fn new(
        camera: Arc<dyn CameraPlatform>,
        decoder: Arc<dyn FrameDecoder>,
        store: VerificationStore,
        options: ScannerOptions,
    ) -> Self {
        let redirect_to = options.landing_path.clone();
        Self {
            core: Arc::new(ScannerCore {
                camera,
                decoder,
                store,
                options,
                inner: Mutex::new(ControllerInner {
                    state: ScannerState::Ready,
                    attempt: 0,
                    session: None,
                    redirect_to,
                }),
                on_success: Mutex::new(None),
            }),
        }
    }

    /// Called after every successful verification write.
    pub fn on_success(&self, hook: impl Fn(&VerificationRecord) + Send + Sync + 'static) {
        *self
            .core
            .on_success
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(hook));
    }

    pub fn state(&self) -> ScannerState {
        self.core.lock().state.clone()
    }

    pub fn snapshot(&self) -> ScannerSnapshot {
        ScannerSnapshot::of(&self.core.lock().state, Instant::now())
    }

    /// Whether a camera session currently holds hardware.
    pub fn holds_camera(&self) -> bool {
        self.core
            .lock()
            .session
            .as_ref()
            .is_some_and(|session| session.holds_handle())
    }

    /// `Ready → Scanning`: picks a device and starts the camera.
    ///
    /// A no-op while already scanning. Camera failures are not returned;
    /// they move the scanner to `Error`, visible through [`Self::snapshot`].
    /// `next` is where a successful scan redirects, if it is a safe local
    /// path.
    pub async fn start(&self, next: Option<&str>) -> Result<(), ScannerError> {
        let core = &self.core;
        let (attempt, session) = {
            let mut inner = core.lock();
            if matches!(inner.state, ScannerState::Scanning { .. }) {
                return Ok(());
            }
            if !inner.apply(&ScannerEvent::Start) {
                return Err(ScannerError::NotReady {
                    operation: "start",
                    state: inner.state.name(),
                });
            }
            inner.abandon_attempt();
            inner.redirect_to = core.redirect_target(next);

            let session = Arc::new(CameraSession::new(
                core.camera.clone(),
                core.decoder.clone(),
                core.options.sample_interval,
            ));
            inner.session = Some(session.clone());
            (inner.attempt, session)
        };

        let devices = match session.enumerate_devices().await {
            Ok(devices) => devices,
            Err(err) => return core.camera_failed(attempt, err),
        };
        let Some(device_id) = core.options.pick_device(&devices) else {
            return core.camera_failed(attempt, CameraError::NoCameraFound);
        };

        {
            let mut inner = core.lock();
            if inner.attempt != attempt {
                return Err(ScannerError::Superseded);
            }
            inner.apply(&ScannerEvent::DeviceSelected(device_id.clone()));
        }

        match session.start(&device_id, ScannerCore::callbacks(core, attempt)).await {
            Ok(()) => Ok(()),
            Err(CameraError::Cancelled | CameraError::SessionDisposed) => {
                Err(ScannerError::Superseded)
            }
            Err(err) => core.camera_failed(attempt, err),
        }
    }

    /// The still-image fallback. Accepted from `Ready` or `Error`; an image
    /// without a code leaves the state as it was.
    pub async fn decode_still_image(
        &self,
        bytes: &[u8],
        next: Option<&str>,
    ) -> Result<VerificationRecord, ScannerError> {
        let core = &self.core;
        let attempt = {
            let mut inner = core.lock();
            if !matches!(inner.state, ScannerState::Ready | ScannerState::Error { .. }) {
                return Err(ScannerError::NotReady {
                    operation: "decode an uploaded image",
                    state: inner.state.name(),
                });
            }
            if next.is_some() {
                inner.redirect_to = core.redirect_target(next);
            }
            inner.attempt
        };

        let bytes = bytes.to_vec();
        let frame = tokio::task::spawn_blocking(move || Frame::from_image_bytes(&bytes))
            .await
            .map_err(|err| ScannerError::InvalidImage(format!("image decoder failed: {err}")))?
            .map_err(|err| ScannerError::InvalidImage(err.to_string()))?;
        let payload = core
            .decoder
            .decode(frame)
            .await
            .ok_or(ScannerError::NoCodeFound)?;
        core.complete(attempt, ScanSource::StillImage, &payload)
    }

    /// `Error | Success → Ready`, stopping any camera first.
    pub fn reset(&self) -> Result<(), ScannerError> {
        let mut inner = self.core.lock();
        let Some(next) = inner.state.next(&ScannerEvent::Reset) else {
            return Err(ScannerError::NotReady {
                operation: "reset",
                state: inner.state.name(),
            });
        };
        inner.abandon_attempt();
        inner.state = next;
        Ok(())
    }

    /// Forced cleanup from any state. Leaves no camera handle behind.
    pub fn teardown(&self) {
        let mut inner = self.core.lock();
        inner.abandon_attempt();
        inner.apply(&ScannerEvent::Unmount);
    }
}

impl ScannerCore {
    fn lock(&self) -> MutexGuard<'_, ControllerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn redirect_target(&self, next: Option<&str>) -> String {
        next.and_then(safe_local_path)
            .map(str::to_string)
            .unwrap_or_else(|| self.options.landing_path.clone())
    }

    fn callbacks(core: &Arc<Self>, attempt: u64) -> DecodeCallbacks {
        let decoded: Weak<Self> = Arc::downgrade(core);
        let lost: Weak<Self> = Arc::downgrade(core);

        DecodeCallbacks::new(move |payload| {
            if let Some(core) = decoded.upgrade() {
                if let Err(err) = core.complete(attempt, ScanSource::Camera, &payload) {
                    tracing::debug!(error = %err, "Camera decode not applied");
                }
            }
        })
        .on_frame_error(|miss| tracing::trace!(?miss, "No code in frame"))
        .on_stream_error(move |err| {
            if let Some(core) = lost.upgrade() {
                let _ = core.camera_failed(attempt, err);
            }
        })
    }

    fn camera_failed(&self, attempt: u64, err: CameraError) -> Result<(), ScannerError> {
        let mut inner = self.lock();
        if inner.attempt != attempt {
            return Err(ScannerError::Superseded);
        }
        tracing::warn!(kind = err.kind(), error = %err, "Scanner camera failed");
        if inner.apply(&ScannerEvent::Failed(ScanFault::Camera(err))) {
            metrics::record_scan_outcome("camera_error");
        }
        Ok(())
    }

    /// The `Success` state a decode for `attempt` would move to, if the
    /// attempt is still current and the transition is valid.
    fn decoded_transition(
        &self,
        inner: &ControllerInner,
        attempt: u64,
        source: ScanSource,
        record: &VerificationRecord,
    ) -> Result<ScannerState, ScannerError> {
        if inner.attempt != attempt {
            tracing::debug!(?source, "Discarding decode from an abandoned attempt");
            return Err(ScannerError::Superseded);
        }
        let success = ScanSuccess {
            record: record.clone(),
            source,
            redirect_to: inner.redirect_to.clone(),
            redirect_at: Instant::now() + self.options.success_delay,
        };
        inner
            .state
            .next(&ScannerEvent::Decoded(success))
            .ok_or(ScannerError::NotReady {
                operation: "accept a decoded code",
                state: inner.state.name(),
            })
    }

    /// Writes the record and moves to `Success`. Nothing is written unless
    /// the transition is valid for the attempt the payload belongs to. The
    /// write runs outside the controller lock, so the transition is checked
    /// again once it returns.
    fn complete(
        &self,
        attempt: u64,
        source: ScanSource,
        payload: &str,
    ) -> Result<VerificationRecord, ScannerError> {
        let record = VerificationRecord::new(self.options.scan_path.clone());
        self.decoded_transition(&self.lock(), attempt, source, &record)?;

        let written = self.store.write(&record);

        {
            let mut inner = self.lock();
            let next = self.decoded_transition(&inner, attempt, source, &record)?;
            if let Err(err) = written {
                inner.abandon_attempt();
                inner.apply(&ScannerEvent::Failed(ScanFault::RecordNotSaved(err.to_string())));
                return Err(ScannerError::Store(err));
            }

            let redirect_to = inner.redirect_to.clone();
            inner.state = next;
            if let Some(session) = inner.session.take() {
                session.dispose();
            }
            metrics::record_scan_outcome(match source {
                ScanSource::Camera => "decoded",
                ScanSource::StillImage => "upload_decoded",
            });
            tracing::info!(
                ?source,
                payload_len = payload.len(),
                %redirect_to,
                "Health card verified"
            );
        }

        let hook = self
            .on_success
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(hook) = hook {
            hook(&record);
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success(source: ScanSource) -> ScanSuccess {
        ScanSuccess {
            record: VerificationRecord::new("/scanner"),
            source,
            redirect_to: "/auth".into(),
            redirect_at: Instant::now(),
        }
    }

    fn error_state() -> ScannerState {
        ScannerState::Error {
            fault: ScanFault::Camera(CameraError::PermissionDenied),
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let scanning = ScannerState::Ready.next(&ScannerEvent::Start).unwrap();
        assert_eq!(scanning, ScannerState::Scanning { device_id: None });

        let selected = scanning
            .next(&ScannerEvent::DeviceSelected("cam-1".into()))
            .unwrap();
        let done = selected
            .next(&ScannerEvent::Decoded(success(ScanSource::Camera)))
            .unwrap();
        assert_eq!(done.name(), "success");
        assert_eq!(done.next(&ScannerEvent::Reset), Some(ScannerState::Ready));
    }

    #[test]
    fn test_camera_decode_only_counts_while_scanning() {
        let camera = ScannerEvent::Decoded(success(ScanSource::Camera));
        assert!(ScannerState::Ready.next(&camera).is_none());
        assert!(error_state().next(&camera).is_none());
    }

    #[test]
    fn test_still_image_is_accepted_from_ready_and_error() {
        let upload = ScannerEvent::Decoded(success(ScanSource::StillImage));
        assert!(ScannerState::Ready.next(&upload).is_some());
        assert!(error_state().next(&upload).is_some());
        assert!(ScannerState::Scanning { device_id: None }.next(&upload).is_none());
    }

    #[test]
    fn test_reset_is_refused_while_scanning_but_unmount_is_not() {
        let scanning = ScannerState::Scanning {
            device_id: Some("cam-1".into()),
        };
        assert!(scanning.next(&ScannerEvent::Reset).is_none());
        assert_eq!(scanning.next(&ScannerEvent::Unmount), Some(ScannerState::Ready));
    }

    #[test]
    fn test_camera_failure_only_from_scanning() {
        let fault = ScannerEvent::Failed(ScanFault::Camera(CameraError::DeviceBusy));
        assert!(ScannerState::Ready.next(&fault).is_none());
        let failed = ScannerState::Scanning { device_id: None }.next(&fault).unwrap();
        assert_eq!(failed.name(), "error");
        assert!(failed.next(&ScannerEvent::Start).is_none());
    }

    #[test]
    fn test_snapshot_withholds_redirect_until_due() {
        let mut pending = success(ScanSource::Camera);
        let now = Instant::now();
        pending.redirect_at = now + Duration::from_millis(1500);
        let state = ScannerState::Success(pending);

        assert!(ScannerSnapshot::of(&state, now).redirect_to.is_none());
        let due = ScannerSnapshot::of(&state, now + Duration::from_millis(1500));
        assert_eq!(due.redirect_to.as_deref(), Some("/auth"));
    }

    #[test]
    fn test_error_snapshot_offers_next_actions() {
        let snapshot = ScannerSnapshot::of(&error_state(), Instant::now());
        let error = snapshot.error.unwrap();
        assert_eq!(error.kind, "permission_denied");
        assert_eq!(
            snapshot.next_actions,
            vec![NextAction::Retry, NextAction::UploadImage]
        );
    }

    #[test]
    fn test_pick_device_prefers_configured() {
        let mut options = ScannerOptions::from_settings(
            &ScannerSettings::default(),
            &RouteSettings::default(),
        );
        let devices = vec![
            DeviceDescriptor::new("front", "Front"),
            DeviceDescriptor::new("back", "Back"),
        ];
        assert_eq!(options.pick_device(&devices).as_deref(), Some("front"));

        options.preferred_device = Some("back".into());
        assert_eq!(options.pick_device(&devices).as_deref(), Some("back"));

        options.preferred_device = Some("gone".into());
        assert_eq!(options.pick_device(&devices).as_deref(), Some("front"));
        assert!(options.pick_device(&[]).is_none());
    }
}
