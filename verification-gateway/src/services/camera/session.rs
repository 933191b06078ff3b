use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{CameraPlatform, CaptureHandle, Captured, FrameMiss};
use crate::error::CameraError;
use crate::models::DeviceDescriptor;
use crate::services::decoder::FrameDecoder;
use crate::services::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraStatus {
    Idle,
    RequestingPermission,
    Streaming,
    Decoded,
    Failed,
}

type DecodedFn = Box<dyn FnOnce(String) + Send>;
type FrameErrorFn = Box<dyn Fn(FrameMiss) + Send + Sync>;
type StreamErrorFn = Box<dyn FnOnce(CameraError) + Send>;

/// Where a session reports its results.
///
/// `on_decoded` and `on_stream_error` are mutually exclusive and fire at most
/// once. `on_frame_error` fires for every missed frame while streaming.
pub struct DecodeCallbacks {
    on_decoded: DecodedFn,
    on_frame_error: FrameErrorFn,
    on_stream_error: StreamErrorFn,
}

impl DecodeCallbacks {
    pub fn new(on_decoded: impl FnOnce(String) + Send + 'static) -> Self {
        Self {
            on_decoded: Box::new(on_decoded),
            on_frame_error: Box::new(|_| {}),
            on_stream_error: Box::new(|_| {}),
        }
    }

    pub fn on_frame_error(mut self, on_frame_error: impl Fn(FrameMiss) + Send + Sync + 'static) -> Self {
        self.on_frame_error = Box::new(on_frame_error);
        self
    }

    pub fn on_stream_error(mut self, on_stream_error: impl FnOnce(CameraError) + Send + 'static) -> Self {
        self.on_stream_error = Box::new(on_stream_error);
        self
    }
}

/// Exclusive owner of one camera capture and its decode loop.
///
/// At most one capture handle is held at a time, and only while the status is
/// [`CameraStatus::Streaming`]. Every way out of `Streaming` releases the
/// handle before the new status becomes visible. Dropping the session
/// disposes it.
pub struct CameraSession {
    platform: Arc<dyn CameraPlatform>,
    decoder: Arc<dyn FrameDecoder>,
    sample_interval: Duration,
    shared: Arc<Mutex<SessionState>>,
}

struct SessionState {
    status: CameraStatus,
    device_id: Option<String>,
    last_error: Option<CameraError>,
    /// Bumped by every start and stop. Acquisitions and samplers only act
    /// while the epoch they were started under is still current.
    epoch: u64,
    handle: Option<Arc<dyn CaptureHandle>>,
    sampler: Option<JoinHandle<()>>,
    disposed: bool,
}

impl SessionState {
    fn is_live(&self, epoch: u64) -> bool {
        self.epoch == epoch && self.status == CameraStatus::Streaming
    }

    fn leave_streaming(&mut self, next: CameraStatus) {
        if let Some(handle) = self.handle.take() {
            handle.release();
            metrics::record_handle_released();
        }
        self.status = next;
    }

    fn halt(&mut self) {
        if matches!(self.status, CameraStatus::Idle | CameraStatus::Failed) {
            return;
        }
        self.epoch += 1;
        if let Some(sampler) = self.sampler.take() {
            sampler.abort();
        }
        self.leave_streaming(CameraStatus::Idle);
    }
}

fn lock(shared: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CameraSession {
    pub fn new(
        platform: Arc<dyn CameraPlatform>,
        decoder: Arc<dyn FrameDecoder>,
        sample_interval: Duration,
    ) -> Self {
        Self {
            platform,
            decoder,
            sample_interval,
            shared: Arc::new(Mutex::new(SessionState {
                status: CameraStatus::Idle,
                device_id: None,
                last_error: None,
                epoch: 0,
                handle: None,
                sampler: None,
                disposed: false,
            })),
        }
    }

    pub fn status(&self) -> CameraStatus {
        lock(&self.shared).status
    }

    pub fn device_id(&self) -> Option<String> {
        lock(&self.shared).device_id.clone()
    }

    pub fn last_error(&self) -> Option<CameraError> {
        lock(&self.shared).last_error.clone()
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.shared).disposed
    }

    pub fn holds_handle(&self) -> bool {
        lock(&self.shared).handle.is_some()
    }

    /// Lists capture devices. An empty list is [`CameraError::NoCameraFound`].
    pub async fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, CameraError> {
        if self.is_disposed() {
            return Err(CameraError::SessionDisposed);
        }

        let result = self
            .platform
            .enumerate_devices()
            .await
            .and_then(|devices| {
                if devices.is_empty() {
                    Err(CameraError::NoCameraFound)
                } else {
                    Ok(devices)
                }
            });

        if let Err(err) = &result {
            let mut state = lock(&self.shared);
            if state.status == CameraStatus::Idle {
                state.status = CameraStatus::Failed;
                state.last_error = Some(err.clone());
            }
        }
        result
    }

    /// Acquires `device_id` and starts sampling frames into the decoder.
    ///
    /// Returns once the handle is held (or acquisition failed). Calling this
    /// while already starting or streaming is a no-op. If `stop()` runs
    /// while the platform is still acquiring, the late handle is released
    /// immediately and [`CameraError::Cancelled`] is returned.
    pub async fn start(&self, device_id: &str, callbacks: DecodeCallbacks) -> Result<(), CameraError> {
        let epoch = {
            let mut state = lock(&self.shared);
            if state.disposed {
                return Err(CameraError::SessionDisposed);
            }
            if matches!(
                state.status,
                CameraStatus::Streaming | CameraStatus::RequestingPermission
            ) {
                tracing::debug!(device_id = ?state.device_id, "Camera already starting or streaming");
                return Ok(());
            }
            state.epoch += 1;
            state.status = CameraStatus::RequestingPermission;
            state.device_id = Some(device_id.to_string());
            state.last_error = None;
            state.epoch
        };

        let mut acquisition = PendingAcquisition {
            shared: &self.shared,
            epoch,
            settled: false,
        };
        let acquired = self.platform.open(device_id).await;
        acquisition.settled = true;

        let mut state = lock(&self.shared);
        if state.epoch != epoch {
            if let Ok(handle) = acquired {
                handle.release();
                metrics::record_handle_released();
            }
            tracing::debug!(device_id, "Released camera acquired after stop");
            return Err(CameraError::Cancelled);
        }

        let handle: Arc<dyn CaptureHandle> = match acquired {
            Ok(handle) => Arc::from(handle),
            Err(err) => {
                tracing::warn!(device_id, error = %err, "Camera failed to start");
                state.status = CameraStatus::Failed;
                state.last_error = Some(err.clone());
                return Err(err);
            }
        };

        state.handle = Some(handle.clone());
        state.status = CameraStatus::Streaming;
        let sampler = Sampler {
            shared: self.shared.clone(),
            epoch,
            handle,
            decoder: self.decoder.clone(),
            interval: self.sample_interval,
        };
        state.sampler = Some(tokio::spawn(sampler.run(callbacks)));
        tracing::info!(device_id, "Camera streaming");
        Ok(())
    }

    /// Idempotent. Releases the handle if one is held and returns to `Idle`;
    /// a no-op when already `Idle` or `Failed`.
    pub fn stop(&self) {
        lock(&self.shared).halt();
    }

    /// `stop()`, after which every `start()` fails with
    /// [`CameraError::SessionDisposed`].
    pub fn dispose(&self) {
        let mut state = lock(&self.shared);
        state.halt();
        state.disposed = true;
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Puts the session back to `Idle` if a `start()` future is dropped while
/// the platform is still acquiring.
struct PendingAcquisition<'a> {
    shared: &'a Mutex<SessionState>,
    epoch: u64,
    settled: bool,
}

impl Drop for PendingAcquisition<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = lock(self.shared);
        if state.epoch == self.epoch && state.status == CameraStatus::RequestingPermission {
            state.epoch += 1;
            state.status = CameraStatus::Idle;
        }
    }
}

struct Sampler {
    shared: Arc<Mutex<SessionState>>,
    epoch: u64,
    handle: Arc<dyn CaptureHandle>,
    decoder: Arc<dyn FrameDecoder>,
    interval: Duration,
}

impl Sampler {
    async fn run(self, callbacks: DecodeCallbacks) {
        let DecodeCallbacks {
            on_decoded,
            on_frame_error,
            on_stream_error,
        } = callbacks;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if !self.is_live() {
                return;
            }

            let frame = match self.handle.next_frame().await {
                Captured::Frame(frame) => frame,
                Captured::Miss(miss) => {
                    if self.is_live() {
                        tracing::trace!(?miss, "Frame missed");
                        on_frame_error(miss);
                    }
                    continue;
                }
                Captured::Lost(err) => {
                    if self.settle(CameraStatus::Failed, Some(err.clone())) {
                        tracing::warn!(error = %err, "Camera stream lost");
                        on_stream_error(err);
                    }
                    return;
                }
            };

            match self.decoder.decode(frame).await {
                Some(payload) => {
                    // Single shot: the first decode ends sampling for this session.
                    if self.settle(CameraStatus::Decoded, None) {
                        on_decoded(payload);
                    } else {
                        tracing::debug!("Discarded decode that completed after stop");
                    }
                    return;
                }
                None => {
                    if self.is_live() {
                        on_frame_error(FrameMiss::NoCode);
                    }
                }
            }
        }
    }

    fn is_live(&self) -> bool {
        lock(&self.shared).is_live(self.epoch)
    }

    /// Moves out of `Streaming` if this sampler is still the live one.
    fn settle(&self, next: CameraStatus, error: Option<CameraError>) -> bool {
        let mut state = lock(&self.shared);
        if !state.is_live(self.epoch) {
            return false;
        }
        // This task; dropping the JoinHandle detaches it.
        state.sampler = None;
        state.last_error = error;
        state.leave_streaming(next);
        true
    }
}
