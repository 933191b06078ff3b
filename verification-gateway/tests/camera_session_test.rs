//! CameraSession lifecycle tests: handle ownership, single-shot decoding and
//! stop/start races.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{FakeCamera, ScriptedDecoder, DEVICE_ID};
use tokio::sync::mpsc;
use verification_gateway::error::CameraError;
use verification_gateway::services::camera::{CameraSession, CameraStatus, DecodeCallbacks};

const INTERVAL: Duration = Duration::from_millis(100);

fn session(camera: &Arc<FakeCamera>, decoder: &Arc<ScriptedDecoder>) -> Arc<CameraSession> {
    Arc::new(CameraSession::new(camera.clone(), decoder.clone(), INTERVAL))
}

fn decoded_channel() -> (DecodeCallbacks, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callbacks = DecodeCallbacks::new(move |payload| {
        let _ = tx.send(payload);
    });
    (callbacks, rx)
}

#[tokio::test(start_paused = true)]
async fn test_start_streams_and_repeated_stop_releases_once() {
    // Arrange
    let camera = FakeCamera::new();
    let decoder = ScriptedDecoder::new(None);
    let session = session(&camera, &decoder);
    let (callbacks, _decoded) = decoded_channel();

    // Act
    session.start(DEVICE_ID, callbacks).await.unwrap();

    // Assert
    assert_eq!(session.status(), CameraStatus::Streaming);
    assert_eq!(session.device_id().as_deref(), Some(DEVICE_ID));
    assert!(session.holds_handle());
    assert_eq!(camera.held(), 1);

    let (a, b) = (session.clone(), session.clone());
    let first = tokio::spawn(async move { a.stop() });
    let second = tokio::spawn(async move { b.stop() });
    first.await.unwrap();
    second.await.unwrap();
    session.stop();

    assert_eq!(session.status(), CameraStatus::Idle);
    assert!(!session.holds_handle());
    assert_eq!(camera.acquisitions(), 1);
    assert_eq!(camera.releases(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_frame_misses_do_not_change_state() {
    let camera = FakeCamera::new();
    let decoder = ScriptedDecoder::new(None);
    let session = session(&camera, &decoder);
    let misses = Arc::new(AtomicUsize::new(0));
    let counted = misses.clone();
    let callbacks = DecodeCallbacks::new(|_| panic!("nothing should decode"))
        .on_frame_error(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });

    session.start(DEVICE_ID, callbacks).await.unwrap();
    tokio::time::sleep(INTERVAL * 5).await;

    assert!(misses.load(Ordering::SeqCst) >= 3);
    assert_eq!(session.status(), CameraStatus::Streaming);
    assert!(session.last_error().is_none());
    session.stop();
}

#[tokio::test(start_paused = true)]
async fn test_first_decode_wins_and_releases_the_camera() {
    // Arrange
    let camera = FakeCamera::new();
    let decoder = ScriptedDecoder::new(Some("HEALTHCARD-42"));
    let session = session(&camera, &decoder);
    let (callbacks, mut decoded) = decoded_channel();

    // Act
    session.start(DEVICE_ID, callbacks).await.unwrap();
    let payload = decoded.recv().await.unwrap();
    tokio::time::sleep(INTERVAL * 10).await;

    // Assert
    assert_eq!(payload, "HEALTHCARD-42");
    assert_eq!(session.status(), CameraStatus::Decoded);
    assert_eq!(decoder.calls(), 1);
    assert!(decoded.recv().await.is_none());
    assert_eq!(camera.releases(), 1);
    assert_eq!(camera.held(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_decode_finishing_after_stop_is_discarded() {
    // Arrange
    let camera = FakeCamera::new();
    let decoder = ScriptedDecoder::new(Some("HEALTHCARD-42"));
    let gate = decoder.gate();
    let session = session(&camera, &decoder);
    let (callbacks, mut decoded) = decoded_channel();
    session.start(DEVICE_ID, callbacks).await.unwrap();
    decoder.entered.notified().await;

    // Act
    session.stop();
    gate.notify_one();
    tokio::time::sleep(INTERVAL * 5).await;

    // Assert
    assert!(decoded.try_recv().is_err());
    assert_eq!(session.status(), CameraStatus::Idle);
    assert_eq!(camera.releases(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_acquisition_releases_the_late_handle() {
    // Arrange
    let camera = FakeCamera::new();
    let gate = camera.gate_open();
    let decoder = ScriptedDecoder::new(Some("HEALTHCARD-42"));
    let session = session(&camera, &decoder);
    let (callbacks, mut decoded) = decoded_channel();

    let starting = session.clone();
    let start = tokio::spawn(async move { starting.start(DEVICE_ID, callbacks).await });
    camera.open_entered.notified().await;
    assert_eq!(session.status(), CameraStatus::RequestingPermission);

    // Act
    session.stop();
    gate.notify_one();
    let result = start.await.unwrap();
    tokio::time::sleep(INTERVAL * 5).await;

    // Assert
    assert_eq!(result, Err(CameraError::Cancelled));
    assert_eq!(session.status(), CameraStatus::Idle);
    assert!(!session.holds_handle());
    assert_eq!(camera.acquisitions(), 1);
    assert_eq!(camera.releases(), 1);
    assert!(decoded.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_start_while_streaming_does_not_acquire_twice() {
    let camera = FakeCamera::new();
    let decoder = ScriptedDecoder::new(None);
    let session = session(&camera, &decoder);

    session.start(DEVICE_ID, decoded_channel().0).await.unwrap();
    session.start(DEVICE_ID, decoded_channel().0).await.unwrap();

    assert_eq!(camera.acquisitions(), 1);
    session.stop();
    assert_eq!(camera.held(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rapid_start_stop_cycles_leave_nothing_held() {
    let camera = FakeCamera::new();
    let decoder = ScriptedDecoder::new(None);
    let session = session(&camera, &decoder);

    for _ in 0..5 {
        session.start(DEVICE_ID, decoded_channel().0).await.unwrap();
        assert_eq!(camera.held(), 1);
        session.stop();
        assert_eq!(camera.held(), 0);
    }

    assert_eq!(camera.acquisitions(), 5);
    assert_eq!(camera.releases(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_failed_start_holds_nothing() {
    // Arrange
    let camera = FakeCamera::new();
    camera.fail_open_with(Some(CameraError::DeviceBusy));
    let decoder = ScriptedDecoder::new(None);
    let session = session(&camera, &decoder);

    // Act
    let result = session.start(DEVICE_ID, decoded_channel().0).await;

    // Assert
    assert_eq!(result, Err(CameraError::DeviceBusy));
    assert_eq!(session.status(), CameraStatus::Failed);
    assert_eq!(session.last_error(), Some(CameraError::DeviceBusy));
    assert!(!session.holds_handle());

    session.stop();
    assert_eq!(session.status(), CameraStatus::Failed);
    assert_eq!(camera.releases(), 0);

    camera.fail_open_with(None);
    session.start(DEVICE_ID, decoded_channel().0).await.unwrap();
    assert_eq!(session.status(), CameraStatus::Streaming);
    session.stop();
}

#[tokio::test(start_paused = true)]
async fn test_lost_stream_fails_and_releases() {
    let camera = FakeCamera::new();
    let decoder = ScriptedDecoder::new(None);
    let session = session(&camera, &decoder);
    let (tx, mut lost) = mpsc::unbounded_channel();
    let callbacks = DecodeCallbacks::new(|_| panic!("nothing should decode"))
        .on_stream_error(move |err| {
            let _ = tx.send(err);
        });

    session.start(DEVICE_ID, callbacks).await.unwrap();
    camera.lose_stream();

    assert_eq!(lost.recv().await, Some(CameraError::DeviceUnavailable));
    assert_eq!(session.status(), CameraStatus::Failed);
    assert_eq!(session.last_error(), Some(CameraError::DeviceUnavailable));
    assert_eq!(camera.releases(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disposed_session_refuses_to_start() {
    let camera = FakeCamera::new();
    let decoder = ScriptedDecoder::new(None);
    let session = session(&camera, &decoder);
    session.start(DEVICE_ID, decoded_channel().0).await.unwrap();

    session.dispose();
    session.dispose();

    assert!(session.is_disposed());
    assert_eq!(camera.releases(), 1);
    assert_eq!(
        session.start(DEVICE_ID, decoded_channel().0).await,
        Err(CameraError::SessionDisposed)
    );
    assert_eq!(camera.acquisitions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_the_session_releases_the_camera() {
    let camera = FakeCamera::new();
    let decoder = ScriptedDecoder::new(None);
    let session = CameraSession::new(camera.clone(), decoder.clone(), INTERVAL);
    session.start(DEVICE_ID, decoded_channel().0).await.unwrap();

    drop(session);

    assert_eq!(camera.held(), 0);
}

#[tokio::test]
async fn test_empty_device_list_is_no_camera_found() {
    let camera = FakeCamera::new();
    camera.set_devices(Vec::new());
    let decoder = ScriptedDecoder::new(None);
    let session = session(&camera, &decoder);

    assert_eq!(
        session.enumerate_devices().await,
        Err(CameraError::NoCameraFound)
    );
    assert_eq!(session.status(), CameraStatus::Failed);
}
