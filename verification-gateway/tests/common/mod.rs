//! Test helpers for verification-gateway integration tests.
//!
//! Provides a scripted camera platform that counts acquisitions and
//! releases, a scripted decoder, QR image generation and router plumbing.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, Response};
use base64::{engine::general_purpose, Engine as _};
use image::{DynamicImage, ImageBuffer, ImageOutputFormat, Luma};
use qrcode::{Color, QrCode};
use verification_gateway::config::{
    BackendSettings, ObservabilitySettings, RouteSettings, ScannerSettings, ServerSettings,
    Settings, StorageSettings,
};
use verification_gateway::error::{CameraError, StoreError};
use verification_gateway::models::{DeviceDescriptor, Frame};
use verification_gateway::services::camera::{CameraPlatform, CameraProvider, CaptureHandle, Captured};
use verification_gateway::services::decoder::FrameDecoder;
use verification_gateway::services::kv_store::KeyValueStore;
use verification_gateway::services::scanner::ScannerOptions;
use tokio::sync::Notify;

pub const DEVICE_ID: &str = "cam-1";

/// Camera platform with scripted behaviour.
pub struct FakeCamera {
    devices: Mutex<Vec<DeviceDescriptor>>,
    open_error: Mutex<Option<CameraError>>,
    open_gate: Mutex<Option<Arc<Notify>>>,
    /// Signalled whenever `open` is entered.
    pub open_entered: Arc<Notify>,
    stream_lost: Arc<AtomicBool>,
    acquisitions: AtomicUsize,
    releases: Arc<AtomicUsize>,
}

impl FakeCamera {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(vec![DeviceDescriptor::new(DEVICE_ID, "Back camera")]),
            open_error: Mutex::new(None),
            open_gate: Mutex::new(None),
            open_entered: Arc::new(Notify::new()),
            stream_lost: Arc::new(AtomicBool::new(false)),
            acquisitions: AtomicUsize::new(0),
            releases: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn set_devices(&self, devices: Vec<DeviceDescriptor>) {
        *self.devices.lock().unwrap() = devices;
    }

    pub fn fail_open_with(&self, error: Option<CameraError>) {
        *self.open_error.lock().unwrap() = error;
    }

    /// Makes `open` wait until the returned notify is signalled.
    pub fn gate_open(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.open_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn lose_stream(&self) {
        self.stream_lost.store(true, Ordering::SeqCst);
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Handles acquired and not yet released.
    pub fn held(&self) -> usize {
        self.acquisitions() - self.releases()
    }
}

#[async_trait]
impl CameraPlatform for FakeCamera {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, CameraError> {
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn open(&self, _device_id: &str) -> Result<Box<dyn CaptureHandle>, CameraError> {
        self.open_entered.notify_one();
        let gate = self.open_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(error) = self.open_error.lock().unwrap().clone() {
            return Err(error);
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeHandle {
            releases: self.releases.clone(),
            stream_lost: self.stream_lost.clone(),
        }))
    }
}

pub struct FakeProvider(pub Arc<FakeCamera>);

impl CameraProvider for FakeProvider {
    fn camera_for(&self, _user_id: &str) -> Arc<dyn CameraPlatform> {
        self.0.clone()
    }
}

struct FakeHandle {
    releases: Arc<AtomicUsize>,
    stream_lost: Arc<AtomicBool>,
}

#[async_trait]
impl CaptureHandle for FakeHandle {
    async fn next_frame(&self) -> Captured {
        if self.stream_lost.load(Ordering::SeqCst) {
            return Captured::Lost(CameraError::DeviceUnavailable);
        }
        Captured::Frame(blank_frame())
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Decoder that answers with a configurable payload, optionally waiting on a
/// gate first.
pub struct ScriptedDecoder {
    payload: Mutex<Option<String>>,
    gate: Mutex<Option<Arc<Notify>>>,
    /// Signalled whenever `decode` is entered.
    pub entered: Arc<Notify>,
    calls: AtomicUsize,
}

impl ScriptedDecoder {
    pub fn new(payload: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            payload: Mutex::new(payload.map(str::to_string)),
            gate: Mutex::new(None),
            entered: Arc::new(Notify::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_payload(&self, payload: Option<&str>) {
        *self.payload.lock().unwrap() = payload.map(str::to_string);
    }

    pub fn gate(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameDecoder for ScriptedDecoder {
    async fn decode(&self, _frame: Frame) -> Option<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.payload.lock().unwrap().clone()
    }
}

/// A store whose every operation fails.
pub struct BrokenStore;

impl KeyValueStore for BrokenStore {
    fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Unavailable("disk full".into()))
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("disk full".into()))
    }

    fn remove(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("disk full".into()))
    }
}

pub fn blank_frame() -> Frame {
    Frame::new(8, 8, vec![255; 64]).expect("Failed to build frame")
}

pub fn scanner_options() -> ScannerOptions {
    ScannerOptions {
        sample_interval: Duration::from_millis(100),
        success_delay: Duration::from_millis(1500),
        preferred_device: None,
        scan_path: "/scanner".to_string(),
        landing_path: "/auth".to_string(),
    }
}

/// A small PNG with no code in it.
pub fn blank_png() -> Vec<u8> {
    encode_png(ImageBuffer::from_pixel(16, 16, Luma([255u8])))
}

/// A PGM header declaring a `side` x `side` picture with no pixel data.
/// Decoding it would allocate `side * side` bytes.
pub fn oversize_pgm(side: u32) -> Vec<u8> {
    format!("P5\n{side} {side}\n255\n").into_bytes()
}

/// A PNG holding `payload` as a QR code.
pub fn qr_png(payload: &str) -> Vec<u8> {
    const SCALE: u32 = 4;
    const QUIET: u32 = 4;

    let code = QrCode::new(payload.as_bytes()).expect("Failed to encode QR code");
    let modules = code.width() as u32;
    let colors = code.to_colors();
    let side = (modules + QUIET * 2) * SCALE;

    let img = ImageBuffer::from_fn(side, side, |x, y| {
        let (mx, my) = (x / SCALE, y / SCALE);
        let inside = (QUIET..modules + QUIET).contains(&mx) && (QUIET..modules + QUIET).contains(&my);
        let dark = inside
            && colors[((my - QUIET) * modules + (mx - QUIET)) as usize] == Color::Dark;
        Luma([if dark { 0u8 } else { 255u8 }])
    });
    encode_png(img)
}

fn encode_png(img: ImageBuffer<Luma<u8>, Vec<u8>>) -> Vec<u8> {
    let mut png = Vec::new();
    DynamicImage::ImageLuma8(img)
        .write_to(&mut png, ImageOutputFormat::Png)
        .expect("Failed to encode PNG");
    png
}

/// An unsigned token in the backend's shape, naming `user_id`.
pub fn fake_jwt(user_id: &str) -> String {
    let claims = general_purpose::URL_SAFE_NO_PAD.encode(format!(r#"{{"id":"{user_id}"}}"#));
    format!("eyJhbGciOiJIUzI1NiJ9.{claims}.signature")
}

pub fn test_settings(backend_url: &str, data_dir: &Path) -> Settings {
    Settings {
        server: ServerSettings {
            host: "127.0.0.1".to_string(),
            port: 0,
            secure_cookies: false,
        },
        backend: BackendSettings {
            url: backend_url.to_string(),
            profile_status_path: "/health-card-status".to_string(),
            patient_signin_path: "/signin".to_string(),
            clinician_signin_path: "/doctor/signin".to_string(),
            timeout_ms: 2000,
        },
        routes: RouteSettings::default(),
        scanner: ScannerSettings {
            frames_per_second: 20,
            success_redirect_delay_ms: 0,
            preferred_device: None,
        },
        storage: StorageSettings {
            durable_path: data_dir.join("verification.json"),
            verification_key_prefix: "verification".to_string(),
        },
        observability: ObservabilitySettings::default(),
    }
}

/// The session cookie set by `response`, ready to send back.
pub fn session_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|value| value.split(';').next().map(str::to_string))
}

pub fn location(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

pub fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).expect("Failed to build request")
}

pub fn post_json(uri: &str, cookie: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::COOKIE, cookie)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("Failed to build request")
}

pub fn post_bytes(uri: &str, cookie: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::COOKIE, cookie)
        .header(header::CONTENT_TYPE, "image/png")
        .body(Body::from(body))
        .expect("Failed to build request")
}

pub fn post_form(uri: &str, form: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .expect("Failed to build request")
}

pub fn post_multipart_image(uri: &str, cookie: &str, image: &[u8]) -> Request<Body> {
    const BOUNDARY: &str = "gateway-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"card.png\"\r\nContent-Type: image/png\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(image);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::COOKIE, cookie)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("Failed to build request")
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    String::from_utf8(bytes.to_vec()).expect("Body is not UTF-8")
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_str(&body_string(response).await).expect("Body is not JSON")
}
