use askama::Template;
use axum::{
    body::Bytes,
    extract::{Multipart, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use service_core::error::AppError;

use crate::error::CameraError;
use crate::handlers::auth::NextQuery;
use crate::models::{AuthUser, DeviceDescriptor, Frame};
use crate::services::access::safe_local_path;
use crate::services::camera::PermissionState;
use crate::services::scanner::ScannerSnapshot;
use crate::AppState;

#[derive(Template)]
#[template(path = "scanner.html")]
pub struct ScannerTemplate {
    pub api: String,
    pub next: String,
    pub frame_interval_ms: u64,
}

#[derive(Deserialize, Default)]
pub struct StartRequest {
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Deserialize)]
pub struct DeviceAnnouncement {
    #[serde(default)]
    pub devices: Vec<DeviceDescriptor>,
    pub permission: PermissionState,
}

pub async fn scanner_page(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<NextQuery>,
) -> impl IntoResponse {
    state.scanners.get_or_create(&user.user_id);
    ScannerTemplate {
        api: state.settings.routes.scan.clone(),
        next: query
            .next
            .as_deref()
            .and_then(safe_local_path)
            .unwrap_or_default()
            .to_string(),
        frame_interval_ms: state.settings.scanner.sample_interval().as_millis() as u64,
    }
}

/// Starts the camera. Camera failures come back as an `error` snapshot,
/// not as an HTTP error.
pub async fn start_scan(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<StartRequest>,
) -> Result<Json<ScannerSnapshot>, AppError> {
    let scanner = state.scanners.get_or_create(&user.user_id);
    scanner.start(request.next.as_deref()).await?;
    Ok(Json(scanner.snapshot()))
}

pub async fn scan_status(State(state): State<AppState>, user: AuthUser) -> Json<ScannerSnapshot> {
    Json(state.scanners.get_or_create(&user.user_id).snapshot())
}

pub async fn reset_scan(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ScannerSnapshot>, AppError> {
    let scanner = state.scanners.get_or_create(&user.user_id);
    scanner.reset()?;
    Ok(Json(scanner.snapshot()))
}

/// Still-image fallback: a multipart form with an `image` field.
pub async fn upload_image(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<NextQuery>,
    mut multipart: Multipart,
) -> Result<Json<ScannerSnapshot>, AppError> {
    let mut image = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.into()))?
    {
        if field.name() == Some("image") {
            image = Some(field.bytes().await.map_err(|e| AppError::BadRequest(e.into()))?);
            break;
        }
    }
    let image =
        image.ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("missing image field")))?;

    let scanner = state.scanners.get_or_create(&user.user_id);
    scanner
        .decode_still_image(&image, query.next.as_deref())
        .await?;
    Ok(Json(scanner.snapshot()))
}

/// The page reports which cameras it can see and whether it may use them.
pub async fn announce_devices(
    State(state): State<AppState>,
    user: AuthUser,
    Json(announcement): Json<DeviceAnnouncement>,
) -> StatusCode {
    state
        .relay
        .camera(&user.user_id)
        .announce(announcement.devices, announcement.permission);
    StatusCode::NO_CONTENT
}

/// One sampled frame from the page's camera, as an encoded image body.
pub async fn push_frame(
    State(state): State<AppState>,
    user: AuthUser,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let decoded = tokio::task::spawn_blocking(move || Frame::from_image_bytes(&body))
        .await
        .map_err(|e| AppError::InternalError(e.into()))?;

    let camera = state.relay.camera(&user.user_id);
    let delivered = match decoded {
        Ok(frame) => camera.push_frame(frame),
        Err(e) => camera.push_miss(e.to_string()),
    };
    delivered.map_err(|e| AppError::Conflict(e.into()))?;
    Ok(StatusCode::ACCEPTED)
}

/// The page's media track ended (device unplugged, permission revoked).
pub async fn track_ended(State(state): State<AppState>, user: AuthUser) -> Result<StatusCode, AppError> {
    state
        .relay
        .camera(&user.user_id)
        .report_lost(CameraError::DeviceUnavailable)
        .map_err(|e| AppError::Conflict(e.into()))?;
    Ok(StatusCode::ACCEPTED)
}
