use axum::{
    extract::DefaultBodyLimit,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use service_core::middleware::{request_id_middleware, security_headers_middleware};
use time::Duration;
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer};

use crate::handlers::{
    app::{health_check, index},
    auth::{
        clinician_signin_handler, clinician_signin_page, logout_handler, signin_handler,
        signin_page,
    },
    portal::{portal_page, watch_access, PORTAL_PAGES},
    scanner::{
        announce_devices, push_frame, reset_scan, scan_status, scanner_page, start_scan,
        track_ended, upload_image,
    },
};
use crate::middleware::access_guard_middleware;
use crate::AppState;

/// Still images come straight from phone cameras.
const UPLOAD_LIMIT_BYTES: usize = 10 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    // Session setup
    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(state.settings.server.secure_cookies)
        .with_expiry(Expiry::OnInactivity(Duration::hours(24)));

    let routes = &state.settings.routes;
    let scan = routes.scan.as_str();

    let mut guarded = Router::new()
        .route(scan, get(scanner_page))
        .route(&format!("{scan}/start"), post(start_scan))
        .route(&format!("{scan}/status"), get(scan_status))
        .route(&format!("{scan}/reset"), post(reset_scan))
        .route(
            &format!("{scan}/upload"),
            post(upload_image).layer(DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES)),
        )
        .route(&format!("{scan}/devices"), post(announce_devices))
        .route(&format!("{scan}/frames"), post(push_frame))
        .route(&format!("{scan}/track-ended"), post(track_ended))
        .route(&routes.registration, get(portal_page))
        .route(&routes.landing, get(portal_page));
    for (page, _) in PORTAL_PAGES {
        guarded = guarded.route(page, get(portal_page));
    }
    let guarded =
        guarded.route_layer(from_fn_with_state(state.clone(), access_guard_middleware));

    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/metrics", get(crate::handlers::metrics::metrics))
        .route(&routes.signin, get(signin_page).post(signin_handler))
        .route(
            &routes.clinician_signin,
            get(clinician_signin_page).post(clinician_signin_handler),
        )
        .route("/logout", get(logout_handler))
        .route("/access/watch", get(watch_access))
        .merge(guarded)
        .layer(session_layer)
        .layer(from_fn(security_headers_middleware))
        // Add tracing layer
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        // Add tracing middleware for request_id
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}
