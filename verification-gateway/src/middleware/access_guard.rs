use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tower_sessions::Session;

use crate::handlers::portal::VerificationRequiredTemplate;
use crate::models::AuthUser;
use crate::services::access::AccessDecision;
use crate::AppState;

/// Runs the access guard in front of every protected route.
///
/// Leaving the scan surface tears the user's scanner down, so no camera
/// handle outlives the scan view.
pub async fn access_guard_middleware(
    State(state): State<AppState>,
    session: Session,
    mut request: Request,
    next: Next,
) -> Response {
    let user = AuthUser::from_session(&session).await;
    let path = request.uri().path().to_string();
    let destination = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| path.clone());

    if let Some(user) = &user {
        if !state.guard.routes().is_scan_surface(&path) {
            state.scanners.teardown(&user.user_id);
            state.relay.remove_idle(&user.user_id);
        }
    }

    match state.guard.check(user.as_ref(), &destination).await {
        AccessDecision::Render(outcome) => {
            request.extensions_mut().insert(outcome);
            next.run(request).await
        }
        AccessDecision::RedirectToSignIn { location } => Redirect::to(&location).into_response(),
        AccessDecision::VerificationRequired { scan_location } => (
            StatusCode::FORBIDDEN,
            VerificationRequiredTemplate {
                scan_location,
                destination,
            },
        )
            .into_response(),
    }
}
