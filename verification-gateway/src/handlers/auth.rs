use askama::Template;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Form,
};
use secrecy::Secret;
use serde::Deserialize;
use tower_sessions::Session;

use crate::error::BackendError;
use crate::models::{AuthUser, Role};
use crate::services::access::safe_local_path;
use crate::utils::jwt::decode_jwt_claims;
use crate::AppState;

#[derive(Template)]
#[template(path = "signin.html")]
pub struct SignInTemplate {
    pub heading: &'static str,
    pub action: String,
    pub next: String,
    pub error: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct NextQuery {
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: Secret<String>,
    #[serde(default)]
    pub next: Option<String>,
}

fn signin_form(state: &AppState, role: Role, next: Option<&str>, error: Option<String>) -> SignInTemplate {
    let routes = &state.settings.routes;
    let (heading, action) = match role {
        Role::Patient => ("Patient sign in", routes.signin.clone()),
        Role::Clinician => ("Doctor sign in", routes.clinician_signin.clone()),
    };
    SignInTemplate {
        heading,
        action,
        next: next.and_then(safe_local_path).unwrap_or_default().to_string(),
        error,
    }
}

pub async fn signin_page(State(state): State<AppState>, Query(query): Query<NextQuery>) -> impl IntoResponse {
    signin_form(&state, Role::Patient, query.next.as_deref(), None)
}

pub async fn clinician_signin_page(
    State(state): State<AppState>,
    Query(query): Query<NextQuery>,
) -> impl IntoResponse {
    signin_form(&state, Role::Clinician, query.next.as_deref(), None)
}

pub async fn signin_handler(
    State(state): State<AppState>,
    session: Session,
    Form(payload): Form<SignInRequest>,
) -> Response {
    sign_in(&state, &session, Role::Patient, payload).await
}

pub async fn clinician_signin_handler(
    State(state): State<AppState>,
    session: Session,
    Form(payload): Form<SignInRequest>,
) -> Response {
    sign_in(&state, &session, Role::Clinician, payload).await
}

async fn sign_in(state: &AppState, session: &Session, role: Role, payload: SignInRequest) -> Response {
    let next = payload.next.as_deref();
    let failed = |message: String| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            signin_form(state, role, next, Some(message)),
        )
            .into_response()
    };

    let grant = match state.backend.sign_in(role, &payload.email, &payload.password).await {
        Ok(grant) => grant,
        Err(BackendError::Rejected { message, .. }) => {
            tracing::info!(role = role.as_str(), "Sign-in rejected by backend");
            return failed(message);
        }
        Err(e) => {
            tracing::error!("Sign-in request failed: {}", e);
            return failed("Something went wrong. Please try again.".to_string());
        }
    };

    // The backend names the user in the token; older deployments also return it.
    let user_id = match grant.user_id.clone() {
        Some(user_id) => user_id,
        None => match decode_jwt_claims(&grant.token) {
            Ok(claims) => claims.id,
            Err(e) => {
                tracing::error!("Failed to decode JWT claims: {}", e);
                return failed("Authentication error".to_string());
            }
        },
    };

    let user = AuthUser {
        user_id,
        role,
        access_token: grant.token,
    };
    if let Err(e) = session.cycle_id().await {
        tracing::error!("Failed to rotate session id: {}", e);
        return failed("Authentication error".to_string());
    }
    if let Err(e) = user.store(session).await {
        tracing::error!("Failed to store session: {}", e);
        return failed("Authentication error".to_string());
    }

    tracing::info!(user_id = %user.user_id, role = role.as_str(), "User signed in");

    let routes = &state.settings.routes;
    let target = next
        .and_then(safe_local_path)
        .map(str::to_string)
        .unwrap_or_else(|| match role {
            Role::Patient => routes.patient_home.clone(),
            Role::Clinician => routes.clinician_home.clone(),
        });
    Redirect::to(&target).into_response()
}

/// Explicit logout clears everything: the live scanner, both verification
/// copies and the session.
pub async fn logout_handler(State(state): State<AppState>, session: Session) -> impl IntoResponse {
    if let Some(user) = AuthUser::from_session(&session).await {
        state.scanners.teardown(&user.user_id);
        state.relay.remove(&user.user_id);
        if let Err(e) = state.verification.store_for(&user.user_id).clear() {
            tracing::error!(user_id = %user.user_id, "Failed to clear verification: {}", e);
        }
        tracing::info!(user_id = %user.user_id, "User signed out");
    }

    if let Err(e) = session.flush().await {
        tracing::error!("Failed to flush session: {}", e);
    }

    Redirect::to(&state.settings.routes.home)
}
