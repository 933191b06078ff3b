use askama::Template;
use axum::{extract::State, response::IntoResponse};
use tower_sessions::Session;

use crate::models::{AuthUser, Role};
use crate::AppState;

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub signed_in: bool,
    pub home: String,
    pub signin: String,
    pub clinician_signin: String,
}

pub async fn index(State(state): State<AppState>, session: Session) -> impl IntoResponse {
    let routes = &state.settings.routes;
    let user = AuthUser::from_session(&session).await;
    IndexTemplate {
        signed_in: user.is_some(),
        home: match user.map(|u| u.role) {
            Some(Role::Clinician) => routes.clinician_home.clone(),
            _ => routes.patient_home.clone(),
        },
        signin: routes.signin.clone(),
        clinician_signin: routes.clinician_signin.clone(),
    }
}

pub async fn health_check() -> &'static str {
    "OK"
}
