use std::time::Duration;

use askama::Template;
use axum::{
    extract::{Query, State},
    http::Uri,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use service_core::error::AppError;

use crate::models::AuthUser;
use crate::services::access::{safe_local_path, AccessDecision, AccessOutcome};
use crate::AppState;

/// How long a blocked page waits for a verification before answering.
const ACCESS_WATCH_TIMEOUT: Duration = Duration::from_secs(25);

/// Protected portal pages and their titles. Their bodies are rendered by the
/// portal's page layer; the gateway only decides whether they may render.
pub const PORTAL_PAGES: &[(&str, &str)] = &[
    ("/userdashboard", "Dashboard"),
    ("/bookappointment", "Book an appointment"),
    ("/patientappointments", "My appointments"),
    ("/patientreport", "Reports"),
    ("/alldoctors", "Doctors"),
    ("/chatbot", "Assistant"),
    ("/fitness", "Fitness"),
    ("/summarizer", "Report summarizer"),
    ("/calorieconvertor", "Calorie converter"),
    ("/arogyamcard", "Health card"),
    ("/doctordashboard", "Doctor dashboard"),
    ("/patient", "Patients"),
    ("/appointment", "Appointments"),
    ("/conference", "Conference"),
    ("/heartdisease", "Heart disease prediction"),
    ("/breastcancer", "Breast cancer prediction"),
    ("/pneumonia", "Pneumonia prediction"),
    ("/pcod", "PCOD prediction"),
];

#[derive(Template)]
#[template(path = "portal.html")]
pub struct PortalTemplate {
    pub title: String,
    pub role: &'static str,
    pub show_profile_banner: bool,
    pub registration: String,
}

#[derive(Template)]
#[template(path = "verification_required.html")]
pub struct VerificationRequiredTemplate {
    pub scan_location: String,
    /// The page that was blocked; polled for re-evaluation.
    pub destination: String,
}

fn title_for(state: &AppState, path: &str) -> String {
    let routes = &state.settings.routes;
    if path == routes.landing {
        return "Identity confirmed".to_string();
    }
    if path == routes.registration {
        return "Health profile registration".to_string();
    }
    PORTAL_PAGES
        .iter()
        .find(|(page, _)| *page == path)
        .map(|(_, title)| title.to_string())
        .unwrap_or_else(|| "Portal".to_string())
}

pub async fn portal_page(
    State(state): State<AppState>,
    Extension(outcome): Extension<AccessOutcome>,
    uri: Uri,
) -> impl IntoResponse {
    PortalTemplate {
        title: title_for(&state, uri.path()),
        role: outcome.role.as_str(),
        show_profile_banner: outcome.profile_needs_attention(),
        registration: state.settings.routes.registration.clone(),
    }
}

#[derive(Deserialize)]
pub struct WatchQuery {
    pub next: String,
}

/// Long poll behind the blocking notice: answers as soon as the user's
/// verification changes (for example from a scan in another tab), or with
/// the current decision after a timeout.
pub async fn watch_access(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<WatchQuery>,
) -> Result<Json<AccessDecision>, AppError> {
    let destination = safe_local_path(&query.next)
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("next must be a local path")))?;

    let mut watcher = state.guard.watch(user, destination);
    let current = watcher.current().await;
    if !matches!(current, AccessDecision::VerificationRequired { .. }) {
        return Ok(Json(current));
    }

    match tokio::time::timeout(ACCESS_WATCH_TIMEOUT, watcher.changed()).await {
        Ok(Some(decision)) => Ok(Json(decision)),
        Ok(None) | Err(_) => Ok(Json(current)),
    }
}
