use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;

use crate::AppState;

pub const SESSION_ACCESS_TOKEN: &str = "access_token";
pub const SESSION_USER_ID: &str = "user_id";
pub const SESSION_ROLE: &str = "role";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Patient,
    Clinician,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Clinician => "clinician",
        }
    }
}

/// Signed-in user context read from the session.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub role: Role,
    pub access_token: String,
}

impl AuthUser {
    /// Reads the user from the session. A session without a token (or with a
    /// half-written identity) is anonymous.
    pub async fn from_session(session: &Session) -> Option<Self> {
        let access_token: Option<String> =
            session.get(SESSION_ACCESS_TOKEN).await.unwrap_or(None);
        let user_id: Option<String> = session.get(SESSION_USER_ID).await.unwrap_or(None);
        let role: Option<Role> = session.get(SESSION_ROLE).await.unwrap_or(None);

        match (access_token, user_id) {
            (Some(access_token), Some(user_id)) if !access_token.is_empty() => Some(AuthUser {
                user_id,
                // Sessions written before roles were tracked belong to patients.
                role: role.unwrap_or(Role::Patient),
                access_token,
            }),
            _ => None,
        }
    }

    pub async fn store(&self, session: &Session) -> Result<(), tower_sessions::session::Error> {
        session
            .insert(SESSION_ACCESS_TOKEN, &self.access_token)
            .await?;
        session.insert(SESSION_USER_ID, &self.user_id).await?;
        session.insert(SESSION_ROLE, self.role).await?;
        Ok(())
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|_| {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to extract session",
                )
                    .into_response()
            })?;

        match AuthUser::from_session(&session).await {
            Some(user) => Ok(user),
            None => {
                let destination = parts
                    .uri
                    .path_and_query()
                    .map_or_else(|| parts.uri.path(), |pq| pq.as_str());
                let app = AppState::from_ref(state);
                let location = app.guard.routes().signin_location(destination);
                Err(Redirect::to(&location).into_response())
            }
        }
    }
}
