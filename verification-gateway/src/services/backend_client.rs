use async_trait::async_trait;
use reqwest::{Client, Response};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::observability::TracedClientExt;

use crate::config::BackendSettings;
use crate::error::BackendError;
use crate::models::{ProfileStatus, Role};
use crate::services::access::ProfileStatusSource;

/// Successful sign-in answer of the portal backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInGrant {
    pub token: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Deserialize)]
struct BackendMessage {
    message: String,
}

pub struct BackendClient {
    client: Client,
    settings: BackendSettings,
}

impl BackendClient {
    pub fn new(settings: BackendSettings) -> Result<Self, BackendError> {
        let client = Client::builder().timeout(settings.timeout()).build()?;
        Ok(Self { client, settings })
    }

    pub fn base_url(&self) -> &str {
        &self.settings.url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.url.trim_end_matches('/'), path)
    }

    /// Exchanges credentials for an access token. Patients and clinicians
    /// sign in against different backend endpoints.
    pub async fn sign_in(
        &self,
        role: Role,
        email: &str,
        password: &Secret<String>,
    ) -> Result<SignInGrant, BackendError> {
        let path = match role {
            Role::Patient => &self.settings.patient_signin_path,
            Role::Clinician => &self.settings.clinician_signin_path,
        };
        let url = self.url(path);

        let response = self
            .client
            .traced_post(&url)
            .json(&serde_json::json!({
                "email": email,
                "password": password.expose_secret(),
            }))
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to send POST request to {}: {}", url, e);
                BackendError::Transport(e)
            })?;

        let response = Self::check(response).await?;
        let grant: SignInGrant = response
            .json()
            .await
            .map_err(|e| BackendError::Malformed(e.to_string()))?;
        if grant.token.is_empty() {
            return Err(BackendError::Malformed("sign-in returned an empty token".into()));
        }
        Ok(grant)
    }

    /// Fetches the health-profile registration fact for the token's user.
    pub async fn profile_status(&self, access_token: &str) -> Result<ProfileStatus, BackendError> {
        let url = self.url(&self.settings.profile_status_path);

        let response = self
            .client
            .traced_get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to send GET request to {}: {}", url, e);
                BackendError::Transport(e)
            })?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Malformed(e.to_string()))
    }

    async fn check(response: Response) -> Result<Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status.is_client_error() {
            if let Ok(body) = response.json::<BackendMessage>().await {
                return Err(BackendError::Rejected {
                    status,
                    message: body.message,
                });
            }
        }
        Err(BackendError::Status { status })
    }
}

#[async_trait]
impl ProfileStatusSource for BackendClient {
    async fn profile_status(&self, access_token: &str) -> Result<ProfileStatus, BackendError> {
        BackendClient::profile_status(self, access_token).await
    }
}
