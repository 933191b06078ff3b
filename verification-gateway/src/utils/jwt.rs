use anyhow::Result;
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;

/// Claims the portal backend puts in its access tokens.
#[derive(Debug, Deserialize)]
pub struct JwtClaims {
    pub id: String,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
}

/// Decode JWT claims without validation
///
/// The token comes straight from the backend's sign-in response and is only
/// forwarded back to that backend, which verifies it. The gateway just needs
/// the user id for keying its own state.
pub fn decode_jwt_claims(token: &str) -> Result<JwtClaims> {
    let parts: Vec<&str> = token.split('.').collect();

    if parts.len() != 3 {
        return Err(anyhow::anyhow!("Invalid JWT format"));
    }

    let payload = general_purpose::URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .map_err(|e| anyhow::anyhow!("Failed to decode JWT payload: {}", e))?;

    let claims: JwtClaims = serde_json::from_slice(&payload)
        .map_err(|e| anyhow::anyhow!("Failed to parse JWT claims: {}", e))?;

    Ok(claims)
}
