use serde::{Deserialize, Serialize};

/// Body of the backend profile-status endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileStatus {
    #[serde(
        rename = "isHealthProfileRegistered",
        alias = "isHealthCardRegistered",
        default
    )]
    pub is_health_profile_registered: bool,
    #[serde(default)]
    pub user: Option<ProfileUser>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileUser {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
}

/// Profile-completeness fact as seen by the access guard. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileCompleteness {
    Registered,
    NotRegistered,
    /// The backend could not be asked, or gave an unusable answer.
    Unknown,
}

impl ProfileCompleteness {
    pub fn needs_attention(self) -> bool {
        !matches!(self, ProfileCompleteness::Registered)
    }
}

impl From<&ProfileStatus> for ProfileCompleteness {
    fn from(status: &ProfileStatus) -> Self {
        if status.is_health_profile_registered {
            ProfileCompleteness::Registered
        } else {
            ProfileCompleteness::NotRegistered
        }
    }
}
