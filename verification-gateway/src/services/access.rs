//! The access guard: one decision per navigation.
//!
//! Precedence, first match wins:
//! 1. not signed in: redirect to sign-in, remembering the destination
//! 2. clinician: render
//! 3. scan, registration or landing surface: render
//! 4. not verified: blocking notice linking to the scan surface
//! 5. otherwise render, with the profile fact attached as advice
//!
//! Only the local verification store gates access. The backend profile
//! fact is fetched for step 5 and never denies anything.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::RouteSettings;
use crate::error::BackendError;
use crate::models::{AuthUser, ProfileCompleteness, ProfileStatus, Role};
use crate::services::metrics;
use crate::services::verification_store::{VerificationBackends, VerificationFeed};

#[async_trait]
pub trait ProfileStatusSource: Send + Sync {
    async fn profile_status(&self, access_token: &str) -> Result<ProfileStatus, BackendError>;
}

/// Returns `next` when it is a path on this site, rejecting absolute and
/// protocol-relative URLs. Only visible ASCII is accepted: browsers drop
/// tabs and newlines while parsing, so `/\t/host` would leave the site.
pub fn safe_local_path(next: &str) -> Option<&str> {
    if !next.bytes().all(|b| b.is_ascii_graphic()) {
        return None;
    }
    let mut chars = next.chars();
    let local = chars.next() == Some('/') && !matches!(chars.next(), Some('/' | '\\'));
    local.then_some(next)
}

#[derive(Debug, Clone)]
pub struct GuardRoutes {
    pub signin: String,
    pub scan: String,
    pub registration: String,
    pub landing: String,
}

impl GuardRoutes {
    pub fn from_settings(routes: &RouteSettings) -> Self {
        Self {
            signin: routes.signin.clone(),
            scan: routes.scan.clone(),
            registration: routes.registration.clone(),
            landing: routes.landing.clone(),
        }
    }

    /// The scan page and everything under it.
    pub fn is_scan_surface(&self, path: &str) -> bool {
        within(path, &self.scan)
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        self.is_scan_surface(path) || within(path, &self.registration) || within(path, &self.landing)
    }

    pub fn signin_location(&self, destination: &str) -> String {
        format!("{}?next={}", self.signin, urlencoding::encode(destination))
    }

    pub fn scan_location(&self, destination: &str) -> String {
        format!("{}?next={}", self.scan, urlencoding::encode(destination))
    }
}

fn within(path: &str, surface: &str) -> bool {
    path == surface
        || path
            .strip_prefix(surface)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// What a rendered page learns from the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessOutcome {
    pub role: Role,
    /// `None` when the guard had no reason to ask (clinicians, exempt pages).
    pub profile: Option<ProfileCompleteness>,
}

impl AccessOutcome {
    pub fn profile_needs_attention(&self) -> bool {
        self.profile.is_some_and(ProfileCompleteness::needs_attention)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AccessDecision {
    Render(AccessOutcome),
    RedirectToSignIn { location: String },
    /// Show the blocking notice. Never an automatic redirect: the camera
    /// prompt needs a user gesture on the scan page.
    VerificationRequired { scan_location: String },
}

impl AccessDecision {
    pub fn label(&self) -> &'static str {
        match self {
            AccessDecision::Render(_) => "render",
            AccessDecision::RedirectToSignIn { .. } => "redirect_to_signin",
            AccessDecision::VerificationRequired { .. } => "verification_required",
        }
    }
}

enum Gate<'a> {
    SignIn,
    Pass(Role),
    Notice,
    Content(&'a AuthUser),
}

pub struct AccessGuard {
    routes: GuardRoutes,
    verification: VerificationBackends,
    profiles: Arc<dyn ProfileStatusSource>,
}

impl AccessGuard {
    pub fn new(
        routes: GuardRoutes,
        verification: VerificationBackends,
        profiles: Arc<dyn ProfileStatusSource>,
    ) -> Self {
        Self {
            routes,
            verification,
            profiles,
        }
    }

    pub fn routes(&self) -> &GuardRoutes {
        &self.routes
    }

    fn gate<'a>(&self, user: Option<&'a AuthUser>, path: &str) -> Gate<'a> {
        let Some(user) = user else {
            return Gate::SignIn;
        };
        if user.role == Role::Clinician {
            return Gate::Pass(user.role);
        }
        if self.routes.is_exempt(path) {
            return Gate::Pass(user.role);
        }
        if !self.verification.store_for(&user.user_id).is_verified() {
            return Gate::Notice;
        }
        Gate::Content(user)
    }

    /// Decides one navigation to `destination` (path plus optional query).
    pub async fn check(&self, user: Option<&AuthUser>, destination: &str) -> AccessDecision {
        let path = destination.split('?').next().unwrap_or(destination);

        let decision = match self.gate(user, path) {
            Gate::SignIn => AccessDecision::RedirectToSignIn {
                location: self.routes.signin_location(destination),
            },
            Gate::Pass(role) => AccessDecision::Render(AccessOutcome {
                role,
                profile: None,
            }),
            Gate::Notice => AccessDecision::VerificationRequired {
                scan_location: self.routes.scan_location(destination),
            },
            Gate::Content(user) => AccessDecision::Render(AccessOutcome {
                role: user.role,
                profile: Some(self.profile(user).await),
            }),
        };

        tracing::debug!(
            user_id = user.map(|u| u.user_id.as_str()).unwrap_or("-"),
            destination,
            decision = decision.label(),
            "Access decided"
        );
        metrics::record_access_decision(decision.label());
        decision
    }

    async fn profile(&self, user: &AuthUser) -> ProfileCompleteness {
        match self.profiles.profile_status(&user.access_token).await {
            Ok(status) => ProfileCompleteness::from(&status),
            Err(err) => {
                tracing::warn!(user_id = %user.user_id, error = %err, "Profile status unavailable");
                ProfileCompleteness::Unknown
            }
        }
    }

    /// Re-decides `destination` for `user` whenever their verification
    /// state changes.
    pub fn watch(self: &Arc<Self>, user: AuthUser, destination: impl Into<String>) -> GuardWatcher {
        let changes = self.verification.store_for(&user.user_id).subscribe();
        GuardWatcher {
            guard: self.clone(),
            user,
            destination: destination.into(),
            changes,
        }
    }
}

pub struct GuardWatcher {
    guard: Arc<AccessGuard>,
    user: AuthUser,
    destination: String,
    changes: VerificationFeed,
}

impl GuardWatcher {
    pub async fn current(&self) -> AccessDecision {
        self.guard.check(Some(&self.user), &self.destination).await
    }

    /// Waits for the next verification write or clear, then re-decides.
    /// Returns `None` once the feed is closed.
    pub async fn changed(&mut self) -> Option<AccessDecision> {
        self.changes.changed().await.ok()?;
        Some(self.current().await)
    }
}
