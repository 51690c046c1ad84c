//! Gate for every screen: no session means a redirect to login, a session
//! without a profile row gets one created on first use.

use std::sync::Arc;

use chrono::{SubsecRound, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use motionx_types::models::{DmPolicy, Profile};

use crate::backend::Backend;
use crate::error::{Result, SyncError};
use crate::store::LocalStore;

pub const LOGIN_PATH: &str = "/auth/login";

/// The authenticated identity handed over by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Ready {
        user: AuthUser,
        profile: Profile,
        /// The profile row was created by this call.
        provisioned: bool,
    },
    Redirect(&'static str),
}

impl SessionOutcome {
    pub fn into_profile(self) -> Result<Profile> {
        match self {
            Self::Ready { profile, .. } => Ok(profile),
            Self::Redirect(_) => Err(SyncError::Unauthenticated),
        }
    }
}

/// Username derived from the email local part, restricted to
/// `[a-z0-9_.]`. Falls back to `user`.
pub fn username_from_email(email: Option<&str>) -> String {
    let local = email
        .and_then(|e| e.split('@').next())
        .unwrap_or_default()
        .to_lowercase();
    let cleaned: String = local
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.')
        .collect();
    if cleaned.is_empty() {
        "user".to_string()
    } else {
        cleaned
    }
}

#[derive(Clone)]
pub struct SessionResolver {
    backend: Arc<dyn Backend>,
    store: Arc<LocalStore>,
}

impl SessionResolver {
    pub fn new(backend: Arc<dyn Backend>, store: Arc<LocalStore>) -> Self {
        Self { backend, store }
    }

    pub async fn resolve(&self, session: Option<AuthUser>) -> Result<SessionOutcome> {
        let Some(user) = session else {
            return Ok(SessionOutcome::Redirect(LOGIN_PATH));
        };
        let (profile, provisioned) = self.ensure_profile(&user).await?;
        Ok(SessionOutcome::Ready {
            user,
            profile,
            provisioned,
        })
    }

    /// Fetch the user's profile, creating it if this is the first visit.
    /// Returns the profile and whether this call created it.
    pub async fn ensure_profile(&self, user: &AuthUser) -> Result<(Profile, bool)> {
        if let Some(profile) = self
            .backend
            .get_profile(user.id)
            .await
            .map_err(|e| SyncError::read("profile", e))?
        {
            self.store.cache_profile(profile.clone());
            return Ok((profile, false));
        }

        let profile = self.synthesize(user).await?;
        let inserted = self
            .backend
            .insert_profile(profile.clone())
            .await
            .map_err(|e| SyncError::write("create profile", e))?;

        let (profile, provisioned) = if inserted {
            info!("Provisioned profile @{} for {}", profile.username, user.id);
            (profile, true)
        } else {
            // Another first visit won; use its row
            warn!("Profile for {} was provisioned concurrently", user.id);
            let winner = self
                .backend
                .get_profile(user.id)
                .await
                .map_err(|e| SyncError::read("profile", e))?
                .ok_or(SyncError::NotFound("Profile"))?;
            (winner, false)
        };

        self.store.cache_profile(profile.clone());
        Ok((profile, provisioned))
    }

    async fn synthesize(&self, user: &AuthUser) -> Result<Profile> {
        let base = username_from_email(user.email.as_deref());
        let taken = self
            .backend
            .username_taken(base.clone())
            .await
            .map_err(|e| SyncError::read("profile", e))?;
        let username = if taken {
            let suffix: String = user.id.simple().to_string().chars().take(6).collect();
            format!("{}_{}", base, suffix)
        } else {
            base
        };

        Ok(Profile {
            id: user.id,
            display_name: username.clone(),
            username,
            avatar_url: None,
            bio: None,
            likes_private: false,
            followers_private: false,
            allow_dm_from: DmPolicy::Everyone,
            is_admin: false,
            created_at: Utc::now().trunc_subsecs(6),
        })
    }
}
