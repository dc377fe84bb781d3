use axum::{extract::FromRequestParts, http::request::Parts};
use std::collections::HashSet;
use std::convert::Infallible;
use tracing::warn;

use crate::errors::ServiceError;

/// Header carrying the authenticated account identifier, set by the
/// upstream auth proxy. Absent for guest traffic.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying the authenticated account email.
pub const USER_EMAIL_HEADER: &str = "x-user-email";

/// The caller's resolved session, as provided by the external
/// authentication collaborator. Both fields are `None` for guests.
#[derive(Debug, Clone, Default)]
pub struct AuthSession {
    pub user_id: Option<String>,
    pub email: Option<String>,
}

impl AuthSession {
    pub fn guest() -> Self {
        Self::default()
    }

    pub fn authenticated(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            email: Some(email.into()),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }
}

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for AuthSession
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header_value = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        Ok(AuthSession {
            user_id: header_value(USER_ID_HEADER),
            email: header_value(USER_EMAIL_HEADER),
        })
    }
}

/// Identity of a caller that passed the admin check.
#[derive(Debug, Clone)]
pub struct AdminIdentity {
    pub user_id: String,
    pub email: String,
}

/// Authorization guard for admin-only operations. The allow-list of
/// permitted email addresses is injected from configuration at
/// construction time.
#[derive(Debug, Clone)]
pub struct AdminGuard {
    allowed_emails: HashSet<String>,
}

impl AdminGuard {
    pub fn new(allowed_emails: impl IntoIterator<Item = String>) -> Self {
        Self {
            allowed_emails: allowed_emails
                .into_iter()
                .map(|e| e.trim().to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    /// Resolves the caller's identity and checks it against the allow-list.
    pub fn require_admin(&self, session: &AuthSession) -> Result<AdminIdentity, ServiceError> {
        let (user_id, email) = match (&session.user_id, &session.email) {
            (Some(user_id), Some(email)) => (user_id.clone(), email.clone()),
            _ => {
                return Err(ServiceError::Unauthorized(
                    "Authentication required".to_string(),
                ))
            }
        };

        if !self.allowed_emails.contains(&email.to_ascii_lowercase()) {
            warn!(%email, "admin access denied");
            return Err(ServiceError::Forbidden(
                "Admin access required".to_string(),
            ));
        }

        Ok(AdminIdentity { user_id, email })
    }
}
