//! Dashboard session identity.
//!
//! Session cookies are resolved by the proxy in front of this service. The
//! proxy forwards the user id in [`SESSION_USER_HEADER`] together with the
//! shared secret in [`SESSION_PROXY_SECRET_HEADER`]. The user header is only
//! trusted when the secret matches; anything else reaching the service
//! directly is treated as anonymous.

use super::AppError;
use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::warn;

/// Header carrying the authenticated dashboard user id
pub const SESSION_USER_HEADER: &str = "x-session-user-id";

/// Header carrying the secret shared with the session proxy
pub const SESSION_PROXY_SECRET_HEADER: &str = "x-session-proxy-secret";

/// The authenticated dashboard user for this request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionUser {
    pub user_id: String,
}

impl SessionUser {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for SessionUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SessionUser>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("Unauthorized".to_string()))
    }
}

/// The session proxy this service trusts.
#[derive(Clone)]
pub struct SessionProxy {
    secret: Arc<str>,
}

impl SessionProxy {
    pub fn new(secret: impl Into<Arc<str>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// The forwarded user, if the request came through the proxy.
    fn forwarded_user(&self, headers: &HeaderMap) -> Option<SessionUser> {
        let user = headers
            .get(SESSION_USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())?;

        let presented = headers
            .get(SESSION_PROXY_SECRET_HEADER)
            .map(|v| v.as_bytes())
            .unwrap_or_default();
        if !secrets_match(presented, self.secret.as_bytes()) {
            warn!("Session header without a valid proxy secret ignored");
            return None;
        }

        Some(SessionUser::new(user))
    }
}

// Length leaks, contents do not
fn secrets_match(presented: &[u8], expected: &[u8]) -> bool {
    presented.len() == expected.len()
        && presented
            .iter()
            .zip(expected)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// Middleware: insert a [`SessionUser`] for requests forwarded by the proxy.
///
/// Requests without a trusted session pass through untouched; handlers
/// decide whether a session is required.
pub async fn session_from_header(
    State(proxy): State<SessionProxy>,
    mut req: Request,
    next: Next,
) -> Response {
    if let Some(user) = proxy.forwarded_user(req.headers()) {
        req.extensions_mut().insert(user);
    }

    next.run(req).await
}
