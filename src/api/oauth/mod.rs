//! Discord OAuth connect flow.
//!
//! Links a dashboard session to Discord credentials:
//! 1. GET /api/auth/discord/start → redirect to Discord with a CSRF state
//! 2. User authorizes on Discord
//! 3. Discord redirects to /api/auth/discord/callback
//! 4. Exchange code for tokens, store them encrypted

mod connect_state;

pub use connect_state::{run_state_purge, ConnectStates, PendingConnect};

use super::{AppError, SessionUser};
use crate::credentials::TokenStore;
use crate::discord::OAuthClient;
use axum::{
    extract::{Query, State},
    response::{Json, Redirect},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Shared application state for OAuth API
#[derive(Clone)]
pub struct OAuthAppState {
    pub oauth: OAuthClient,
    pub token_store: TokenStore,
    pub connect_states: ConnectStates,
}

/// OAuth callback query parameters
#[derive(Deserialize)]
pub struct OAuthCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// OAuth success response
#[derive(Serialize)]
pub struct OAuthSuccessResponse {
    success: bool,
    message: String,
}

/// Create OAuth API router
pub fn create_oauth_router(state: OAuthAppState) -> Router {
    Router::new()
        .route("/api/auth/discord/start", get(oauth_start))
        .route("/api/auth/discord/callback", get(oauth_callback))
        .with_state(Arc::new(state))
}

/// GET /api/auth/discord/start
///
/// Redirects the session user to Discord's authorization page.
async fn oauth_start(
    State(state): State<Arc<OAuthAppState>>,
    user: SessionUser,
) -> Redirect {
    let csrf_state = state.connect_states.issue(&user.user_id);
    let auth_url = state.oauth.authorize_url(&csrf_state);

    info!(user_id = %user.user_id, "Redirecting to Discord authorization");

    Redirect::temporary(&auth_url)
}

/// GET /api/auth/discord/callback
///
/// Exchanges the authorization code and stores the encrypted token pair for
/// the user bound to the state parameter.
///
/// The `state` parameter is redeemed exactly once and names the user the
/// tokens are stored for; the callback itself carries no session.
async fn oauth_callback(
    State(state): State<Arc<OAuthAppState>>,
    Query(callback): Query<OAuthCallback>,
) -> Result<Json<OAuthSuccessResponse>, AppError> {
    if let Some(error) = callback.error {
        let description = callback
            .error_description
            .unwrap_or_else(|| "Unknown error".to_string());
        warn!(error = %error, description = %description, "Discord authorization failed");
        return Err(AppError::BadRequest(format!(
            "OAuth authorization failed: {} - {}",
            error, description
        )));
    }

    let code = callback
        .code
        .ok_or_else(|| AppError::BadRequest("Missing 'code' parameter".to_string()))?;
    let csrf_state = callback
        .state
        .ok_or_else(|| AppError::BadRequest("Missing 'state' parameter".to_string()))?;

    let Some(PendingConnect { user_id, .. }) = state.connect_states.redeem(&csrf_state) else {
        warn!("Callback state unknown, already used or expired");
        return Err(AppError::Unauthorized(
            "Connect attempt not recognised; start again".to_string(),
        ));
    };

    debug!(user_id = %user_id, "Connect state redeemed, exchanging code");

    let pair = state.oauth.exchange_code(&code).await.map_err(|e| {
        error!(user_id = %user_id, error = %e, "Authorization code exchange failed");
        AppError::BadGateway {
            message: "Failed to exchange authorization code".to_string(),
            upstream_status: None,
        }
    })?;

    state
        .token_store
        .set_tokens(&user_id, &pair.access_token, pair.refresh_token.as_deref())
        .map_err(|e| {
            error!(user_id = %user_id, error = %e, "Failed to store tokens");
            AppError::ServerError("Failed to store credentials".to_string())
        })?;

    info!(
        user_id = %user_id,
        has_refresh_token = pair.refresh_token.is_some(),
        "Discord account connected"
    );

    Ok(Json(OAuthSuccessResponse {
        success: true,
        message: "Discord account connected".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oauth_callback_deserialization() {
        let query = "code=auth_code_123&state=csrf_state_456";
        let callback: OAuthCallback = serde_urlencoded::from_str(query).unwrap();
        assert_eq!(callback.code, Some("auth_code_123".to_string()));
        assert_eq!(callback.state, Some("csrf_state_456".to_string()));
        assert_eq!(callback.error, None);

        let query = "error=access_denied&error_description=User+cancelled";
        let callback: OAuthCallback = serde_urlencoded::from_str(query).unwrap();
        assert_eq!(callback.error, Some("access_denied".to_string()));
        assert_eq!(callback.error_description, Some("User cancelled".to_string()));
        assert_eq!(callback.code, None);
    }

    #[test]
    fn test_oauth_success_response_serialization() {
        let response = OAuthSuccessResponse {
            success: true,
            message: "Discord account connected".to_string(),
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"success\":true"));
    }
}
