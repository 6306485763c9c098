//! Guild listing and access verification endpoints.
//!
//! Both routes are throttled per client before any Discord call is made.

use super::{AppError, SessionUser};
use crate::access::GuildAccessVerifier;
use crate::discord::GuildSummary;
use crate::rate_limit::{client_key, RequestThrottle, ThrottleDecision};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared application state for guild API
#[derive(Clone)]
pub struct GuildAppState {
    pub verifier: Arc<GuildAccessVerifier>,
    /// None = throttling disabled
    pub throttle: Option<Arc<RequestThrottle>>,
}

/// GET /api/dashboard/permitted-servers response
#[derive(Serialize)]
pub struct PermittedServersResponse {
    pub permitted_servers: Vec<GuildSummary>,
}

/// Create guild API router
pub fn create_guild_router(state: GuildAppState) -> Router {
    Router::new()
        .route("/api/dashboard/permitted-servers", get(permitted_servers))
        .route("/api/dashboard/guild/:guild_id/access", get(guild_access))
        .with_state(Arc::new(state))
}

impl GuildAppState {
    async fn enforce_throttle(&self, headers: &HeaderMap) -> Result<(), AppError> {
        let Some(throttle) = &self.throttle else {
            return Ok(());
        };

        let client = client_key(headers);
        match throttle.check(&client).await {
            ThrottleDecision::Allowed { .. } => Ok(()),
            ThrottleDecision::RateLimited {
                retry_after_seconds,
            } => {
                warn!(client = %client, retry_after_seconds, "Client rate limited");
                Err(AppError::RateLimited {
                    retry_after_seconds,
                })
            }
        }
    }
}

/// GET /api/dashboard/permitted-servers
///
/// Guilds the session user owns or moderates. The result is the candidate
/// list a caller filters down to guilds the bot has joined.
async fn permitted_servers(
    State(state): State<Arc<GuildAppState>>,
    headers: HeaderMap,
    user: Option<SessionUser>,
) -> Result<Json<PermittedServersResponse>, AppError> {
    state.enforce_throttle(&headers).await?;
    let user = user.ok_or_else(|| AppError::Unauthorized("Unauthorized".to_string()))?;

    debug!(user_id = %user.user_id, "Listing permitted servers");

    let permitted = state
        .verifier
        .permitted_guilds(&user.user_id)
        .await
        .map_err(|e| {
            warn!(user_id = %user.user_id, error = %e, "Failed to list permitted servers");
            AppError::from(e)
        })?;

    info!(
        user_id = %user.user_id,
        count = permitted.len(),
        "Permitted servers resolved"
    );

    Ok(Json(PermittedServersResponse {
        permitted_servers: permitted,
    }))
}

/// GET /api/dashboard/guild/:guild_id/access
///
/// Returns the access decision; its status mirrors the decision (200 when
/// granted, 401/403/5xx otherwise).
async fn guild_access(
    State(state): State<Arc<GuildAppState>>,
    Path(guild_id): Path<String>,
    headers: HeaderMap,
    user: Option<SessionUser>,
) -> Result<Response, AppError> {
    state.enforce_throttle(&headers).await?;
    let user = user.ok_or_else(|| AppError::Unauthorized("Unauthorized".to_string()))?;

    let decision = state.verifier.verify_access(&user.user_id, &guild_id).await;

    let status = decision
        .http_status
        .and_then(|s| StatusCode::from_u16(s).ok())
        .unwrap_or(StatusCode::OK);

    debug!(
        user_id = %user.user_id,
        guild_id = %guild_id,
        has_access = decision.has_access,
        status = %status,
        "Guild access decided"
    );

    Ok((status, Json(decision)).into_response())
}
