//! Discord REST API access: guild listing and OAuth token grants.

pub mod oauth;
pub mod permissions;

pub use oauth::{OAuthClient, OAuthSettings, RefreshError, TokenPair};
pub use permissions::{Permissions, MODERATOR_MASK};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One entry of `GET /users/@me/guilds`.
///
/// Fetched fresh on every verification; permissions can change between
/// requests so this is never cached beyond the request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GuildSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub owner: bool,
    #[serde(default)]
    pub permissions: Permissions,
}

impl GuildSummary {
    /// Owners always qualify; everyone else needs a moderator-level bit.
    pub fn grants_dashboard_access(&self) -> bool {
        self.owner || self.permissions.is_moderator()
    }
}

/// Outcome of a guild-list call, by status class.
#[derive(Debug)]
pub enum GuildListing {
    Guilds(Vec<GuildSummary>),
    /// 401: the bearer token is expired or revoked
    Unauthorized,
    /// Any other non-2xx
    Failed { status: u16 },
    /// 2xx whose body is not a guild array
    Malformed { reason: String },
}

/// Thin client for the user-scoped Discord REST endpoints.
#[derive(Clone, Debug)]
pub struct DiscordApi {
    http: reqwest::Client,
    api_base_url: String,
}

impl DiscordApi {
    pub fn new(http: reqwest::Client, api_base_url: impl Into<String>) -> Self {
        Self {
            http,
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    /// GET /users/@me/guilds with the user's bearer token.
    pub async fn list_guilds(&self, access_token: &str) -> Result<GuildListing, reqwest::Error> {
        let url = format!("{}/users/@me/guilds", self.api_base_url);
        let response = self.http.get(&url).bearer_auth(access_token).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            debug!("Guild list rejected access token (401)");
            return Ok(GuildListing::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Failed to fetch Discord guilds");
            return Ok(GuildListing::Failed {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        match serde_json::from_slice::<Vec<GuildSummary>>(&body) {
            Ok(guilds) => Ok(GuildListing::Guilds(guilds)),
            Err(e) => {
                warn!(error = %e, "Discord guild list body did not parse");
                Ok(GuildListing::Malformed {
                    reason: e.to_string(),
                })
            }
        }
    }
}
