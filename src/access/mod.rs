//! Guild access verification.
//!
//! Resolves a dashboard user to their Discord guild list and decides whether
//! they may manage a given guild.
//!
//! # Flow
//! 1. Load the access token from the [`TokenStore`] (absent → `NoToken`)
//! 2. `GET /users/@me/guilds` with the bearer token
//! 3. On 401, refresh once (if a refresh token exists), persist the new pair,
//!    and retry the guild call exactly once
//! 4. Any remaining non-2xx → `Upstream { status }`
//! 5. Owner, or any bit of [`MODERATOR_MASK`](crate::discord::MODERATOR_MASK), grants access
//!
//! The refresh-and-retry step is serialised per user so two concurrent 401s
//! cannot both spend the same refresh token.

mod decision;

pub use decision::{AccessDecision, AccessErrorKind};

use crate::credentials::{TokenStore, TokenStoreError};
use crate::discord::{DiscordApi, GuildListing, GuildSummary, OAuthClient};
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Failures while resolving a user's guild list.
#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("No Discord token; please re-authenticate")]
    NoToken,

    #[error("Session expired; please re-authenticate")]
    SessionExpired,

    #[error("Discord API returned status {status}")]
    Upstream { status: u16 },

    #[error("Discord API returned an unreadable guild list: {reason}")]
    InvalidResponse { reason: String },

    #[error("Discord API unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Storage(#[from] TokenStoreError),
}

/// Decides guild access for dashboard users.
pub struct GuildAccessVerifier {
    store: TokenStore,
    api: DiscordApi,
    oauth: OAuthClient,
    /// In-flight refresh guards keyed by user id
    refresh_guards: DashMap<String, Arc<Mutex<RefreshSlot>>>,
}

/// Per-user refresh state shared by requests queued on the same guard.
#[derive(Default)]
struct RefreshSlot {
    /// Access token whose refresh the provider already rejected
    failed_for: Option<String>,
}

impl GuildAccessVerifier {
    pub fn new(store: TokenStore, api: DiscordApi, oauth: OAuthClient) -> Self {
        Self {
            store,
            api,
            oauth,
            refresh_guards: DashMap::new(),
        }
    }

    /// Fetches the user's guilds, refreshing an expired token at most once.
    pub async fn list_guilds(&self, user_id: &str) -> Result<Vec<GuildSummary>, VerifierError> {
        // Dropping the read detaches any legacy migration it started
        let token = self
            .store
            .get_access_token(user_id)?
            .ok_or(VerifierError::NoToken)?
            .token;

        match self.api.list_guilds(&token).await? {
            GuildListing::Guilds(guilds) => return Ok(guilds),
            GuildListing::Failed { status } => return Err(VerifierError::Upstream { status }),
            GuildListing::Malformed { reason } => {
                return Err(VerifierError::InvalidResponse { reason })
            }
            GuildListing::Unauthorized => {}
        }

        info!(user_id = %user_id, "Access token expired, attempting refresh");
        let retry_token = self.refresh_single_flight(user_id, &token).await?;

        match self.api.list_guilds(&retry_token).await? {
            GuildListing::Guilds(guilds) => Ok(guilds),
            GuildListing::Unauthorized => {
                warn!(user_id = %user_id, "Refreshed token rejected; session expired");
                Err(VerifierError::SessionExpired)
            }
            GuildListing::Failed { status } => Err(VerifierError::Upstream { status }),
            GuildListing::Malformed { reason } => Err(VerifierError::InvalidResponse { reason }),
        }
    }

    /// Guilds the user may manage: the candidate list for bot-presence filtering.
    pub async fn permitted_guilds(&self, user_id: &str) -> Result<Vec<GuildSummary>, VerifierError> {
        let guilds = self.list_guilds(user_id).await?;
        Ok(guilds
            .into_iter()
            .filter(GuildSummary::grants_dashboard_access)
            .collect())
    }

    /// Decides whether `user_id` may manage `guild_id`.
    pub async fn verify_access(&self, user_id: &str, guild_id: &str) -> AccessDecision {
        let guilds = match self.list_guilds(user_id).await {
            Ok(guilds) => guilds,
            Err(e) => {
                warn!(user_id = %user_id, guild_id = %guild_id, error = %e, "Guild listing failed");
                return AccessDecision::from_error(&e);
            }
        };

        let Some(guild) = guilds.into_iter().find(|g| g.id == guild_id) else {
            debug!(user_id = %user_id, guild_id = %guild_id, "Guild not in user's guild list");
            return AccessDecision::denied(AccessErrorKind::NotFound);
        };

        if guild.grants_dashboard_access() {
            AccessDecision::granted(guild)
        } else {
            debug!(
                user_id = %user_id,
                guild_id = %guild_id,
                permissions = %guild.permissions,
                "Guild member lacks moderator permissions"
            );
            AccessDecision::denied(AccessErrorKind::MissingPermissions)
        }
    }

    /// Runs the refresh under the user's guard and returns the token to retry with.
    async fn refresh_single_flight(
        &self,
        user_id: &str,
        rejected_token: &str,
    ) -> Result<String, VerifierError> {
        let result = {
            let guard = self
                .refresh_guards
                .entry(user_id.to_string())
                .or_default()
                .clone();
            let mut slot = guard.lock().await;
            self.refresh_locked(&mut slot, user_id, rejected_token).await
        };

        // Last one out removes the guard, unless it remembers a rejected refresh
        self.refresh_guards.remove_if(user_id, |_, guard| {
            Arc::strong_count(guard) == 1
                && guard
                    .try_lock()
                    .map(|slot| slot.failed_for.is_none())
                    .unwrap_or(false)
        });

        result
    }

    async fn refresh_locked(
        &self,
        slot: &mut RefreshSlot,
        user_id: &str,
        rejected_token: &str,
    ) -> Result<String, VerifierError> {
        // The request ahead of us already spent this refresh token and lost
        if slot.failed_for.as_deref() == Some(rejected_token) {
            debug!(user_id = %user_id, "Refresh already failed for this token");
            return Err(VerifierError::SessionExpired);
        }

        // A concurrent request may have rotated the token while we waited
        if let Some(current) = self.store.get_access_token(user_id)? {
            if current.token != rejected_token {
                debug!(user_id = %user_id, "Token already refreshed by a concurrent request");
                return Ok(current.token);
            }
        }

        let Some(refresh) = self.store.get_refresh_token(user_id)? else {
            warn!(user_id = %user_id, "No refresh token stored; session expired");
            return Err(VerifierError::SessionExpired);
        };

        let pair = match self.oauth.refresh(&refresh.token).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Token refresh failed; re-authentication required");
                slot.failed_for = Some(rejected_token.to_string());
                return Err(VerifierError::SessionExpired);
            }
        };
        slot.failed_for = None;

        self.store
            .set_tokens(user_id, &pair.access_token, pair.refresh_token.as_deref())?;

        Ok(pair.access_token)
    }

    #[cfg(test)]
    fn in_flight_guards(&self) -> usize {
        self.refresh_guards.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::SecretCipher;
    use crate::discord::OAuthSettings;
    use mockito::{Matcher, Server};

    const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn verifier(server: &Server) -> GuildAccessVerifier {
        let store = TokenStore::new(":memory:", SecretCipher::from_hex_key(TEST_KEY).unwrap())
            .unwrap();
        let http = reqwest::Client::new();
        let oauth = OAuthClient::new(
            http.clone(),
            OAuthSettings {
                authorize_url: format!("{}/oauth2/authorize", server.url()),
                token_url: format!("{}/oauth2/token", server.url()),
                client_id: "cid".to_string(),
                client_secret: "secret".to_string(),
                redirect_uri: "http://localhost/callback".to_string(),
                scopes: vec!["guilds".to_string()],
            },
        );
        GuildAccessVerifier::new(store, DiscordApi::new(http, server.url()), oauth)
    }

    #[tokio::test]
    async fn test_no_token() {
        let server = Server::new_async().await;
        let verifier = verifier(&server);

        assert!(matches!(
            verifier.list_guilds("ghost").await,
            Err(VerifierError::NoToken)
        ));
        let decision = verifier.verify_access("ghost", "1").await;
        assert_eq!(decision.error_kind, Some(AccessErrorKind::NoToken));
        assert_eq!(decision.http_status, Some(401));
    }

    #[tokio::test]
    async fn test_unauthorized_without_refresh_token_is_session_expired() {
        let mut server = Server::new_async().await;
        let guilds = server
            .mock("GET", "/users/@me/guilds")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let token = server
            .mock("POST", "/oauth2/token")
            .expect(0)
            .create_async()
            .await;

        let verifier = verifier(&server);
        verifier.store.set_tokens("u1", "expired", None).unwrap();

        assert!(matches!(
            verifier.list_guilds("u1").await,
            Err(VerifierError::SessionExpired)
        ));
        guilds.assert_async().await;
        token.assert_async().await;
    }

    #[tokio::test]
    async fn test_concurrent_expiry_refreshes_once() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/users/@me/guilds")
            .match_header("authorization", "Bearer stale")
            .with_status(401)
            .create_async()
            .await;
        server
            .mock("GET", "/users/@me/guilds")
            .match_header("authorization", "Bearer fresh")
            .with_status(200)
            .with_body(r#"[{"id":"1","name":"G","owner":true,"permissions":"0"}]"#)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/oauth2/token")
            .match_body(Matcher::UrlEncoded("refresh_token".into(), "r1".into()))
            .with_status(200)
            .with_body(r#"{"access_token":"fresh","refresh_token":"r2"}"#)
            .expect(1)
            .create_async()
            .await;

        let verifier = verifier(&server);
        verifier.store.set_tokens("u1", "stale", Some("r1")).unwrap();

        let (a, b) = tokio::join!(verifier.list_guilds("u1"), verifier.list_guilds("u1"));
        assert_eq!(a.unwrap().len(), 1);
        assert_eq!(b.unwrap().len(), 1);

        refresh.assert_async().await;
        assert_eq!(verifier.in_flight_guards(), 0);
        assert_eq!(
            verifier.store.get_refresh_token("u1").unwrap().unwrap().token,
            "r2"
        );
    }

    #[tokio::test]
    async fn test_concurrent_expiry_with_rejected_refresh_posts_once() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/users/@me/guilds")
            .with_status(401)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/oauth2/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .expect(1)
            .create_async()
            .await;

        let verifier = verifier(&server);
        verifier.store.set_tokens("u1", "stale", Some("revoked")).unwrap();

        let (a, b) = tokio::join!(verifier.list_guilds("u1"), verifier.list_guilds("u1"));
        assert!(matches!(a, Err(VerifierError::SessionExpired)));
        assert!(matches!(b, Err(VerifierError::SessionExpired)));

        // A later listing with the same dead token does not retry the grant
        assert!(matches!(
            verifier.list_guilds("u1").await,
            Err(VerifierError::SessionExpired)
        ));

        refresh.assert_async().await;
        assert_eq!(verifier.in_flight_guards(), 1);
    }

    #[tokio::test]
    async fn test_new_login_clears_rejected_refresh() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/users/@me/guilds")
            .with_status(401)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/oauth2/token")
            .with_status(400)
            .expect(2)
            .create_async()
            .await;

        let verifier = verifier(&server);
        verifier.store.set_tokens("u1", "stale", Some("revoked")).unwrap();
        assert!(verifier.list_guilds("u1").await.is_err());

        // Fresh pair from a new login: its refresh is attempted again
        verifier.store.set_tokens("u1", "relogin", Some("r2")).unwrap();
        assert!(verifier.list_guilds("u1").await.is_err());

        refresh.assert_async().await;
    }
}
