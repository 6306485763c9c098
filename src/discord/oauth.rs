//! Discord OAuth2 token endpoint client.
//!
//! Handles the login-time authorization code exchange and the refresh-token
//! grant used when an access token has expired.

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info};

/// Discord OAuth application settings.
#[derive(Clone, Debug)]
pub struct OAuthSettings {
    /// Authorization page users are redirected to
    pub authorize_url: String,
    /// Token endpoint (`{api_base}/oauth2/token`)
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// Callback URL registered with the Discord application
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

/// Errors from the token endpoint.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// The provider rejected the grant (revoked, expired or invalid token).
    #[error("Token endpoint rejected the grant with status {status}")]
    RefreshFailed { status: u16 },

    #[error("Token endpoint unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Token endpoint returned an unexpected body: {0}")]
    InvalidResponse(String),
}

/// Token response (standard OAuth 2.0)
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// A freshly issued token pair.
///
/// `refresh_token` is `None` when the provider did not rotate it; the
/// previous refresh token stays valid in that case.
#[derive(Clone, Debug, PartialEq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

/// Client for Discord's OAuth2 endpoints.
#[derive(Clone, Debug)]
pub struct OAuthClient {
    http: reqwest::Client,
    settings: OAuthSettings,
}

impl OAuthClient {
    /// `http` should carry an explicit timeout; it is shared with the guild API calls.
    pub fn new(http: reqwest::Client, settings: OAuthSettings) -> Self {
        Self { http, settings }
    }

    pub fn settings(&self) -> &OAuthSettings {
        &self.settings
    }

    /// Build the authorization URL the user is redirected to.
    pub fn authorize_url(&self, state: &str) -> String {
        let scopes = self.settings.scopes.join(" ");
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            self.settings.authorize_url,
            urlencoding::encode(&self.settings.client_id),
            urlencoding::encode(&self.settings.redirect_uri),
            urlencoding::encode(&scopes),
            urlencoding::encode(state)
        )
    }

    /// Exchange an authorization code for the user's first token pair.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenPair, RefreshError> {
        debug!("Exchanging authorization code for token");
        self.grant(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.settings.redirect_uri.as_str()),
        ])
        .await
    }

    /// Exchange a refresh token for a new access/refresh pair.
    ///
    /// Exactly one POST is made; a non-2xx answer is `RefreshFailed` and must
    /// not be retried within the same request.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, RefreshError> {
        let pair = self
            .grant(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .await?;

        info!(
            rotated = pair.refresh_token.is_some(),
            "OAuth token refreshed"
        );
        Ok(pair)
    }

    async fn grant(&self, params: &[(&str, &str)]) -> Result<TokenPair, RefreshError> {
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
        ];
        form.extend_from_slice(params);

        let response = self
            .http
            .post(&self.settings.token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            // Body is the provider's error description, never a token
            error!(status = %status, body = %body, "Token endpoint rejected grant");
            return Err(RefreshError::RefreshFailed {
                status: status.as_u16(),
            });
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;

        Ok(TokenPair {
            access_token: token_response.access_token,
            refresh_token: token_response.refresh_token,
            expires_in: token_response.expires_in,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn settings(token_url: String) -> OAuthSettings {
        OAuthSettings {
            authorize_url: "https://discord.com/oauth2/authorize".to_string(),
            token_url,
            client_id: "client-123".to_string(),
            client_secret: "shh".to_string(),
            redirect_uri: "http://localhost:3001/api/auth/discord/callback".to_string(),
            scopes: vec!["identify".to_string(), "guilds".to_string()],
        }
    }

    fn client(token_url: String) -> OAuthClient {
        OAuthClient::new(reqwest::Client::new(), settings(token_url))
    }

    #[test]
    fn test_token_response_minimal() {
        let response: TokenResponse = serde_json::from_str(r#"{"access_token": "a"}"#).unwrap();
        assert_eq!(response.access_token, "a");
        assert_eq!(response.refresh_token, None);
        assert_eq!(response.expires_in, None);
    }

    #[test]
    fn test_build_authorize_url() {
        let url = client("https://discord.com/api/v10/oauth2/token".to_string())
            .authorize_url("random_state");

        assert!(url.starts_with("https://discord.com/oauth2/authorize?"));
        assert!(url.contains("client_id=client-123"));
        assert!(url.contains(
            "redirect_uri=http%3A%2F%2Flocalhost%3A3001%2Fapi%2Fauth%2Fdiscord%2Fcallback"
        ));
        assert!(url.contains("scope=identify%20guilds"));
        assert!(url.contains("state=random_state"));
        assert!(url.contains("response_type=code"));
    }

    #[tokio::test]
    async fn test_refresh_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth2/token")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "old_refresh".into()),
                Matcher::UrlEncoded("client_id".into(), "client-123".into()),
                Matcher::UrlEncoded("client_secret".into(), "shh".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"access_token":"new_access","refresh_token":"new_refresh","expires_in":604800,"token_type":"Bearer"}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let pair = client(format!("{}/oauth2/token", server.url()))
            .refresh("old_refresh")
            .await
            .unwrap();

        assert_eq!(pair.access_token, "new_access");
        assert_eq!(pair.refresh_token.as_deref(), Some("new_refresh"));
        assert_eq!(pair.expires_in, Some(604800));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_revoked_is_refresh_failed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth2/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .expect(1)
            .create_async()
            .await;

        let result = client(format!("{}/oauth2/token", server.url()))
            .refresh("revoked")
            .await;

        assert!(matches!(result, Err(RefreshError::RefreshFailed { status: 400 })));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_garbage_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth2/token")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let result = client(format!("{}/oauth2/token", server.url()))
            .refresh("r")
            .await;

        assert!(matches!(result, Err(RefreshError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_exchange_code() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth2/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "auth_code".into()),
                Matcher::UrlEncoded(
                    "redirect_uri".into(),
                    "http://localhost:3001/api/auth/discord/callback".into(),
                ),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"first_access","refresh_token":"first_refresh"}"#)
            .create_async()
            .await;

        let pair = client(format!("{}/oauth2/token", server.url()))
            .exchange_code("auth_code")
            .await
            .unwrap();

        assert_eq!(pair.access_token, "first_access");
        assert_eq!(pair.refresh_token.as_deref(), Some("first_refresh"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let result = client("http://127.0.0.1:9/oauth2/token".to_string())
            .refresh("r")
            .await;

        assert!(matches!(result, Err(RefreshError::Transport(_))));
    }
}
