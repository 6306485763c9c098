use crate::config::DiscordConfig;
use crate::credentials::{CipherError, SecretCipher};
use crate::discord::OAuthSettings;
use anyhow::{anyhow, Result};

/// Secrets supplied through the environment, read once at startup.
#[derive(Clone)]
pub struct Secrets {
    pub encryption_key: String,
    pub discord_client_id: String,
    pub discord_client_secret: String,
    pub discord_callback_url: String,
    /// Shared with the session proxy; gates trust in the session header
    pub session_proxy_secret: String,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("discord_client_id", &self.discord_client_id)
            .field("discord_callback_url", &self.discord_callback_url)
            .finish_non_exhaustive()
    }
}

impl Secrets {
    /// Read from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read through `lookup`, so tests never mutate the real environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| anyhow!("Missing required environment variable {}", name))
        };

        Ok(Self {
            encryption_key: required("ENCRYPTION_KEY")?,
            discord_client_id: required("DISCORD_CLIENT_ID")?,
            discord_client_secret: required("DISCORD_CLIENT_SECRET")?,
            discord_callback_url: required("DISCORD_CALLBACK_URL")?,
            session_proxy_secret: required("SESSION_PROXY_SECRET")?,
        })
    }

    /// Build the token cipher. Fails with `InvalidKeyConfiguration` on a bad key.
    pub fn cipher(&self) -> Result<SecretCipher, CipherError> {
        SecretCipher::from_hex_key(&self.encryption_key)
    }

    pub fn oauth_settings(&self, discord: &DiscordConfig) -> OAuthSettings {
        OAuthSettings {
            authorize_url: discord.authorize_url.clone(),
            token_url: discord.token_url(),
            client_id: self.discord_client_id.clone(),
            client_secret: self.discord_client_secret.clone(),
            redirect_uri: self.discord_callback_url.clone(),
            scopes: discord.scopes.clone(),
        }
    }
}
