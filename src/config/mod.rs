pub mod secrets;
pub use secrets::Secrets;

use crate::rate_limit::MAX_WINDOW_SECONDS;
use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Complete service configuration (everything except secrets)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub oauth: OAuthStateConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Loopback by default: only the session proxy should reach this service
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Dashboard origin allowed by CORS. None = same-origin only.
    #[serde(default)]
    pub cors_allowed_origin: Option<String>,
}

fn default_bind_addr() -> String {
    "127.0.0.1:3001".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            cors_allowed_origin: None,
        }
    }
}

/// Discord API endpoints and client behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// Upper bound on any single Discord call
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,
}

fn default_api_base_url() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_authorize_url() -> String {
    "https://discord.com/oauth2/authorize".to_string()
}

fn default_scopes() -> Vec<String> {
    vec!["identify".to_string(), "email".to_string(), "guilds".to_string()]
}

fn default_http_timeout() -> u64 {
    10
}

impl DiscordConfig {
    pub fn token_url(&self) -> String {
        format!("{}/oauth2/token", self.api_base_url.trim_end_matches('/'))
    }
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            authorize_url: default_authorize_url(),
            scopes: default_scopes(),
            http_timeout_seconds: default_http_timeout(),
        }
    }
}

/// Token database location
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_database_path() -> String {
    "guildgate.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Request throttle settings
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

fn default_true() -> bool {
    true
}

fn default_window_seconds() -> u64 {
    60
}

fn default_max_requests() -> u32 {
    100
}

fn default_sweep_interval() -> u64 {
    300
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_seconds: default_window_seconds(),
            max_requests: default_max_requests(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

/// OAuth CSRF state lifetime
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthStateConfig {
    #[serde(default = "default_state_expiry")]
    pub state_expiry_seconds: i64,
    #[serde(default = "default_state_cleanup_interval")]
    pub state_cleanup_interval_seconds: u64,
}

fn default_state_expiry() -> i64 {
    600
}

fn default_state_cleanup_interval() -> u64 {
    60
}

impl Default for OAuthStateConfig {
    fn default() -> Self {
        Self {
            state_expiry_seconds: default_state_expiry(),
            state_cleanup_interval_seconds: default_state_cleanup_interval(),
        }
    }
}

/// Load configuration from a TOML file. A missing file yields defaults.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(AppConfig::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: AppConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config file {}", path.display()))?;
    Ok(config)
}

impl AppConfig {
    /// Rejects values that would panic a timer or overflow a window deadline.
    pub fn validate(&self) -> Result<()> {
        let rl = &self.rate_limit;
        ensure!(
            (1..=MAX_WINDOW_SECONDS).contains(&i64::try_from(rl.window_seconds).unwrap_or(i64::MAX)),
            "rate_limit.window_seconds must be between 1 and {}",
            MAX_WINDOW_SECONDS
        );
        ensure!(rl.max_requests > 0, "rate_limit.max_requests must be positive");
        ensure!(
            rl.sweep_interval_seconds > 0,
            "rate_limit.sweep_interval_seconds must be positive"
        );
        ensure!(
            (1..=MAX_WINDOW_SECONDS).contains(&self.oauth.state_expiry_seconds),
            "oauth.state_expiry_seconds must be between 1 and {}",
            MAX_WINDOW_SECONDS
        );
        ensure!(
            self.oauth.state_cleanup_interval_seconds > 0,
            "oauth.state_cleanup_interval_seconds must be positive"
        );
        ensure!(
            self.discord.http_timeout_seconds > 0,
            "discord.http_timeout_seconds must be positive"
        );
        Ok(())
    }
}
