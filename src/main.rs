use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, Method};
use guildgate::access::GuildAccessVerifier;
use guildgate::api::{
    create_guild_router, create_oauth_router, run_state_purge, session_from_header,
    ConnectStates, GuildAppState, OAuthAppState, SessionProxy,
};
use guildgate::config::{load_config, Secrets};
use guildgate::credentials::TokenStore;
use guildgate::discord::{DiscordApi, OAuthClient};
use guildgate::rate_limit::{run_sweep, InMemoryRateLimiterStore, RequestThrottle};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "guildgate=info".into()),
        )
        .init();

    info!("Guildgate starting...");

    let config_path =
        std::env::var("GUILDGATE_CONFIG").unwrap_or_else(|_| "guildgate.toml".to_string());
    let config = load_config(&config_path)?;
    let secrets = Secrets::from_env()?;

    info!(
        config_path = %config_path,
        bind_addr = %config.server.bind_addr,
        database_path = %config.storage.database_path,
        rate_limit_enabled = config.rate_limit.enabled,
        "Configuration loaded"
    );

    // A bad key is fatal; nothing below can run without it
    let cipher = secrets
        .cipher()
        .context("ENCRYPTION_KEY must be 64 hex characters (32 bytes)")?;

    let token_store = TokenStore::new(&config.storage.database_path, cipher)
        .context("Failed to initialize token store")?;
    info!("Token store initialized");

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.discord.http_timeout_seconds))
        .build()
        .context("Failed to build HTTP client")?;

    let api = DiscordApi::new(http.clone(), config.discord.api_base_url.clone());
    let oauth = OAuthClient::new(http, secrets.oauth_settings(&config.discord));
    let verifier = Arc::new(GuildAccessVerifier::new(
        token_store.clone(),
        api,
        oauth.clone(),
    ));

    // Background tasks, aborted on shutdown
    let mut tasks = Vec::new();

    let throttle = if config.rate_limit.enabled {
        let throttle = Arc::new(RequestThrottle::new(
            Arc::new(InMemoryRateLimiterStore::new()),
            config.rate_limit.max_requests,
            config.rate_limit.window_seconds,
        ));
        tasks.push(tokio::spawn(run_sweep(
            Arc::clone(&throttle),
            config.rate_limit.sweep_interval_seconds,
        )));
        info!(
            max_requests = config.rate_limit.max_requests,
            window_seconds = config.rate_limit.window_seconds,
            "Request throttle enabled"
        );
        Some(throttle)
    } else {
        None
    };

    let connect_states = ConnectStates::new(config.oauth.state_expiry_seconds);
    tasks.push(tokio::spawn(run_state_purge(
        connect_states.clone(),
        config.oauth.state_cleanup_interval_seconds,
    )));

    let mut app = create_guild_router(GuildAppState { verifier, throttle })
        .merge(create_oauth_router(OAuthAppState {
            oauth,
            token_store,
            connect_states,
        }))
        .layer(axum::middleware::from_fn_with_state(
            SessionProxy::new(secrets.session_proxy_secret.as_str()),
            session_from_header,
        ));

    if let Some(origin) = &config.server.cors_allowed_origin {
        let origin: HeaderValue = origin
            .parse()
            .context("server.cors_allowed_origin is not a valid header value")?;
        app = app.layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::exact(origin))
                .allow_methods([Method::GET])
                .allow_headers([header::CONTENT_TYPE])
                .allow_credentials(true),
        );
    }

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .context("Failed to bind listener")?;
    info!(address = %config.server.bind_addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl_c signal");
            }
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    for task in tasks {
        task.abort();
    }
    info!("Guildgate stopped");

    Ok(())
}
