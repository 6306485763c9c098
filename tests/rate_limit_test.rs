// Integration tests for request throttling on the guild endpoints
//
// Requests carry no session user, so every allowed request ends in 401 without
// reaching Discord; a throttled request is 429 before the session is checked.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use guildgate::access::GuildAccessVerifier;
use guildgate::api::{create_guild_router, GuildAppState};
use guildgate::credentials::{SecretCipher, TokenStore};
use guildgate::discord::{DiscordApi, OAuthClient, OAuthSettings};
use guildgate::rate_limit::{InMemoryRateLimiterStore, RequestThrottle};
use std::sync::Arc;
use tower::ServiceExt;

const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

// ── Test state & router ───────────────────────────────────────────────────────

fn create_test_app(throttle: Option<Arc<RequestThrottle>>) -> Router {
    let store = TokenStore::new(":memory:", SecretCipher::from_hex_key(TEST_KEY).unwrap()).unwrap();
    let http = reqwest::Client::new();
    // Never contacted: no request in these tests carries a session
    let oauth = OAuthClient::new(
        http.clone(),
        OAuthSettings {
            authorize_url: "http://127.0.0.1:9/oauth2/authorize".to_string(),
            token_url: "http://127.0.0.1:9/oauth2/token".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: "http://localhost/callback".to_string(),
            scopes: vec!["guilds".to_string()],
        },
    );
    let verifier = Arc::new(GuildAccessVerifier::new(
        store,
        DiscordApi::new(http, "http://127.0.0.1:9"),
        oauth,
    ));

    create_guild_router(GuildAppState { verifier, throttle })
}

fn request_from(client: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("GET")
        .uri("/api/dashboard/permitted-servers");
    if let Some(ip) = client {
        builder = builder.header("x-forwarded-for", format!("{}, 10.0.0.1", ip));
    }
    builder.body(Body::empty()).unwrap()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

/// 100 requests pass the throttle; the 101st is rejected with Retry-After.
#[tokio::test]
async fn test_101st_request_is_rate_limited() {
    let app = create_test_app(Some(Arc::new(RequestThrottle::in_memory_default())));

    for i in 0..100 {
        let response = app
            .clone()
            .oneshot(request_from(Some("203.0.113.7")))
            .await
            .unwrap();
        assert_eq!(
            response.status(),
            StatusCode::UNAUTHORIZED,
            "request {} should pass the throttle",
            i + 1
        );
    }

    let response = app
        .oneshot(request_from(Some("203.0.113.7")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let retry_after: u64 = response.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(json["error"].as_str().unwrap().contains("Too many requests"));
}

/// Each client key has its own budget.
#[tokio::test]
async fn test_clients_are_limited_independently() {
    let throttle = Arc::new(RequestThrottle::new(
        Arc::new(InMemoryRateLimiterStore::new()),
        2,
        60,
    ));
    let app = create_test_app(Some(throttle));

    for _ in 0..2 {
        let response = app.clone().oneshot(request_from(Some("198.51.100.1"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
    let response = app.clone().oneshot(request_from(Some("198.51.100.1"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let response = app.clone().oneshot(request_from(Some("198.51.100.2"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

/// Requests without any address header share one bucket.
#[tokio::test]
async fn test_unidentified_clients_share_a_bucket() {
    let throttle = Arc::new(RequestThrottle::new(
        Arc::new(InMemoryRateLimiterStore::new()),
        1,
        60,
    ));
    let app = create_test_app(Some(throttle));

    let response = app.clone().oneshot(request_from(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.oneshot(request_from(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

/// With throttling disabled nothing is ever rejected.
#[tokio::test]
async fn test_throttle_disabled() {
    let app = create_test_app(None);

    for _ in 0..150 {
        let response = app.clone().oneshot(request_from(Some("203.0.113.7"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
