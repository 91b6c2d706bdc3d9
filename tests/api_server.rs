//! HTTP-level checks against the assembled router, driven with `oneshot`.

use anyhow::{anyhow, Context, Result};
use argon2::Params;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use custodia::{
    api,
    cli::actions::server::bootstrap,
    clock::SystemClock,
    notify::LogNotifier,
    orchestrator::{AuthConfig, AuthOrchestrator},
    password::Credentials,
    store::MemoryStore,
    token::{TokenCodec, TokenConfig},
};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const PASSWORD: &str = "Str0ng!pass";

async fn app() -> Result<Router> {
    let credentials =
        Credentials::new(Params::new(1024, 1, 1, None).map_err(|e| anyhow!("{e}"))?)?;
    let orchestrator = Arc::new(AuthOrchestrator::new(
        Arc::new(MemoryStore::new()),
        TokenCodec::new(TokenConfig::new(SecretString::from(
            "api-test-secret-0123456789abcdefgh",
        ))),
        credentials,
        Arc::new(LogNotifier),
        Arc::new(SystemClock),
        AuthConfig::new("http://localhost:3000".to_string()),
    ));
    bootstrap(&orchestrator.authz(), "USER").await?;
    api::app(orchestrator)
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> Result<(StatusCode, axum::http::HeaderMap, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body)?))?,
        None => builder.body(Body::empty())?,
    };

    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, headers, json))
}

async fn register(app: &Router, username: &str) -> Result<Value> {
    let (status, _, body) = send(
        app,
        Method::POST,
        "/auth/register",
        None,
        Some(json!({
            "username": username,
            "email": format!("{username}@example.com"),
            "password": PASSWORD,
            "deviceId": "browser"
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    Ok(body)
}

fn field<'a>(body: &'a Value, name: &str) -> Result<&'a str> {
    body.get(name)
        .and_then(Value::as_str)
        .with_context(|| format!("missing {name} in {body}"))
}

#[tokio::test]
async fn health_reports_store_and_version() -> Result<()> {
    let app = app().await?;
    let (status, headers, body) = send(&app, Method::GET, "/health", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(field(&body, "name")?, "custodia");
    assert_eq!(field(&body, "database")?, "ok");
    assert!(headers.contains_key("x-app"));
    assert!(headers.contains_key("x-request-id"));
    Ok(())
}

#[tokio::test]
async fn register_login_and_me() -> Result<()> {
    let app = app().await?;
    let registered = register(&app, "alice").await?;
    assert_eq!(field(&registered, "tokenType")?, "Bearer");
    assert_eq!(field(&registered, "deviceId")?, "browser");

    let (status, _, login) = send(
        &app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({ "username": "alice", "password": PASSWORD, "deviceId": "cli" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let access = field(&login, "accessToken")?;

    let (status, _, me) = send(&app, Method::GET, "/auth/me", Some(access), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(field(&me, "username")?, "alice");

    let (status, _, sessions) =
        send(&app, Method::GET, "/auth/sessions", Some(access), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sessions.as_array().map(Vec::len), Some(2));
    Ok(())
}

#[tokio::test]
async fn duplicate_registration_conflicts() -> Result<()> {
    let app = app().await?;
    register(&app, "bob").await?;
    let (status, _, body) = send(
        &app,
        Method::POST,
        "/auth/register",
        None,
        Some(json!({ "username": "bob", "email": "other@example.com", "password": PASSWORD })),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(field(&body, "message")?.contains("already exists"));
    Ok(())
}

#[tokio::test]
async fn lockout_answers_429_with_retry_after() -> Result<()> {
    let app = app().await?;
    register(&app, "carol").await?;

    for _ in 0..5 {
        let (status, _, body) = send(
            &app,
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "username": "carol", "password": "Wr0ng!pass" })),
        )
        .await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(field(&body, "message")?, "Invalid credentials");
    }

    let (status, headers, body) = send(
        &app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({ "username": "carol", "password": PASSWORD })),
    )
    .await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(field(&body, "message")?, "Account temporarily locked");
    let retry_after = body
        .get("retryAfterSeconds")
        .and_then(Value::as_i64)
        .context("missing retryAfterSeconds")?;
    assert!(retry_after > 0);
    assert!(headers.contains_key(header::RETRY_AFTER));
    Ok(())
}

#[tokio::test]
async fn bad_bearer_tokens_read_the_same() -> Result<()> {
    let app = app().await?;

    let (status, _, body) = send(&app, Method::GET, "/auth/me", None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(field(&body, "message")?, "Invalid token");

    let (status, _, body) =
        send(&app, Method::GET, "/auth/me", Some("not.a.token"), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(field(&body, "message")?, "Invalid token");
    Ok(())
}

#[tokio::test]
async fn refresh_token_is_single_use() -> Result<()> {
    let app = app().await?;
    let registered = register(&app, "dave").await?;
    let refresh = field(&registered, "refreshToken")?;

    let (status, _, rotated) = send(
        &app,
        Method::POST,
        "/auth/refresh-token",
        None,
        Some(json!({ "refreshToken": refresh })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(field(&rotated, "refreshToken")?, refresh);

    let (status, _, _) = send(
        &app,
        Method::POST,
        "/auth/refresh-token",
        None,
        Some(json!({ "refreshToken": refresh })),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn logout_specific_requires_a_target() -> Result<()> {
    let app = app().await?;
    let registered = register(&app, "erin").await?;
    let access = field(&registered, "accessToken")?;

    let (status, _, body) = send(
        &app,
        Method::POST,
        "/auth/logout-specific",
        Some(access),
        Some(json!({})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        field(&body, "message")?,
        "Either sessionId or deviceId must be provided"
    );

    let (status, _, body) = send(
        &app,
        Method::POST,
        "/auth/logout-specific",
        Some(access),
        Some(json!({ "deviceId": "browser" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.get("invalidated").and_then(Value::as_u64), Some(1));
    Ok(())
}

#[tokio::test]
async fn forgot_password_is_uniform() -> Result<()> {
    let app = app().await?;
    register(&app, "frank").await?;

    let (known_status, _, known) = send(
        &app,
        Method::POST,
        "/auth/forgot-password",
        None,
        Some(json!({ "email": "frank@example.com" })),
    )
    .await?;
    let (unknown_status, _, unknown) = send(
        &app,
        Method::POST,
        "/auth/forgot-password",
        None,
        Some(json!({ "email": "nobody@example.com" })),
    )
    .await?;
    assert_eq!(known_status, StatusCode::OK);
    assert_eq!(unknown_status, StatusCode::OK);
    assert_eq!(known, unknown);
    Ok(())
}

#[tokio::test]
async fn reset_with_unknown_token_is_rejected() -> Result<()> {
    let app = app().await?;
    let (status, _, body) = send(
        &app,
        Method::POST,
        "/auth/reset-password",
        None,
        Some(json!({
            "token": "bogus",
            "password": "N3w!password",
            "confirmPassword": "N3w!password"
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(field(&body, "message")?, "Invalid or expired token");
    Ok(())
}

#[tokio::test]
async fn module_management_requires_permission() -> Result<()> {
    let app = app().await?;
    let registered = register(&app, "grace").await?;
    let access = field(&registered, "accessToken")?;
    let user_id = field(field_obj(&registered, "user")?, "id")?;

    let (status, _, _) = send(
        &app,
        Method::POST,
        "/module-roles",
        Some(access),
        Some(json!({
            "userId": user_id,
            "moduleId": uuid::Uuid::new_v4(),
            "roleId": uuid::Uuid::new_v4()
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    Ok(())
}

fn field_obj<'a>(body: &'a Value, name: &str) -> Result<&'a Value> {
    body.get(name).with_context(|| format!("missing {name} in {body}"))
}
