//! End-to-end flows through the orchestrator on the in-memory store with a
//! manual clock, so lockout windows and expiries can be stepped through.

use anyhow::{anyhow, Result};
use argon2::Params;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use custodia::{
    cli::actions::server::bootstrap,
    clock::ManualClock,
    notify::{Notice, Notifier},
    orchestrator::{AuthConfig, AuthOrchestrator, ClientContext, RegisterInput},
    password::Credentials,
    store::MemoryStore,
    token::{TokenCodec, TokenConfig},
    AuthError,
};
use secrecy::SecretString;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

const PASSWORD: &str = "Str0ng!pass";

#[derive(Default)]
struct CapturingNotifier {
    sent: Mutex<Vec<Notice>>,
    failing: AtomicBool,
}

impl CapturingNotifier {
    fn notices(&self) -> Vec<Notice> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    fn last_reset_token(&self) -> Option<String> {
        self.notices().into_iter().rev().find_map(|notice| match notice {
            Notice::PasswordReset { reset_url, .. } => reset_url
                .split_once("#token=")
                .map(|(_, token)| token.to_string()),
            Notice::PasswordChanged { .. } => None,
        })
    }
}

#[async_trait]
impl Notifier for CapturingNotifier {
    async fn send(&self, notice: &Notice) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("smtp unavailable"));
        }
        self.sent
            .lock()
            .map_err(|_| anyhow!("poisoned"))?
            .push(notice.clone());
        Ok(())
    }
}

struct Harness {
    orchestrator: Arc<AuthOrchestrator>,
    clock: Arc<ManualClock>,
    notifier: Arc<CapturingNotifier>,
}

async fn harness() -> Result<Harness> {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let notifier = Arc::new(CapturingNotifier::default());
    let codec = TokenCodec::new(TokenConfig::new(SecretString::from(
        "integration-secret-0123456789abcdef",
    )));
    let credentials =
        Credentials::new(Params::new(1024, 1, 1, None).map_err(|e| anyhow!("{e}"))?)?;

    let orchestrator = Arc::new(AuthOrchestrator::new(
        store,
        codec,
        credentials,
        notifier.clone(),
        clock.clone(),
        AuthConfig::new("https://app.example.com".to_string()),
    ));
    bootstrap(&orchestrator.authz(), "USER").await?;

    Ok(Harness {
        orchestrator,
        clock,
        notifier,
    })
}

fn device(id: &str) -> ClientContext {
    ClientContext {
        device_id: Some(id.to_string()),
        ip: Some("10.0.0.1".to_string()),
        user_agent: Some("integration".to_string()),
    }
}

async fn register(
    h: &Harness,
    username: &str,
) -> std::result::Result<custodia::orchestrator::AuthOutcome, AuthError> {
    h.orchestrator
        .register(
            RegisterInput {
                username: username.to_string(),
                email: format!("{username}@example.com"),
                password: PASSWORD.to_string(),
                ..RegisterInput::default()
            },
            &device("registration"),
        )
        .await
}

#[tokio::test]
async fn register_then_login_grants_default_role() -> Result<()> {
    let h = harness().await?;
    let registered = register(&h, "alice").await?;
    assert!(registered.authorities.contains("ROLE_USER"));
    assert_eq!(registered.token_type, "Bearer");

    let outcome = h.orchestrator.login("alice", PASSWORD, &device("laptop")).await?;
    assert_eq!(outcome.device_id, "laptop");

    let principal = h.orchestrator.authenticate(&outcome.access_token).await?;
    assert_eq!(principal.username, "alice");
    assert!(principal.has_authority("ROLE_USER"));

    let duplicate = register(&h, "alice").await;
    assert!(matches!(duplicate, Err(AuthError::AlreadyExists(_))));
    Ok(())
}

#[tokio::test]
async fn repeated_failures_lock_until_the_lock_expires() -> Result<()> {
    let h = harness().await?;
    register(&h, "bob").await?;

    for _ in 0..5 {
        let result = h.orchestrator.login("bob", "Wr0ng!pass", &device("d1")).await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    }

    // The right password is refused while locked.
    let locked = h.orchestrator.login("bob", PASSWORD, &device("d1")).await;
    match locked {
        Err(AuthError::AccountLocked {
            retry_after_seconds,
        }) => assert!(retry_after_seconds > 0 && retry_after_seconds <= 60),
        other => return Err(anyhow!("expected lockout, got {other:?}")),
    }

    h.clock.advance(Duration::seconds(61));
    let outcome = h.orchestrator.login("bob", PASSWORD, &device("d1")).await?;
    assert_eq!(outcome.user.username, "bob");

    // A success resets the counter, so one new failure does not relock.
    let result = h.orchestrator.login("bob", "Wr0ng!pass", &device("d1")).await;
    assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    h.orchestrator.login("bob", PASSWORD, &device("d1")).await?;
    Ok(())
}

#[tokio::test]
async fn unknown_user_fails_like_a_wrong_password() -> Result<()> {
    let h = harness().await?;
    let result = h.orchestrator.login("ghost", PASSWORD, &device("d1")).await;
    assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    Ok(())
}

#[tokio::test]
async fn refresh_rotates_and_burns_the_old_token() -> Result<()> {
    let h = harness().await?;
    register(&h, "carol").await?;
    let first = h.orchestrator.login("carol", PASSWORD, &device("phone")).await?;

    let second = h.orchestrator.refresh(&first.refresh_token).await?;
    assert_ne!(second.refresh_token, first.refresh_token);
    assert_eq!(second.session_id, first.session_id);

    let replay = h.orchestrator.refresh(&first.refresh_token).await;
    assert!(matches!(replay, Err(AuthError::SessionInvalid)));

    h.orchestrator.refresh(&second.refresh_token).await?;

    // An access token is not a refresh token.
    let wrong_kind = h.orchestrator.refresh(&second.access_token).await;
    assert!(matches!(wrong_kind, Err(AuthError::InvalidToken)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refreshes_with_one_token_have_a_single_winner() -> Result<()> {
    let h = harness().await?;
    register(&h, "casey").await?;
    let issued = h.orchestrator.login("casey", PASSWORD, &device("tablet")).await?;

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let orchestrator = h.orchestrator.clone();
        let token = issued.refresh_token.clone();
        tasks.spawn(async move { orchestrator.refresh(&token).await });
    }

    let mut winners = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined? {
            Ok(outcome) => winners.push(outcome),
            Err(AuthError::SessionInvalid) => {}
            Err(other) => return Err(anyhow!("unexpected refresh error: {other}")),
        }
    }
    assert_eq!(winners.len(), 1);

    // Only the winner's token is live now.
    h.orchestrator.refresh(&winners[0].refresh_token).await?;
    Ok(())
}

#[tokio::test]
async fn one_session_per_device() -> Result<()> {
    let h = harness().await?;
    let registered = register(&h, "dave").await?;
    let user_id = registered.user.id;

    let first = h.orchestrator.login("dave", PASSWORD, &device("tablet")).await?;
    let second = h.orchestrator.login("dave", PASSWORD, &device("tablet")).await?;
    h.orchestrator.login("dave", PASSWORD, &device("desktop")).await?;

    let sessions = h.orchestrator.active_sessions(user_id).await?;
    let tablets = sessions.iter().filter(|s| s.device_id == "tablet").count();
    assert_eq!(tablets, 1);

    // The first login's refresh token was overwritten on the same device.
    let stale = h.orchestrator.refresh(&first.refresh_token).await;
    assert!(matches!(stale, Err(AuthError::SessionInvalid)));
    h.orchestrator.refresh(&second.refresh_token).await?;
    Ok(())
}

#[tokio::test]
async fn logout_device_and_logout_all() -> Result<()> {
    let h = harness().await?;
    let registered = register(&h, "erin").await?;
    let user_id = registered.user.id;

    let laptop = h.orchestrator.login("erin", PASSWORD, &device("laptop")).await?;
    let phone = h.orchestrator.login("erin", PASSWORD, &device("phone")).await?;

    assert_eq!(h.orchestrator.logout(user_id, Some("laptop")).await?, 1);
    let result = h.orchestrator.refresh(&laptop.refresh_token).await;
    assert!(matches!(result, Err(AuthError::SessionInvalid)));

    let phone = h.orchestrator.refresh(&phone.refresh_token).await?;

    let invalidated = h.orchestrator.logout_all(user_id).await?;
    assert!(invalidated >= 1);
    assert!(h.orchestrator.active_sessions(user_id).await?.is_empty());
    let result = h.orchestrator.refresh(&phone.refresh_token).await;
    assert!(matches!(result, Err(AuthError::SessionInvalid)));
    Ok(())
}

#[tokio::test]
async fn logout_by_session_is_scoped_to_its_owner() -> Result<()> {
    let h = harness().await?;
    let frank = register(&h, "frank").await?;
    let grace = register(&h, "grace").await?;

    let removed = h
        .orchestrator
        .logout_by_session(grace.user.id, frank.session_id)
        .await?;
    assert_eq!(removed, 0);
    h.orchestrator.refresh(&frank.refresh_token).await?;
    Ok(())
}

#[tokio::test]
async fn access_tokens_expire() -> Result<()> {
    let h = harness().await?;
    let outcome = register(&h, "heidi").await?;

    h.clock.advance(Duration::seconds(3601));
    let result = h.orchestrator.authenticate(&outcome.access_token).await;
    assert!(matches!(result, Err(AuthError::TokenExpired)));
    Ok(())
}

#[tokio::test]
async fn password_reset_is_single_use_and_revokes_sessions() -> Result<()> {
    let h = harness().await?;
    let registered = register(&h, "ivan").await?;

    h.orchestrator.forgot_password("IVAN@example.com").await?;
    let token = h
        .notifier
        .last_reset_token()
        .ok_or_else(|| anyhow!("no reset notice"))?;

    let mismatch = h
        .orchestrator
        .reset_password(&token, "N3w!password", "N3w!passw0rd")
        .await;
    assert!(matches!(mismatch, Err(AuthError::Mismatch)));

    h.orchestrator
        .reset_password(&token, "N3w!password", "N3w!password")
        .await?;

    let reused = h
        .orchestrator
        .reset_password(&token, "An0ther!pass", "An0ther!pass")
        .await;
    assert!(matches!(reused, Err(AuthError::InvalidOrExpired)));

    let stale = h.orchestrator.refresh(&registered.refresh_token).await;
    assert!(matches!(stale, Err(AuthError::SessionInvalid)));

    let old = h.orchestrator.login("ivan", PASSWORD, &device("d1")).await;
    assert!(matches!(old, Err(AuthError::InvalidCredentials)));
    h.orchestrator.login("ivan", "N3w!password", &device("d1")).await?;

    assert!(h
        .notifier
        .notices()
        .iter()
        .any(|notice| matches!(notice, Notice::PasswordChanged { .. })));
    Ok(())
}

#[tokio::test]
async fn newer_reset_request_invalidates_older_tokens() -> Result<()> {
    let h = harness().await?;
    register(&h, "judy").await?;

    h.orchestrator.forgot_password("judy@example.com").await?;
    let older = h.notifier.last_reset_token().ok_or_else(|| anyhow!("no notice"))?;
    h.orchestrator.forgot_password("judy@example.com").await?;
    let newer = h.notifier.last_reset_token().ok_or_else(|| anyhow!("no notice"))?;
    assert_ne!(older, newer);

    let result = h
        .orchestrator
        .reset_password(&older, "N3w!password", "N3w!password")
        .await;
    assert!(matches!(result, Err(AuthError::InvalidOrExpired)));
    h.orchestrator
        .reset_password(&newer, "N3w!password", "N3w!password")
        .await?;
    Ok(())
}

#[tokio::test]
async fn reset_tokens_expire() -> Result<()> {
    let h = harness().await?;
    register(&h, "kim").await?;

    h.orchestrator.forgot_password("kim@example.com").await?;
    let token = h.notifier.last_reset_token().ok_or_else(|| anyhow!("no notice"))?;
    h.clock.advance(Duration::minutes(31));

    let result = h
        .orchestrator
        .reset_password(&token, "N3w!password", "N3w!password")
        .await;
    assert!(matches!(result, Err(AuthError::InvalidOrExpired)));
    Ok(())
}

#[tokio::test]
async fn forgot_password_answers_the_same_for_unknown_emails() -> Result<()> {
    let h = harness().await?;
    h.orchestrator.forgot_password("nobody@example.com").await?;
    assert!(h.notifier.notices().is_empty());
    Ok(())
}

#[tokio::test]
async fn delivery_failure_is_reported() -> Result<()> {
    let h = harness().await?;
    register(&h, "leo").await?;
    h.notifier.failing.store(true, Ordering::SeqCst);

    let result = h.orchestrator.forgot_password("leo@example.com").await;
    assert!(matches!(result, Err(AuthError::Delivery(_))));
    Ok(())
}

#[tokio::test]
async fn module_role_revocation_is_immediate() -> Result<()> {
    let h = harness().await?;
    let registered = register(&h, "mallory").await?;
    let user_id = registered.user.id;

    let authz = h.orchestrator.authz();
    let module = authz.create_module("billing", "Billing").await?;
    let role = authz.create_role("EDITOR", None).await?;
    authz.create_permission("invoice:write", None).await?;
    authz.grant_permission("EDITOR", "invoice:write").await?;

    let binding = authz.assign_role_in_module(user_id, module.id, role.id).await?;
    assert!(authz.has_module_role(user_id, "billing", "EDITOR").await?);
    assert!(authz.has_module_permission(user_id, "billing", "invoice:write").await?);

    let outcome = h.orchestrator.login("mallory", PASSWORD, &device("d1")).await?;
    assert!(outcome.authorities.contains("MODULE_billing_ROLE_EDITOR"));
    assert!(outcome.authorities.contains("MODULE_billing_invoice:write"));

    // Deactivation suspends the grant without deleting the binding.
    authz.set_module_active(module.id, false).await?;
    assert!(!authz.has_module_permission(user_id, "billing", "invoice:write").await?);
    authz.set_module_active(module.id, true).await?;
    assert!(authz.has_module_permission(user_id, "billing", "invoice:write").await?);

    authz.revoke_role_in_module(binding.id).await?;
    assert!(!authz.has_module_role(user_id, "billing", "EDITOR").await?);
    assert!(!authz.has_module_permission(user_id, "billing", "invoice:write").await?);

    let principal = h.orchestrator.authenticate(&outcome.access_token).await?;
    assert!(!principal.has_authority("MODULE_billing_ROLE_EDITOR"));
    Ok(())
}

#[tokio::test]
async fn register_into_unknown_module_creates_nothing() -> Result<()> {
    let h = harness().await?;
    let result = h
        .orchestrator
        .register(
            RegisterInput {
                username: "nina".to_string(),
                email: "nina@example.com".to_string(),
                password: PASSWORD.to_string(),
                module_ids: vec![uuid::Uuid::new_v4()],
                ..RegisterInput::default()
            },
            &ClientContext::default(),
        )
        .await;
    assert!(matches!(result, Err(AuthError::NotFound(_))));

    let retry = h.orchestrator.login("nina", PASSWORD, &device("d1")).await;
    assert!(matches!(retry, Err(AuthError::InvalidCredentials)));
    Ok(())
}
