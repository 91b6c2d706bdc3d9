use crate::{
    api,
    authz::{AuthorizationModel, ADMIN_ROLE, IAM_MODULE_KEY, MANAGE_PERMISSION},
    cli::telemetry,
    clock::SystemClock,
    error::AuthError,
    guard::LockoutPolicy,
    notify::LogNotifier,
    orchestrator::{AuthConfig, AuthOrchestrator},
    password::Credentials,
    reset::ResetConfig,
    session::SessionSweeper,
    store::{AuthStore, MemoryStore, PgStore},
    token::{TokenCodec, TokenConfig},
};
use anyhow::{Context, Result};
use argon2::Params;
use secrecy::SecretString;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub token_secret: SecretString,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub login_max_attempts: u32,
    pub login_window_minutes: i64,
    pub login_lock_minutes: i64,
    pub reset_token_ttl_minutes: i64,
    pub session_sweep_seconds: u64,
    pub store_timeout_ms: u64,
    pub default_role: String,
    pub frontend_base_url: String,
}

/// Execute the server action.
///
/// # Errors
/// Returns an error if the store cannot be prepared or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    match args.dsn.clone() {
        Some(dsn) => {
            let store = PgStore::connect(&dsn).await?;
            store.migrate().await?;
            info!("database schema is up to date");
            serve(Arc::new(store), args).await
        }
        None => {
            warn!("no --dsn given, state is kept in memory and lost on restart");
            serve(Arc::new(MemoryStore::new()), args).await
        }
    }
}

async fn serve<S: AuthStore + 'static>(store: Arc<S>, args: Args) -> Result<()> {
    let codec = TokenCodec::new(
        TokenConfig::new(args.token_secret)
            .with_access_ttl_seconds(args.access_token_ttl_seconds)
            .with_refresh_ttl_seconds(args.refresh_token_ttl_seconds),
    );

    let config = AuthConfig::new(args.frontend_base_url)
        .with_default_role(args.default_role)
        .with_store_deadline(Duration::from_millis(args.store_timeout_ms))
        .with_lockout(
            LockoutPolicy::new()
                .with_max_attempts(args.login_max_attempts)
                .with_window_minutes(args.login_window_minutes)
                .with_lock_minutes(args.login_lock_minutes),
        )
        .with_reset(ResetConfig::new().with_ttl_minutes(args.reset_token_ttl_minutes));

    let credentials =
        Credentials::new(Params::default()).context("Failed to prepare password hashing")?;

    let orchestrator = Arc::new(AuthOrchestrator::new(
        store,
        codec,
        credentials,
        Arc::new(LogNotifier),
        Arc::new(SystemClock),
        config,
    ));

    bootstrap(&orchestrator.authz(), orchestrator.config().default_role())
        .await
        .context("Failed to bootstrap roles")?;

    let sweeper = SessionSweeper::start(
        orchestrator.sessions(),
        Some(orchestrator.guard()),
        Duration::from_secs(args.session_sweep_seconds),
    );

    let result = api::new(args.port, orchestrator).await;

    sweeper.stop().await;
    telemetry::shutdown_tracer();

    result
}

/// Create the default and admin roles, the `iam` module and the permission that
/// lets admins manage bindings. Safe to run on every start.
///
/// # Errors
/// Returns an error on store failures other than duplicates.
pub async fn bootstrap(authz: &AuthorizationModel, default_role: &str) -> Result<(), AuthError> {
    for (name, description) in [
        (default_role, "Default role for registered users"),
        (ADMIN_ROLE, "Administrators"),
    ] {
        ignore_existing(authz.create_role(name, Some(description)).await)?;
    }
    ignore_existing(
        authz
            .create_permission(MANAGE_PERMISSION, Some("Assign and revoke module roles"))
            .await,
    )?;
    authz.grant_permission(ADMIN_ROLE, MANAGE_PERMISSION).await?;
    ignore_existing(authz.create_module(IAM_MODULE_KEY, "Identity and access").await)?;
    Ok(())
}

fn ignore_existing<T>(result: Result<T, AuthError>) -> Result<(), AuthError> {
    match result {
        Ok(_) | Err(AuthError::AlreadyExists(_)) => Ok(()),
        Err(err) => Err(err),
    }
}
