//! Token, lockout, reset and session options.

use crate::clock::{MAX_LIFETIME_MINUTES, MAX_LIFETIME_SECONDS};
use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::{ExposeSecret, SecretString};

pub const ARG_TOKEN_SECRET: &str = "token-secret";
pub const MIN_TOKEN_SECRET_BYTES: usize = 32;

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    let command = with_lockout_args(command);
    with_account_args(command)
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TOKEN_SECRET)
                .long(ARG_TOKEN_SECRET)
                .help("HS256 signing secret for access and refresh tokens (at least 32 bytes)")
                .env("CUSTODIA_TOKEN_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new("access-token-ttl-seconds")
                .long("access-token-ttl-seconds")
                .help("Access token lifetime in seconds")
                .env("CUSTODIA_ACCESS_TOKEN_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_LIFETIME_SECONDS)),
        )
        .arg(
            Arg::new("refresh-token-ttl-seconds")
                .long("refresh-token-ttl-seconds")
                .help("Refresh token and session lifetime in seconds")
                .env("CUSTODIA_REFRESH_TOKEN_TTL_SECONDS")
                .default_value("2592000")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_LIFETIME_SECONDS)),
        )
}

fn with_lockout_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("login-max-attempts")
                .long("login-max-attempts")
                .help("Failed logins within the window that lock the account")
                .env("CUSTODIA_LOGIN_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new("login-window-minutes")
                .long("login-window-minutes")
                .help("Sliding window for counting failed logins, in minutes")
                .env("CUSTODIA_LOGIN_WINDOW_MINUTES")
                .default_value("10")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_LIFETIME_MINUTES)),
        )
        .arg(
            Arg::new("login-lock-minutes")
                .long("login-lock-minutes")
                .help("How long an account stays locked, in minutes")
                .env("CUSTODIA_LOGIN_LOCK_MINUTES")
                .default_value("1")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_LIFETIME_MINUTES)),
        )
}

fn with_account_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("reset-token-ttl-minutes")
                .long("reset-token-ttl-minutes")
                .help("Password reset token lifetime in minutes")
                .env("CUSTODIA_RESET_TOKEN_TTL_MINUTES")
                .default_value("30")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_LIFETIME_MINUTES)),
        )
        .arg(
            Arg::new("session-sweep-seconds")
                .long("session-sweep-seconds")
                .help("Interval between expired-session sweeps, in seconds")
                .env("CUSTODIA_SESSION_SWEEP_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("store-timeout-ms")
                .long("store-timeout-ms")
                .help("Deadline for each store call, in milliseconds")
                .env("CUSTODIA_STORE_TIMEOUT_MS")
                .default_value("5000")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("default-role")
                .long("default-role")
                .help("Role given to newly registered users")
                .env("CUSTODIA_DEFAULT_ROLE")
                .default_value("USER"),
        )
        .arg(
            Arg::new("frontend-base-url")
                .long("frontend-base-url")
                .help("Frontend base URL used for password reset links and CORS")
                .env("CUSTODIA_FRONTEND_BASE_URL")
                .default_value("http://localhost:3000"),
        )
}

#[derive(Debug)]
pub struct Options {
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

impl Options {
    /// # Errors
    /// Returns an error if the token secret is missing or shorter than 32 bytes.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let token_secret = matches
            .get_one::<String>(ARG_TOKEN_SECRET)
            .cloned()
            .map(SecretString::from)
            .context("missing required argument: --token-secret")?;
        if token_secret.expose_secret().len() < MIN_TOKEN_SECRET_BYTES {
            return Err(anyhow!(
                "--{ARG_TOKEN_SECRET} must be at least {MIN_TOKEN_SECRET_BYTES} bytes"
            ));
        }

        let default_role = matches
            .get_one::<String>("default-role")
            .map(|role| role.trim().to_string())
            .filter(|role| !role.is_empty())
            .unwrap_or_else(|| "USER".to_string());

        Ok(Self {
            token_secret,
            access_token_ttl_seconds: matches
                .get_one::<i64>("access-token-ttl-seconds")
                .copied()
                .unwrap_or(3600),
            refresh_token_ttl_seconds: matches
                .get_one::<i64>("refresh-token-ttl-seconds")
                .copied()
                .unwrap_or(2_592_000),
            login_max_attempts: matches
                .get_one::<u32>("login-max-attempts")
                .copied()
                .unwrap_or(5),
            login_window_minutes: matches
                .get_one::<i64>("login-window-minutes")
                .copied()
                .unwrap_or(10),
            login_lock_minutes: matches
                .get_one::<i64>("login-lock-minutes")
                .copied()
                .unwrap_or(1),
            reset_token_ttl_minutes: matches
                .get_one::<i64>("reset-token-ttl-minutes")
                .copied()
                .unwrap_or(30),
            session_sweep_seconds: matches
                .get_one::<u64>("session-sweep-seconds")
                .copied()
                .unwrap_or(3600),
            store_timeout_ms: matches
                .get_one::<u64>("store-timeout-ms")
                .copied()
                .unwrap_or(5000),
            default_role,
            frontend_base_url: matches
                .get_one::<String>("frontend-base-url")
                .cloned()
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
        })
    }
}
