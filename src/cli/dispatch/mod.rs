//! Map validated CLI arguments to the action the binary runs.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::auth;
use anyhow::Result;

/// # Errors
/// Returns an error if required arguments are missing or invalid.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches.get_one::<String>("dsn").cloned();

    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        token_secret: auth_opts.token_secret,
        access_token_ttl_seconds: auth_opts.access_token_ttl_seconds,
        refresh_token_ttl_seconds: auth_opts.refresh_token_ttl_seconds,
        login_max_attempts: auth_opts.login_max_attempts,
        login_window_minutes: auth_opts.login_window_minutes,
        login_lock_minutes: auth_opts.login_lock_minutes,
        reset_token_ttl_minutes: auth_opts.reset_token_ttl_minutes,
        session_sweep_seconds: auth_opts.session_sweep_seconds,
        store_timeout_ms: auth_opts.store_timeout_ms,
        default_role: auth_opts.default_role,
        frontend_base_url: auth_opts.frontend_base_url,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    #[test]
    fn server_action_carries_options() -> Result<()> {
        temp_env::with_vars(
            [
                ("CUSTODIA_TOKEN_SECRET", Some("0123456789abcdef0123456789abcdef")),
                ("CUSTODIA_DSN", None),
                ("CUSTODIA_PORT", Some("9443")),
                ("CUSTODIA_LOGIN_MAX_ATTEMPTS", Some("3")),
            ],
            || {
                let matches = commands::new().get_matches_from(vec!["custodia"]);
                let Action::Server(args) = handler(&matches)?;
                assert_eq!(args.port, 9443);
                assert!(args.dsn.is_none());
                assert_eq!(args.login_max_attempts, 3);
                assert_eq!(args.default_role, "USER");
                Ok(())
            },
        )
    }

    #[test]
    fn short_token_secret_is_rejected() {
        temp_env::with_vars(
            [
                ("CUSTODIA_TOKEN_SECRET", Some("too-short")),
                ("CUSTODIA_DSN", None::<&str>),
            ],
            || {
                let matches = commands::new().get_matches_from(vec!["custodia"]);
                let err = handler(&matches).err().map(|e| e.to_string());
                assert_eq!(
                    err.as_deref(),
                    Some("--token-secret must be at least 32 bytes")
                );
            },
        );
    }
}
