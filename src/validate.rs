//! Input checks shared by the orchestrator and the directory endpoints.

use crate::error::{AuthError, Result};
use regex::Regex;

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Usernames: 3-50 characters of letters, digits, `.`, `_` or `-`.
#[must_use]
pub fn valid_username(username: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9._-]{3,50}$").is_ok_and(|regex| regex.is_match(username))
}

/// Module keys: 3-50 characters of letters, digits, `_` or `-`.
#[must_use]
pub fn valid_module_key(key: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9_-]{3,50}$").is_ok_and(|regex| regex.is_match(key))
}

/// At least 8 characters with a digit, a lowercase letter, an uppercase letter and a
/// symbol, and no whitespace.
///
/// # Errors
/// [`AuthError::Validation`] describing the rule.
pub fn check_password_strength(password: &str) -> Result<()> {
    let strong = password.chars().count() >= 8
        && !password.chars().any(char::is_whitespace)
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(char::is_lowercase)
        && password.chars().any(char::is_uppercase)
        && password.chars().any(|c| c.is_ascii_punctuation());
    if strong {
        Ok(())
    } else {
        Err(AuthError::Validation(
            "Password must be at least 8 characters long and contain at least one digit, one lowercase letter, one uppercase letter, and one special character".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn email_format() {
        assert!(valid_email("a@example.com"));
        assert!(!valid_email("a@example"));
        assert!(!valid_email("a b@example.com"));
    }

    #[test]
    fn username_and_module_key_format() {
        assert!(valid_username("alice.smith"));
        assert!(!valid_username("al"));
        assert!(!valid_username("alice smith"));
        assert!(valid_module_key("billing_v2"));
        assert!(!valid_module_key("bill.ing"));
    }

    #[test]
    fn password_strength() {
        assert!(check_password_strength("Sup3r$ecret").is_ok());
        assert!(check_password_strength("Short1!A").is_ok());
        for weak in ["Sh0rt!", "alllowercase1!", "NoDigits!!", "NoSymbol123", "Has Space1!"] {
            assert!(
                matches!(check_password_strength(weak), Err(AuthError::Validation(_))),
                "{weak}"
            );
        }
    }
}
