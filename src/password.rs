//! Argon2id credential hashing. Runs on the blocking pool.

use crate::error::{AuthError, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

#[derive(Clone)]
pub struct Credentials {
    argon2: Argon2<'static>,
    /// Verified against when the user does not exist so both paths cost the same.
    dummy_hash: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").finish_non_exhaustive()
    }
}

impl Credentials {
    /// # Errors
    /// Returns an error if the dummy hash cannot be computed.
    pub fn new(params: Params) -> Result<Self> {
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let dummy_hash = hash_with(&argon2, "custodia-timing-equalizer")?;
        Ok(Self { argon2, dummy_hash })
    }

    /// # Errors
    /// Returns an error if hashing fails or the blocking task is cancelled.
    pub async fn hash(&self, password: &str) -> Result<String> {
        let argon2 = self.argon2.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hash_with(&argon2, &password))
            .await
            .map_err(|err| AuthError::Internal(format!("hash task failed: {err}")))?
    }

    /// `stored = None` still burns one verification.
    ///
    /// # Errors
    /// Returns an error only if the blocking task is cancelled.
    pub async fn verify(&self, password: &str, stored: Option<&str>) -> Result<bool> {
        let known = stored.is_some();
        let argon2 = self.argon2.clone();
        let password = password.to_string();
        let hash = stored.unwrap_or(&self.dummy_hash).to_string();
        let matched = tokio::task::spawn_blocking(move || {
            PasswordHash::new(&hash).is_ok_and(|parsed| {
                argon2
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok()
            })
        })
        .await
        .map_err(|err| AuthError::Internal(format!("verify task failed: {err}")))?;
        Ok(known && matched)
    }
}

fn hash_with(argon2: &Argon2<'static>, password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AuthError::Internal(format!("failed to hash password: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Result<Credentials> {
        let params = Params::new(1024, 1, 1, None)
            .map_err(|err| AuthError::Internal(err.to_string()))?;
        Credentials::new(params)
    }

    #[tokio::test]
    async fn hash_then_verify() -> Result<()> {
        let credentials = credentials()?;
        let hash = credentials.hash("correct horse").await?;
        assert!(hash.starts_with("$argon2id$"));
        assert!(credentials.verify("correct horse", Some(&hash)).await?);
        assert!(!credentials.verify("wrong horse", Some(&hash)).await?);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_user_never_matches() -> Result<()> {
        let credentials = credentials()?;
        assert!(
            !credentials
                .verify("custodia-timing-equalizer", None)
                .await?
        );
        assert!(!credentials.verify("anything", Some("not-a-phc-string")).await?);
        Ok(())
    }

    #[tokio::test]
    async fn production_params_build_a_real_dummy_hash() -> Result<()> {
        let credentials = Credentials::new(Params::default())?;
        assert!(credentials.dummy_hash.starts_with("$argon2id$"));
        Ok(())
    }
}
