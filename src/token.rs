//! Compact HS256 tokens for access and refresh credentials, plus the opaque
//! random-token helpers shared by sessions and password resets.
//!
//! Wire format: `base64url(header).base64url(claims).base64url(hmac)`, unpadded.

use crate::clock::MAX_LIFETIME_SECONDS;
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const ALG: &str = "HS256";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("failed to issue token: {0}")]
    Issue(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct Header {
    alg: String,
    typ: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    /// Random per token, so two tokens minted in the same second still differ.
    pub jti: String,
    pub typ: TokenKind,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.sub
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }

    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_default()
    }

    /// Application claim lookup (`userId`, `authorities`, ...).
    #[must_use]
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct TokenConfig {
    secret: SecretString,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl TokenConfig {
    /// Defaults: 1 hour access tokens, 30 day refresh tokens.
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            access_ttl_seconds: 3600,
            refresh_ttl_seconds: 30 * 24 * 3600,
        }
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds.clamp(1, MAX_LIFETIME_SECONDS);
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds.clamp(1, MAX_LIFETIME_SECONDS);
        self
    }

    #[must_use]
    pub const fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    #[must_use]
    pub const fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }
}

/// Stateless signer/verifier. Holds nothing but configuration.
#[derive(Clone, Debug)]
pub struct TokenCodec {
    config: TokenConfig,
}

impl TokenCodec {
    #[must_use]
    pub const fn new(config: TokenConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Issue a short-lived access token carrying application claims.
    ///
    /// # Errors
    /// Returns [`TokenError::Issue`] if randomness or encoding fails.
    pub fn issue_access_token(
        &self,
        subject: &str,
        claims: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        self.issue(
            subject,
            TokenKind::Access,
            claims,
            now,
            self.config.access_ttl_seconds,
        )
    }

    /// Issue a long-lived refresh token.
    ///
    /// # Errors
    /// Returns [`TokenError::Issue`] if randomness or encoding fails.
    pub fn issue_refresh_token(
        &self,
        subject: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        self.issue(
            subject,
            TokenKind::Refresh,
            Map::new(),
            now,
            self.config.refresh_ttl_seconds,
        )
    }

    fn issue(
        &self,
        subject: &str,
        typ: TokenKind,
        extra: Map<String, Value>,
        now: DateTime<Utc>,
        ttl_seconds: i64,
    ) -> Result<IssuedToken, TokenError> {
        let expires_at = Duration::try_seconds(ttl_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| TokenError::Issue(format!("lifetime of {ttl_seconds}s overflows")))?;
        let claims = Claims {
            sub: subject.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: random_token(16)?,
            typ,
            extra,
        };
        let header = Header {
            alg: ALG.to_string(),
            typ: "JWT".to_string(),
        };

        let signing_input = format!("{}.{}", b64e_json(&header)?, b64e_json(&claims)?);
        let mut mac = self.mac().map_err(|_| TokenError::Issue("invalid key".to_string()))?;
        mac.update(signing_input.as_bytes());
        let signature = Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes());

        Ok(IssuedToken {
            token: format!("{signing_input}.{signature}"),
            expires_at: DateTime::from_timestamp(claims.exp, 0).unwrap_or(expires_at),
        })
    }

    /// Check structure and signature, returning the decoded claims.
    ///
    /// Expiry is not checked here; see [`Claims::is_expired`].
    ///
    /// # Errors
    /// [`TokenError::Malformed`] or [`TokenError::InvalidSignature`].
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(TokenError::Malformed)?;
        let claims_b64 = parts.next().ok_or(TokenError::Malformed)?;
        let sig_b64 = parts.next().ok_or(TokenError::Malformed)?;
        if parts.next().is_some() {
            return Err(TokenError::Malformed);
        }

        let header: Header = b64d_json(header_b64)?;
        if header.alg != ALG {
            return Err(TokenError::Malformed);
        }

        let signature =
            Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| TokenError::Malformed)?;
        let mut mac = self.mac().map_err(|_| TokenError::InvalidSignature)?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        b64d_json(claims_b64)
    }

    /// # Errors
    /// Same as [`TokenCodec::verify`].
    pub fn extract_subject(&self, token: &str) -> Result<String, TokenError> {
        self.verify(token).map(|claims| claims.sub)
    }

    /// Unverifiable tokens count as expired.
    #[must_use]
    pub fn is_expired(&self, token: &str, now: DateTime<Utc>) -> bool {
        self.verify(token)
            .map_or(true, |claims| claims.is_expired(now))
    }

    fn mac(&self) -> Result<HmacSha256, hmac::digest::InvalidLength> {
        HmacSha256::new_from_slice(self.config.secret.expose_secret().as_bytes())
    }
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value).map_err(|err| TokenError::Issue(err.to_string()))?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, TokenError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
}

fn random_token(len: usize) -> Result<String, TokenError> {
    let mut bytes = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| TokenError::Issue(err.to_string()))?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Create a 256-bit random opaque token (session handles, reset links).
///
/// # Errors
/// Returns [`TokenError::Issue`] if the OS RNG fails.
pub fn generate_opaque_token() -> Result<String, TokenError> {
    random_token(32)
}

/// Only this digest is ever persisted for opaque and refresh tokens.
#[must_use]
pub fn hash_opaque_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}
