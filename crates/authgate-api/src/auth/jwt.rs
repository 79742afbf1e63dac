//! JWT token generation and validation
//!
//! Two token kinds are produced here:
//! - ID tokens: RS256-signed, embed the full user profile, verifiable with
//!   the public key alone.
//! - Refresh tokens: HS256-signed, embed only the user ID and a unique token
//!   ID (`jti`) that keys the credential store registration.
//!
//! This module is pure: no store access and no I/O beyond loading key files.

use authgate_core::User;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

/// Claims carried by an ID token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Profile snapshot at issuance (password digest is never serialized)
    pub user: User,
    /// Issued at timestamp (Unix epoch)
    pub iat: u64,
    /// Expiration timestamp (Unix epoch)
    pub exp: u64,
}

/// Claims carried by a refresh token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    /// Owner of the token
    pub uid: Uuid,
    /// Unique token identifier, the credential store key component
    pub jti: Uuid,
    /// Issued at timestamp (Unix epoch)
    pub iat: u64,
    /// Expiration timestamp (Unix epoch)
    pub exp: u64,
}

/// A freshly minted refresh token
#[derive(Debug, Clone)]
pub struct RefreshTokenData {
    /// Signed token string
    pub token: String,
    /// Token identifier embedded as `jti`
    pub id: Uuid,
    /// Remaining lifetime, used as the store registration TTL
    pub expires_in: Duration,
}

/// JWT token generation and validation errors
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Invalid token")]
    Invalid,

    #[error("Token has expired")]
    Expired,

    #[error("System time error: {0}")]
    SystemTime(#[from] std::time::SystemTimeError),
}

/// RSA key pair for ID tokens
///
/// Loaded once at startup and handed to the token service.
#[derive(Clone)]
pub struct IdTokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl IdTokenKeys {
    /// Build from PEM-encoded private and public keys
    pub fn from_rsa_pem(private_pem: &[u8], public_pem: &[u8]) -> Result<Self, JwtError> {
        let encoding = EncodingKey::from_rsa_pem(private_pem)
            .map_err(|e| JwtError::InvalidKey(format!("private key: {e}")))?;
        let decoding = DecodingKey::from_rsa_pem(public_pem)
            .map_err(|e| JwtError::InvalidKey(format!("public key: {e}")))?;

        Ok(Self { encoding, decoding })
    }

    /// Read both PEM files from disk
    pub fn from_files(private_path: &Path, public_path: &Path) -> Result<Self, JwtError> {
        let private_pem = std::fs::read(private_path).map_err(|e| {
            JwtError::InvalidKey(format!("could not read {}: {e}", private_path.display()))
        })?;
        let public_pem = std::fs::read(public_path).map_err(|e| {
            JwtError::InvalidKey(format!("could not read {}: {e}", public_path.display()))
        })?;

        Self::from_rsa_pem(&private_pem, &public_pem)
    }

    pub fn encoding(&self) -> &EncodingKey {
        &self.encoding
    }

    pub fn decoding(&self) -> &DecodingKey {
        &self.decoding
    }
}

fn now_secs() -> Result<i64, JwtError> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as i64)
}

/// Expiry never goes below the epoch; a negative TTL yields a token
/// that is already expired.
fn expiry(now: i64, ttl_secs: i64) -> u64 {
    now.saturating_add(ttl_secs).max(0) as u64
}

fn validation(algorithm: Algorithm) -> Validation {
    let mut validation = Validation::new(algorithm);
    validation.leeway = 0;
    validation.set_required_spec_claims(&["exp", "iat"]);
    validation
}

fn map_decode_error(e: jsonwebtoken::errors::Error) -> JwtError {
    match e.kind() {
        ErrorKind::ExpiredSignature => JwtError::Expired,
        _ => JwtError::Invalid,
    }
}

/// Generate an RS256 ID token for a user
///
/// # Arguments
///
/// * `user` - Subject to embed; the password digest is dropped on serialization
/// * `key` - RSA private key
/// * `ttl_secs` - Lifetime in seconds (may be negative in tests)
///
/// # Example
///
/// ```no_run
/// use authgate_api::auth::jwt::{issue_id_token, IdTokenKeys};
/// use authgate_core::User;
///
/// let keys = IdTokenKeys::from_files("rsa_private.pem".as_ref(), "rsa_public.pem".as_ref())
///     .expect("keys");
/// let user = User::new("john@example.com", "");
/// let token = issue_id_token(&user, keys.encoding(), 900).expect("Failed to sign");
/// ```
pub fn issue_id_token(user: &User, key: &EncodingKey, ttl_secs: i64) -> Result<String, JwtError> {
    let now = now_secs()?;

    let claims = IdTokenClaims {
        user: user.clone(),
        iat: now.max(0) as u64,
        exp: expiry(now, ttl_secs),
    };

    encode(&Header::new(Algorithm::RS256), &claims, key).map_err(JwtError::Signing)
}

/// Generate an HS256 refresh token with a fresh token ID
pub fn issue_refresh_token(
    uid: Uuid,
    secret: &str,
    ttl_secs: i64,
) -> Result<RefreshTokenData, JwtError> {
    let now = now_secs()?;
    let id = Uuid::new_v4();

    let claims = RefreshTokenClaims {
        uid,
        jti: id,
        iat: now.max(0) as u64,
        exp: expiry(now, ttl_secs),
    };

    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(JwtError::Signing)?;

    Ok(RefreshTokenData {
        token,
        id,
        expires_in: Duration::from_secs(ttl_secs.max(0) as u64),
    })
}

/// Validate an ID token and return the embedded user
///
/// Only RS256 is accepted, so a token signed with any other algorithm
/// (including an HMAC keyed with the public key) is rejected as invalid.
pub fn verify_id_token(token: &str, key: &DecodingKey) -> Result<User, JwtError> {
    let token_data = decode::<IdTokenClaims>(token, key, &validation(Algorithm::RS256))
        .map_err(map_decode_error)?;

    Ok(token_data.claims.user)
}

/// Validate a refresh token's signature and expiry
///
/// Liveness in the credential store is not checked here.
pub fn verify_refresh_token(token: &str, secret: &str) -> Result<RefreshTokenClaims, JwtError> {
    let token_data = decode::<RefreshTokenClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation(Algorithm::HS256),
    )
    .map_err(map_decode_error)?;

    Ok(token_data.claims)
}
