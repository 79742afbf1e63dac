//! AuthGate Core - Domain models, contracts, and shared types
//!
//! This crate defines the core abstractions used throughout AuthGate:
//! - The authenticated subject (`User`)
//! - The shared error taxonomy
//! - Contracts for user persistence and password hashing
//! - Configuration management

pub mod config;

pub use config::{AppConfig, ConfigError, DatabaseConfig, LoggingConfig, ServerConfig, TokenConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Error taxonomy shared by every layer
///
/// `Authorization` is deliberately coarse: expired, revoked, reused and
/// forged credentials all collapse into it so callers cannot tell them apart.
/// `Store` is rendered as an internal error at the HTTP boundary; its detail
/// only reaches the logs.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Credential store error: {0}")]
    Store(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AuthError {
    pub fn authorization(message: impl Into<String>) -> Self {
        Self::Authorization(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// True for failures a client caused by presenting a bad credential
    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::Authorization(_))
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;

// ============================================================================
// Subject
// ============================================================================

/// Authenticated subject
///
/// The password digest is never serialized: it is absent from API responses
/// and from every token payload that embeds a `User`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable unique identifier
    pub uid: Uuid,

    /// Login email address
    pub email: String,

    /// Password digest produced by a `PasswordHasher`
    #[serde(skip_serializing, default)]
    pub password: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Avatar URL
    #[serde(default)]
    pub image_url: String,

    /// Personal website
    #[serde(default)]
    pub website: String,
}

impl User {
    /// Create a user with a fresh UID and an already hashed password
    pub fn new(email: impl Into<String>, password_digest: impl Into<String>) -> Self {
        Self {
            uid: Uuid::new_v4(),
            email: email.into(),
            password: password_digest.into(),
            name: String::new(),
            image_url: String::new(),
            website: String::new(),
        }
    }

    /// Copy of this user with the digest cleared
    pub fn without_password(&self) -> Self {
        Self {
            password: String::new(),
            ..self.clone()
        }
    }
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("uid", &self.uid)
            .field("email", &self.email)
            .field("password", &"[redacted]")
            .field("name", &self.name)
            .field("image_url", &self.image_url)
            .field("website", &self.website)
            .finish()
    }
}

// ============================================================================
// Contracts
// ============================================================================

/// Persistence of user profile records
///
/// `find_*` return `AuthError::NotFound` when no record matches and
/// `create` returns `AuthError::Conflict` for a duplicate email.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, uid: Uuid) -> Result<User>;

    async fn find_by_email(&self, email: &str) -> Result<User>;

    async fn create(&self, user: User) -> Result<User>;

    async fn update(&self, user: User) -> Result<User>;
}

/// One-way password hashing
pub trait PasswordHasher: Send + Sync {
    /// Hash a plaintext password into a self-describing digest
    fn hash(&self, plaintext: &str) -> Result<String>;

    /// Check a plaintext password against a stored digest
    ///
    /// `Ok(false)` means a mismatch; `Err` means the digest could not be used.
    fn verify(&self, plaintext: &str, digest: &str) -> Result<bool>;
}
