//! Account operations on top of `UserRepository` and `PasswordHasher`

use crate::audit::{audit_log, AuditEvent};
use authgate_core::{AuthError, PasswordHasher, Result, User, UserRepository};
use std::sync::Arc;
use uuid::Uuid;

/// Message returned for every failed sign-in
pub const INVALID_SIGNIN: &str = "invalid email and password combination";

/// Optional profile fields; `None` leaves the stored value untouched
#[derive(Debug, Clone, Default)]
pub struct DetailsUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
}

/// Account management service
#[derive(Clone)]
pub struct UserService {
    repository: Arc<dyn UserRepository>,
    hasher: Arc<dyn PasswordHasher>,
}

impl UserService {
    pub fn new(repository: Arc<dyn UserRepository>, hasher: Arc<dyn PasswordHasher>) -> Self {
        Self { repository, hasher }
    }

    /// Create an account
    ///
    /// `ip_address` is the client address recorded in the audit trail.
    ///
    /// # Errors
    ///
    /// * `AuthError::Conflict` - email already registered
    /// * `AuthError::Internal` - hashing or persistence failed
    pub async fn signup(
        &self,
        email: &str,
        password: &str,
        ip_address: Option<String>,
    ) -> Result<User> {
        let digest = self.hasher.hash(password).map_err(|e| {
            tracing::error!(email = %email, error = %e, "unable to hash password");
            AuthError::internal("failed to create account")
        })?;

        let user = self.repository.create(User::new(email, digest)).await?;
        tracing::info!(uid = %user.uid, "account created");
        audit_log(&AuditEvent::Signup {
            user_id: user.uid,
            email: user.email.clone(),
            ip_address,
        });
        Ok(user)
    }

    /// Check an email/password pair and return the stored user
    ///
    /// Unknown emails and wrong passwords are indistinguishable to the caller.
    pub async fn signin(
        &self,
        email: &str,
        password: &str,
        ip_address: Option<String>,
    ) -> Result<User> {
        let user = match self.repository.find_by_email(email).await {
            Ok(user) => user,
            Err(AuthError::NotFound(_)) => {
                audit_log(&AuditEvent::SigninFailure {
                    email: email.to_string(),
                    ip_address,
                });
                return Err(AuthError::authorization(INVALID_SIGNIN));
            }
            Err(e) => return Err(e),
        };

        let matches = self.hasher.verify(password, &user.password).map_err(|e| {
            tracing::error!(uid = %user.uid, error = %e, "unable to verify password");
            AuthError::internal("failed to verify credentials")
        })?;

        if !matches {
            audit_log(&AuditEvent::SigninFailure {
                email: email.to_string(),
                ip_address,
            });
            return Err(AuthError::authorization(INVALID_SIGNIN));
        }

        audit_log(&AuditEvent::SigninSuccess {
            user_id: user.uid,
            email: user.email.clone(),
            ip_address,
        });
        Ok(user)
    }

    pub async fn get(&self, uid: Uuid) -> Result<User> {
        self.repository.find_by_id(uid).await
    }

    /// Apply a partial profile update
    pub async fn update_details(&self, uid: Uuid, update: DetailsUpdate) -> Result<User> {
        let mut user = self.repository.find_by_id(uid).await?;

        if let Some(name) = update.name {
            user.name = name;
        }
        if let Some(email) = update.email {
            user.email = email;
        }
        if let Some(website) = update.website {
            user.website = website;
        }

        let updated = self.repository.update(user).await?;
        tracing::debug!(uid = %uid, "profile updated");
        Ok(updated)
    }
}
