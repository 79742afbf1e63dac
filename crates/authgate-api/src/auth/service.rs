//! Token service
//!
//! The only component that couples the JWT codec with the credential store.
//! It enforces single-use rotation: a refresh token's store registration is
//! consumed before its successor is minted, and a registration that is
//! already gone aborts the rotation as an authorization failure.

use super::jwt::{self, IdTokenKeys};
use super::models::{RefreshToken, TokenPair};
use super::store::{CredentialStore, StoreError};
use crate::audit::{audit_log, AuditEvent};
use authgate_core::{AuthError, Result, TokenConfig, User};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Message returned for every rejected credential
pub const INVALID_CREDENTIAL: &str = "invalid or expired credential";

/// Issues, validates, rotates and revokes token pairs
#[derive(Clone)]
pub struct TokenService {
    store: Arc<dyn CredentialStore>,
    keys: IdTokenKeys,
    refresh_secret: String,
    id_token_ttl_secs: i64,
    refresh_token_ttl_secs: i64,
    store_timeout: Duration,
}

impl TokenService {
    /// Create a token service from loaded keys and token settings
    pub fn new(store: Arc<dyn CredentialStore>, keys: IdTokenKeys, config: &TokenConfig) -> Self {
        Self {
            store,
            keys,
            refresh_secret: config.refresh_secret.clone(),
            id_token_ttl_secs: config.id_token_ttl_secs,
            refresh_token_ttl_secs: config.refresh_token_ttl_secs,
            store_timeout: config.store_timeout(),
        }
    }

    /// Mint a new token pair for `user`
    ///
    /// When `previous_token_id` is given this is a rotation: the previous
    /// registration is deleted first and nothing is minted if that fails.
    /// If registering the new refresh token fails, the minted tokens are
    /// dropped and never reach the caller.
    ///
    /// # Errors
    ///
    /// * `AuthError::Authorization` - previous token already rotated or revoked
    /// * `AuthError::Store` - store unreachable or timed out during rotation
    /// * `AuthError::Internal` - signing or registration failed
    pub async fn issue_pair(
        &self,
        user: &User,
        previous_token_id: Option<&str>,
    ) -> Result<TokenPair> {
        let uid = user.uid.to_string();
        let previous_token_id = previous_token_id.filter(|id| !id.is_empty());

        if let Some(previous) = previous_token_id {
            if let Err(e) = self
                .with_timeout(self.store.revoke_one(&uid, previous))
                .await
            {
                tracing::warn!(
                    uid = %uid,
                    token_id = %previous,
                    error = %e,
                    "could not delete previous refresh token"
                );
                return Err(match e {
                    StoreError::NotLive { .. } => {
                        audit_log(&AuditEvent::RefreshReuse {
                            user_id: user.uid,
                            token_id: previous.to_string(),
                        });
                        AuthError::authorization(INVALID_CREDENTIAL)
                    }
                    other => AuthError::Store(other.to_string()),
                });
            }
        }

        let id_token = jwt::issue_id_token(user, self.keys.encoding(), self.id_token_ttl_secs)
            .map_err(|e| {
                tracing::warn!(uid = %uid, error = %e, "error generating id token");
                AuthError::internal("failed to issue token pair")
            })?;

        let refresh = jwt::issue_refresh_token(
            user.uid,
            &self.refresh_secret,
            self.refresh_token_ttl_secs,
        )
        .map_err(|e| {
            tracing::warn!(uid = %uid, error = %e, "error generating refresh token");
            AuthError::internal("failed to issue token pair")
        })?;

        let refresh_id = refresh.id.to_string();
        self.with_timeout(
            self.store
                .register(&uid, &refresh_id, refresh.expires_in),
        )
        .await
        .map_err(|e| {
            tracing::warn!(
                uid = %uid,
                token_id = %refresh_id,
                error = %e,
                "error registering refresh token"
            );
            AuthError::internal("failed to issue token pair")
        })?;

        if previous_token_id.is_some() {
            audit_log(&AuditEvent::TokenRotation {
                user_id: user.uid,
                token_id: refresh.id,
            });
        }

        Ok(TokenPair {
            id_token,
            refresh_token: refresh.token,
        })
    }

    /// Verify an ID token and return the embedded user
    ///
    /// Stateless: no store lookup. Every failure is reported with the same
    /// generic message.
    pub fn validate_id_token(&self, token: &str) -> Result<User> {
        jwt::verify_id_token(token, self.keys.decoding()).map_err(|e| {
            tracing::warn!(error = %e, "id token is invalid");
            audit_log(&AuditEvent::InvalidToken {
                kind: "id_token".to_string(),
                reason: e.to_string(),
            });
            AuthError::authorization(INVALID_CREDENTIAL)
        })
    }

    /// Verify a refresh token's signature and expiry
    ///
    /// Liveness is only established by a subsequent successful rotation.
    pub fn validate_refresh_token(&self, token: &str) -> Result<RefreshToken> {
        let claims = jwt::verify_refresh_token(token, &self.refresh_secret).map_err(|e| {
            tracing::warn!(error = %e, "refresh token is invalid");
            audit_log(&AuditEvent::InvalidToken {
                kind: "refresh_token".to_string(),
                reason: e.to_string(),
            });
            AuthError::authorization(INVALID_CREDENTIAL)
        })?;

        Ok(RefreshToken {
            id: claims.jti,
            uid: claims.uid,
            token: token.to_string(),
        })
    }

    /// Revoke every refresh token of `uid`
    ///
    /// Any failed batch fails the whole call even though some tokens may
    /// already be gone; callers must not assume partial success.
    pub async fn sign_out(&self, uid: Uuid) -> Result<u64> {
        let uid_str = uid.to_string();
        let revoked = self
            .with_timeout(self.store.revoke_all(&uid_str))
            .await
            .map_err(|e| {
                tracing::error!(uid = %uid, error = %e, "failed to revoke refresh tokens");
                AuthError::internal("failed to sign out")
            })?;

        audit_log(&AuditEvent::Signout {
            user_id: uid,
            revoked,
        });
        Ok(revoked)
    }

    async fn with_timeout<T, F>(&self, operation: F) -> std::result::Result<T, StoreError>
    where
        F: Future<Output = std::result::Result<T, StoreError>>,
    {
        tokio::time::timeout(self.store_timeout, operation)
            .await
            .map_err(|_| StoreError::Timeout(self.store_timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::MemoryCredentialStore;
    use crate::testing::{
        foreign_keys, test_keys, test_token_config, AuditCapture, FlakyCredentialStore,
    };
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

    fn user(uid: &str, email: &str) -> User {
        let mut user = User::new(email, "$argon2id$v=19$digest");
        user.uid = Uuid::parse_str(uid).unwrap_or_else(|_| Uuid::new_v4());
        user.name = "Current User".to_string();
        user
    }

    fn service_with(store: Arc<dyn CredentialStore>) -> TokenService {
        TokenService::new(store, test_keys(), &test_token_config())
    }

    fn refresh_id(service: &TokenService, pair: &TokenPair) -> String {
        service
            .validate_refresh_token(&pair.refresh_token)
            .unwrap()
            .id
            .to_string()
    }

    fn rotation_events(capture: &AuditCapture) -> usize {
        capture
            .records()
            .iter()
            .filter(|record| {
                record
                    .get("event")
                    .is_some_and(|event| event.contains(r#""event_type":"token_rotation""#))
            })
            .count()
    }

    #[tokio::test]
    async fn test_issue_pair_registers_refresh_token() {
        let store = Arc::new(MemoryCredentialStore::new());
        let service = service_with(store.clone());
        let u = user("", "a@b.com");

        let pair = service.issue_pair(&u, None).await.unwrap();

        let decoded = service.validate_id_token(&pair.id_token).unwrap();
        assert_eq!(decoded.uid, u.uid);
        assert_eq!(decoded.email, "a@b.com");
        assert!(decoded.password.is_empty());

        let refresh = service.validate_refresh_token(&pair.refresh_token).unwrap();
        assert_eq!(refresh.uid, u.uid);
        assert_eq!(
            store.live_keys().await,
            vec![format!("{}:{}", u.uid, refresh.id)]
        );
    }

    #[tokio::test]
    async fn test_issue_pair_claims_lifetimes() {
        let store = Arc::new(MemoryCredentialStore::new());
        let service = service_with(store);
        let config = test_token_config();

        let pair = service.issue_pair(&user("", "a@b.com"), None).await.unwrap();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let refresh = decode::<jwt::RefreshTokenClaims>(
            &pair.refresh_token,
            &DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            &validation,
        )
        .unwrap();
        assert_eq!(
            refresh.claims.exp - refresh.claims.iat,
            config.refresh_token_ttl_secs as u64
        );

        let id = decode::<jwt::IdTokenClaims>(
            &pair.id_token,
            test_keys().decoding(),
            &Validation::new(Algorithm::RS256),
        )
        .unwrap();
        assert_eq!(id.claims.exp - id.claims.iat, config.id_token_ttl_secs as u64);
    }

    #[tokio::test]
    async fn test_rotation_is_single_use() {
        let store = Arc::new(MemoryCredentialStore::new());
        let service = service_with(store.clone());
        let u = user("", "a@b.com");

        let first = service.issue_pair(&u, None).await.unwrap();
        let first_id = refresh_id(&service, &first);

        let second = service.issue_pair(&u, Some(&first_id)).await.unwrap();
        let second_id = refresh_id(&service, &second);
        assert_ne!(first_id, second_id);
        assert!(!store.is_live(&u.uid.to_string(), &first_id).await);
        assert!(store.is_live(&u.uid.to_string(), &second_id).await);

        let reuse = service.issue_pair(&u, Some(&first_id)).await;
        assert!(matches!(reuse, Err(AuthError::Authorization(_))));
        // Reuse must not mint or register anything
        assert_eq!(store.live_keys().await.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_previous_id_is_plain_issuance() {
        let store = Arc::new(MemoryCredentialStore::new());
        let service = service_with(store.clone());
        let (capture, _guard) = AuditCapture::install();

        let user = user("", "a@b.com");
        let pair = service.issue_pair(&user, Some("")).await.unwrap();
        assert_eq!(store.live_keys().await.len(), 1);
        assert_eq!(rotation_events(&capture), 0);

        let previous = refresh_id(&service, &pair);
        service
            .issue_pair(&user, Some(previous.as_str()))
            .await
            .unwrap();
        assert_eq!(rotation_events(&capture), 1);
    }

    #[tokio::test]
    async fn test_concurrent_rotation_has_one_winner() {
        let store = Arc::new(MemoryCredentialStore::new());
        let service = Arc::new(service_with(store.clone()));
        let u = user("", "a@b.com");

        let first = service.issue_pair(&u, None).await.unwrap();
        let first_id = refresh_id(&service, &first);

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let service = service.clone();
                let u = u.clone();
                let id = first_id.clone();
                tokio::spawn(async move { service.issue_pair(&u, Some(&id)).await })
            })
            .collect();

        let mut successes = 0;
        let mut authorization_failures = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(AuthError::Authorization(_)) => authorization_failures += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(authorization_failures, 1);
        assert_eq!(store.live_keys().await.len(), 1);
    }

    #[tokio::test]
    async fn test_sign_out_scope() {
        let store = Arc::new(MemoryCredentialStore::new());
        let service = service_with(store.clone());
        let alice = user("", "alice@example.com");
        let bob = user("", "bob@example.com");

        let a1 = service.issue_pair(&alice, None).await.unwrap();
        let a2 = service.issue_pair(&alice, None).await.unwrap();
        let b1 = service.issue_pair(&bob, None).await.unwrap();

        assert_eq!(service.sign_out(alice.uid).await.unwrap(), 2);

        for pair in [&a1, &a2] {
            let id = refresh_id(&service, pair);
            let result = service.issue_pair(&alice, Some(&id)).await;
            assert!(matches!(result, Err(AuthError::Authorization(_))));
        }

        let bob_id = refresh_id(&service, &b1);
        assert!(service.issue_pair(&bob, Some(&bob_id)).await.is_ok());
    }

    #[tokio::test]
    async fn test_sign_out_partial_failure_is_internal() {
        let store = Arc::new(FlakyCredentialStore::new());
        let service = service_with(store.clone());
        let u = user("", "a@b.com");
        service.issue_pair(&u, None).await.unwrap();

        store.fail_delete_batch(0);
        let result = service.sign_out(u.uid).await;
        assert!(matches!(result, Err(AuthError::Internal(_))));
    }

    #[tokio::test]
    async fn test_register_failure_returns_no_tokens() {
        let store = Arc::new(FlakyCredentialStore::new());
        let service = service_with(store.clone());
        store.fail_register(true);

        let result = service.issue_pair(&user("", "a@b.com"), None).await;
        assert!(matches!(result, Err(AuthError::Internal(_))));
        assert!(store.inner().live_keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_store_outage_during_rotation() {
        let store = Arc::new(FlakyCredentialStore::new());
        let service = service_with(store.clone());
        let u = user("", "a@b.com");
        let pair = service.issue_pair(&u, None).await.unwrap();
        let id = refresh_id(&service, &pair);

        store.fail_revoke(true);
        let result = service.issue_pair(&u, Some(&id)).await;
        assert!(matches!(result, Err(AuthError::Store(_))));
        // The old registration is untouched and nothing new was added
        assert_eq!(store.inner().live_keys().await.len(), 1);
    }

    #[tokio::test]
    async fn test_slow_store_times_out() {
        let store = Arc::new(FlakyCredentialStore::new());
        let mut config = test_token_config();
        config.store_timeout_ms = 20;
        let service = TokenService::new(store.clone(), test_keys(), &config);
        let u = user("", "a@b.com");
        let pair = service.issue_pair(&u, None).await.unwrap();
        let id = refresh_id(&service, &pair);

        store.set_delay(Duration::from_millis(500));
        let result = service.issue_pair(&u, Some(&id)).await;
        assert!(matches!(result, Err(AuthError::Store(msg)) if msg.contains("timed out")));
    }

    #[tokio::test]
    async fn test_validate_id_token_failures_are_uniform() {
        let store = Arc::new(MemoryCredentialStore::new());
        let service = service_with(store);
        let u = user("", "a@b.com");

        let expired = jwt::issue_id_token(&u, test_keys().encoding(), -1).unwrap();
        let forged = jwt::issue_id_token(&u, foreign_keys().encoding(), 900).unwrap();

        for token in [expired.as_str(), forged.as_str(), "garbage"] {
            match service.validate_id_token(token) {
                Err(AuthError::Authorization(msg)) => assert_eq!(msg, INVALID_CREDENTIAL),
                other => panic!("expected authorization failure, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_third_party_refresh_token_rejected() {
        let store = Arc::new(MemoryCredentialStore::new());
        let service = service_with(store.clone());

        let forged = jwt::issue_refresh_token(Uuid::new_v4(), "someone-elses-secret", 600).unwrap();
        let result = service.validate_refresh_token(&forged.token);

        assert!(matches!(result, Err(AuthError::Authorization(_))));
        assert!(store.live_keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_expired_refresh_token_rejected() {
        let service = service_with(Arc::new(MemoryCredentialStore::new()));
        let config = test_token_config();

        let expired = jwt::issue_refresh_token(Uuid::new_v4(), &config.refresh_secret, -1).unwrap();
        assert!(matches!(
            service.validate_refresh_token(&expired.token),
            Err(AuthError::Authorization(_))
        ));
    }

    #[tokio::test]
    async fn test_scenario_u1_pair() {
        let store = Arc::new(MemoryCredentialStore::new());
        let mut config = test_token_config();
        config.id_token_ttl_secs = 900;
        config.refresh_token_ttl_secs = 25920;
        let service = TokenService::new(store.clone(), test_keys(), &config);
        let u = user("", "a@b.com");

        let pair = service.issue_pair(&u, None).await.unwrap();

        let decoded = service.validate_id_token(&pair.id_token).unwrap();
        assert_eq!((decoded.uid, decoded.email.as_str()), (u.uid, "a@b.com"));

        let refresh = service.validate_refresh_token(&pair.refresh_token).unwrap();
        assert_eq!(refresh.uid, u.uid);
        assert_eq!(refresh.token, pair.refresh_token);

        let keys = store.live_keys().await;
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0], format!("{}:{}", u.uid, refresh.id));
    }
}
