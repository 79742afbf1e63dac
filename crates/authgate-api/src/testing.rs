//! Test helpers: fixture keys, failure-injecting store and ready-made state
//!
//! Compiled for unit tests and behind the `test-utils` feature for
//! integration tests.

use crate::auth::password::{Argon2Hasher, PasswordConfig};
use crate::auth::store::{CredentialStore, MemoryCredentialStore, ScanPage, StoreError};
use crate::auth::{IdTokenKeys, MemoryUserRepository, TokenService, UserService};
use crate::state::AppState;
use async_trait::async_trait;
use authgate_core::{AppConfig, TokenConfig};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

const TEST_PRIVATE_PEM: &[u8] = include_bytes!("../tests/fixtures/rsa_private_test.pem");
const TEST_PUBLIC_PEM: &[u8] = include_bytes!("../tests/fixtures/rsa_public_test.pem");
const FOREIGN_PRIVATE_PEM: &[u8] = include_bytes!("../tests/fixtures/rsa_private_foreign.pem");
const FOREIGN_PUBLIC_PEM: &[u8] = include_bytes!("../tests/fixtures/rsa_public_foreign.pem");

/// Refresh secret used by `test_token_config`
pub const TEST_REFRESH_SECRET: &str = "test-refresh-secret";

/// Key pair the test state signs ID tokens with
pub fn test_keys() -> IdTokenKeys {
    IdTokenKeys::from_rsa_pem(TEST_PRIVATE_PEM, TEST_PUBLIC_PEM).expect("fixture test keys")
}

/// Unrelated key pair, for forged tokens
pub fn foreign_keys() -> IdTokenKeys {
    IdTokenKeys::from_rsa_pem(FOREIGN_PRIVATE_PEM, FOREIGN_PUBLIC_PEM)
        .expect("fixture foreign keys")
}

pub fn test_token_config() -> TokenConfig {
    TokenConfig {
        refresh_secret: TEST_REFRESH_SECRET.to_string(),
        id_token_ttl_secs: 900,
        refresh_token_ttl_secs: 3 * 86400,
        store_timeout_ms: 2000,
        ..TokenConfig::default()
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        tokens: test_token_config(),
        ..AppConfig::default()
    }
}

/// State over the given credential store, in-memory users and cheap hashing
pub fn test_state_with(store: Arc<dyn CredentialStore>) -> Arc<AppState> {
    let config = test_config();
    let token_service = TokenService::new(store, test_keys(), &config.tokens);
    let hasher = Argon2Hasher::with_config(&PasswordConfig::light()).expect("argon2 params");
    let user_service = UserService::new(Arc::new(MemoryUserRepository::new()), Arc::new(hasher));

    Arc::new(AppState::new(config, token_service, user_service))
}

pub fn test_state() -> Arc<AppState> {
    test_state_with(Arc::new(MemoryCredentialStore::new()))
}

/// `MemoryCredentialStore` wrapper that fails or stalls on demand
#[derive(Default)]
pub struct FlakyCredentialStore {
    inner: MemoryCredentialStore,
    failing_delete_batches: Mutex<Vec<usize>>,
    delete_calls: AtomicUsize,
    fail_scans: AtomicBool,
    fail_register: AtomicBool,
    fail_revoke: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl FlakyCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The wrapped store, for seeding and inspection
    pub fn inner(&self) -> &MemoryCredentialStore {
        &self.inner
    }

    /// Fail the `index`-th call to `delete_keys` (zero-based)
    pub fn fail_delete_batch(&self, index: usize) {
        if let Ok(mut batches) = self.failing_delete_batches.lock() {
            batches.push(index);
        }
    }

    pub fn fail_scans(&self, fail: bool) {
        self.fail_scans.store(fail, Ordering::SeqCst);
    }

    pub fn fail_register(&self, fail: bool) {
        self.fail_register.store(fail, Ordering::SeqCst);
    }

    pub fn fail_revoke(&self, fail: bool) {
        self.fail_revoke.store(fail, Ordering::SeqCst);
    }

    /// Sleep for `delay` before every operation
    pub fn set_delay(&self, delay: Duration) {
        if let Ok(mut slot) = self.delay.lock() {
            *slot = Some(delay);
        }
    }

    async fn stall(&self) {
        let delay = self.delay.lock().ok().and_then(|slot| *slot);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn injected(operation: &str) -> StoreError {
        StoreError::Backend(format!("injected {operation} failure"))
    }
}

#[async_trait]
impl CredentialStore for FlakyCredentialStore {
    async fn register(&self, uid: &str, token_id: &str, ttl: Duration) -> Result<(), StoreError> {
        self.stall().await;
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(Self::injected("register"));
        }
        self.inner.register(uid, token_id, ttl).await
    }

    async fn revoke_one(&self, uid: &str, token_id: &str) -> Result<(), StoreError> {
        self.stall().await;
        if self.fail_revoke.load(Ordering::SeqCst) {
            return Err(Self::injected("revoke"));
        }
        self.inner.revoke_one(uid, token_id).await
    }

    async fn scan(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<ScanPage, StoreError> {
        self.stall().await;
        if self.fail_scans.load(Ordering::SeqCst) {
            return Err(Self::injected("scan"));
        }
        self.inner.scan(prefix, cursor, limit).await
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.stall().await;
        let call = self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .failing_delete_batches
            .lock()
            .map(|batches| batches.contains(&call))
            .unwrap_or(false);
        if fail {
            return Err(Self::injected("delete"));
        }
        self.inner.delete_keys(keys).await
    }
}

/// Fields of one event on the `audit` target, rendered with `Debug`
pub type AuditRecord = BTreeMap<String, String>;

/// Collects audit events emitted on the current thread
///
/// Only sees events from the installing thread, so use it from a
/// current-thread runtime (the `#[tokio::test]` default).
#[derive(Clone, Default)]
pub struct AuditCapture {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl AuditCapture {
    /// Install as the thread's default subscriber until the guard drops
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let capture = Self::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        (capture, tracing::subscriber::set_default(subscriber))
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl<S: tracing::Subscriber> Layer<S> for AuditCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if event.metadata().target() != "audit" {
            return;
        }
        let mut visitor = FieldCollector::default();
        event.record(&mut visitor);
        if let Ok(mut records) = self.records.lock() {
            records.push(visitor.0);
        }
    }
}

#[derive(Default)]
struct FieldCollector(AuditRecord);

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }
}
