//! Refresh token liveness store
//!
//! A refresh token is live exactly while a marker exists under the key
//! `{uid}:{token_id}`. The marker's value is irrelevant; only its presence
//! and expiry matter. All of a user's markers share the prefix `{uid}:`,
//! which is how global sign-out finds them.
//!
//! Backends must make single-key deletion atomic and report how many keys
//! it removed: two concurrent rotations of the same token rely on exactly
//! one of them observing a deletion.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{stream, Stream, StreamExt};
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

/// Number of keys requested per scan page during bulk revocation
pub const SCAN_BATCH_SIZE: usize = 64;

/// Store key for one refresh token
pub fn credential_key(uid: &str, token_id: &str) -> String {
    format!("{uid}:{token_id}")
}

/// Prefix shared by every key belonging to `uid`
pub fn subject_prefix(uid: &str) -> String {
    format!("{uid}:")
}

/// Credential store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Credential store backend error: {0}")]
    Backend(String),

    #[error("Refresh token {key} is not live")]
    NotLive { key: String },

    #[error("Credential store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Revocation incomplete: {failed_batches} batch(es) failed, {deleted} key(s) deleted")]
    PartialRevocation { failed_batches: usize, deleted: u64 },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// One page of a prefix scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Live keys in ascending order
    pub keys: Vec<String>,
    /// Cursor to resume from, `None` once the prefix is exhausted
    pub next: Option<String>,
}

/// Liveness registry for refresh tokens
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Create or overwrite the marker for a token, expiring after `ttl`
    async fn register(&self, uid: &str, token_id: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Atomically delete the marker for a token
    ///
    /// Returns `StoreError::NotLive` when nothing was deleted.
    async fn revoke_one(&self, uid: &str, token_id: &str) -> Result<(), StoreError>;

    /// Return at most `limit` live keys with `prefix`, strictly after `cursor`
    async fn scan(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<ScanPage, StoreError>;

    /// Delete the given keys in a single backend call, returning the count removed
    async fn delete_keys(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Delete every marker belonging to `uid`
    ///
    /// Walks all scan pages until the cursor is exhausted. A failed batch
    /// does not stop later batches from being attempted, but any failure
    /// makes the whole call fail with `PartialRevocation`. Keys deleted
    /// before the failure stay deleted.
    async fn revoke_all(&self, uid: &str) -> Result<u64, StoreError> {
        let batches = key_batches(self, subject_prefix(uid), SCAN_BATCH_SIZE);
        futures::pin_mut!(batches);

        let mut deleted = 0u64;
        let mut failed_batches = 0usize;

        while let Some(batch) = batches.next().await {
            let keys = match batch {
                Ok(keys) => keys,
                Err(e) => {
                    tracing::warn!(uid = %uid, error = %e, "scan failed during revoke_all");
                    failed_batches += 1;
                    break;
                }
            };

            if keys.is_empty() {
                continue;
            }

            match self.delete_keys(&keys).await {
                Ok(count) => deleted += count,
                Err(e) => {
                    tracing::error!(
                        uid = %uid,
                        batch_len = keys.len(),
                        error = %e,
                        "failed to delete refresh token batch"
                    );
                    failed_batches += 1;
                }
            }
        }

        if failed_batches > 0 {
            return Err(StoreError::PartialRevocation {
                failed_batches,
                deleted,
            });
        }

        tracing::debug!(uid = %uid, deleted, "revoked all refresh tokens");
        Ok(deleted)
    }
}

/// Lazy sequence of key batches under `prefix`
///
/// Each item is one scan page. Pages are fetched on demand, so a consumer
/// that deletes a batch before pulling the next one never holds more than
/// `batch_size` keys. The cursor is the last key returned, which keeps the
/// walk stable while earlier keys are being deleted.
pub fn key_batches<'a, S>(
    store: &'a S,
    prefix: String,
    batch_size: usize,
) -> impl Stream<Item = Result<Vec<String>, StoreError>> + Send + 'a
where
    S: CredentialStore + ?Sized,
{
    // None: exhausted, Some(None): first page, Some(Some(c)): resume after c
    stream::try_unfold(Some(None::<String>), move |state| {
        let prefix = prefix.clone();
        async move {
            let Some(cursor) = state else {
                return Ok(None);
            };
            let page = store.scan(&prefix, cursor.as_deref(), batch_size).await?;
            Ok::<_, StoreError>(Some((page.keys, page.next.map(Some))))
        }
    })
}

// ============================================================================
// In-memory store
// ============================================================================

/// Single-process store backed by an ordered map
///
/// Expired markers are treated as absent and dropped lazily.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: RwLock<BTreeMap<String, Instant>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a live marker exists for the token
    pub async fn is_live(&self, uid: &str, token_id: &str) -> bool {
        let entries = self.entries.read().await;
        entries
            .get(&credential_key(uid, token_id))
            .is_some_and(|expires_at| *expires_at > Instant::now())
    }

    /// All live keys, in order
    pub async fn live_keys(&self) -> Vec<String> {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .iter()
            .filter(|(_, expires_at)| **expires_at > now)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Drop expired markers, returning how many were removed
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, expires_at| *expires_at > now);
        before - entries.len()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn register(&self, uid: &str, token_id: &str, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = Instant::now() + ttl;
        self.entries
            .write()
            .await
            .insert(credential_key(uid, token_id), expires_at);
        Ok(())
    }

    async fn revoke_one(&self, uid: &str, token_id: &str) -> Result<(), StoreError> {
        let key = credential_key(uid, token_id);
        let removed = self.entries.write().await.remove(&key);

        match removed {
            Some(expires_at) if expires_at > Instant::now() => Ok(()),
            _ => Err(StoreError::NotLive { key }),
        }
    }

    async fn scan(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<ScanPage, StoreError> {
        let limit = limit.max(1);
        let now = Instant::now();
        let start = match cursor {
            Some(cursor) => Bound::Excluded(cursor.to_string()),
            None => Bound::Included(prefix.to_string()),
        };

        let entries = self.entries.read().await;
        let mut keys = Vec::with_capacity(limit);
        let mut more = false;

        for (key, expires_at) in entries
            .range::<String, _>((start, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
        {
            if *expires_at <= now {
                continue;
            }
            if keys.len() == limit {
                more = true;
                break;
            }
            keys.push(key.clone());
        }

        let next = if more { keys.last().cloned() } else { None };
        Ok(ScanPage { keys, next })
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<u64, StoreError> {
        let mut entries = self.entries.write().await;
        let deleted = keys.iter().filter(|key| entries.remove(*key).is_some()).count();
        Ok(deleted as u64)
    }
}

// ============================================================================
// PostgreSQL store
// ============================================================================

/// Store backed by a PostgreSQL table
///
/// Deletion uses the affected-row count of a single `DELETE`, which is
/// atomic per key under PostgreSQL's row locking.
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the backing table if it does not exist
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS refresh_credentials (
                key TEXT PRIMARY KEY,
                expires_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS refresh_credentials_expires_at_idx ON refresh_credentials (expires_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete expired rows, returning how many were removed
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM refresh_credentials WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Absolute expiry of a marker registered at `now` for `ttl`
fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, StoreError> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| StoreError::Backend(format!("TTL out of range: {ttl:?}")))
}

/// Exclusive lower bound for a scan page
///
/// The first page starts at the prefix itself, so the index range walked is
/// confined to one subject. Every real key is longer than its prefix.
fn scan_lower_bound<'a>(prefix: &'a str, cursor: Option<&'a str>) -> &'a str {
    match cursor {
        Some(cursor) if cursor > prefix => cursor,
        _ => prefix,
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn register(&self, uid: &str, token_id: &str, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = expiry_after(Utc::now(), ttl)?;

        sqlx::query(
            r#"
            INSERT INTO refresh_credentials (key, expires_at)
            VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(credential_key(uid, token_id))
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn revoke_one(&self, uid: &str, token_id: &str) -> Result<(), StoreError> {
        let key = credential_key(uid, token_id);
        let result =
            sqlx::query("DELETE FROM refresh_credentials WHERE key = $1 AND expires_at > NOW()")
                .bind(&key)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() < 1 {
            return Err(StoreError::NotLive { key });
        }
        Ok(())
    }

    async fn scan(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<ScanPage, StoreError> {
        let limit = limit.max(1);

        // Fetch one extra row to learn whether another page exists
        let mut keys = sqlx::query_scalar::<_, String>(
            r#"
            SELECT key FROM refresh_credentials
            WHERE key COLLATE "C" > $2 AND starts_with(key, $1) AND expires_at > NOW()
            ORDER BY key COLLATE "C"
            LIMIT $3
            "#,
        )
        .bind(prefix)
        .bind(scan_lower_bound(prefix, cursor))
        .bind((limit + 1) as i64)
        .fetch_all(&self.pool)
        .await?;

        let next = if keys.len() > limit {
            keys.truncate(limit);
            keys.last().cloned()
        } else {
            None
        };

        Ok(ScanPage { keys, next })
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM refresh_credentials WHERE key = ANY($1)")
            .bind(keys)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FlakyCredentialStore;
    use futures::TryStreamExt;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_register_and_revoke_one() {
        let store = MemoryCredentialStore::new();
        store.register("u1", "c1", HOUR).await.unwrap();

        assert!(store.is_live("u1", "c1").await);
        assert_eq!(store.live_keys().await, vec!["u1:c1".to_string()]);

        store.revoke_one("u1", "c1").await.unwrap();
        assert!(!store.is_live("u1", "c1").await);
    }

    #[tokio::test]
    async fn test_revoke_missing_is_not_live() {
        let store = MemoryCredentialStore::new();
        store.register("u1", "c1", HOUR).await.unwrap();
        store.revoke_one("u1", "c1").await.unwrap();

        let result = store.revoke_one("u1", "c1").await;
        assert!(matches!(result, Err(StoreError::NotLive { key }) if key == "u1:c1"));
    }

    #[tokio::test]
    async fn test_expired_marker_is_not_live() {
        let store = MemoryCredentialStore::new();
        store.register("u1", "c1", Duration::ZERO).await.unwrap();

        assert!(!store.is_live("u1", "c1").await);
        assert!(matches!(
            store.revoke_one("u1", "c1").await,
            Err(StoreError::NotLive { .. })
        ));
    }

    #[tokio::test]
    async fn test_register_overwrites() {
        let store = MemoryCredentialStore::new();
        store.register("u1", "c1", Duration::ZERO).await.unwrap();
        store.register("u1", "c1", HOUR).await.unwrap();

        assert!(store.is_live("u1", "c1").await);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryCredentialStore::new();
        store.register("u1", "dead", Duration::ZERO).await.unwrap();
        store.register("u1", "live", HOUR).await.unwrap();

        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.live_keys().await, vec!["u1:live".to_string()]);
    }

    #[tokio::test]
    async fn test_scan_pages_stay_within_prefix() {
        let store = MemoryCredentialStore::new();
        for id in ["a", "b", "c", "d", "e"] {
            store.register("u1", id, HOUR).await.unwrap();
        }
        store.register("u10", "x", HOUR).await.unwrap();
        store.register("u2", "y", HOUR).await.unwrap();

        let first = store.scan("u1:", None, 2).await.unwrap();
        assert_eq!(first.keys, vec!["u1:a", "u1:b"]);
        assert_eq!(first.next.as_deref(), Some("u1:b"));

        let second = store.scan("u1:", first.next.as_deref(), 2).await.unwrap();
        assert_eq!(second.keys, vec!["u1:c", "u1:d"]);

        let last = store.scan("u1:", second.next.as_deref(), 2).await.unwrap();
        assert_eq!(last.keys, vec!["u1:e"]);
        assert_eq!(last.next, None);
    }

    #[tokio::test]
    async fn test_key_batches_walks_every_page() {
        let store = MemoryCredentialStore::new();
        for i in 0..7 {
            store.register("u1", &format!("c{i}"), HOUR).await.unwrap();
        }

        let batches: Vec<Vec<String>> = key_batches(&store, subject_prefix("u1"), 3)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(batches.len(), 3);
        assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), 7);
        assert!(batches.iter().all(|batch| batch.len() <= 3));
    }

    #[tokio::test]
    async fn test_revoke_all_is_exhaustive_and_scoped() {
        let store = MemoryCredentialStore::new();
        let sessions = SCAN_BATCH_SIZE * 3 + 5;
        for i in 0..sessions {
            store.register("u1", &format!("c{i:04}"), HOUR).await.unwrap();
        }
        store.register("u10", "other", HOUR).await.unwrap();
        store.register("u2", "other", HOUR).await.unwrap();

        let deleted = store.revoke_all("u1").await.unwrap();

        assert_eq!(deleted, sessions as u64);
        assert_eq!(
            store.live_keys().await,
            vec!["u10:other".to_string(), "u2:other".to_string()]
        );
    }

    #[tokio::test]
    async fn test_revoke_all_without_sessions() {
        let store = MemoryCredentialStore::new();
        assert_eq!(store.revoke_all("nobody").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_revoke_all_aggregates_delete_failures() {
        let store = FlakyCredentialStore::new();
        for i in 0..(SCAN_BATCH_SIZE * 2) {
            store
                .inner()
                .register("u1", &format!("c{i:04}"), HOUR)
                .await
                .unwrap();
        }
        store.fail_delete_batch(0);

        let result = store.revoke_all("u1").await;

        assert!(matches!(
            result,
            Err(StoreError::PartialRevocation {
                failed_batches: 1,
                deleted
            }) if deleted == SCAN_BATCH_SIZE as u64
        ));
        // The failed first batch survives; the second was still attempted
        assert_eq!(store.inner().live_keys().await.len(), SCAN_BATCH_SIZE);
    }

    #[tokio::test]
    async fn test_revoke_all_reports_scan_failure() {
        let store = FlakyCredentialStore::new();
        store.inner().register("u1", "c1", HOUR).await.unwrap();
        store.fail_scans(true);

        let result = store.revoke_all("u1").await;
        assert!(matches!(
            result,
            Err(StoreError::PartialRevocation { failed_batches: 1, deleted: 0 })
        ));
        assert!(store.inner().is_live("u1", "c1").await);
    }

    #[tokio::test]
    async fn test_concurrent_revoke_one_single_winner() {
        let store = std::sync::Arc::new(MemoryCredentialStore::new());
        store.register("u1", "c1", HOUR).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.revoke_one("u1", "c1").await })
            })
            .collect();

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[test]
    fn test_key_scheme() {
        assert_eq!(credential_key("u1", "abc"), "u1:abc");
        assert!(credential_key("u1", "abc").starts_with(&subject_prefix("u1")));
        assert!(!credential_key("u10", "abc").starts_with(&subject_prefix("u1")));
    }

    #[test]
    fn test_expiry_rejects_out_of_range_ttl() {
        let now = Utc::now();
        assert_eq!(expiry_after(now, HOUR).unwrap(), now + chrono::Duration::hours(1));

        let huge = Duration::from_secs(10_000_000_000_000);
        assert!(matches!(
            expiry_after(now, huge),
            Err(StoreError::Backend(_))
        ));
        assert!(expiry_after(now, Duration::MAX).is_err());
    }

    #[test]
    fn test_scan_lower_bound_starts_at_prefix() {
        let prefix = subject_prefix("u1");
        assert_eq!(scan_lower_bound(&prefix, None), "u1:");
        assert_eq!(scan_lower_bound(&prefix, Some("u1:c3")), "u1:c3");
        // A cursor sorting before the prefix cannot widen the range
        assert_eq!(scan_lower_bound(&prefix, Some("")), "u1:");
        assert_eq!(scan_lower_bound(&prefix, Some("u0:zz")), "u1:");
        assert!(credential_key("u1", "a").as_str() > scan_lower_bound(&prefix, None));
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL)"]
    async fn test_pg_store_rotation_and_revoke_all() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL");
        let pool = PgPool::connect(&url).await.unwrap();
        let store = PgCredentialStore::new(pool);
        store.ensure_schema().await.unwrap();

        let uid = uuid::Uuid::new_v4().to_string();
        for i in 0..5 {
            store.register(&uid, &format!("c{i}"), HOUR).await.unwrap();
        }

        store.revoke_one(&uid, "c0").await.unwrap();
        assert!(matches!(
            store.revoke_one(&uid, "c0").await,
            Err(StoreError::NotLive { .. })
        ));

        // A neighbouring subject sorting before this one stays out of the scan
        let neighbour = uid[..uid.len() - 1].to_string();
        store.register(&neighbour, "n0", HOUR).await.unwrap();

        let page = store.scan(&subject_prefix(&uid), None, 2).await.unwrap();
        assert_eq!(page.keys.len(), 2);
        assert!(page.keys.iter().all(|k| k.starts_with(&subject_prefix(&uid))));
        assert!(page.next.is_some());

        assert_eq!(store.revoke_all(&uid).await.unwrap(), 4);
        let page = store.scan(&subject_prefix(&uid), None, 10).await.unwrap();
        assert!(page.keys.is_empty());
        assert_eq!(store.revoke_all(&neighbour).await.unwrap(), 1);
    }
}
