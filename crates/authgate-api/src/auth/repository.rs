//! User persistence
//!
//! - `PgUserRepository`: PostgreSQL `users` table via sqlx
//! - `MemoryUserRepository`: process-local map for tests and development

use async_trait::async_trait;
use authgate_core::{AuthError, Result, User, UserRepository};
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Row shape of the `users` table
#[derive(Debug, Clone, sqlx::FromRow)]
struct UserRecord {
    uid: Uuid,
    email: String,
    password: String,
    name: String,
    image_url: String,
    website: String,
}

impl From<UserRecord> for User {
    fn from(record: UserRecord) -> Self {
        Self {
            uid: record.uid,
            email: record.email,
            password: record.password,
            name: record.name,
            image_url: record.image_url,
            website: record.website,
        }
    }
}

const USER_COLUMNS: &str = "uid, email, password, name, image_url, website";

fn map_write_error(err: sqlx::Error, email: &str) -> AuthError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AuthError::Conflict(format!("email {email} is already registered"))
        }
        _ => AuthError::internal(format!("user write failed: {err}")),
    }
}

/// User repository backed by PostgreSQL
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `users` table if it does not exist
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                uid UUID PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                password TEXT NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                image_url TEXT NOT NULL DEFAULT '',
                website TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AuthError::internal(format!("failed to create users table: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, uid: Uuid) -> Result<User> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE uid = $1"
        ))
        .bind(uid)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AuthError::internal(format!("failed to fetch user: {e}")))?;

        record
            .map(User::from)
            .ok_or_else(|| AuthError::NotFound(format!("user {uid}")))
    }

    async fn find_by_email(&self, email: &str) -> Result<User> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AuthError::internal(format!("failed to fetch user: {e}")))?;

        record
            .map(User::from)
            .ok_or_else(|| AuthError::NotFound(format!("user with email {email}")))
    }

    async fn create(&self, user: User) -> Result<User> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            r#"
            INSERT INTO users ({USER_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user.uid)
        .bind(&user.email)
        .bind(&user.password)
        .bind(&user.name)
        .bind(&user.image_url)
        .bind(&user.website)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_error(e, &user.email))?;

        Ok(record.into())
    }

    async fn update(&self, user: User) -> Result<User> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            r#"
            UPDATE users
            SET email = $2, name = $3, image_url = $4, website = $5
            WHERE uid = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user.uid)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.image_url)
        .bind(&user.website)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_write_error(e, &user.email))?;

        record
            .map(User::from)
            .ok_or_else(|| AuthError::NotFound(format!("user {}", user.uid)))
    }
}

/// In-memory user repository keyed by UID
#[derive(Default)]
pub struct MemoryUserRepository {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn find_by_id(&self, uid: Uuid) -> Result<User> {
        self.users
            .read()
            .await
            .get(&uid)
            .cloned()
            .ok_or_else(|| AuthError::NotFound(format!("user {uid}")))
    }

    async fn find_by_email(&self, email: &str) -> Result<User> {
        self.users
            .read()
            .await
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or_else(|| AuthError::NotFound(format!("user with email {email}")))
    }

    async fn create(&self, user: User) -> Result<User> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == user.email) {
            return Err(AuthError::Conflict(format!(
                "email {} is already registered",
                user.email
            )));
        }
        users.insert(user.uid, user.clone());
        Ok(user)
    }

    async fn update(&self, user: User) -> Result<User> {
        let mut users = self.users.write().await;
        if users
            .values()
            .any(|u| u.email == user.email && u.uid != user.uid)
        {
            return Err(AuthError::Conflict(format!(
                "email {} is already registered",
                user.email
            )));
        }

        let existing = users
            .get_mut(&user.uid)
            .ok_or_else(|| AuthError::NotFound(format!("user {}", user.uid)))?;
        // The digest is never changed through a profile update
        let password = std::mem::take(&mut existing.password);
        *existing = User { password, ..user };
        Ok(existing.clone())
    }
}
