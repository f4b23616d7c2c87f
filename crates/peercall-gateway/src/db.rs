use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use peercall_common::PublicUser;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::security;

const SESSION_HASH_PREFIX: &str = "h1:";

fn storage_token_for_bearer(token: &str) -> String {
    format!("{}{}", SESSION_HASH_PREFIX, security::hash_token(token))
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn to_public(&self) -> PublicUser {
        PublicUser {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A live session joined with its owner.
#[derive(Debug, sqlx::FromRow)]
pub struct ActiveSession {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

impl ActiveSession {
    pub fn user(&self) -> PublicUser {
        PublicUser {
            id: self.user_id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }
}

/// Open the identity store. Nothing outlives the process.
pub async fn connect_in_memory() -> anyhow::Result<SqlitePool> {
    // Each `sqlite::memory:` connection is a separate database, so the pool
    // holds exactly one connection for its whole lifetime.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .context("failed to open in-memory identity store")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run identity migrations")?;

    Ok(pool)
}

// Users

pub async fn create_user(
    pool: &SqlitePool,
    name: &str,
    email: &str,
    password_hash: &str,
) -> anyhow::Result<User> {
    // Ids are sequential decimal strings; rows are never deleted.
    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (id, name, email, password_hash, created_at)
        VALUES ((SELECT CAST(COUNT(*) + 1 AS TEXT) FROM users), ?, ?, ?, ?)
        RETURNING id, name, email, password_hash, created_at
        "#,
    )
    .bind(name)
    .bind(email)
    .bind(password_hash)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    Ok(user)
}

pub async fn get_user_by_email(pool: &SqlitePool, email: &str) -> anyhow::Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, name, email, password_hash, created_at FROM users WHERE email = ?",
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn count_users(pool: &SqlitePool) -> anyhow::Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

// Sessions

pub async fn create_session(
    pool: &SqlitePool,
    user_id: &str,
    ip_address: Option<String>,
    ttl: Duration,
) -> anyhow::Result<Session> {
    // Generate high-entropy random token and store only a hash in DB.
    let mut token_bytes = [0u8; 32];
    OsRng.fill_bytes(&mut token_bytes);
    let token = hex::encode(token_bytes);
    let stored_token = storage_token_for_bearer(&token);

    let created_at = Utc::now();
    let expires_at = created_at + ttl;

    sqlx::query(
        r#"
        INSERT INTO sessions (token, user_id, expires_at, ip_address, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&stored_token)
    .bind(user_id)
    .bind(expires_at)
    .bind(ip_address.clone())
    .bind(created_at)
    .execute(pool)
    .await?;

    Ok(Session {
        token,
        user_id: user_id.to_string(),
        expires_at,
        ip_address,
        created_at,
    })
}

pub async fn get_active_session(
    pool: &SqlitePool,
    token: &str,
) -> anyhow::Result<Option<ActiveSession>> {
    let stored_token = storage_token_for_bearer(token);
    let row = sqlx::query_as::<_, ActiveSession>(
        r#"
        SELECT u.id AS user_id, u.name, u.email, s.expires_at
        FROM sessions s
        JOIN users u ON s.user_id = u.id
        WHERE s.token = ? AND s.expires_at > ?
        "#,
    )
    .bind(stored_token)
    .bind(Utc::now())
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn revoke_session(pool: &SqlitePool, token: &str) -> anyhow::Result<bool> {
    let stored_token = storage_token_for_bearer(token);
    let result = sqlx::query("DELETE FROM sessions WHERE token = ?")
        .bind(stored_token)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn count_active_sessions(pool: &SqlitePool) -> anyhow::Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE expires_at > ?")
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn delete_expired_sessions(pool: &SqlitePool) -> anyhow::Result<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
        .bind(Utc::now())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

// Login lockout

pub async fn record_login_failure(pool: &SqlitePool, identifier: &str) -> anyhow::Result<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO login_failures (identifier, count, last_failure)
        VALUES (?, 1, ?)
        ON CONFLICT(identifier) DO UPDATE SET
            count = count + 1,
            last_failure = excluded.last_failure
        RETURNING count
        "#,
    )
    .bind(identifier)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;
    Ok(count)
}

pub async fn reset_login_failure(pool: &SqlitePool, identifier: &str) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM login_failures WHERE identifier = ?")
        .bind(identifier)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_login_failures(
    pool: &SqlitePool,
    identifier: &str,
) -> anyhow::Result<Option<(i64, DateTime<Utc>)>> {
    let row: Option<(i64, DateTime<Utc>)> =
        sqlx::query_as("SELECT count, last_failure FROM login_failures WHERE identifier = ?")
            .bind(identifier)
            .fetch_optional(pool)
            .await?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_user_ids_are_sequential() {
        let pool = connect_in_memory().await.unwrap();
        let first = create_user(&pool, "Ann", "ann@example.com", "h").await.unwrap();
        let second = create_user(&pool, "Ben", "ben@example.com", "h").await.unwrap();
        assert_eq!(first.id, "1");
        assert_eq!(second.id, "2");
        assert_eq!(count_users(&pool).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_email_is_rejected() {
        let pool = connect_in_memory().await.unwrap();
        create_user(&pool, "Ann", "ann@example.com", "h").await.unwrap();
        let err = create_user(&pool, "Other", "ann@example.com", "h")
            .await
            .unwrap_err();
        assert!(err.to_string().to_ascii_lowercase().contains("unique"));
    }

    #[tokio::test]
    async fn test_session_token_is_stored_hashed() {
        let pool = connect_in_memory().await.unwrap();
        let user = create_user(&pool, "Ann", "ann@example.com", "h").await.unwrap();
        let session = create_session(&pool, &user.id, None, Duration::hours(1))
            .await
            .unwrap();

        let stored: String = sqlx::query_scalar("SELECT token FROM sessions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_ne!(stored, session.token);
        assert!(stored.starts_with(SESSION_HASH_PREFIX));

        let active = get_active_session(&pool, &session.token)
            .await
            .unwrap()
            .expect("session should be live");
        assert_eq!(active.user().email, "ann@example.com");
    }

    #[tokio::test]
    async fn test_expired_sessions_are_invisible_and_swept() {
        let pool = connect_in_memory().await.unwrap();
        let user = create_user(&pool, "Ann", "ann@example.com", "h").await.unwrap();
        let session = create_session(&pool, &user.id, None, Duration::seconds(-5))
            .await
            .unwrap();

        assert!(get_active_session(&pool, &session.token)
            .await
            .unwrap()
            .is_none());
        assert_eq!(count_active_sessions(&pool).await.unwrap(), 0);
        assert_eq!(delete_expired_sessions(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_revoke_session() {
        let pool = connect_in_memory().await.unwrap();
        let user = create_user(&pool, "Ann", "ann@example.com", "h").await.unwrap();
        let session = create_session(&pool, &user.id, None, Duration::hours(1))
            .await
            .unwrap();
        assert!(revoke_session(&pool, &session.token).await.unwrap());
        assert!(!revoke_session(&pool, &session.token).await.unwrap());
    }

    #[tokio::test]
    async fn test_login_failure_counter() {
        let pool = connect_in_memory().await.unwrap();
        assert_eq!(record_login_failure(&pool, "email:a@b.c").await.unwrap(), 1);
        assert_eq!(record_login_failure(&pool, "email:a@b.c").await.unwrap(), 2);
        let (count, _) = get_login_failures(&pool, "email:a@b.c")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(count, 2);
        reset_login_failure(&pool, "email:a@b.c").await.unwrap();
        assert!(get_login_failures(&pool, "email:a@b.c")
            .await
            .unwrap()
            .is_none());
    }
}
