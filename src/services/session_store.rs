//! Session-token to identity resolution.
//!
//! The HTTP layer resolves the caller once per request through
//! [`SessionResolver`]; nothing past that point trusts client input for the
//! user id.

use crate::models::file::UserId;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Resolves an opaque session token to a user. `None` means unauthenticated.
#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve_identity(&self, token: &str) -> Option<UserId>;
}

/// Sessions kept in the `sessions` table with a fixed time-to-live.
#[derive(Clone)]
pub struct SqliteSessionStore {
    db: Arc<SqlitePool>,
    ttl: Duration,
}

impl SqliteSessionStore {
    pub fn new(db: Arc<SqlitePool>, ttl: Duration) -> Self {
        Self { db, ttl }
    }

    /// Issue a fresh token for `user_id`.
    pub async fn create_session(&self, user_id: UserId) -> Result<String, SessionError> {
        let token = Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&token)
        .bind(user_id)
        .bind(now)
        .bind(now + self.ttl)
        .execute(&*self.db)
        .await?;
        Ok(token)
    }

    /// Drop one session. `false` when the token was unknown.
    pub async fn revoke(&self, token: &str) -> Result<bool, SessionError> {
        let result = sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove every expired session, returning how many were dropped.
    pub async fn purge_expired(&self) -> Result<u64, SessionError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(Utc::now())
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SessionResolver for SqliteSessionStore {
    async fn resolve_identity(&self, token: &str) -> Option<UserId> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT user_id FROM sessions WHERE token = ? AND expires_at > ?",
        )
        .bind(token)
        .bind(Utc::now())
        .fetch_optional(&*self.db)
        .await;

        match found {
            Ok(user) => user,
            Err(err) => {
                warn!("session lookup failed: {}", err);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;

    async fn store(ttl: Duration) -> SqliteSessionStore {
        SqliteSessionStore::new(Arc::new(memory_pool().await), ttl)
    }

    #[tokio::test]
    async fn issued_token_resolves_to_user() {
        let sessions = store(Duration::hours(1)).await;
        let token = sessions.create_session(7).await.unwrap();
        assert_eq!(sessions.resolve_identity(&token).await, Some(7));
    }

    #[tokio::test]
    async fn unknown_token_is_unauthenticated() {
        let sessions = store(Duration::hours(1)).await;
        assert_eq!(sessions.resolve_identity("nope").await, None);
    }

    #[tokio::test]
    async fn expired_token_is_unauthenticated() {
        let sessions = store(Duration::seconds(-1)).await;
        let token = sessions.create_session(7).await.unwrap();
        assert_eq!(sessions.resolve_identity(&token).await, None);
        assert_eq!(sessions.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn revoked_token_stops_resolving() {
        let sessions = store(Duration::hours(1)).await;
        let token = sessions.create_session(7).await.unwrap();
        let other = sessions.create_session(7).await.unwrap();

        assert!(sessions.revoke(&token).await.unwrap());
        assert_eq!(sessions.resolve_identity(&token).await, None);
        assert_eq!(sessions.resolve_identity(&other).await, Some(7));
        assert!(!sessions.revoke(&token).await.unwrap());
    }
}
