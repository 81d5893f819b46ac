//! src/services/metadata_store.rs
//!
//! MetadataStore: transactional CRUD over `file_metadata` rows. Every
//! mutating call runs its single statement inside its own transaction:
//! atomic per call, nothing spans calls.

use crate::models::file::{FileRecord, ListOptions, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("file `{0}` not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type MetadataResult<T> = Result<T, MetadataError>;

/// Position in the purge scan: `(deleted_time, id)` of the last row seen.
pub type PurgeCursor = (DateTime<Utc>, Uuid);

/// Relational half of the file lifecycle.
///
/// `get` answers `Ok(None)` for an absent (or soft-deleted) id; `Err` is
/// reserved for I/O failures. Listing always takes an owner, so there is no
/// way to enumerate another user's files through this trait.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a new live row. The id and storage key are assigned here.
    async fn create(
        &self,
        owner_id: UserId,
        filename: &str,
        content_type: &str,
        size: i64,
    ) -> MetadataResult<FileRecord>;

    /// Live record by id.
    async fn get(&self, id: Uuid) -> MetadataResult<Option<FileRecord>>;

    /// One owner's records, newest upload first.
    async fn list(&self, owner_id: UserId, options: ListOptions)
    -> MetadataResult<Vec<FileRecord>>;

    async fn rename(&self, id: Uuid, filename: &str) -> MetadataResult<()>;

    async fn resize(&self, id: Uuid, size: i64) -> MetadataResult<()>;

    /// Flip `is_deleted` and stamp `deleted_time`. Only live rows qualify.
    async fn soft_delete(&self, id: Uuid) -> MetadataResult<()>;

    /// Physically remove a row. Only used to compensate a failed upload.
    async fn hard_delete(&self, id: Uuid) -> MetadataResult<()>;

    /// Live records ordered by storage key, starting strictly after `after`.
    async fn list_live_after(&self, after: &str, limit: u32) -> MetadataResult<Vec<FileRecord>>;

    /// Soft-deleted records whose content has not been purged yet and whose
    /// `deleted_time` is before `cutoff`, ordered by `(deleted_time, id)` and
    /// starting strictly after `after`.
    async fn list_purgeable(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<PurgeCursor>,
        limit: u32,
    ) -> MetadataResult<Vec<FileRecord>>;

    /// Stamp `purged_time` once the retained content has been removed.
    async fn mark_purged(&self, id: Uuid) -> MetadataResult<()>;
}

/// SQLite-backed [`MetadataStore`].
#[derive(Clone)]
pub struct SqliteMetadataStore {
    /// Shared, bounded connection pool.
    pub db: Arc<SqlitePool>,
}

impl SqliteMetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

/// Surface a zero-row update as `NotFound`.
fn ensure_touched(rows_affected: u64, id: Uuid) -> MetadataResult<()> {
    if rows_affected == 0 {
        Err(MetadataError::NotFound(id))
    } else {
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn create(
        &self,
        owner_id: UserId,
        filename: &str,
        content_type: &str,
        size: i64,
    ) -> MetadataResult<FileRecord> {
        let id = Uuid::new_v4();
        let storage_key = FileRecord::storage_key_for(owner_id, id);
        let now = Utc::now();

        let mut tx = self.db.begin().await?;
        let record = sqlx::query_as::<_, FileRecord>(
            r#"
            INSERT INTO file_metadata (
                id, owner_id, filename, content_type, size, storage_key,
                is_deleted, upload_time, update_time
            ) VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)
            RETURNING id, owner_id, filename, content_type, size, storage_key,
                      is_deleted, upload_time, update_time, deleted_time, purged_time
            "#,
        )
        .bind(id)
        .bind(owner_id)
        .bind(filename)
        .bind(content_type)
        .bind(size)
        .bind(&storage_key)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(record)
    }

    async fn get(&self, id: Uuid) -> MetadataResult<Option<FileRecord>> {
        let record = sqlx::query_as::<_, FileRecord>(
            "SELECT id, owner_id, filename, content_type, size, storage_key,
                    is_deleted, upload_time, update_time, deleted_time, purged_time
             FROM file_metadata
             WHERE id = ? AND is_deleted = 0",
        )
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;

        Ok(record)
    }

    async fn list(
        &self,
        owner_id: UserId,
        options: ListOptions,
    ) -> MetadataResult<Vec<FileRecord>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, owner_id, filename, content_type, size, storage_key, \
             is_deleted, upload_time, update_time, deleted_time, purged_time \
             FROM file_metadata WHERE owner_id = ",
        );
        builder.push_bind(owner_id);
        if !options.with_deleted {
            builder.push(" AND is_deleted = 0");
        }
        builder.push(" ORDER BY upload_time DESC, id ASC LIMIT ");
        builder.push_bind(i64::from(options.effective_limit()));
        builder.push(" OFFSET ");
        builder.push_bind(i64::from(options.offset));

        let rows: Vec<FileRecord> = builder.build_query_as().fetch_all(&*self.db).await?;
        Ok(rows)
    }

    async fn rename(&self, id: Uuid, filename: &str) -> MetadataResult<()> {
        let mut tx = self.db.begin().await?;
        let result = sqlx::query(
            "UPDATE file_metadata SET filename = ?, update_time = ?
             WHERE id = ? AND is_deleted = 0",
        )
        .bind(filename)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *tx)
        .await?;
        ensure_touched(result.rows_affected(), id)?;
        tx.commit().await?;
        Ok(())
    }

    async fn resize(&self, id: Uuid, size: i64) -> MetadataResult<()> {
        let mut tx = self.db.begin().await?;
        let result = sqlx::query(
            "UPDATE file_metadata SET size = ?, update_time = ?
             WHERE id = ? AND is_deleted = 0",
        )
        .bind(size)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *tx)
        .await?;
        ensure_touched(result.rows_affected(), id)?;
        tx.commit().await?;
        Ok(())
    }

    async fn soft_delete(&self, id: Uuid) -> MetadataResult<()> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;
        let result = sqlx::query(
            "UPDATE file_metadata SET is_deleted = 1, deleted_time = ?, update_time = ?
             WHERE id = ? AND is_deleted = 0",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        ensure_touched(result.rows_affected(), id)?;
        tx.commit().await?;
        Ok(())
    }

    async fn hard_delete(&self, id: Uuid) -> MetadataResult<()> {
        let mut tx = self.db.begin().await?;
        let result = sqlx::query("DELETE FROM file_metadata WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        ensure_touched(result.rows_affected(), id)?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_live_after(&self, after: &str, limit: u32) -> MetadataResult<Vec<FileRecord>> {
        let rows = sqlx::query_as::<_, FileRecord>(
            "SELECT id, owner_id, filename, content_type, size, storage_key,
                    is_deleted, upload_time, update_time, deleted_time, purged_time
             FROM file_metadata
             WHERE is_deleted = 0 AND storage_key > ?
             ORDER BY storage_key ASC
             LIMIT ?",
        )
        .bind(after)
        .bind(i64::from(limit.max(1)))
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    async fn list_purgeable(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<PurgeCursor>,
        limit: u32,
    ) -> MetadataResult<Vec<FileRecord>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, owner_id, filename, content_type, size, storage_key, \
             is_deleted, upload_time, update_time, deleted_time, purged_time \
             FROM file_metadata \
             WHERE is_deleted = 1 AND purged_time IS NULL AND deleted_time < ",
        );
        builder.push_bind(cutoff);
        if let Some((deleted_time, id)) = after {
            builder.push(" AND (deleted_time > ");
            builder.push_bind(deleted_time);
            builder.push(" OR (deleted_time = ");
            builder.push_bind(deleted_time);
            builder.push(" AND id > ");
            builder.push_bind(id);
            builder.push("))");
        }
        builder.push(" ORDER BY deleted_time ASC, id ASC LIMIT ");
        builder.push_bind(i64::from(limit.max(1)));

        let rows: Vec<FileRecord> = builder.build_query_as().fetch_all(&*self.db).await?;
        Ok(rows)
    }

    async fn mark_purged(&self, id: Uuid) -> MetadataResult<()> {
        let mut tx = self.db.begin().await?;
        let result = sqlx::query(
            "UPDATE file_metadata SET purged_time = ?
             WHERE id = ? AND is_deleted = 1 AND purged_time IS NULL",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *tx)
        .await?;
        ensure_touched(result.rows_affected(), id)?;
        tx.commit().await?;
        Ok(())
    }
}
