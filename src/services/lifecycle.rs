//! src/services/lifecycle.rs
//!
//! LifecycleCoordinator: drives the metadata store and the object store for
//! every file operation. The two stores share no transaction, so each
//! multi-store operation is a short saga:
//!
//! - upload: create row, write object; on write failure remove whatever the
//!   write left behind and hard-delete the row (one attempt each), logging
//!   the orphan if the row survives
//! - overwrite: write object first, then record the new size
//! - rename / soft-delete: metadata only
//!
//! Every store call is bounded by `call_timeout`. Nothing is retried here
//! apart from the compensating delete.

use crate::{
    models::file::{FetchedFile, FileRecord, ListOptions, NewFile, UserId},
    services::{
        access_guard::{self, Access},
        metadata_store::{MetadataError, MetadataStore, PurgeCursor},
        object_store::{ObjectStore, ObjectStoreError, etag_of},
    },
};
use bytes::Bytes;
use chrono::Utc;
use futures::{StreamExt, stream};
use std::{future::Future, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const FILENAME_MIN_CHARS: usize = 1;
pub const FILENAME_MAX_CHARS: usize = 50;

/// Parallel existence checks per reconciliation batch.
const RECONCILE_CONCURRENCY: usize = 8;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("filename must have length between 1 and 50")]
    InvalidFilename,
    #[error("permission denied")]
    PermissionDenied,
    #[error("file not found")]
    NotFound,
    #[error("upload failed: {0}")]
    UploadFailed(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// A live record whose object could not be found.
#[derive(Debug, Clone, PartialEq)]
pub struct Orphan {
    pub id: Uuid,
    pub owner_id: UserId,
    pub storage_key: String,
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub orphans: Vec<Orphan>,
}

#[derive(Debug, Default)]
pub struct PurgeReport {
    pub purged: usize,
    pub failed: usize,
}

/// Whether `name` has an acceptable number of code points.
pub fn filename_is_valid(name: &str) -> bool {
    (FILENAME_MIN_CHARS..=FILENAME_MAX_CHARS).contains(&name.chars().count())
}

fn ensure_payload(data: &Bytes, size: i64) -> LifecycleResult<()> {
    if size < 0 {
        return Err(LifecycleError::InvalidInput("size must not be negative".into()));
    }
    if usize::try_from(size).ok() != Some(data.len()) {
        return Err(LifecycleError::InvalidInput(format!(
            "declared size {} does not match payload length {}",
            size,
            data.len()
        )));
    }
    Ok(())
}

fn metadata_failure(err: MetadataError) -> LifecycleError {
    match err {
        MetadataError::NotFound(_) => LifecycleError::NotFound,
        MetadataError::Sqlx(err) => LifecycleError::Unavailable(err.to_string()),
    }
}

/// Orchestrates uploads, overwrites, renames, fetches and deletes over the
/// two stores, applying the access guard to everything addressed by id.
#[derive(Clone)]
pub struct LifecycleCoordinator {
    metadata: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectStore>,
    call_timeout: Duration,
}

impl LifecycleCoordinator {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            metadata,
            objects,
            call_timeout,
        }
    }

    /// Object store handle, for readiness probing.
    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    /// Run one store call under the per-call timeout.
    async fn bounded<T, E, F>(&self, op: &'static str, fut: F) -> LifecycleResult<Result<T, E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| {
                warn!(
                    op,
                    timeout_ms = self.call_timeout.as_millis() as u64,
                    "store call timed out"
                );
                LifecycleError::Unavailable(format!("{} timed out", op))
            })
    }

    /// Look up a live record and apply the access guard.
    async fn load_owned(&self, requester: UserId, id: Uuid) -> LifecycleResult<FileRecord> {
        let record = self
            .bounded("metadata.get", self.metadata.get(id))
            .await?
            .map_err(metadata_failure)?;

        match access_guard::check(requester, record.as_ref()) {
            Access::Granted(_) => {}
            Access::Missing => return Err(LifecycleError::NotFound),
            Access::Denied => {
                debug!(file_id = %id, requester, "access denied");
                return Err(LifecycleError::PermissionDenied);
            }
        }
        record.ok_or(LifecycleError::NotFound)
    }

    /// Create a file: metadata row first, then the object.
    pub async fn upload(&self, owner_id: UserId, file: NewFile) -> LifecycleResult<FileRecord> {
        if !filename_is_valid(&file.filename) {
            return Err(LifecycleError::InvalidInput(
                "filename must have length between 1 and 50".into(),
            ));
        }
        if file.content_type.trim().is_empty() {
            return Err(LifecycleError::InvalidInput("content type is required".into()));
        }
        ensure_payload(&file.data, file.size)?;

        let record = self
            .bounded(
                "metadata.create",
                self.metadata
                    .create(owner_id, &file.filename, &file.content_type, file.size),
            )
            .await?
            .map_err(metadata_failure)?;

        let put = self
            .bounded(
                "object.put",
                self.objects.put(
                    &record.storage_key,
                    &record.content_type,
                    file.data,
                    file.size,
                ),
            )
            .await;

        let reason = match put {
            Ok(Ok(())) => {
                info!(file_id = %record.id, owner_id, size = record.size, "uploaded file");
                return Ok(record);
            }
            Ok(Err(err)) => err.to_string(),
            Err(err) => err.to_string(),
        };

        self.compensate_upload(&record, &reason).await;
        Err(LifecycleError::UploadFailed(reason))
    }

    /// Single attempt to undo an upload whose object write failed: drop any
    /// partial object, then the row.
    async fn compensate_upload(&self, record: &FileRecord, reason: &str) {
        let object_cleanup = match self
            .bounded("object.delete", self.objects.delete(&record.storage_key))
            .await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(err.to_string()),
            Err(err) => Err(err.to_string()),
        };
        if let Err(cleanup_error) = &object_cleanup {
            warn!(
                op = "upload",
                file_id = %record.id,
                storage_key = %record.storage_key,
                cleanup_error = %cleanup_error,
                "could not remove partial object"
            );
        }

        let outcome = match self
            .bounded("metadata.hard_delete", self.metadata.hard_delete(record.id))
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.to_string()),
            Err(err) => Err(err.to_string()),
        };

        match outcome {
            Ok(()) => warn!(
                op = "upload",
                file_id = %record.id,
                storage_key = %record.storage_key,
                reason,
                object_removed = object_cleanup.is_ok(),
                "object write failed, metadata row rolled back"
            ),
            Err(compensation_error) => error!(
                op = "upload",
                file_id = %record.id,
                owner_id = record.owner_id,
                storage_key = %record.storage_key,
                at = %Utc::now(),
                reason,
                object_removed = object_cleanup.is_ok(),
                compensation_error = %compensation_error,
                "orphan metadata left behind, needs reconciliation sweep"
            ),
        }
    }

    /// Replace a file's content. The object is written before the size is
    /// recorded.
    pub async fn overwrite(
        &self,
        requester: UserId,
        id: Uuid,
        data: Bytes,
        size: i64,
    ) -> LifecycleResult<()> {
        ensure_payload(&data, size)?;
        let record = self.load_owned(requester, id).await?;

        let put = self
            .bounded(
                "object.put",
                self.objects
                    .put(&record.storage_key, &record.content_type, data, size),
            )
            .await;
        match put {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(LifecycleError::UploadFailed(err.to_string())),
            Err(err) => return Err(LifecycleError::UploadFailed(err.to_string())),
        }

        let resized = self
            .bounded("metadata.resize", self.metadata.resize(id, size))
            .await
            .and_then(|r| r.map_err(metadata_failure));
        if let Err(err) = resized {
            warn!(
                op = "overwrite",
                file_id = %id,
                storage_key = %record.storage_key,
                stale_size = record.size,
                actual_size = size,
                at = %Utc::now(),
                error = %err,
                "content replaced but size not recorded"
            );
            return Err(err);
        }

        info!(file_id = %id, size, "overwrote file");
        Ok(())
    }

    /// Change a file's display name.
    pub async fn rename(&self, requester: UserId, id: Uuid, filename: &str) -> LifecycleResult<()> {
        if !filename_is_valid(filename) {
            return Err(LifecycleError::InvalidFilename);
        }
        self.load_owned(requester, id).await?;

        self.bounded("metadata.rename", self.metadata.rename(id, filename))
            .await?
            .map_err(metadata_failure)?;
        debug!(file_id = %id, "renamed file");
        Ok(())
    }

    /// Read a file's content.
    pub async fn fetch(&self, requester: UserId, id: Uuid) -> LifecycleResult<FetchedFile> {
        let record = self.load_owned(requester, id).await?;

        let object = match self
            .bounded("object.get", self.objects.get(&record.storage_key))
            .await?
        {
            Ok(object) => object,
            Err(ObjectStoreError::NotFound(_)) => {
                error!(
                    op = "fetch",
                    file_id = %record.id,
                    owner_id = record.owner_id,
                    storage_key = %record.storage_key,
                    at = %Utc::now(),
                    "live record has no object, orphan metadata"
                );
                return Err(LifecycleError::NotFound);
            }
            Err(err) => return Err(LifecycleError::Unavailable(err.to_string())),
        };
        if object.size != object.data.len() as i64 || object.etag != etag_of(&object.data) {
            warn!(
                op = "fetch",
                file_id = %record.id,
                storage_key = %record.storage_key,
                recorded_size = object.size,
                actual_size = object.data.len(),
                "object payload does not match its recorded digest"
            );
        }

        Ok(FetchedFile {
            filename: record.filename,
            content_type: record.content_type,
            size: object.data.len() as i64,
            data: object.data,
        })
    }

    /// A file's metadata.
    pub async fn metadata(&self, requester: UserId, id: Uuid) -> LifecycleResult<FileRecord> {
        self.load_owned(requester, id).await
    }

    /// The requester's own files.
    pub async fn list(
        &self,
        owner_id: UserId,
        options: ListOptions,
    ) -> LifecycleResult<Vec<FileRecord>> {
        self.bounded("metadata.list", self.metadata.list(owner_id, options))
            .await?
            .map_err(metadata_failure)
    }

    /// Mark a file deleted. Content stays in the object store.
    pub async fn soft_delete(&self, requester: UserId, id: Uuid) -> LifecycleResult<()> {
        self.load_owned(requester, id).await?;

        self.bounded("metadata.soft_delete", self.metadata.soft_delete(id))
            .await?
            .map_err(metadata_failure)?;
        info!(file_id = %id, "soft-deleted file");
        Ok(())
    }

    /// Scan every live record and report those without an object. Read-only.
    pub async fn reconcile(&self, batch: u32) -> LifecycleResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let mut cursor = String::new();

        loop {
            let rows = self
                .bounded(
                    "metadata.list_live_after",
                    self.metadata.list_live_after(&cursor, batch),
                )
                .await?
                .map_err(metadata_failure)?;
            let Some(last) = rows.last() else { break };
            cursor = last.storage_key.clone();
            report.scanned += rows.len();

            let checks: Vec<(FileRecord, LifecycleResult<Result<bool, ObjectStoreError>>)> =
                stream::iter(rows)
                    .map(|record| async move {
                        let exists = self
                            .bounded("object.exists", self.objects.exists(&record.storage_key))
                            .await;
                        (record, exists)
                    })
                    .buffer_unordered(RECONCILE_CONCURRENCY)
                    .collect()
                    .await;

            for (record, exists) in checks {
                match exists {
                    Ok(Ok(true)) => {}
                    Ok(Ok(false)) => {
                        error!(
                            op = "reconcile",
                            file_id = %record.id,
                            owner_id = record.owner_id,
                            storage_key = %record.storage_key,
                            at = %Utc::now(),
                            "orphan metadata"
                        );
                        report.orphans.push(Orphan {
                            id: record.id,
                            owner_id: record.owner_id,
                            storage_key: record.storage_key,
                        });
                    }
                    Ok(Err(err)) => return Err(LifecycleError::Unavailable(err.to_string())),
                    Err(err) => return Err(err),
                }
            }
        }

        info!(
            scanned = report.scanned,
            orphans = report.orphans.len(),
            "reconciliation finished"
        );
        Ok(report)
    }

    /// Remove retained content of records soft-deleted more than
    /// `older_than` ago. Rows stay, stamped with `purged_time`.
    pub async fn purge_deleted(
        &self,
        older_than: chrono::Duration,
        batch: u32,
    ) -> LifecycleResult<PurgeReport> {
        let cutoff = Utc::now() - older_than;
        let mut report = PurgeReport::default();
        let mut cursor: Option<PurgeCursor> = None;

        // Each row is tried once; the cursor moves past failures.
        loop {
            let rows = self
                .bounded(
                    "metadata.list_purgeable",
                    self.metadata.list_purgeable(cutoff, cursor, batch),
                )
                .await?
                .map_err(metadata_failure)?;
            let Some(last) = rows.last() else { break };
            let Some(deleted_time) = last.deleted_time else { break };
            cursor = Some((deleted_time, last.id));

            for record in rows {
                match self.purge_one(&record).await {
                    Ok(()) => report.purged += 1,
                    Err(err) => {
                        report.failed += 1;
                        warn!(
                            op = "purge",
                            file_id = %record.id,
                            storage_key = %record.storage_key,
                            error = %err,
                            "could not purge deleted content"
                        );
                    }
                }
            }
        }

        info!(purged = report.purged, failed = report.failed, "purge finished");
        Ok(report)
    }

    async fn purge_one(&self, record: &FileRecord) -> LifecycleResult<()> {
        let removed = self
            .bounded("object.delete", self.objects.delete(&record.storage_key))
            .await?
            .map_err(|err| LifecycleError::Unavailable(err.to_string()))?;
        if !removed {
            debug!(file_id = %record.id, "deleted record had no content left");
        }
        self.bounded("metadata.mark_purged", self.metadata.mark_purged(record.id))
            .await?
            .map_err(metadata_failure)
    }
}
