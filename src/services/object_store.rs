//! src/services/object_store.rs
//!
//! ObjectStore: blob half of the file lifecycle, keyed by an opaque storage
//! key. The on-disk implementation shards payloads beneath
//! `base_path/{shard}/{shard}/{key}` and keeps the content-type tag in a
//! small JSON sidecar next to each payload, together with the payload's size
//! and MD5 etag.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const MAX_STORAGE_KEY_LEN: usize = 1024;
const SIDECAR_SUFFIX: &str = ".meta.json";
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid storage key")]
    InvalidKey,
    #[error("declared size {declared} does not match payload length {actual}")]
    SizeMismatch { declared: i64, actual: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Sidecar(#[from] serde_json::Error),
}

pub type ObjectResult<T> = Result<T, ObjectStoreError>;

/// A payload read back from the store.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub content_type: String,
    pub size: i64,
    /// Hex MD5 of the payload as recorded at write time.
    pub etag: String,
    pub data: Bytes,
}

/// Raw byte storage keyed by storage key.
///
/// `put` either replaces the whole object at `key` or fails; callers still
/// treat a failed `put` as "state unknown". `get` on a missing key is
/// [`ObjectStoreError::NotFound`], never `Io`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, content_type: &str, data: Bytes, size: i64)
    -> ObjectResult<()>;

    async fn get(&self, key: &str) -> ObjectResult<StoredObject>;

    async fn exists(&self, key: &str) -> ObjectResult<bool>;

    /// Remove an object. `Ok(false)` when nothing was stored at `key`.
    async fn delete(&self, key: &str) -> ObjectResult<bool>;
}

#[derive(Serialize, Deserialize)]
struct Sidecar {
    content_type: String,
    size: i64,
    etag: String,
}

/// Hex MD5 digest of a payload.
pub fn etag_of(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Local-disk [`ObjectStore`].
#[derive(Clone, Debug)]
pub struct DiskObjectStore {
    /// Root directory for payloads.
    pub base_path: PathBuf,
}

impl DiskObjectStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Reject keys that could escape `base_path`.
    fn ensure_key_safe(key: &str) -> ObjectResult<()> {
        if key.is_empty() || key.len() > MAX_STORAGE_KEY_LEN {
            return Err(ObjectStoreError::InvalidKey);
        }
        if key.starts_with('/') || key.ends_with('/') || key.contains("..") {
            return Err(ObjectStoreError::InvalidKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(ObjectStoreError::InvalidKey);
        }
        Ok(())
    }

    /// Two-level shard directory names from MD5(key), to bound directory size.
    fn shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn shard_root(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::shards(key);
        self.base_path.join(shard_a).join(shard_b)
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.shard_root(key).join(key)
    }

    fn sidecar_path(object_path: &Path) -> PathBuf {
        let mut raw = object_path.as_os_str().to_owned();
        raw.push(SIDECAR_SUFFIX);
        PathBuf::from(raw)
    }

    /// Write `bytes` to a temp file beside `target`, fsync, then rename over it.
    async fn write_atomic(target: &Path, bytes: &[u8]) -> ObjectResult<()> {
        let parent = target.parent().map(Path::to_path_buf).ok_or_else(|| {
            ObjectStoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ObjectStoreError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, target).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(target).await?;
                fs::rename(&tmp_path, target).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(ObjectStoreError::Io(err));
            }
        }
        Ok(())
    }

    /// Remove empty directories from `start` up to (not including) `stop`.
    async fn prune_empty_dirs(start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for DiskObjectStore {
    async fn put(
        &self,
        key: &str,
        content_type: &str,
        data: Bytes,
        size: i64,
    ) -> ObjectResult<()> {
        Self::ensure_key_safe(key)?;
        if usize::try_from(size).ok() != Some(data.len()) {
            return Err(ObjectStoreError::SizeMismatch {
                declared: size,
                actual: data.len(),
            });
        }

        let object_path = self.object_path(key);
        let sidecar = serde_json::to_vec(&Sidecar {
            content_type: content_type.to_string(),
            size,
            etag: etag_of(&data),
        })?;
        // Sidecar first: the content type is fixed per key, so a crash between
        // the two renames at worst leaves a size and etag that `get` reports
        // as not matching the payload.
        Self::write_atomic(&Self::sidecar_path(&object_path), &sidecar).await?;
        Self::write_atomic(&object_path, &data).await?;

        debug!(storage_key = key, size, "stored object {}", object_path.display());
        Ok(())
    }

    async fn get(&self, key: &str) -> ObjectResult<StoredObject> {
        Self::ensure_key_safe(key)?;
        let object_path = self.object_path(key);

        let data = fs::read(&object_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                ObjectStoreError::NotFound(key.to_string())
            } else {
                ObjectStoreError::Io(err)
            }
        })?;

        let sidecar = match fs::read(Self::sidecar_path(&object_path)).await {
            Ok(raw) => serde_json::from_slice::<Sidecar>(&raw)?,
            Err(err) if err.kind() == ErrorKind::NotFound => Sidecar {
                content_type: FALLBACK_CONTENT_TYPE.to_string(),
                size: data.len() as i64,
                etag: etag_of(&data),
            },
            Err(err) => return Err(ObjectStoreError::Io(err)),
        };

        Ok(StoredObject {
            content_type: sidecar.content_type,
            size: sidecar.size,
            etag: sidecar.etag,
            data: Bytes::from(data),
        })
    }

    async fn exists(&self, key: &str) -> ObjectResult<bool> {
        Self::ensure_key_safe(key)?;
        Ok(fs::try_exists(self.object_path(key)).await?)
    }

    async fn delete(&self, key: &str) -> ObjectResult<bool> {
        Self::ensure_key_safe(key)?;
        let object_path = self.object_path(key);

        let removed = match fs::remove_file(&object_path).await {
            Ok(_) => true,
            Err(err) if err.kind() == ErrorKind::NotFound => false,
            Err(err) => return Err(ObjectStoreError::Io(err)),
        };
        match fs::remove_file(Self::sidecar_path(&object_path)).await {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(ObjectStoreError::Io(err)),
        }

        if let Some(parent) = object_path.parent() {
            Self::prune_empty_dirs(parent, &self.base_path).await;
        }
        Ok(removed)
    }
}
