//! Object-store transport boundary.
//!
//! The conveyor only talks to this trait. Implementations perform the
//! network (or disk) work: [`crate::services::s3_store::S3Store`],
//! [`crate::services::disk_store::DiskStore`] and
//! [`crate::services::memory_store::MemoryStore`].

use crate::{
    errors::{ConveyError, ConveyResult},
    models::{
        address::ObjectKey,
        file::guess_mime,
        object::{ObjectHead, PutReceipt, Visibility},
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt, stream};
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Everything a transport needs to write one object.
#[derive(Debug, Clone)]
pub struct PutRequest {
    pub bucket: String,
    pub key: ObjectKey,
    pub body: Bytes,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub expires: Option<DateTime<Utc>>,
    pub visibility: Visibility,
    /// Bodies larger than this go up in parts of this size.
    pub part_size: usize,
    /// Parts in flight at once.
    pub concurrency: usize,
}

impl PutRequest {
    /// Number of parts `body` splits into at `part_size`.
    pub fn part_count(&self) -> usize {
        let part_size = self.part_size.max(1);
        self.body.len().div_ceil(part_size).max(1)
    }
}

/// Which side of a directory sync is the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    Upload,
    Download,
}

/// Bulk transfer between a local directory and a key prefix.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub direction: SyncDirection,
    pub local_dir: PathBuf,
    pub bucket: String,
    /// Prefix with trailing `/`, or empty for the bucket root.
    pub prefix: String,
    pub concurrency: usize,
    /// Per-object settings for uploads; the body and key are filled per file.
    pub visibility: Visibility,
    pub cache_control: Option<String>,
    pub expires: Option<DateTime<Utc>>,
    pub part_size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub transferred: usize,
    pub bytes: u64,
}

/// Storage primitives used by the conveyor.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Access check used when a conveyor is connected to a bucket.
    async fn bucket_exists(&self, bucket: &str) -> ConveyResult<bool>;

    /// Write one object. Multipart-capable transports split by `part_size`.
    async fn put(&self, request: PutRequest) -> ConveyResult<PutReceipt>;

    /// Read a whole object. `NotFound` when the key is absent.
    async fn get(&self, bucket: &str, key: &ObjectKey) -> ConveyResult<Bytes>;

    /// Head lookup. `NotFound` when the key is absent.
    async fn head(&self, bucket: &str, key: &ObjectKey) -> ConveyResult<ObjectHead>;

    async fn delete(&self, bucket: &str, key: &ObjectKey) -> ConveyResult<()>;

    /// Keys under `prefix`, in lexicographic order.
    async fn list(&self, bucket: &str, prefix: &str) -> ConveyResult<Vec<ObjectKey>>;

    /// Download an object into `path`, returning the bytes written.
    async fn get_to_file(&self, bucket: &str, key: &ObjectKey, path: &Path) -> ConveyResult<u64> {
        let body = self.get(bucket, key).await?;
        tokio::fs::write(path, &body).await?;
        Ok(body.len() as u64)
    }

    /// Bulk transfer in the requested direction.
    async fn sync(&self, request: SyncRequest) -> ConveyResult<SyncReport> {
        match request.direction {
            SyncDirection::Upload => sync_upload(self, &request).await,
            SyncDirection::Download => sync_download(self, &request).await,
        }
    }
}

/// Local path for `key` under `local_dir`.
///
/// `None` for directory placeholders and for keys whose remainder would
/// land outside `local_dir` (absolute, `..`, empty or `.` segments).
fn target_for(local_dir: &Path, prefix: &str, key: &ObjectKey) -> Option<PathBuf> {
    let relative = key.as_str().strip_prefix(prefix)?;
    if relative.is_empty() || relative.split('/').any(|part| part.is_empty() || part == ".") {
        return None;
    }
    let relative = Path::new(relative);
    if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
        debug!(%key, "skipping key that leaves the sync directory");
        return None;
    }
    Some(local_dir.join(relative))
}

/// Relative path → key under `prefix`, always with `/` separators.
fn key_for(prefix: &str, relative: &Path) -> Option<String> {
    let parts: Vec<&str> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    Some(format!("{prefix}{}", parts.join("/")))
}

async fn sync_upload<S>(store: &S, request: &SyncRequest) -> ConveyResult<SyncReport>
where
    S: ObjectStore + ?Sized,
{
    let mut files = Vec::new();
    for entry in WalkDir::new(&request.local_dir).sort_by_file_name() {
        let entry = entry.map_err(|err| ConveyError::Io(err.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(&request.local_dir)
            .map_err(|_| ConveyError::invalid("walked outside the sync directory"))?;
        let key = key_for(&request.prefix, relative).ok_or_else(|| {
            ConveyError::invalid(format!("`{}` is not valid UTF-8", relative.display()))
        })?;
        files.push((entry.path().to_path_buf(), ObjectKey::from_raw(key)?));
    }

    let receipts: Vec<PutReceipt> = stream::iter(files)
        .map(|(path, key)| async move {
            let body = Bytes::from(tokio::fs::read(&path).await?);
            debug!(bucket = %request.bucket, %key, bytes = body.len(), "sync upload");
            store
                .put(PutRequest {
                    bucket: request.bucket.clone(),
                    key,
                    body,
                    content_type: Some(guess_mime(&path).to_string()),
                    cache_control: request.cache_control.clone(),
                    expires: request.expires,
                    visibility: request.visibility,
                    part_size: request.part_size,
                    concurrency: 1,
                })
                .await
        })
        .buffer_unordered(request.concurrency.max(1))
        .try_collect()
        .await?;

    Ok(SyncReport {
        transferred: receipts.len(),
        bytes: receipts.iter().map(|r| r.size_bytes).sum(),
    })
}

async fn sync_download<S>(store: &S, request: &SyncRequest) -> ConveyResult<SyncReport>
where
    S: ObjectStore + ?Sized,
{
    let keys = store.list(&request.bucket, &request.prefix).await?;
    let targets: Vec<(ObjectKey, PathBuf)> = keys
        .into_iter()
        .filter_map(|key| {
            let target = target_for(&request.local_dir, &request.prefix, &key)?;
            Some((key, target))
        })
        .collect();

    let sizes: Vec<u64> = stream::iter(targets)
        .map(|(key, target)| async move {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            debug!(bucket = %request.bucket, %key, path = %target.display(), "sync download");
            store.get_to_file(&request.bucket, &key, &target).await
        })
        .buffer_unordered(request.concurrency.max(1))
        .try_collect()
        .await?;

    Ok(SyncReport {
        transferred: sizes.len(),
        bytes: sizes.iter().sum(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_use_forward_slashes() {
        let relative = Path::new("a").join("b").join("c.txt");
        assert_eq!(key_for("media/", &relative).as_deref(), Some("media/a/b/c.txt"));
        assert_eq!(key_for("", Path::new("c.txt")).as_deref(), Some("c.txt"));
    }

    #[test]
    fn download_targets_stay_inside_the_directory() {
        let dir = Path::new("/srv/mirror");
        let key = |raw: &str| ObjectKey::from_raw(raw).unwrap();
        assert_eq!(
            target_for(dir, "site/", &key("site/css/app.css")),
            Some(dir.join("css").join("app.css"))
        );
        assert_eq!(target_for(dir, "site/", &key("site//tmp/x")), None);
        assert_eq!(target_for(dir, "site/", &key("site/../x")), None);
        assert_eq!(target_for(dir, "site/", &key("site/./x")), None);
        assert_eq!(target_for(dir, "site/", &key("site/assets/")), None);
        assert_eq!(target_for(dir, "site/", &key("other/x")), None);
    }

    #[test]
    fn part_count_rounds_up() {
        let mut request = PutRequest {
            bucket: "media".into(),
            key: ObjectKey::from_raw("k").unwrap(),
            body: Bytes::from(vec![0u8; 10]),
            content_type: None,
            cache_control: None,
            expires: None,
            visibility: Visibility::PublicRead,
            part_size: 4,
            concurrency: 1,
        };
        assert_eq!(request.part_count(), 3);
        request.body = Bytes::new();
        assert_eq!(request.part_count(), 1);
    }
}
