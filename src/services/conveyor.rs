//! Single-object conveyance against one bucket.
//!
//! A [`Conveyor`] owns the bucket/category context, the upload policy and a
//! shared [`ObjectStore`] handle. Uploads are retried with backoff; every
//! store call runs under the policy's timeout.
//!
//! Setters take `&mut self`. To run uploads concurrently, clone the conveyor
//! per operation; the store is shared behind an `Arc`.

use crate::{
    errors::{ConveyError, ConveyResult},
    models::{
        address::{Address, Category},
        object::{ObjectHead, ObjectMetadata, PutReceipt, Visibility},
    },
    services::{
        retry::RetryPolicy,
        store::{ObjectStore, PutRequest, SyncDirection, SyncReport, SyncRequest},
    },
};
use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tracing::{debug, info, warn};

/// Smallest part size S3 accepts for multipart uploads.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;
pub const DEFAULT_CACHE_DAYS: u64 = 360;
pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Fixed settings applied to every conveyance.
#[derive(Debug, Clone, PartialEq)]
pub struct ConveyPolicy {
    pub visibility: Visibility,
    /// Drives both `Cache-Control: max-age` and `Expires`.
    pub cache_length: Duration,
    pub part_size: usize,
    /// Parallel transfers inside one multipart upload or sync.
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// Upper bound for a single store call; `None` waits forever.
    pub timeout: Option<Duration>,
    /// Emit `https` URLs from [`Conveyor::url`].
    pub secure_urls: bool,
}

impl Default for ConveyPolicy {
    fn default() -> Self {
        Self {
            visibility: Visibility::PublicRead,
            cache_length: Duration::from_secs(DEFAULT_CACHE_DAYS * 24 * 60 * 60),
            part_size: MIN_PART_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
            timeout: Some(DEFAULT_TIMEOUT),
            secure_urls: false,
        }
    }
}

impl ConveyPolicy {
    pub fn cache_control(&self) -> String {
        format!("public, max-age={}", self.cache_length.as_secs())
    }

    /// `now + cache_length`, or `None` if that overflows.
    pub fn expires_from(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        TimeDelta::from_std(self.cache_length)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
    }
}

#[derive(Clone)]
pub struct Conveyor {
    store: Arc<dyn ObjectStore>,
    address: Address,
    policy: ConveyPolicy,
}

impl std::fmt::Debug for Conveyor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conveyor")
            .field("address", &self.address)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Conveyor {
    /// Build without checking the bucket.
    pub fn new(store: Arc<dyn ObjectStore>, address: Address, policy: ConveyPolicy) -> Self {
        Self {
            store,
            address,
            policy,
        }
    }

    /// Build after verifying the bucket is reachable.
    pub async fn connect(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        policy: ConveyPolicy,
    ) -> ConveyResult<Self> {
        let conveyor = Self::new(store, Address::new(bucket), policy);
        let bucket = conveyor.bucket().to_string();
        let reachable = conveyor
            .timed("bucket_exists", conveyor.store.bucket_exists(&bucket))
            .await;
        match reachable {
            Ok(true) => {
                debug!(bucket = %bucket, "bucket reachable");
                Ok(conveyor)
            }
            Ok(false) => Err(ConveyError::BucketUnavailable(bucket)),
            Err(err) => {
                warn!(bucket = %bucket, error = %err, "bucket access check failed");
                Err(ConveyError::BucketUnavailable(bucket))
            }
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn bucket(&self) -> &str {
        self.address.bucket()
    }

    pub fn category(&self) -> Option<&Category> {
        self.address.category()
    }

    pub fn policy(&self) -> &ConveyPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Switch buckets when a non-empty value is given. Returns the current bucket.
    pub fn set_bucket(&mut self, bucket: Option<&str>) -> &str {
        if let Some(bucket) = bucket.map(str::trim).filter(|b| !b.is_empty()) {
            self.address.set_bucket(bucket.to_string());
        }
        self.address.bucket()
    }

    /// Set the category from `"a/b"` when given; `"undefined"` is ignored.
    pub fn set_file_category(&mut self, category: Option<&str>) -> Option<&Category> {
        if let Some(category) = category.and_then(Category::parse) {
            self.address.set_category(category);
        }
        self.address.category()
    }

    /// Set the category from segments, dropping missing ones.
    pub fn set_file_category_path<I, S>(&mut self, segments: I) -> Option<&Category>
    where
        I: IntoIterator<Item = Option<S>>,
        S: AsRef<str>,
    {
        if let Some(category) = Category::from_segments(segments) {
            self.address.set_category(category);
        }
        self.address.category()
    }

    /// Copy bound to `category` when one is given.
    pub fn scoped(&self, category: Option<&Category>) -> Self {
        Self {
            address: self.address.scoped(category),
            ..self.clone()
        }
    }

    pub fn category_path(&self, category: Option<&Category>) -> Option<String> {
        self.address.scoped(category).category_path()
    }

    pub fn base_url(&self, secure: bool) -> String {
        self.address.base_url(secure)
    }

    pub fn full_url(&self, filename: &str, category: Option<&Category>, secure: bool) -> String {
        self.address.scoped(category).full_url(filename, secure)
    }

    /// Public URL for `filename` under the current category.
    pub fn url(&self, filename: &str) -> String {
        self.address.full_url(filename, self.policy.secure_urls)
    }

    /// Upload `data` as `name` under the current category.
    ///
    /// Transport failures and timeouts are retried according to the policy;
    /// once the attempts run out the last error is wrapped in
    /// [`ConveyError::RetryExhausted`].
    pub async fn upload_raw(
        &self,
        data: impl Into<Bytes>,
        name: Option<&str>,
        mime_type: Option<&str>,
    ) -> ConveyResult<PutReceipt> {
        let name = name.filter(|n| !n.is_empty()).ok_or(ConveyError::MissingName)?;
        let key = self.address.object_key(name)?;
        let body = data.into();
        let cache_control = self.policy.cache_control();
        let expires = self.policy.expires_from(Utc::now());

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let request = PutRequest {
                bucket: self.bucket().to_string(),
                key: key.clone(),
                body: body.clone(),
                content_type: mime_type.map(str::to_string),
                cache_control: Some(cache_control.clone()),
                expires,
                visibility: self.policy.visibility,
                part_size: self.policy.part_size,
                concurrency: self.policy.concurrency,
            };

            match self.timed("put", self.store.put(request)).await {
                Ok(mut receipt) => {
                    receipt.attempts = attempts;
                    info!(
                        bucket = %self.bucket(),
                        key = %key,
                        bytes = receipt.size_bytes,
                        parts = receipt.parts,
                        attempt = attempts,
                        "object uploaded"
                    );
                    return Ok(receipt);
                }
                Err(err) if err.is_retryable() => {
                    if !self.policy.retry.allows_another(attempts) {
                        warn!(bucket = %self.bucket(), key = %key, attempt = attempts, error = %err, "giving up on upload");
                        return Err(ConveyError::RetryExhausted {
                            key: key.to_string(),
                            attempts,
                            last: Box::new(err),
                        });
                    }
                    let delay = self.policy.retry.next_delay(attempts);
                    warn!(
                        bucket = %self.bucket(),
                        key = %key,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "upload failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Head lookup reshaped into caller-facing metadata.
    pub async fn get_object_info(
        &self,
        filename: &str,
        category: Option<&Category>,
    ) -> ConveyResult<ObjectMetadata> {
        let head = self.get_object_raw_info(filename, category).await?;
        let url = self.full_url(filename, category, self.policy.secure_urls);
        Ok(ObjectMetadata::from_head(&head, url))
    }

    pub async fn get_object_raw_info(
        &self,
        filename: &str,
        category: Option<&Category>,
    ) -> ConveyResult<ObjectHead> {
        let address = self.address.scoped(category);
        let key = address.object_key(filename)?;
        self.timed("head", self.store.head(address.bucket(), &key))
            .await
    }

    pub async fn object_exists(&self, filename: &str, category: Option<&Category>) -> bool {
        match self.get_object_raw_info(filename, category).await {
            Ok(_) => true,
            Err(err) => {
                self.log_swallowed("object_exists", filename, &err);
                false
            }
        }
    }

    /// Object bytes, or `None` on any failure.
    pub async fn get_object_raw(&self, filename: &str, category: Option<&Category>) -> Option<Bytes> {
        let address = self.address.scoped(category);
        let fetched = match address.object_key(filename) {
            Ok(key) => {
                self.timed("get", self.store.get(address.bucket(), &key))
                    .await
            }
            Err(err) => Err(err),
        };
        match fetched {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                self.log_swallowed("get_object_raw", filename, &err);
                None
            }
        }
    }

    /// Download into a fresh temp file whose name starts with `prefix`.
    ///
    /// `Ok(None)` when the object does not exist. The caller owns the file.
    pub async fn stash_object(
        &self,
        filename: &str,
        category: Option<&Category>,
        prefix: &str,
    ) -> ConveyResult<Option<PathBuf>> {
        let address = self.address.scoped(category);
        let key = address.object_key(filename)?;
        let temp_path = tempfile::Builder::new()
            .prefix(prefix)
            .tempfile()?
            .into_temp_path();

        // the temp file is removed when `temp_path` drops on an early return
        let fetched = self
            .timed(
                "get_to_file",
                self.store.get_to_file(address.bucket(), &key, &temp_path),
            )
            .await;
        match fetched {
            Ok(bytes) => {
                let path = temp_path.keep().map_err(|err| ConveyError::Io(err.error))?;
                debug!(key = %key, bytes, path = %path.display(), "object stashed");
                Ok(Some(path))
            }
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Delete `filename` under the current category.
    ///
    /// `false` when the object is absent or the store fails.
    pub async fn delete_object(&self, filename: &str) -> bool {
        let key = match self.address.object_key(filename) {
            Ok(key) => key,
            Err(err) => {
                self.log_swallowed("delete_object", filename, &err);
                return false;
            }
        };
        let bucket = self.bucket();

        let deleted = async {
            self.timed("head", self.store.head(bucket, &key)).await?;
            self.timed("delete", self.store.delete(bucket, &key)).await
        }
        .await;

        match deleted {
            Ok(()) => {
                info!(bucket = %bucket, key = %key, "object deleted");
                true
            }
            Err(err) => {
                self.log_swallowed("delete_object", filename, &err);
                false
            }
        }
    }

    /// Mirror `local_dir` to or from the category prefix.
    pub async fn sync_directory(
        &self,
        local_dir: &Path,
        category: Option<&Category>,
        direction: SyncDirection,
    ) -> ConveyResult<SyncReport> {
        let is_dir = tokio::fs::metadata(local_dir)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(ConveyError::DirectoryNotFound(local_dir.to_path_buf()));
        }

        let address = self.address.scoped(category);
        let request = SyncRequest {
            direction,
            local_dir: local_dir.to_path_buf(),
            bucket: address.bucket().to_string(),
            prefix: address.category_path().unwrap_or_default(),
            concurrency: self.policy.concurrency,
            visibility: self.policy.visibility,
            cache_control: Some(self.policy.cache_control()),
            expires: self.policy.expires_from(Utc::now()),
            part_size: self.policy.part_size,
        };
        info!(
            bucket = %request.bucket,
            prefix = %request.prefix,
            dir = %local_dir.display(),
            ?direction,
            "sync started"
        );

        let report = self.timed("sync", self.store.sync(request)).await?;
        info!(
            transferred = report.transferred,
            bytes = report.bytes,
            "sync finished"
        );
        Ok(report)
    }

    async fn timed<T, F>(&self, operation: &'static str, call: F) -> ConveyResult<T>
    where
        F: Future<Output = ConveyResult<T>>,
    {
        match self.policy.timeout {
            Some(after) => tokio::time::timeout(after, call)
                .await
                .map_err(|_| ConveyError::Timeout { operation, after })?,
            None => call.await,
        }
    }

    fn log_swallowed(&self, operation: &str, filename: &str, err: &ConveyError) {
        if err.is_not_found() {
            debug!(operation, filename, "object not found");
        } else {
            warn!(operation, filename, error = %err, "store call failed");
        }
    }
}
