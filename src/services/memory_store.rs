//! In-memory object store.
//!
//! Used by tests and as a scratch backend. Keeps call accounting and can be
//! told to fail puts, which is how retry and fan-out behaviour is exercised.

use crate::{
    errors::{ConveyError, ConveyResult},
    models::{
        address::ObjectKey,
        object::{ObjectHead, PutReceipt, Visibility},
    },
    services::store::{ObjectStore, PutRequest},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{
    collections::{BTreeMap, HashSet},
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

/// An object as the memory store keeps it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub expires: Option<DateTime<Utc>>,
    pub visibility: Visibility,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryState {
    buckets: HashSet<String>,
    objects: BTreeMap<(String, String), StoredObject>,
    put_log: Vec<String>,
    fail_next_puts: usize,
    failing_keys: HashSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with `bucket` already created.
    pub fn with_bucket(bucket: &str) -> Self {
        let store = Self::new();
        store.create_bucket(bucket);
        store
    }

    pub fn create_bucket(&self, bucket: &str) {
        self.lock().buckets.insert(bucket.to_string());
    }

    /// The next `count` put calls fail with a transport error.
    pub fn fail_next_puts(&self, count: usize) {
        self.lock().fail_next_puts = count;
    }

    /// Every put for `key` fails with a transport error.
    pub fn fail_puts_for(&self, key: &str) {
        self.lock().failing_keys.insert(key.to_string());
    }

    /// Number of put calls made so far, failed ones included.
    pub fn put_calls(&self) -> usize {
        self.lock().put_log.len()
    }

    /// Keys passed to put, in call order.
    pub fn put_keys(&self) -> Vec<String> {
        self.lock().put_log.clone()
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.lock()
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_bucket(state: &MemoryState, bucket: &str) -> ConveyResult<()> {
        if state.buckets.contains(bucket) {
            Ok(())
        } else {
            Err(ConveyError::BucketUnavailable(bucket.to_string()))
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn bucket_exists(&self, bucket: &str) -> ConveyResult<bool> {
        Ok(self.lock().buckets.contains(bucket))
    }

    async fn put(&self, request: PutRequest) -> ConveyResult<PutReceipt> {
        let mut state = self.lock();
        state.put_log.push(request.key.to_string());

        if state.fail_next_puts > 0 {
            state.fail_next_puts -= 1;
            return Err(ConveyError::transport(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "injected put failure",
            )));
        }
        if state.failing_keys.contains(request.key.as_str()) {
            return Err(ConveyError::transport(io::Error::new(
                io::ErrorKind::ConnectionReset,
                format!("injected put failure for `{}`", request.key),
            )));
        }
        Self::ensure_bucket(&state, &request.bucket)?;

        let etag = format!("{:x}", md5::compute(&request.body));
        let parts = request.part_count();
        let size_bytes = request.body.len() as u64;
        state.objects.insert(
            (request.bucket, request.key.to_string()),
            StoredObject {
                body: request.body,
                content_type: request.content_type,
                cache_control: request.cache_control,
                expires: request.expires,
                visibility: request.visibility,
                etag: etag.clone(),
                last_modified: Utc::now(),
            },
        );

        Ok(PutReceipt {
            key: request.key,
            etag: Some(etag),
            size_bytes,
            parts,
            attempts: 1,
        })
    }

    async fn get(&self, bucket: &str, key: &ObjectKey) -> ConveyResult<Bytes> {
        self.object(bucket, key.as_str())
            .map(|object| object.body)
            .ok_or_else(|| ConveyError::not_found(bucket, key.as_str()))
    }

    async fn head(&self, bucket: &str, key: &ObjectKey) -> ConveyResult<ObjectHead> {
        let object = self
            .object(bucket, key.as_str())
            .ok_or_else(|| ConveyError::not_found(bucket, key.as_str()))?;
        Ok(ObjectHead {
            key: key.clone(),
            size_bytes: object.body.len() as u64,
            content_type: object.content_type,
            etag: Some(object.etag),
            last_modified: Some(object.last_modified),
            cache_control: object.cache_control,
        })
    }

    async fn delete(&self, bucket: &str, key: &ObjectKey) -> ConveyResult<()> {
        self.lock()
            .objects
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> ConveyResult<Vec<ObjectKey>> {
        let state = self.lock();
        Self::ensure_bucket(&state, bucket)?;
        state
            .objects
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| ObjectKey::from_raw(k.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(key: &str, body: &'static [u8]) -> PutRequest {
        PutRequest {
            bucket: "media".into(),
            key: ObjectKey::from_raw(key).unwrap(),
            body: Bytes::from_static(body),
            content_type: Some("text/plain".into()),
            cache_control: None,
            expires: None,
            visibility: Visibility::PublicRead,
            part_size: 4,
            concurrency: 1,
        }
    }

    #[tokio::test]
    async fn put_then_head_and_get() {
        let store = MemoryStore::with_bucket("media");
        let receipt = store.put(request("a/b.txt", b"hello world")).await.unwrap();
        assert_eq!(receipt.parts, 3);

        let key = ObjectKey::from_raw("a/b.txt").unwrap();
        let head = store.head("media", &key).await.unwrap();
        assert_eq!(head.size_bytes, 11);
        assert_eq!(head.etag, receipt.etag);
        assert_eq!(store.get("media", &key).await.unwrap().as_ref(), b"hello world");
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let store = MemoryStore::with_bucket("media");
        store.fail_next_puts(1);
        assert!(store.put(request("k", b"x")).await.is_err());
        assert!(store.put(request("k", b"x")).await.is_ok());
        assert_eq!(store.put_calls(), 2);
    }

    #[tokio::test]
    async fn missing_objects_are_not_found() {
        let store = MemoryStore::with_bucket("media");
        let key = ObjectKey::from_raw("nope").unwrap();
        assert!(store.head("media", &key).await.unwrap_err().is_not_found());
        assert!(store.get("media", &key).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn listing_filters_by_prefix() {
        let store = MemoryStore::with_bucket("media");
        for key in ["users/1.txt", "users/2.txt", "other.txt"] {
            store.put(request(key, b"x")).await.unwrap();
        }
        let keys = store.list("media", "users/").await.unwrap();
        let keys: Vec<&str> = keys.iter().map(ObjectKey::as_str).collect();
        assert_eq!(keys, ["users/1.txt", "users/2.txt"]);
    }
}
