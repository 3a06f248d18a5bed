//! src/services/disk_store.rs
//!
//! DiskStore: local object store backed by SQLite for metadata and local
//! disk for payloads. Payloads are sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}`.

use crate::{
    errors::{ConveyError, ConveyResult},
    models::{
        address::ObjectKey,
        object::{ObjectHead, PutReceipt},
    },
    services::store::{ObjectStore, PutRequest},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sqlx::{
    FromRow, QueryBuilder, SqlitePool,
    sqlite::{Sqlite, SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info};
use uuid::Uuid;

const MIGRATION: &str = include_str!("../../migrations/0001_init.sql");

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

#[derive(Debug, FromRow)]
struct BucketRow {
    id: Uuid,
    name: String,
}

#[derive(Debug, FromRow)]
struct ObjectRow {
    key: String,
    content_type: Option<String>,
    cache_control: Option<String>,
    size_bytes: i64,
    etag: String,
    last_modified: DateTime<Utc>,
}

/// Object store on the local filesystem.
#[derive(Clone, Debug)]
pub struct DiskStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl DiskStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Open (creating if needed) the metadata database at `database_url`.
    pub async fn connect(database_url: &str, base_path: impl Into<PathBuf>) -> ConveyResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        debug!(database_url, base_path = %base_path.display(), "disk store connected");
        Ok(Self::new(Arc::new(pool), base_path))
    }

    /// Migrated store whose metadata lives in an in-memory database.
    pub async fn in_memory(base_path: impl Into<PathBuf>) -> ConveyResult<Self> {
        // one connection that never idles out, or the database disappears
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
            .await?;
        let store = Self::new(Arc::new(pool), base_path);
        store.migrate().await?;
        Ok(store)
    }

    /// Apply the embedded schema. Safe to run repeatedly.
    pub async fn migrate(&self) -> ConveyResult<()> {
        let statements = MIGRATION
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        info!("Running {} migration statements...", statements.len());
        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Create a bucket and its directory. Returns `false` if it already existed.
    pub async fn create_bucket(&self, name: &str) -> ConveyResult<bool> {
        ensure_bucket_name_safe(name)?;
        fs::create_dir_all(self.bucket_root(name)).await?;

        match sqlx::query("INSERT INTO buckets (id, name, created_at) VALUES (?, ?, ?)")
            .bind(Uuid::new_v4())
            .bind(name)
            .bind(Utc::now())
            .execute(&*self.db)
            .await
        {
            Ok(_) => {
                info!(bucket = name, "bucket created");
                Ok(true)
            }
            Err(err) if is_unique_violation(&err) => Ok(false),
            Err(err) => Err(ConveyError::Sqlx(err)),
        }
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// Two-level shard directories from MD5(bucket/key).
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_bucket(&self, bucket: &str) -> ConveyResult<BucketRow> {
        ensure_bucket_name_safe(bucket)?;
        sqlx::query_as::<_, BucketRow>("SELECT id, name FROM buckets WHERE name = ?")
            .bind(bucket)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => ConveyError::BucketUnavailable(bucket.to_string()),
                other => ConveyError::Sqlx(other),
            })
    }

    async fn fetch_object(&self, bucket: &BucketRow, key: &str) -> ConveyResult<ObjectRow> {
        sqlx::query_as::<_, ObjectRow>(
            "SELECT key, content_type, cache_control, size_bytes, etag, last_modified
             FROM objects WHERE bucket_id = ? AND key = ?",
        )
        .bind(bucket.id)
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => ConveyError::not_found(&bucket.name, key),
            other => ConveyError::Sqlx(other),
        })
    }

    /// Write `body` to a temp file beside `file_path`, fsync, then rename over it.
    async fn write_payload(file_path: &Path, body: &[u8]) -> ConveyResult<()> {
        let parent = file_path
            .parent()
            .ok_or_else(|| io::Error::other("object path missing parent directory"))?;
        fs::create_dir_all(parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(body).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, file_path).await
        }
        .await;

        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }
        Ok(())
    }

    /// Remove empty directories from `start` up to, not including, `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err)
                    if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::DirectoryNotEmpty) =>
                {
                    break;
                }
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for DiskStore {
    async fn bucket_exists(&self, bucket: &str) -> ConveyResult<bool> {
        match self.fetch_bucket(bucket).await {
            Ok(_) => Ok(true),
            Err(ConveyError::BucketUnavailable(_) | ConveyError::InvalidBucketName { .. }) => {
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    async fn put(&self, request: PutRequest) -> ConveyResult<PutReceipt> {
        ensure_key_safe(request.key.as_str())?;
        let bucket = self.fetch_bucket(&request.bucket).await?;
        let key = request.key.as_str();

        let file_path = self.object_path(&bucket.name, key);
        Self::write_payload(&file_path, &request.body).await?;

        let size_bytes = request.body.len() as i64;
        let etag = format!("{:x}", md5::compute(&request.body));

        let upserted = sqlx::query(
            r#"
            INSERT INTO objects (
                id, bucket_id, key, content_type, cache_control, expires_at,
                visibility, size_bytes, etag, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                content_type = excluded.content_type,
                cache_control = excluded.cache_control,
                expires_at = excluded.expires_at,
                visibility = excluded.visibility,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(bucket.id)
        .bind(key)
        .bind(request.content_type.as_deref())
        .bind(request.cache_control.as_deref())
        .bind(request.expires)
        .bind(request.visibility.as_str())
        .bind(size_bytes)
        .bind(&etag)
        .bind(Utc::now())
        .execute(&*self.db)
        .await;

        if let Err(err) = upserted {
            let _ = fs::remove_file(&file_path).await;
            return Err(ConveyError::Sqlx(err));
        }

        debug!(bucket = %bucket.name, key, size_bytes, "object written to disk");
        Ok(PutReceipt {
            key: request.key,
            etag: Some(etag),
            size_bytes: size_bytes as u64,
            parts: 1,
            attempts: 1,
        })
    }

    async fn get(&self, bucket: &str, key: &ObjectKey) -> ConveyResult<Bytes> {
        ensure_key_safe(key.as_str())?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        self.fetch_object(&bucket_rec, key.as_str()).await?;

        let file_path = self.object_path(&bucket_rec.name, key.as_str());
        match fs::read(&file_path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(ConveyError::not_found(bucket, key.as_str()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get_to_file(&self, bucket: &str, key: &ObjectKey, path: &Path) -> ConveyResult<u64> {
        ensure_key_safe(key.as_str())?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        self.fetch_object(&bucket_rec, key.as_str()).await?;

        let file_path = self.object_path(&bucket_rec.name, key.as_str());
        fs::copy(&file_path, path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                ConveyError::not_found(bucket, key.as_str())
            } else {
                ConveyError::Io(err)
            }
        })
    }

    async fn head(&self, bucket: &str, key: &ObjectKey) -> ConveyResult<ObjectHead> {
        ensure_key_safe(key.as_str())?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let row = self.fetch_object(&bucket_rec, key.as_str()).await?;
        Ok(ObjectHead {
            key: ObjectKey::from_raw(row.key)?,
            size_bytes: row.size_bytes.max(0) as u64,
            content_type: row.content_type,
            etag: Some(row.etag),
            last_modified: Some(row.last_modified),
            cache_control: row.cache_control,
        })
    }

    async fn delete(&self, bucket: &str, key: &ObjectKey) -> ConveyResult<()> {
        ensure_key_safe(key.as_str())?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let result = sqlx::query("DELETE FROM objects WHERE bucket_id = ? AND key = ?")
            .bind(bucket_rec.id)
            .bind(key.as_str())
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            debug!(bucket, %key, "delete of absent object");
            return Ok(());
        }

        let file_path = self.object_path(&bucket_rec.name, key.as_str());
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(ConveyError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(&bucket_rec.name);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> ConveyResult<Vec<ObjectKey>> {
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT key FROM objects WHERE bucket_id = ");
        builder.push_bind(bucket_rec.id);
        if !prefix.is_empty() {
            builder.push(" AND key LIKE ");
            builder.push_bind(format!("{}%", escape_like(prefix)));
            builder.push(" ESCAPE '\\'");
        }
        builder.push(" ORDER BY key ASC");

        let keys: Vec<String> = builder
            .build_query_scalar::<String>()
            .fetch_all(&*self.db)
            .await?;
        keys.into_iter().map(ObjectKey::from_raw).collect()
    }
}

/// Reject keys that could escape the bucket directory.
fn ensure_key_safe(key: &str) -> ConveyResult<()> {
    let invalid = |reason: &str| Err(ConveyError::invalid(format!("object key `{key}` {reason}")));
    if key.is_empty() {
        return Err(ConveyError::MissingName);
    }
    if key.len() > MAX_OBJECT_KEY_LEN {
        return invalid("is too long");
    }
    if key.starts_with('/') || key.split('/').any(|part| part == "..") {
        return invalid("must stay inside the bucket");
    }
    if key.bytes().any(|b| b.is_ascii_control() || b == b'\\') {
        return invalid("contains control characters or backslashes");
    }
    Ok(())
}

/// S3 bucket naming rules.
fn ensure_bucket_name_safe(name: &str) -> ConveyResult<()> {
    let reject = |reason: &str| {
        Err(ConveyError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.into(),
        })
    };

    if name.trim() != name {
        return reject("cannot begin or end with whitespace");
    }
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&name.len()) {
        return reject("must be between 3 and 63 characters");
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return reject("allowed characters are lowercase letters, digits, dots, and hyphens");
    }
    if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
        return reject("must start and end with a lowercase letter or digit");
    }
    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return reject("cannot contain consecutive dots or dot-hyphen combinations");
    }
    if is_ipv4_like(name) {
        return reject("must not be formatted like an IP address");
    }
    Ok(())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Dotted-decimal form such as `192.168.0.1`.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::object::Visibility;

    async fn store(dir: &Path) -> DiskStore {
        let store = DiskStore::in_memory(dir).await.unwrap();
        assert!(store.create_bucket("media").await.unwrap());
        store
    }

    fn put(key: &str, body: &'static [u8]) -> PutRequest {
        PutRequest {
            bucket: "media".into(),
            key: ObjectKey::from_raw(key).unwrap(),
            body: Bytes::from_static(body),
            content_type: Some("text/plain".into()),
            cache_control: Some("public, max-age=60".into()),
            expires: None,
            visibility: Visibility::PublicRead,
            part_size: 5 * 1024 * 1024,
            concurrency: 5,
        }
    }

    #[test]
    fn bucket_names_follow_s3_rules() {
        assert!(ensure_bucket_name_safe("media-assets.v2").is_ok());
        for bad in ["ab", "Media", "-media", "media.", "a..b", "a.-b", "192.168.0.1", " media"] {
            assert!(ensure_bucket_name_safe(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn keys_cannot_escape_the_bucket() {
        assert!(ensure_key_safe("users/42/logo.png").is_ok());
        assert!(ensure_key_safe("../etc/passwd").is_err());
        assert!(ensure_key_safe("/abs").is_err());
        assert!(ensure_key_safe("a\\b").is_err());
        assert!(matches!(ensure_key_safe(""), Err(ConveyError::MissingName)));
    }

    #[test]
    fn like_patterns_are_escaped() {
        assert_eq!(escape_like("a_b%c"), "a\\_b\\%c");
    }

    #[tokio::test]
    async fn put_head_get_delete_round() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        let key = ObjectKey::from_raw("users/42/notes.txt").unwrap();

        let receipt = store.put(put(key.as_str(), b"hello")).await.unwrap();
        assert_eq!(receipt.etag.as_deref(), Some(format!("{:x}", md5::compute(b"hello")).as_str()));

        let head = store.head("media", &key).await.unwrap();
        assert_eq!(head.size_bytes, 5);
        assert_eq!(head.content_type.as_deref(), Some("text/plain"));
        assert_eq!(head.cache_control.as_deref(), Some("public, max-age=60"));
        assert_eq!(store.get("media", &key).await.unwrap().as_ref(), b"hello");

        store.delete("media", &key).await.unwrap();
        assert!(store.head("media", &key).await.unwrap_err().is_not_found());
        // shard directories are pruned with the payload
        let bucket_root = dir.path().join("media");
        assert_eq!(std::fs::read_dir(bucket_root).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn overwrites_replace_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        store.put(put("a.txt", b"one")).await.unwrap();
        store.put(put("a.txt", b"three")).await.unwrap();

        let key = ObjectKey::from_raw("a.txt").unwrap();
        assert_eq!(store.head("media", &key).await.unwrap().size_bytes, 5);
        assert_eq!(store.list("media", "").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn listing_respects_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        for key in ["users/1.txt", "users/2.txt", "users_old/3.txt", "other.txt"] {
            store.put(put(key, b"x")).await.unwrap();
        }
        let keys = store.list("media", "users/").await.unwrap();
        let keys: Vec<&str> = keys.iter().map(ObjectKey::as_str).collect();
        assert_eq!(keys, ["users/1.txt", "users/2.txt"]);
    }

    #[tokio::test]
    async fn unknown_buckets_are_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        assert!(store.bucket_exists("media").await.unwrap());
        assert!(!store.bucket_exists("missing").await.unwrap());
        assert!(!store.bucket_exists("NOPE").await.unwrap());
        assert!(!store.create_bucket("media").await.unwrap());

        let err = store.put(PutRequest { bucket: "missing".into(), ..put("a", b"x") }).await;
        assert!(matches!(err, Err(ConveyError::BucketUnavailable(_))));
    }
}
