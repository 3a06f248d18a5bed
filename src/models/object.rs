//! Object-level records exchanged with the store and returned to callers.

use crate::models::address::ObjectKey;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Access policy applied to uploaded objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    #[default]
    PublicRead,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::PublicRead => "public-read",
            Visibility::Private => "private",
        }
    }
}

/// Raw head response from a store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectHead {
    pub key: ObjectKey,
    pub size_bytes: u64,
    pub content_type: Option<String>,
    /// Entity tag as reported by the store, quotes stripped.
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub cache_control: Option<String>,
}

/// Outcome of a completed upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PutReceipt {
    pub key: ObjectKey,
    pub etag: Option<String>,
    pub size_bytes: u64,
    /// Number of parts the transport used (1 for a single-shot put).
    pub parts: usize,
    /// Number of attempts the conveyor needed.
    pub attempts: u32,
}

/// Size of an object in bytes with derived KB/MB figures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectSize {
    pub bytes: u64,
    pub kb: f64,
    pub mb: f64,
}

impl ObjectSize {
    pub fn from_bytes(bytes: u64) -> Self {
        Self {
            bytes,
            kb: round_one_decimal(bytes as f64 / 1024.0),
            mb: round_one_decimal(bytes as f64 / (1024.0 * 1024.0)),
        }
    }
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Caller-facing description of a stored object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectMetadata {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    /// Content hashes keyed by algorithm; `md5` for plain uploads.
    pub hash: BTreeMap<String, String>,
    pub mime_type: Option<String>,
    pub size: ObjectSize,
    pub url: String,
}

impl ObjectMetadata {
    /// Reshape a head response. `url` is computed by the caller.
    pub fn from_head(head: &ObjectHead, url: String) -> Self {
        let mut hash = BTreeMap::new();
        if let Some(etag) = head.etag.as_deref() {
            // multipart etags look like `<hex>-<parts>` and are not a digest of the body
            let algorithm = if is_md5_hex(etag) { "md5" } else { "etag" };
            hash.insert(algorithm.to_string(), etag.to_string());
        }

        Self {
            name: head.key.file_name().to_string(),
            created_at: head.last_modified,
            hash,
            mime_type: head.content_type.clone(),
            size: ObjectSize::from_bytes(head.size_bytes),
            url,
        }
    }
}

fn is_md5_hex(value: &str) -> bool {
    value.len() == 32 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Strip the surrounding quotes S3-style stores put around entity tags.
pub fn unquote_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}
