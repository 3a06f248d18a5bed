//! Bucket/category addressing: object keys and public URLs.
//!
//! Everything here is pure string composition. An [`Address`] is an immutable
//! value; operations that need a different category build a scoped copy
//! instead of mutating shared state.

use crate::errors::{ConveyError, ConveyResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category value that uninitialized clients send instead of nothing.
pub const UNDEFINED_CATEGORY: &str = "undefined";

/// Host suffix appended to the bucket in public URLs.
pub const DOMAIN_SUFFIX: &str = ".s3.amazonaws.com";

/// Ordered path segments scoping objects inside a bucket.
///
/// Always normalized: no empty segments, no embedded separators, at least
/// one segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Category(Vec<String>);

impl Category {
    /// Parse a `"a/b/c"` style category.
    ///
    /// Returns `None` for the `"undefined"` sentinel or when nothing but
    /// separators remain.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.trim() == UNDEFINED_CATEGORY {
            return None;
        }
        Self::from_segments([Some(raw)])
    }

    /// Build a category from a sequence whose entries may be missing.
    ///
    /// Missing and empty entries are dropped; the rest keep their order.
    pub fn from_segments<I, S>(segments: I) -> Option<Self>
    where
        I: IntoIterator<Item = Option<S>>,
        S: AsRef<str>,
    {
        let parts: Vec<String> = segments
            .into_iter()
            .flatten()
            .flat_map(|segment| {
                segment
                    .as_ref()
                    .split('/')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect();

        if parts.is_empty() { None } else { Some(Self(parts)) }
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Segments joined with `/`, with the trailing separator.
    pub fn path(&self) -> String {
        format!("{}/", self.0.join("/"))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl From<Category> for String {
    fn from(category: Category) -> Self {
        category.to_string()
    }
}

impl TryFrom<String> for Category {
    type Error = ConveyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Category::parse(&value).ok_or_else(|| ConveyError::invalid("empty category"))
    }
}

/// Store-relative key of a single object. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Accept a raw key coming back from a store listing.
    pub fn from_raw(key: impl Into<String>) -> ConveyResult<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(ConveyError::MissingName);
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path component.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Bucket plus optional category: everything needed to address an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    bucket: String,
    category: Option<Category>,
}

impl Address {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            category: None,
        }
    }

    /// Set-if-present builder: `None` keeps the current category.
    pub fn with_category(mut self, category: Option<Category>) -> Self {
        if category.is_some() {
            self.category = category;
        }
        self
    }

    /// Copy of this address, re-scoped to `category` when one is given.
    pub fn scoped(&self, category: Option<&Category>) -> Self {
        self.clone().with_category(category.cloned())
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn category(&self) -> Option<&Category> {
        self.category.as_ref()
    }

    pub(crate) fn set_bucket(&mut self, bucket: String) {
        self.bucket = bucket;
    }

    pub(crate) fn set_category(&mut self, category: Category) {
        self.category = Some(category);
    }

    /// `"a/b/"` for a category of `a` and `b`, `None` without one.
    pub fn category_path(&self) -> Option<String> {
        self.category.as_ref().map(Category::path)
    }

    /// Key for `filename` under this address.
    pub fn object_key(&self, filename: &str) -> ConveyResult<ObjectKey> {
        if filename.is_empty() {
            return Err(ConveyError::MissingName);
        }
        if filename.split('/').any(str::is_empty) {
            return Err(ConveyError::invalid(format!(
                "object name `{filename}` has an empty path segment"
            )));
        }
        let key = match self.category_path() {
            Some(prefix) => format!("{prefix}{filename}"),
            None => filename.to_string(),
        };
        Ok(ObjectKey(key))
    }

    pub fn base_url(&self, secure: bool) -> String {
        let scheme = if secure { "https" } else { "http" };
        format!("{scheme}://{}{DOMAIN_SUFFIX}/", self.bucket)
    }

    pub fn full_url(&self, filename: &str, secure: bool) -> String {
        format!(
            "{}{}{}",
            self.base_url(secure),
            self.category_path().unwrap_or_default(),
            filename
        )
    }
}
