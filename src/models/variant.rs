//! Image variants: the size configuration that asks for them and the
//! records that describe what was produced and conveyed.

use crate::errors::{ConveyError, ConveyResult};
use crate::models::file::{FileSource, extension_for_mime};
use crate::models::object::PutReceipt;
use bytes::Bytes;
use std::str::FromStr;

/// One requested variant, written `key=WxH[!][:format]`.
///
/// `!` asks for a centre crop to the target aspect ratio before scaling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeSpec {
    pub key: String,
    pub width: u32,
    pub height: u32,
    pub crop: bool,
    pub format: Option<String>,
}

impl FromStr for SizeSpec {
    type Err = ConveyError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (key, rest) = raw
            .split_once('=')
            .ok_or_else(|| ConveyError::invalid(format!("size `{raw}` must look like key=WxH")))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ConveyError::invalid(format!("size `{raw}` has no key")));
        }

        let (dims, format) = match rest.split_once(':') {
            Some((dims, format)) if !format.trim().is_empty() => {
                (dims, Some(format.trim().to_ascii_lowercase()))
            }
            Some((dims, _)) => (dims, None),
            None => (rest, None),
        };
        let (dims, crop) = match dims.trim().strip_suffix('!') {
            Some(dims) => (dims, true),
            None => (dims.trim(), false),
        };
        let (width, height) = dims
            .split_once('x')
            .ok_or_else(|| ConveyError::invalid(format!("size `{raw}` needs WxH dimensions")))?;
        let parse = |value: &str| {
            value
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| ConveyError::invalid(format!("size `{raw}` has a bad dimension")))
        };

        Ok(Self {
            key: key.to_string(),
            width: parse(width)?,
            height: parse(height)?,
            crop,
            format,
        })
    }
}

/// The source image a set of variants derives from.
#[derive(Debug, Clone, PartialEq)]
pub struct OriginalImage {
    /// Content-derived base name: lowercase hex MD5 of the bytes.
    pub obfuscated_name: String,
    pub mime_type: String,
    /// Extension including the leading dot, or empty.
    pub extension: String,
    pub data: Bytes,
}

impl OriginalImage {
    pub fn from_source(source: &FileSource) -> Self {
        let extension = source
            .extension()
            .map(|ext| ext.to_ascii_lowercase())
            .or_else(|| extension_for_mime(source.mime_type()))
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default();

        Self {
            obfuscated_name: format!("{:x}", md5::compute(source.raw_bytes())),
            mime_type: source.mime_type().to_string(),
            extension,
            data: source.raw_bytes().clone(),
        }
    }

    /// Name the original itself is stored under.
    pub fn stored_name(&self) -> String {
        format!("{}{}", self.obfuscated_name, self.extension)
    }
}

/// One produced derivative.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageVariant {
    pub key: String,
    pub data: Bytes,
    /// Declared output format or mime type; `None` means "same as original".
    pub format: Option<String>,
}

impl ImageVariant {
    pub fn new(key: impl Into<String>, data: impl Into<Bytes>, format: Option<&str>) -> Self {
        Self {
            key: key.into(),
            data: data.into(),
            format: format.map(str::to_string),
        }
    }
}

/// What happened to one variant during a fan-out upload.
#[derive(Debug)]
pub struct VariantOutcome {
    pub variant: Option<String>,
    /// Destination name, when the variant was produced.
    pub name: Option<String>,
    pub result: ConveyResult<PutReceipt>,
}

/// Per-variant results of a fan-out upload, in production order.
#[derive(Debug, Default)]
pub struct VariantReport {
    pub outcomes: Vec<VariantOutcome>,
}

impl VariantReport {
    /// Logical AND over every outcome; vacuously true when empty.
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = &VariantOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}
