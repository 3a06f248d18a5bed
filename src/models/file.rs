//! Inbound file sources, normalized to one shape before conveyance.

use crate::errors::{ConveyError, ConveyResult};
use bytes::Bytes;
use std::path::{Path, PathBuf};

const DEFAULT_MIME: &str = "application/octet-stream";

/// Extension → mime table used when a source does not declare a type.
const MIME_TYPES: [(&str, &str); 22] = [
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("bmp", "image/bmp"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("svg", "image/svg+xml"),
    ("ico", "image/x-icon"),
    ("txt", "text/plain"),
    ("html", "text/html"),
    ("css", "text/css"),
    ("csv", "text/csv"),
    ("js", "application/javascript"),
    ("json", "application/json"),
    ("xml", "application/xml"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("mp3", "audio/mpeg"),
    ("mp4", "video/mp4"),
    ("woff2", "font/woff2"),
];

/// Mime type for a file extension (without the dot), if known.
pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    let extension = extension.trim_start_matches('.').to_ascii_lowercase();
    MIME_TYPES
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, mime)| *mime)
}

/// Preferred extension (without the dot) for a mime type.
///
/// Falls back to the mime subtype, so `image/avif` gives `avif`.
pub fn extension_for_mime(mime: &str) -> Option<String> {
    let mime = mime.split(';').next().unwrap_or(mime).trim().to_ascii_lowercase();
    if let Some((ext, _)) = MIME_TYPES.iter().find(|(_, m)| *m == mime) {
        return Some((*ext).to_string());
    }
    let subtype = mime.split_once('/')?.1;
    let subtype = subtype.split('+').next().unwrap_or(subtype);
    (!subtype.is_empty()).then(|| subtype.to_string())
}

/// Mime type for a path, by extension.
pub fn guess_mime(path: &Path) -> &'static str {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(mime_for_extension)
        .unwrap_or(DEFAULT_MIME)
}

/// A file ready for conveyance: bytes plus naming and type information.
#[derive(Debug, Clone, PartialEq)]
pub struct FileSource {
    data: Bytes,
    stem: String,
    extension: Option<String>,
    mime_type: String,
}

impl FileSource {
    /// Build from a full filename such as `logo.png`.
    ///
    /// The mime type defaults to the one implied by the extension.
    pub fn new(data: impl Into<Bytes>, full_filename: &str, mime_type: Option<&str>) -> Self {
        let (stem, extension) = split_filename(full_filename);
        let mime_type = mime_type
            .filter(|m| !m.trim().is_empty())
            .map(str::to_string)
            .or_else(|| {
                extension
                    .as_deref()
                    .and_then(mime_for_extension)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| DEFAULT_MIME.to_string());

        Self {
            data: data.into(),
            stem,
            extension,
            mime_type,
        }
    }

    pub fn raw_bytes(&self) -> &Bytes {
        &self.data
    }

    /// Filename without extension.
    pub fn filename(&self) -> &str {
        &self.stem
    }

    /// Extension without the dot.
    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn full_filename(&self) -> String {
        match &self.extension {
            Some(ext) => format!("{}.{}", self.stem, ext),
            None => self.stem.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn split_filename(full_filename: &str) -> (String, Option<String>) {
    // uploads sometimes carry client paths
    let name = full_filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(full_filename);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            (stem.to_string(), Some(ext.to_string()))
        }
        _ => (name.to_string(), None),
    }
}

/// Where inbound bytes come from.
#[derive(Debug, Clone)]
pub enum InboundFile {
    /// A multipart form field received over HTTP.
    Upload {
        field: String,
        filename: Option<String>,
        content_type: Option<String>,
        data: Bytes,
    },
    /// A file on the local filesystem.
    Local(PathBuf),
    /// Bytes already in memory.
    Blob {
        data: Bytes,
        filename: String,
        mime_type: Option<String>,
    },
    /// A source normalized earlier.
    Prepared(FileSource),
}

impl InboundFile {
    /// Normalize into a [`FileSource`], reading local files as needed.
    pub async fn resolve(self) -> ConveyResult<FileSource> {
        match self {
            InboundFile::Upload {
                field,
                filename,
                content_type,
                data,
            } => {
                let filename = filename.filter(|f| !f.is_empty()).unwrap_or(field);
                Ok(FileSource::new(data, &filename, content_type.as_deref()))
            }
            InboundFile::Local(path) => {
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        ConveyError::invalid(format!("`{}` has no file name", path.display()))
                    })?;
                let data = tokio::fs::read(&path).await?;
                Ok(FileSource::new(data, &name, None))
            }
            InboundFile::Blob {
                data,
                filename,
                mime_type,
            } => Ok(FileSource::new(data, &filename, mime_type.as_deref())),
            InboundFile::Prepared(source) => Ok(source),
        }
    }
}
