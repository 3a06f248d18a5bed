use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io, path::PathBuf, time::Duration};
use thiserror::Error;

/// Errors raised by the conveyance layer and its transports.
#[derive(Debug, Error)]
pub enum ConveyError {
    /// An upload was requested without an object name.
    #[error("object name is required")]
    MissingName,
    #[error("object `{key}` not found in bucket `{bucket}`")]
    NotFound { bucket: String, key: String },
    #[error("local directory `{}` not found", .0.display())]
    DirectoryNotFound(PathBuf),
    #[error("bucket `{0}` is not accessible")]
    BucketUnavailable(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("transport failure: {source}")]
    Transport {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("upload of `{key}` gave up after {attempts} attempts: {last}")]
    RetryExhausted {
        key: String,
        attempts: u32,
        #[source]
        last: Box<ConveyError>,
    },
    #[error("resize failed: {0}")]
    Resize(String),
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ConveyResult<T> = Result<T, ConveyError>;

impl ConveyError {
    /// Wrap any transport-level failure.
    pub fn transport<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport {
            source: Box::new(error),
        }
    }

    pub fn not_found(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Failures worth another attempt: the remote side or the wire broke,
    /// not the request itself.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Timeout { .. } | Self::Io(_) | Self::Sqlx(_)
        )
    }
}

/// A lightweight wrapper for HTTP-facing errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<ConveyError> for AppError {
    fn from(err: ConveyError) -> Self {
        let status = match &err {
            ConveyError::MissingName
            | ConveyError::Invalid(_)
            | ConveyError::InvalidBucketName { .. }
            | ConveyError::Resize(_) => StatusCode::BAD_REQUEST,
            ConveyError::NotFound { .. } | ConveyError::DirectoryNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ConveyError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ConveyError::BucketUnavailable(_)
            | ConveyError::Transport { .. }
            | ConveyError::RetryExhausted { .. } => StatusCode::BAD_GATEWAY,
            ConveyError::Sqlx(_) | ConveyError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}
