//! Routes for the conveyance HTTP surface.
//!
//! - `GET    /healthz`, `GET /readyz`
//! - `POST   /objects`          multipart upload of one object
//! - `POST   /images`           multipart upload of an image and its sizes
//! - `GET    /objects/{*name}`  raw bytes
//! - `DELETE /objects/{*name}`  delete under the request category
//! - `GET    /info/{*name}`     object metadata
//!
//! The wildcard `*name` allows nested names like `2025/img.jpg`. Every
//! object route takes an optional `?category=a/b`.

use crate::handlers::{
    AppState,
    health_handlers::{healthz, readyz},
    upload_handlers::{delete_object, get_object, object_info, upload_image, upload_object},
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Largest multipart body accepted by the upload routes.
pub const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/objects", post(upload_object))
        .route("/images", post(upload_image))
        .route("/objects/{*name}", get(get_object).delete(delete_object))
        .route("/info/{*name}", get(object_info))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}
