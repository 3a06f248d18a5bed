//! Object conveyance over S3-compatible storage.
//!
//! Uploads, downloads, syncs and deletes files (including resized image
//! variants) under a bucket/category addressing scheme, with bounded retry
//! and metadata shaping. The [`services::conveyor::Conveyor`] is the core;
//! transports implement [`services::store::ObjectStore`].

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

pub use errors::{AppError, ConveyError, ConveyResult};
pub use models::address::{Address, Category, ObjectKey};
pub use models::file::{FileSource, InboundFile};
pub use services::conveyor::{ConveyPolicy, Conveyor};
pub use services::image_conveyor::ImageConveyor;
pub use services::manager::Manager;
pub use services::store::ObjectStore;

use axum::Router;
use handlers::AppState;

/// Router with every route bound to `manager`.
pub fn app(manager: Manager) -> Router {
    routes::routes::routes().with_state(AppState::new(manager))
}
