//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the configured bucket is reachable

use crate::handlers::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::BTreeMap;

/// `GET /healthz`
///
/// Never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /readyz`
///
/// HTTP 200 when the bucket answers the store's existence check, HTTP 503
/// otherwise. The body names the bucket and category the server conveys to.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let conveyor = state.manager.conveyor();
    let bucket = conveyor.bucket();
    let bucket_check = match conveyor.store().bucket_exists(bucket).await {
        Ok(true) => CheckStatus::passed(),
        Ok(false) => CheckStatus::failed(format!("bucket `{bucket}` not found")),
        Err(e) => CheckStatus::failed(format!("error: {e}")),
    };

    let ready = bucket_check.ok;
    let body = ReadyResponse {
        status: if ready { "ok" } else { "error" },
        bucket: bucket.to_string(),
        category: conveyor.category().map(ToString::to_string),
        checks: BTreeMap::from([("bucket", bucket_check)]),
    };

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    bucket: String,
    category: Option<String>,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn passed() -> Self {
        Self { ok: true, error: None }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}
