//! HTTP handlers for conveyance: multipart uploads, downloads, metadata and
//! deletion. Every handler accepts `?category=a/b` and works on a copy of the
//! manager scoped to it.

use crate::{
    errors::AppError,
    handlers::AppState,
    models::{address::Category, file::InboundFile},
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State, multipart::MultipartError},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
pub struct CategoryQuery {
    pub category: Option<String>,
}

impl CategoryQuery {
    fn category(&self) -> Option<Category> {
        self.category.as_deref().and_then(Category::parse)
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub key: String,
    pub url: String,
    pub etag: Option<String>,
    pub size: u64,
}

#[derive(Debug, Serialize)]
pub struct VariantStatus {
    pub variant: Option<String>,
    pub name: Option<String>,
    pub ok: bool,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ImageResponse {
    pub name: String,
    pub url: String,
    pub success: bool,
    pub variants: Vec<VariantStatus>,
}

/// Fields of an upload form.
#[derive(Default)]
struct UploadForm {
    file: Option<InboundFile>,
    name: Option<String>,
    category: Option<String>,
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, AppError> {
    let bad_form = |err: MultipartError| AppError::bad_request(format!("malformed form: {err}"));
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await.map_err(bad_form)? {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "file" => {
                let filename = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(bad_form)?;
                debug!(?filename, bytes = data.len(), "file field received");
                form.file = Some(InboundFile::Upload {
                    field: field_name,
                    filename,
                    content_type,
                    data,
                });
            }
            "name" => form.name = Some(field.text().await.map_err(bad_form)?),
            "category" => form.category = Some(field.text().await.map_err(bad_form)?),
            other => debug!(field = other, "ignoring form field"),
        }
    }
    Ok(form)
}

/// Form field first, query second.
fn request_category(form: &UploadForm, query: &CategoryQuery) -> Option<Category> {
    form.category
        .as_deref()
        .and_then(Category::parse)
        .or_else(|| query.category())
}

/// `POST /objects`: multipart `file`, optional `name` and `category`.
pub async fn upload_object(
    State(state): State<AppState>,
    Query(query): Query<CategoryQuery>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let form = read_form(multipart).await?;
    let category = request_category(&form, &query);
    let file = form
        .file
        .ok_or_else(|| AppError::bad_request("missing `file` field"))?;

    let manager = state.manager.scoped(category.as_ref());
    let receipt = manager.convey(file, form.name.as_deref()).await?;
    let conveyor = manager.conveyor();
    let url = format!(
        "{}{}",
        conveyor.base_url(conveyor.policy().secure_urls),
        receipt.key
    );

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            key: receipt.key.to_string(),
            url,
            etag: receipt.etag,
            size: receipt.size_bytes,
        }),
    ))
}

/// `POST /images`: multipart `file` and optional `category`; uploads the
/// original and every configured size.
pub async fn upload_image(
    State(state): State<AppState>,
    Query(query): Query<CategoryQuery>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let form = read_form(multipart).await?;
    let category = request_category(&form, &query);
    let file = form
        .file
        .ok_or_else(|| AppError::bad_request("missing `file` field"))?;

    let manager = state.manager.scoped(category.as_ref());
    let conveyance = manager.convey_image_detailed(file).await?;
    let success = conveyance.success();
    let variants = conveyance
        .variants
        .outcomes
        .into_iter()
        .map(|outcome| VariantStatus {
            variant: outcome.variant,
            name: outcome.name,
            ok: outcome.result.is_ok(),
            error: outcome.result.err().map(|err| err.to_string()),
        })
        .collect();

    Ok((
        StatusCode::CREATED,
        Json(ImageResponse {
            name: conveyance.name,
            url: conveyance.url,
            success,
            variants,
        }),
    ))
}

/// `GET /objects/{*name}`: raw bytes with the stored content type.
pub async fn get_object(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<CategoryQuery>,
) -> Result<Response, AppError> {
    let category = query.category();
    let conveyor = state.manager.conveyor();
    let head = conveyor
        .get_object_raw_info(&name, category.as_ref())
        .await?;
    let data = conveyor
        .get_object_raw(&name, category.as_ref())
        .await
        .ok_or_else(|| AppError::new(StatusCode::BAD_GATEWAY, format!("could not fetch `{name}`")))?;

    let mut response = Response::new(Body::from(data));
    let headers = response.headers_mut();
    let content_type = head
        .content_type
        .as_deref()
        .unwrap_or("application/octet-stream");
    if let Ok(value) = HeaderValue::from_str(content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Some(value) = head
        .etag
        .as_deref()
        .and_then(|etag| HeaderValue::from_str(&format!("\"{etag}\"")).ok())
    {
        headers.insert(header::ETAG, value);
    }
    if let Some(value) = head
        .cache_control
        .as_deref()
        .and_then(|cc| HeaderValue::from_str(cc).ok())
    {
        headers.insert(header::CACHE_CONTROL, value);
    }
    Ok(response)
}

/// `GET /info/{*name}`: object metadata as JSON.
pub async fn object_info(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<CategoryQuery>,
) -> Result<impl IntoResponse, AppError> {
    let category = query.category();
    let info = state
        .manager
        .conveyor()
        .get_object_info(&name, category.as_ref())
        .await?;
    Ok(Json(info))
}

/// `DELETE /objects/{*name}`: 204 when deleted, 404 when nothing was there.
pub async fn delete_object(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<CategoryQuery>,
) -> Result<StatusCode, AppError> {
    let category = query.category();
    let manager = state.manager.scoped(category.as_ref());
    if manager.conveyor().delete_object(&name).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!("object `{name}` not deleted")))
    }
}
