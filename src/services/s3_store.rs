//! S3 transport built on `aws-sdk-s3`.
//!
//! Small bodies go up with a single `PutObject` carrying `Content-MD5`.
//! Bodies above the part size use a multipart upload whose parts are sent
//! `concurrency` at a time; a failed multipart upload is aborted before the
//! error is returned so no orphaned parts are left behind.

use crate::{
    errors::{ConveyError, ConveyResult},
    models::{
        address::ObjectKey,
        object::{ObjectHead, PutReceipt, Visibility, unquote_etag},
    },
    services::store::{ObjectStore, PutRequest},
};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    Client,
    primitives::{ByteStream, DateTime as AwsDateTime},
    types::{CompletedMultipartUpload, CompletedPart, ObjectCannedAcl},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt, stream};
use std::path::Path;
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::{debug, info, warn};

/// Connection settings for an S3-compatible endpoint.
#[derive(Debug, Clone, Default)]
pub struct S3Settings {
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, RustFS, ...).
    pub endpoint_url: Option<String>,
    /// Static credentials; the SDK default chain is used when absent.
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub force_path_style: bool,
}

#[derive(Clone, Debug)]
pub struct S3Store {
    client: Client,
}

impl S3Store {
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    pub async fn connect(settings: S3Settings) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(settings.region.clone()));

        if let (Some(key_id), Some(secret)) = (&settings.access_key_id, &settings.secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                key_id.clone(),
                secret.clone(),
                None,
                None,
                "conveyor",
            ));
        }
        if let Some(endpoint) = &settings.endpoint_url {
            loader = loader.endpoint_url(endpoint.clone());
        }

        let sdk_config = loader.load().await;
        let client = Client::from_conf(
            aws_sdk_s3::config::Builder::from(&sdk_config)
                .force_path_style(settings.force_path_style)
                .build(),
        );
        info!(
            region = %settings.region,
            endpoint = settings.endpoint_url.as_deref().unwrap_or("aws"),
            "S3 transport initialized"
        );
        Self { client }
    }

    async fn put_single(&self, request: PutRequest) -> ConveyResult<PutReceipt> {
        let digest = md5::compute(&request.body);
        let size_bytes = request.body.len() as u64;

        let output = self
            .client
            .put_object()
            .bucket(&request.bucket)
            .key(request.key.as_str())
            .acl(canned_acl(request.visibility))
            .set_content_type(request.content_type.clone())
            .set_cache_control(request.cache_control.clone())
            .set_expires(request.expires.map(aws_datetime))
            .content_md5(BASE64.encode(digest.0))
            .body(ByteStream::from(request.body))
            .send()
            .await
            .map_err(ConveyError::transport)?;

        Ok(PutReceipt {
            etag: output.e_tag().map(unquote_etag),
            key: request.key,
            size_bytes,
            parts: 1,
            attempts: 1,
        })
    }

    async fn put_multipart(&self, request: PutRequest) -> ConveyResult<PutReceipt> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&request.bucket)
            .key(request.key.as_str())
            .acl(canned_acl(request.visibility))
            .set_content_type(request.content_type.clone())
            .set_cache_control(request.cache_control.clone())
            .set_expires(request.expires.map(aws_datetime))
            .send()
            .await
            .map_err(ConveyError::transport)?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| ConveyError::invalid("multipart upload started without an id"))?
            .to_string();

        debug!(
            bucket = %request.bucket,
            key = %request.key,
            parts = request.part_count(),
            "multipart upload started"
        );

        match self.upload_parts(&request, &upload_id).await {
            Ok(etag) => Ok(PutReceipt {
                etag,
                size_bytes: request.body.len() as u64,
                parts: request.part_count(),
                key: request.key,
                attempts: 1,
            }),
            Err(err) => {
                warn!(bucket = %request.bucket, key = %request.key, error = %err, "aborting multipart upload");
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&request.bucket)
                    .key(request.key.as_str())
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(key = %request.key, error = %abort_err, "multipart abort failed");
                }
                Err(err)
            }
        }
    }

    /// Send every part, then complete the upload. Returns the final etag.
    async fn upload_parts(&self, request: &PutRequest, upload_id: &str) -> ConveyResult<Option<String>> {
        let part_size = request.part_size.max(1);
        let chunks: Vec<(i32, Bytes)> = (0..request.body.len())
            .step_by(part_size)
            .enumerate()
            .map(|(index, start)| {
                let end = (start + part_size).min(request.body.len());
                (index as i32 + 1, request.body.slice(start..end))
            })
            .collect();

        let mut parts: Vec<CompletedPart> = stream::iter(chunks)
            .map(|(part_number, chunk)| async move {
                let output = self
                    .client
                    .upload_part()
                    .bucket(&request.bucket)
                    .key(request.key.as_str())
                    .upload_id(upload_id)
                    .part_number(part_number)
                    .body(ByteStream::from(chunk))
                    .send()
                    .await
                    .map_err(ConveyError::transport)?;
                Ok::<_, ConveyError>(
                    CompletedPart::builder()
                        .part_number(part_number)
                        .set_e_tag(output.e_tag().map(str::to_string))
                        .build(),
                )
            })
            .buffer_unordered(request.concurrency.max(1))
            .try_collect()
            .await?;
        parts.sort_by_key(|part| part.part_number());

        let completed = self
            .client
            .complete_multipart_upload()
            .bucket(&request.bucket)
            .key(request.key.as_str())
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(ConveyError::transport)?;

        Ok(completed.e_tag().map(unquote_etag))
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn bucket_exists(&self, bucket: &str) -> ConveyResult<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(false),
            Err(err) => Err(ConveyError::transport(err)),
        }
    }

    async fn put(&self, request: PutRequest) -> ConveyResult<PutReceipt> {
        if request.body.len() > request.part_size.max(1) {
            self.put_multipart(request).await
        } else {
            self.put_single(request).await
        }
    }

    async fn get(&self, bucket: &str, key: &ObjectKey) -> ConveyResult<Bytes> {
        let output = match self.client.get_object().bucket(bucket).key(key.as_str()).send().await {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                return Err(ConveyError::not_found(bucket, key.as_str()));
            }
            Err(err) => return Err(ConveyError::transport(err)),
        };
        let body = output.body.collect().await.map_err(ConveyError::transport)?;
        Ok(body.into_bytes())
    }

    async fn get_to_file(&self, bucket: &str, key: &ObjectKey, path: &Path) -> ConveyResult<u64> {
        let output = match self.client.get_object().bucket(bucket).key(key.as_str()).send().await {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                return Err(ConveyError::not_found(bucket, key.as_str()));
            }
            Err(err) => return Err(ConveyError::transport(err)),
        };

        let mut body = output.body;
        let mut file = File::create(path).await?;
        let mut written = 0u64;
        while let Some(chunk) = body.try_next().await.map_err(ConveyError::transport)? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }

    async fn head(&self, bucket: &str, key: &ObjectKey) -> ConveyResult<ObjectHead> {
        let output = match self.client.head_object().bucket(bucket).key(key.as_str()).send().await {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => {
                return Err(ConveyError::not_found(bucket, key.as_str()));
            }
            Err(err) => return Err(ConveyError::transport(err)),
        };

        Ok(ObjectHead {
            key: key.clone(),
            size_bytes: output.content_length().unwrap_or(0).max(0) as u64,
            content_type: output.content_type().map(str::to_string),
            etag: output.e_tag().map(unquote_etag),
            last_modified: output.last_modified().and_then(chrono_datetime),
            cache_control: output.cache_control().map(str::to_string),
        })
    }

    async fn delete(&self, bucket: &str, key: &ObjectKey) -> ConveyResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key.as_str())
            .send()
            .await
            .map_err(ConveyError::transport)?;
        debug!(bucket, %key, "object deleted");
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> ConveyResult<Vec<ObjectKey>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(ConveyError::transport)?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    keys.push(ObjectKey::from_raw(key)?);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn canned_acl(visibility: Visibility) -> ObjectCannedAcl {
    match visibility {
        Visibility::PublicRead => ObjectCannedAcl::PublicRead,
        Visibility::Private => ObjectCannedAcl::Private,
    }
}

fn aws_datetime(value: DateTime<Utc>) -> AwsDateTime {
    AwsDateTime::from_secs(value.timestamp())
}

fn chrono_datetime(value: &AwsDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(value.secs(), value.subsec_nanos())
}
