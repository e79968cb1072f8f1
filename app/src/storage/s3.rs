// ==============================================================================
// storage/s3.rs - S3-Compatible Object Storage
// ==============================================================================
// Description: ObjectStorage backed by any S3-compatible service (MinIO,
//              hosted storage buckets, AWS)
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use super::{check_key, ObjectStorage, StorageError};
use crate::config::S3Config;
use crate::models::ObjectMetadata;
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    Client,
};
use bytes::Bytes;
use std::collections::HashMap;
use tracing::{debug, info, instrument};

#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(config: &S3Config, bucket: &str) -> Self {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "contact-import",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        info!("S3 storage initialized for bucket: {}", bucket);

        Self {
            client: Client::from_conf(builder.build()),
            bucket: bucket.to_string(),
        }
    }
}

fn backend_error<E>(context: &str, err: E) -> StorageError
where
    E: std::error::Error,
{
    StorageError::Backend(format!("{}: {}", context, DisplayErrorContext(err)))
}

#[async_trait]
impl ObjectStorage for S3Storage {
    #[instrument(skip(self, bytes, metadata), fields(size = bytes.len()))]
    async fn upload(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> Result<(), StorageError> {
        check_key(key)?;
        debug!("Uploading to s3://{}/{}", self.bucket, key);

        let object_metadata: HashMap<String, String> = metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .set_metadata(Some(object_metadata))
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| backend_error("Failed to upload to S3", e))?;

        info!("Uploaded s3://{}/{}", self.bucket, key);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn download(&self, key: &str) -> Result<Bytes, StorageError> {
        check_key(key)?;

        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                if err.as_service_error().is_some_and(|e| e.is_no_such_key()) {
                    return Err(StorageError::NotFound(key.to_string()));
                }
                return Err(backend_error("Failed to download from S3", err));
            }
        };

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| backend_error("Failed to read S3 response body", e))?
            .into_bytes();

        debug!("Downloaded {} bytes from s3://{}/{}", data.len(), self.bucket, key);
        Ok(data)
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        check_key(key)?;

        // S3 treats deleting a missing key as success
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| backend_error("Failed to delete from S3", e))?;

        info!("Deleted s3://{}/{}", self.bucket, key);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn metadata(&self, key: &str) -> Result<ObjectMetadata, StorageError> {
        check_key(key)?;

        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(head) => Ok(head
                .metadata()
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default()),
            Err(err) => {
                if err.as_service_error().is_some_and(|e| e.is_not_found()) {
                    Err(StorageError::NotFound(key.to_string()))
                } else {
                    Err(backend_error("Failed to read S3 object metadata", err))
                }
            }
        }
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| backend_error("S3 bucket unreachable", e))?;
        Ok(())
    }
}
