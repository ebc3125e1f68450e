use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::primitives::ByteStream;
use std::path::Path;
use std::sync::Arc;

use super::object_store::{ObjectInfo, ObjectStore};
use crate::config::ObjectStoreSettings;

/// ObjectStore implementation for S3 and S3-compatible servers (MinIO)
#[derive(Clone)]
pub struct S3ObjectStore {
    s3_client: Arc<S3Client>,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(s3_client: Arc<S3Client>, bucket: String) -> Self {
        Self { s3_client, bucket }
    }

    /// Build a client for the configured endpoint with static credentials.
    /// Path-style addressing keeps MinIO happy.
    pub async fn from_settings(settings: &ObjectStoreSettings) -> Result<Self> {
        let credentials = Credentials::new(
            settings.access_key.clone(),
            settings.secret_key.clone(),
            None,
            None,
            "secrets-file",
        );

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .credentials_provider(credentials)
            .endpoint_url(&settings.endpoint)
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        Ok(Self::new(
            Arc::new(S3Client::from_conf(s3_config)),
            settings.bucket.clone(),
        ))
    }

    /// Same client, different bucket
    pub fn with_bucket(&self, bucket: impl Into<String>) -> Self {
        Self::new(Arc::clone(&self.s3_client), bucket.into())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn bucket_exists(&self) -> Result<bool> {
        match self
            .s3_client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                if matches!(err.as_service_error(), Some(e) if e.is_not_found()) {
                    Ok(false)
                } else {
                    Err(err).context("Failed to check whether bucket exists")
                }
            }
        }
    }

    async fn create_bucket(&self) -> Result<()> {
        self.s3_client
            .create_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .with_context(|| format!("Failed to create bucket {}", self.bucket))?;
        Ok(())
    }

    async fn list_objects(&self) -> Result<Vec<ObjectInfo>> {
        let mut objects = Vec::new();
        let mut pages = self
            .s3_client
            .list_objects_v2()
            .bucket(&self.bucket)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.context("Failed to list S3 objects")?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    objects.push(ObjectInfo {
                        key: key.to_string(),
                        size: object.size().unwrap_or(0).max(0) as u64,
                    });
                }
            }
        }

        Ok(objects)
    }

    async fn put_object(&self, key: &str, path: &Path) -> Result<()> {
        let body = ByteStream::from_path(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;

        self.s3_client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .context("Failed to upload object to S3")?;

        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .s3_client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context("Failed to read object from S3")?;

        let bytes = response
            .body
            .collect()
            .await
            .context("Failed to collect S3 response body")?
            .into_bytes()
            .to_vec();

        Ok(bytes)
    }
}
