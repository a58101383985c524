//! MinIO/S3 blob store for submitted source code

use anyhow::Context;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use super::{BlobObject, BlobStore};
use crate::config::StorageConfig;
use crate::error::StoreError;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// S3/MinIO storage client
#[derive(Clone)]
pub struct StorageClient {
    client: Client,
    bucket: String,
}

impl StorageClient {
    /// Client for a MinIO-style endpoint with static credentials
    pub fn new(config: &StorageConfig) -> Self {
        let endpoint_url = config.endpoint_url();
        info!("Using MinIO at {} (bucket {})", endpoint_url, config.bucket);

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(endpoint_url)
            .credentials_provider(Credentials::new(
                &config.access_key,
                &config.secret_key,
                None,
                None,
                "minio",
            ))
            .force_path_style(true)
            .build();

        Self::with_client(Client::from_conf(s3_config), &config.bucket)
    }

    pub fn with_client(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl BlobStore for StorageClient {
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError> {
        debug!("Uploading {} ({} bytes)", key, bytes.len());

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .with_context(|| format!("Failed to upload {}", key))?;

        Ok(())
    }

    async fn download(&self, key: &str) -> Result<BlobObject, StoreError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let err = e.into_service_error();
                if err.is_no_such_key() {
                    StoreError::NotFound(format!("object {}", key))
                } else {
                    StoreError::Backend(
                        anyhow::Error::new(err).context(format!("Failed to download {}", key)),
                    )
                }
            })?;

        let content_type = response
            .content_type()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        let data = response
            .body
            .collect()
            .await
            .with_context(|| format!("Failed to read body of {}", key))?;

        Ok(BlobObject {
            bytes: data.into_bytes().to_vec(),
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_targets_configured_bucket() {
        let config = StorageConfig {
            bucket: "submissions-test".into(),
            ..StorageConfig::default()
        };
        let client = StorageClient::new(&config);
        assert_eq!(client.bucket(), "submissions-test");
    }
}
