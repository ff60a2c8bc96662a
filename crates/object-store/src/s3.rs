//! S3 object store implementation (AWS or S3-compatible servers such as MinIO)

use crate::{join_key, ObjectStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;

/// Default region when none is configured
pub const DEFAULT_REGION: &str = "us-east-1";

/// Connection settings for the S3 backend
#[derive(Debug, Clone)]
pub struct S3Settings {
    /// Custom endpoint URL (e.g. `http://minio:9000`); `None` uses AWS
    pub endpoint: Option<String>,
    /// Static access key; when unset the default credential chain is used
    pub access_key: Option<String>,
    /// Static secret key
    pub secret_key: Option<String>,
    /// Region name
    pub region: String,
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            endpoint: None,
            access_key: None,
            secret_key: None,
            region: DEFAULT_REGION.to_string(),
        }
    }
}

/// S3-backed object store rooted at `bucket/prefix`
///
/// Creating an S3 client is relatively expensive, so one store is built at
/// startup and shared by the watermark store and the batch materializer.
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl S3ObjectStore {
    /// Create a new S3 store from the given settings
    pub async fn connect(bucket: &str, prefix: &str, settings: &S3Settings) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()));

        if let Some(endpoint) = &settings.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        match (&settings.access_key, &settings.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                loader = loader.credentials_provider(Credentials::new(
                    access_key,
                    secret_key,
                    None,
                    None,
                    "cdc-extract-static",
                ));
            }
            (None, None) => {}
            _ => anyhow::bail!("S3 access key and secret key must be provided together"),
        }

        let sdk_config = loader.load().await;

        // MinIO only serves path-style requests
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(settings.endpoint.is_some())
            .build();

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        })
    }

    /// Create the bucket if it does not exist yet
    pub async fn ensure_bucket(&self) -> Result<()> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                tracing::debug!("Bucket {} exists", self.bucket);
                Ok(())
            }
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => {
                self.client
                    .create_bucket()
                    .bucket(&self.bucket)
                    .send()
                    .await
                    .with_context(|| format!("Failed to create S3 bucket: {}", self.bucket))?;
                tracing::info!("Created bucket {}", self.bucket);
                Ok(())
            }
            Err(e) => Err(anyhow::Error::new(e))
                .with_context(|| format!("Failed to check S3 bucket: {}", self.bucket)),
        }
    }

    fn key(&self, key: &str) -> String {
        join_key(&self.prefix, key)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        let full_key = self.key(key);
        let len = body.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .with_context(|| {
                format!("Failed to put object to S3: s3://{}/{full_key}", self.bucket)
            })?;

        tracing::debug!("Put {len} bytes to s3://{}/{}", self.bucket, full_key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let full_key = self.key(key);

        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                return Ok(None);
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)).with_context(|| {
                    format!("Failed to fetch object from S3: s3://{}/{full_key}", self.bucket)
                });
            }
        };

        let bytes = response
            .body
            .collect()
            .await
            .with_context(|| {
                format!("Failed to read S3 object body: s3://{}/{full_key}", self.bucket)
            })?
            .into_bytes();

        Ok(Some(bytes.to_vec()))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let full_key = self.key(key);

        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(anyhow::Error::new(e)).with_context(|| {
                format!("Failed to check object in S3: s3://{}/{full_key}", self.bucket)
            }),
        }
    }

    fn display_name(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, self.key(key))
    }
}
