use crate::config::S3Config;
use crate::error::{CollectorError, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, ProvideCredentials};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client as S3Client;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Remote object storage for uploaded images
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    fn backend_tag(&self) -> &'static str;

    /// Write an object under `key`
    async fn put_object(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    /// Make an existing object readable without credentials
    async fn make_public(&self, key: &str) -> Result<()>;

    /// URL the object can be fetched from once public
    fn public_url(&self, key: &str) -> String;
}

/// Generate a fresh object key: `<prefix>/<uuid>.jpg`
pub fn generate_object_key(prefix: &str) -> String {
    format!("{}/{}.jpg", prefix.trim_matches('/'), Uuid::new_v4())
}

/// S3-backed blob store
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
    public_base_url: Option<String>,
}

impl S3BlobStore {
    /// Create a new S3 blob store from the default AWS credential chain
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        // Resolve credentials now so a misconfigured deployment fails at startup
        let credentials_provider = aws_config.credentials_provider().ok_or_else(|| {
            CollectorError::Internal("No AWS credentials provider configured".to_string())
        })?;
        credentials_provider
            .provide_credentials()
            .await
            .map_err(|e| {
                CollectorError::Internal(format!(
                    "Failed to resolve AWS credentials: {}",
                    DisplayErrorContext(e)
                ))
            })?;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 blob store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint_url: config.endpoint_url.clone(),
            public_base_url: config.public_base_url.clone(),
        })
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    fn backend_tag(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self, bytes), fields(size_bytes = bytes.len()))]
    async fn put_object(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let size_bytes = bytes.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| CollectorError::Upload(DisplayErrorContext(e).to_string()))?;

        debug!(key = %key, size_bytes = size_bytes, "Object uploaded to S3");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn make_public(&self, key: &str) -> Result<()> {
        self.client
            .put_object_acl()
            .bucket(&self.bucket)
            .key(key)
            .acl(ObjectCannedAcl::PublicRead)
            .send()
            .await
            .map_err(|e| CollectorError::Upload(DisplayErrorContext(e).to_string()))?;

        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        public_object_url(
            &self.bucket,
            &self.region,
            self.endpoint_url.as_deref(),
            self.public_base_url.as_deref(),
            key,
        )
    }
}

fn public_object_url(
    bucket: &str,
    region: &str,
    endpoint_url: Option<&str>,
    public_base_url: Option<&str>,
    key: &str,
) -> String {
    match (public_base_url, endpoint_url) {
        (Some(base), _) => format!("{}/{}", base.trim_end_matches('/'), key),
        (None, Some(endpoint)) => {
            format!("{}/{}/{}", endpoint.trim_end_matches('/'), bucket, key)
        }
        (None, None) => format!("https://{}.s3.{}.amazonaws.com/{}", bucket, region, key),
    }
}
