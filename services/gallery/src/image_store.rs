use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Errors raised by object storage
#[derive(Debug, Error)]
pub enum ImageStoreError {
    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Presigning failed: {0}")]
    Presign(String),
}

/// Object storage for image bytes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Store image bytes under a storage key
    async fn put_image(
        &self,
        storage_key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ImageStoreError>;

    /// Time-limited URL a browser can fetch the image from
    async fn image_url(&self, storage_key: &str) -> Result<String, ImageStoreError>;
}

/// S3-backed image store
pub struct S3ImageStore {
    client: S3Client,
    bucket: String,
    config: S3Config,
}

impl S3ImageStore {
    /// Create a new S3 image store
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        Self::with_client(S3Client::from_conf(s3_config_builder.build()), config)
    }

    /// Wrap an already configured client
    pub fn with_client(client: S3Client, config: &S3Config) -> Self {
        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 image store initialized"
        );

        Self {
            client,
            bucket: config.bucket.clone(),
            config: config.clone(),
        }
    }

    /// Object key for a storage key: `{prefix}/{storage_key}`
    fn object_key(&self, storage_key: &str) -> String {
        object_key(&self.config.key_prefix, storage_key)
    }

    /// Simple single-part upload for small images
    async fn simple_upload(
        &self,
        object_key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ImageStoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(object_key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| ImageStoreError::Upload(e.to_string()))?;

        Ok(())
    }

    /// Multipart upload for large images; aborted on any part or completion failure
    async fn multipart_upload(
        &self,
        object_key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ImageStoreError> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(object_key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| ImageStoreError::Upload(e.to_string()))?;

        let upload_id = create_response
            .upload_id()
            .ok_or_else(|| ImageStoreError::Upload("No upload ID in response".to_string()))?;

        if let Err(e) = self.upload_parts(object_key, upload_id, &bytes).await {
            self.abort_multipart_upload(object_key, upload_id).await;
            return Err(e);
        }

        Ok(())
    }

    async fn upload_parts(
        &self,
        object_key: &str,
        upload_id: &str,
        bytes: &[u8],
    ) -> Result<(), ImageStoreError> {
        let mut completed_parts = Vec::new();

        for (index, chunk) in bytes.chunks(self.config.part_size_bytes).enumerate() {
            let part_number = index as i32 + 1;

            let upload_part_response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(object_key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk.to_vec()))
                .send()
                .await
                .map_err(|e| ImageStoreError::Upload(e.to_string()))?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(upload_part_response.e_tag().unwrap_or_default())
                    .build(),
            );
        }

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(object_key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| ImageStoreError::Upload(e.to_string()))?;

        Ok(())
    }

    async fn abort_multipart_upload(&self, object_key: &str, upload_id: &str) {
        let result = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(object_key)
            .upload_id(upload_id)
            .send()
            .await;

        match result {
            Ok(_) => debug!(object_key = %object_key, upload_id = %upload_id, "Multipart upload aborted"),
            Err(e) => warn!(
                error = %e,
                object_key = %object_key,
                upload_id = %upload_id,
                "Failed to abort multipart upload"
            ),
        }
    }
}

#[async_trait]
impl ImageStore for S3ImageStore {
    #[instrument(skip(self, bytes), fields(size_bytes = bytes.len()))]
    async fn put_image(
        &self,
        storage_key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ImageStoreError> {
        let object_key = self.object_key(storage_key);
        let size_bytes = bytes.len();

        debug!(object_key = %object_key, "Uploading image to S3");

        if size_bytes > self.config.multipart_threshold_bytes {
            self.multipart_upload(&object_key, bytes, content_type).await?;
        } else {
            self.simple_upload(&object_key, bytes, content_type).await?;
        }

        info!(object_key = %object_key, size_bytes, "Image uploaded");

        Ok(())
    }

    async fn image_url(&self, storage_key: &str) -> Result<String, ImageStoreError> {
        let presigning_config = PresigningConfig::expires_in(self.config.presigned_url_expiry())
            .map_err(|e| ImageStoreError::Presign(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.object_key(storage_key))
            .presigned(presigning_config)
            .await
            .map_err(|e| ImageStoreError::Presign(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }
}

fn object_key(prefix: &str, storage_key: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        storage_key.to_string()
    } else {
        format!("{prefix}/{storage_key}")
    }
}
