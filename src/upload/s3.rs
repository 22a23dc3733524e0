use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::path::Path;
use tracing::{info, warn};

use crate::config::StorageConfig;
use crate::error::{Result, StitchError};
use crate::job::UploadTarget;
use super::{UploadReceipt, UploadSink};

/// S3-compatible object storage sink.
///
/// Credentials come from the standard AWS provider chain.
pub struct S3UploadSink {
    client: Client,
    content_type: String,
}

impl S3UploadSink {
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared).force_path_style(config.force_path_style);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        info!(
            "Object storage client ready (region {}, endpoint {})",
            config.region,
            config.endpoint_url.as_deref().unwrap_or("default")
        );

        Ok(Self {
            client: Client::from_conf(builder.build()),
            content_type: config.content_type.clone(),
        })
    }

    async fn presign(&self, bucket: &str, key: &str, object_name: &str, target: &UploadTarget) -> Result<String> {
        let presign_config =
            PresigningConfig::expires_in(target.signed_url_ttl).map_err(|e| StitchError::Upload(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .response_content_disposition(format!("attachment; filename=\"{}\"", object_name))
            .presigned(presign_config)
            .await
            .map_err(|e| StitchError::Upload(DisplayErrorContext(e).to_string()))?;

        Ok(presigned.uri().to_string())
    }
}

#[async_trait]
impl UploadSink for S3UploadSink {
    async fn upload(&self, artifact: &Path, object_name: &str, target: &UploadTarget) -> Result<UploadReceipt> {
        let key = target.object_key(object_name);
        info!("Uploading {} to s3://{}/{}", artifact.display(), target.bucket, key);

        let body = ByteStream::from_path(artifact)
            .await
            .map_err(|e| StitchError::Upload(format!("cannot read {}: {}", artifact.display(), e)))?;

        self.client
            .put_object()
            .bucket(&target.bucket)
            .key(&key)
            .body(body)
            .content_type(&self.content_type)
            .send()
            .await
            .map_err(|e| StitchError::Upload(DisplayErrorContext(e).to_string()))?;

        let signed_url = match self.presign(&target.bucket, &key, object_name, target).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("Uploaded s3://{}/{} but could not sign a download URL: {}", target.bucket, key, e);
                None
            }
        };

        Ok(UploadReceipt {
            uri: format!("s3://{}/{}", target.bucket, key),
            object_key: key,
            signed_url,
        })
    }
}
