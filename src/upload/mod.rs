pub mod s3;

pub use s3::*;

use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;

use crate::error::Result;
use crate::job::UploadTarget;

/// Where an uploaded artifact can be found
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadReceipt {
    pub uri: String,
    pub object_key: String,
    /// Absent when presigning failed; the upload itself still succeeded
    pub signed_url: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UploadSink: Send + Sync {
    /// Store `artifact` under `target` as `object_name`
    async fn upload(&self, artifact: &Path, object_name: &str, target: &UploadTarget) -> Result<UploadReceipt>;
}
