/// Media upload path
///
/// `MediaUploader` reads a local asset and pushes it to the object store
/// under `<user_id>/<unix-millis>.<ext>`, then resolves the public URL that
/// ends up in `posts.image_link`.
use crate::error::{ContentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub mod s3;

pub use s3::S3ObjectStore;

/// Bucket recipe media is stored in unless configured otherwise
pub const DEFAULT_MEDIA_BUCKET: &str = "videos";

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object store rejected upload: {0}")]
    Rejected(String),

    #[error("object store unreachable: {0}")]
    Unavailable(String),
}

/// Object/media store collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` at `bucket/path`, replacing an existing object
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> std::result::Result<(), ObjectStoreError>;

    /// Durable public URL of `bucket/path`
    fn public_url(&self, bucket: &str, path: &str) -> String;
}

/// Lower-cased extension of the asset, `bin` when it has none
pub fn asset_extension(asset: &Path) -> String {
    asset
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| "bin".to_string())
}

/// Object path for an upload made by `user_id` at `at`
pub fn storage_path(user_id: Uuid, at: DateTime<Utc>, extension: &str) -> String {
    format!("{}/{}.{}", user_id, at.timestamp_millis(), extension)
}

pub fn content_type_for(extension: &str) -> String {
    match extension {
        "jpg" | "jpeg" => mime::IMAGE_JPEG.to_string(),
        "png" => mime::IMAGE_PNG.to_string(),
        "gif" => mime::IMAGE_GIF.to_string(),
        "webp" => "image/webp".to_string(),
        "heic" => "image/heic".to_string(),
        "mp4" => "video/mp4".to_string(),
        "mov" => "video/quicktime".to_string(),
        _ => mime::APPLICATION_OCTET_STREAM.to_string(),
    }
}

#[derive(Clone)]
pub struct MediaUploader {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl MediaUploader {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    /// Upload a local asset for `user_id` and return its public URL
    pub async fn upload_image(&self, user_id: Uuid, asset: &Path) -> Result<String> {
        self.upload_image_at(user_id, asset, Utc::now()).await
    }

    /// Same as `upload_image` with an explicit timestamp.
    ///
    /// Calling this twice with the same `at` targets the same object, so a
    /// retry overwrites instead of leaving a second copy.
    pub async fn upload_image_at(
        &self,
        user_id: Uuid,
        asset: &Path,
        at: DateTime<Utc>,
    ) -> Result<String> {
        let bytes = tokio::fs::read(asset).await.map_err(|e| {
            ContentError::Upload(format!("could not read {}: {}", asset.display(), e))
        })?;
        if bytes.is_empty() {
            return Err(ContentError::Upload(format!(
                "{} is empty",
                asset.display()
            )));
        }

        let extension = asset_extension(asset);
        let path = storage_path(user_id, at, &extension);
        let content_type = content_type_for(&extension);
        let size = bytes.len();

        self.store
            .upload(&self.bucket, &path, bytes, &content_type)
            .await?;

        let url = self.store.public_url(&self.bucket, &path);
        tracing::info!(%user_id, bucket = %self.bucket, %path, size, "media uploaded");
        Ok(url)
    }
}
