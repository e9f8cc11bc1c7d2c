//! Image uploads for groups and gifs, plus the default group image.

use crate::error::{ensure_active, GifGroupError, Result};
use crate::object_store::ObjectStore;
use bytes::Bytes;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// An image file received from a client
#[derive(Debug, Clone)]
pub struct ImageUpload {
    /// Client supplied file name
    pub filename: String,
    /// Declared content type, if any
    pub content_type: Option<String>,
    /// Raw image bytes
    pub bytes: Bytes,
}

/// Commits group and gif images to the object store
pub struct AssetUploader {
    store: Arc<dyn ObjectStore>,
    default_asset_path: String,
}

impl AssetUploader {
    pub fn new(store: Arc<dyn ObjectStore>, default_asset_path: impl Into<String>) -> Self {
        Self {
            store,
            default_asset_path: default_asset_path.into(),
        }
    }

    /// URL of the image shown for groups created without one
    pub fn default_group_image_url(&self) -> String {
        self.store.public_url(&self.default_asset_path)
    }

    /// Upload a group image to `groups/<group_id>/<filename>`.
    ///
    /// Without an image the default asset URL is returned and nothing is
    /// uploaded.
    #[instrument(skip(self, image, token))]
    pub async fn upload_group_image(
        &self,
        image: Option<&ImageUpload>,
        group_id: u64,
        token: &CancellationToken,
    ) -> Result<String> {
        let Some(image) = image else {
            debug!("No group image supplied, using default asset");
            return Ok(self.default_group_image_url());
        };

        let path = group_image_path(group_id, &image.filename);
        self.upload(image, &path, token).await
    }

    /// Upload a gif to `groups/<group_id>/gifs/<filename>`
    #[instrument(skip(self, image, token))]
    pub async fn upload_gif_image(
        &self,
        image: Option<&ImageUpload>,
        group_id: u64,
        token: &CancellationToken,
    ) -> Result<String> {
        let image = image.ok_or(GifGroupError::MissingImage)?;

        let path = gif_image_path(group_id, &image.filename);
        self.upload(image, &path, token).await
    }

    async fn upload(
        &self,
        image: &ImageUpload,
        path: &str,
        token: &CancellationToken,
    ) -> Result<String> {
        ensure_active(token)?;

        let content_type = image
            .content_type
            .clone()
            .filter(|ct| !ct.is_empty())
            .unwrap_or_else(|| content_type_for(&image.filename));

        self.store
            .put_object(path, image.bytes.clone(), &content_type)
            .await
            .map_err(|e| GifGroupError::Upload(e.to_string()))?;

        metrics::counter!("gifgroup.assets.uploaded").increment(1);
        info!(
            path = %path,
            size_bytes = image.bytes.len(),
            "Image uploaded"
        );

        Ok(self.store.public_url(path))
    }
}

/// Object path for a group's representative image
pub fn group_image_path(group_id: u64, filename: &str) -> String {
    format!("groups/{}/{}", group_id, sanitize_filename(filename))
}

/// Object path for a gif inside a group
pub fn gif_image_path(group_id: u64, filename: &str) -> String {
    format!("groups/{}/gifs/{}", group_id, sanitize_filename(filename))
}

/// Reduce a client file name to a single safe path component
fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let cleaned: String = base
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();

    if cleaned.chars().all(|c| c == '.') {
        "image".to_string()
    } else {
        cleaned
    }
}

/// Get content type from a file extension
fn content_type_for(filename: &str) -> String {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "gif" => "image/gif".to_string(),
        "jpeg" | "jpg" => "image/jpeg".to_string(),
        "png" => "image/png".to_string(),
        "webp" => "image/webp".to_string(),
        _ => "application/octet-stream".to_string(),
    }
}
