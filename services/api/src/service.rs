//! Create and list operations, sequencing ids, uploads and record writes.

use crate::asset_uploader::{AssetUploader, ImageUpload};
use crate::error::Result;
use crate::models::{EntityKind, Gif, Group};
use crate::record_store::RecordStore;
use crate::sequence::SequenceManager;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Entry point used by the HTTP layer
#[derive(Clone)]
pub struct GifGroupService {
    sequences: Arc<SequenceManager>,
    records: Arc<RecordStore>,
    uploader: Arc<AssetUploader>,
}

impl GifGroupService {
    pub fn new(
        sequences: Arc<SequenceManager>,
        records: Arc<RecordStore>,
        uploader: Arc<AssetUploader>,
    ) -> Self {
        Self {
            sequences,
            records,
            uploader,
        }
    }

    pub async fn list_groups(&self, token: &CancellationToken) -> Result<Vec<Group>> {
        self.records.list_groups(token).await
    }

    pub async fn list_group_gifs(
        &self,
        group_id: u64,
        token: &CancellationToken,
    ) -> Result<Vec<Gif>> {
        self.records.list_group_gifs(group_id, token).await
    }

    /// Create a group. The image path embeds the group id, so the id is
    /// reserved before uploading.
    #[instrument(skip(self, image, token))]
    pub async fn create_group(
        &self,
        name: &str,
        image: Option<ImageUpload>,
        token: &CancellationToken,
    ) -> Result<Group> {
        let id = self.sequences.next_id(EntityKind::Group, token).await?;
        let image_url = self
            .uploader
            .upload_group_image(image.as_ref(), id, token)
            .await?;

        let group = Group::new(id, name, image_url);
        self.records.save_group(&group, token).await?;

        metrics::counter!("gifgroup.groups.created").increment(1);
        info!(group_id = group.id, "Group created");

        Ok(group)
    }

    /// Create a gif under `group_id`. The upload comes first so a missing
    /// or failed image does not consume a gif id.
    #[instrument(skip(self, image, token))]
    pub async fn create_gif(
        &self,
        group_id: u64,
        image: Option<ImageUpload>,
        token: &CancellationToken,
    ) -> Result<Gif> {
        let image_url = self
            .uploader
            .upload_gif_image(image.as_ref(), group_id, token)
            .await?;
        let id = self.sequences.next_id(EntityKind::Gif, token).await?;

        let gif = Gif {
            id,
            group_id,
            image_url,
        };
        self.records.save_gif(&gif, token).await?;

        metrics::counter!("gifgroup.gifs.created").increment(1);
        info!(gif_id = gif.id, "Gif created");

        Ok(gif)
    }
}
