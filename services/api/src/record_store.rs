//! Group and gif records persisted as JSON, with the per-group gif index.

use crate::error::{cancellable, ensure_active, GifGroupError, Result};
use crate::kv_store::{KvStore, StoreError};
use crate::models::{keys, Gif, Group};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// JSON records for groups and gifs plus the per-group gif index
pub struct RecordStore {
    store: Arc<dyn KvStore>,
}

impl RecordStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// All groups, in the order the store enumerates them.
    ///
    /// Records that fail to decode are logged and skipped.
    #[instrument(skip(self, token))]
    pub async fn list_groups(&self, token: &CancellationToken) -> Result<Vec<Group>> {
        cancellable(token, async {
            let group_keys = self
                .store
                .scan_prefix(keys::GROUP_PREFIX)
                .await
                .map_err(scan_error)?;

            self.load_records(group_keys).await
        })
        .await
    }

    /// Gifs indexed under `group_id`; empty for unknown groups
    #[instrument(skip(self, token))]
    pub async fn list_group_gifs(
        &self,
        group_id: u64,
        token: &CancellationToken,
    ) -> Result<Vec<Gif>> {
        cancellable(token, async {
            let gif_keys = self
                .store
                .smembers(&keys::group_gifs(group_id))
                .await
                .map_err(scan_error)?;

            self.load_records(gif_keys).await
        })
        .await
    }

    /// Persist a group under `group:<id>`
    #[instrument(skip(self, group, token), fields(group_id = group.id))]
    pub async fn save_group(&self, group: &Group, token: &CancellationToken) -> Result<()> {
        ensure_active(token)?;

        let json = encode(group)?;
        self.store
            .set(&keys::group(group.id), &json)
            .await
            .map_err(write_error)?;

        info!(name = %group.name, "Group saved");
        Ok(())
    }

    /// Persist a gif and add it to its group's index in one transaction
    #[instrument(skip(self, gif, token), fields(gif_id = gif.id, group_id = gif.group_id))]
    pub async fn save_gif(&self, gif: &Gif, token: &CancellationToken) -> Result<()> {
        ensure_active(token)?;

        let json = encode(gif)?;
        let key = keys::gif(gif.id);
        self.store
            .set_and_index(&key, &json, &keys::group_gifs(gif.group_id), &key)
            .await
            .map_err(write_error)?;

        info!("Gif saved");
        Ok(())
    }

    /// Resolve and decode records, skipping missing and corrupt entries
    async fn load_records<T: DeserializeOwned>(&self, record_keys: Vec<String>) -> Result<Vec<T>> {
        let values = self
            .store
            .get_many(&record_keys)
            .await
            .map_err(scan_error)?;

        let mut records = Vec::with_capacity(values.len());
        for (key, value) in record_keys.iter().zip(values) {
            let Some(raw) = value else {
                warn!(key = %key, "Indexed record is missing, skipping");
                metrics::counter!("gifgroup.records.skipped").increment(1);
                continue;
            };

            match decode::<T>(key, &raw) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(error = %e, "Skipping undecodable record");
                    metrics::counter!("gifgroup.records.skipped").increment(1);
                }
            }
        }

        debug!(count = records.len(), "Records loaded");
        Ok(records)
    }
}

fn encode<T: Serialize>(record: &T) -> Result<String> {
    serde_json::to_string(record).map_err(|e| GifGroupError::StoreWrite(e.to_string()))
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| GifGroupError::Decode {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn scan_error(err: StoreError) -> GifGroupError {
    match err {
        StoreError::Connection(msg) => GifGroupError::StoreConnection(msg),
        StoreError::Operation(msg) => GifGroupError::StoreScan(msg),
    }
}

fn write_error(err: StoreError) -> GifGroupError {
    match err {
        StoreError::Connection(msg) => GifGroupError::StoreConnection(msg),
        StoreError::Operation(msg) => GifGroupError::StoreWrite(msg),
    }
}
