//! Durable id counters for groups and gifs.
//!
//! Each counter's persisted value is the id the next entity of that kind
//! receives. Ids are handed out by the store's atomic increment, so
//! concurrent requests never need an in-process lock: reserving an id and
//! advancing the counter are the same operation.

use crate::error::{cancellable, GifGroupError, Result};
use crate::kv_store::{KvStore, StoreError};
use crate::models::EntityKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Value of a freshly initialized counter
pub const INITIAL_ID: u64 = 1;

pub struct SequenceManager {
    store: Arc<dyn KvStore>,
    next_group: AtomicU64,
    next_gif: AtomicU64,
}

impl SequenceManager {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            next_group: AtomicU64::new(INITIAL_ID),
            next_gif: AtomicU64::new(INITIAL_ID),
        }
    }

    fn cached(&self, kind: EntityKind) -> &AtomicU64 {
        match kind {
            EntityKind::Group => &self.next_group,
            EntityKind::Gif => &self.next_gif,
        }
    }

    /// Read the persisted counter, initializing it to 1 if absent.
    ///
    /// Safe to call on every start and from several processes at once.
    #[instrument(skip(self, kind), fields(kind = %kind))]
    pub async fn recover(&self, kind: EntityKind) -> Result<u64> {
        let key = kind.counter_key();

        let value = match self.store.get(key).await.map_err(read_error)? {
            Some(raw) => parse_counter(key, &raw)?,
            None => {
                let created = self
                    .store
                    .set_nx(key, &INITIAL_ID.to_string())
                    .await
                    .map_err(write_error)?;
                if created {
                    info!(key = key, "Initialized id counter");
                    INITIAL_ID
                } else {
                    // Another process initialized it between our GET and SETNX
                    let raw = self.store.get(key).await.map_err(read_error)?;
                    match raw {
                        Some(raw) => parse_counter(key, &raw)?,
                        None => INITIAL_ID,
                    }
                }
            }
        };

        self.cached(kind).fetch_max(value, Ordering::AcqRel);
        info!(key = key, next_id = value, "Recovered id counter");

        Ok(value)
    }

    /// Recover every counter
    pub async fn recover_all(&self) -> Result<()> {
        for kind in EntityKind::ALL {
            self.recover(kind).await?;
        }
        Ok(())
    }

    /// Reserve the next id for `kind`.
    ///
    /// The counter is advanced before the record is written. If the write
    /// later fails the id is skipped, never reissued.
    #[instrument(skip(self, kind, token), fields(kind = %kind))]
    pub async fn next_id(&self, kind: EntityKind, token: &CancellationToken) -> Result<u64> {
        let key = kind.counter_key();

        loop {
            let new_value = cancellable(token, async {
                self.store.incr(key).await.map_err(write_error)
            })
            .await?;

            let reserved = u64::try_from(new_value - 1).map_err(|_| {
                GifGroupError::StoreWrite(format!("counter {} is negative", key))
            })?;

            if reserved < INITIAL_ID {
                // Counter vanished after recovery; INCR recreated it at 1.
                warn!(key = key, "Id counter was missing, re-reserving");
                continue;
            }

            self.cached(kind).fetch_max(reserved + 1, Ordering::AcqRel);
            return Ok(reserved);
        }
    }

    /// Next id this process expects to hand out, as last observed
    pub fn peek(&self, kind: EntityKind) -> u64 {
        self.cached(kind).load(Ordering::Acquire)
    }
}

fn parse_counter(key: &str, raw: &str) -> Result<u64> {
    raw.trim().parse::<u64>().map_err(|e| GifGroupError::Decode {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn read_error(err: StoreError) -> GifGroupError {
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
