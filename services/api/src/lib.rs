//! GifGroup API
//!
//! HTTP service for named groups of gif images. Group and gif records live
//! in Redis as JSON under deterministic keys; image bytes are committed to S3
//! with public-read visibility before the record referencing them is written.
//!
//! ## Architecture
//!
//! ```text
//!  HTTP (axum)              Redis                          S3 Bucket
//! ┌──────────────┐        ┌────────────────────────┐     ┌──────────────────┐
//! │ /groups      │        │ id:groups, id:gifs     │     │ groups/{id}/     │
//! │ /groups/:id/ │        │ group:{id}             │     │   {file}         │
//! │   gifs       │        │ gif:{id}               │     │   gifs/{file}    │
//! └──────────────┘        │ gifsForGroup:{id}      │     │ default/         │
//!        │                └────────────────────────┘     └──────────────────┘
//!        ▼                    ▲           ▲                       ▲
//! ┌──────────────┐   ┌──────────────┐ ┌──────────────┐   ┌──────────────┐
//! │ GifGroup     │──▶│ Sequence     │ │ Record       │   │ Asset        │
//! │ Service      │   │ Manager      │ │ Store        │   │ Uploader     │
//! └──────────────┘   └──────────────┘ └──────────────┘   └──────────────┘
//!        │                                  ▲                    ▲
//!        └──────────────────────────────────┴────────────────────┘
//! ```
//!
//! Creating a record reserves an id with an atomic `INCR`, uploads the image,
//! then writes the record (and, for gifs, the group index in the same
//! transaction). A failure at any step leaves at most a skipped id.

pub mod api;
pub mod asset_uploader;
pub mod config;
pub mod error;
pub mod kv_store;
pub mod models;
pub mod object_store;
pub mod record_store;
pub mod redis_store;
pub mod s3_store;
pub mod sequence;
pub mod service;

pub use api::{create_router, start_api_server, AppState, ResponseEnvelope};
pub use asset_uploader::{AssetUploader, ImageUpload};
pub use config::Config;
pub use error::{GifGroupError, Result};
pub use kv_store::{KvStore, MemoryKvStore, StoreError};
pub use models::{EntityKind, Gif, Group};
pub use object_store::{MemoryObjectStore, ObjectStore};
pub use record_store::RecordStore;
pub use redis_store::RedisKvStore;
pub use s3_store::S3ObjectStore;
pub use sequence::SequenceManager;
pub use service::GifGroupService;
