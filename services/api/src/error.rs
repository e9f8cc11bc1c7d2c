//! Error taxonomy shared by the sequence, record and asset layers.

use std::future::Future;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors surfaced by the core to the request layer
#[derive(Error, Debug)]
pub enum GifGroupError {
    #[error("Backing store unavailable: {0}")]
    StoreConnection(String),

    #[error("Failed to enumerate records: {0}")]
    StoreScan(String),

    #[error("Failed to write record: {0}")]
    StoreWrite(String),

    #[error("Failed to decode record {key}: {message}")]
    Decode { key: String, message: String },

    #[error("Invalid or missing image")]
    MissingImage,

    #[error("Failed to upload image: {0}")]
    Upload(String),

    #[error("Invalid group id: {0}")]
    InvalidId(String),

    #[error("Invalid form: {0}")]
    InvalidForm(String),

    #[error("Operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, GifGroupError>;

impl GifGroupError {
    /// Stable numeric code rendered in the response envelope
    pub fn error_code(&self) -> u16 {
        match self {
            GifGroupError::StoreWrite(_) => 1,
            GifGroupError::Upload(_) => 2,
            GifGroupError::StoreScan(_) | GifGroupError::Decode { .. } => 3,
            GifGroupError::MissingImage
            | GifGroupError::InvalidId(_)
            | GifGroupError::InvalidForm(_) => 4,
            GifGroupError::StoreConnection(_) => 5,
            GifGroupError::Cancelled => 6,
        }
    }

    /// Human readable text rendered in the response envelope.
    ///
    /// Store internals stay in the logs; clients get a fixed message per kind.
    pub fn error_text(&self) -> String {
        match self {
            GifGroupError::StoreWrite(_) => "Error saving record".to_string(),
            GifGroupError::Upload(_) => "Error uploading image to bucket".to_string(),
            GifGroupError::StoreScan(_) | GifGroupError::Decode { .. } => {
                "Server error finding records".to_string()
            }
            GifGroupError::MissingImage => "Invalid or missing image".to_string(),
            GifGroupError::InvalidId(_) => "Invalid group id".to_string(),
            GifGroupError::InvalidForm(_) => "Invalid form".to_string(),
            GifGroupError::StoreConnection(_) => "Backing store unavailable".to_string(),
            GifGroupError::Cancelled => "Request cancelled".to_string(),
        }
    }

    /// Whether the failure was caused by the request rather than the server
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            GifGroupError::MissingImage
                | GifGroupError::InvalidId(_)
                | GifGroupError::InvalidForm(_)
        )
    }
}

/// Run a read-side future unless `token` fires first.
///
/// The future is dropped on cancellation, so only use this for operations
/// with no visible side effects.
pub(crate) async fn cancellable<T, F>(token: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if token.is_cancelled() {
        return Err(GifGroupError::Cancelled);
    }

    tokio::select! {
        biased;
        _ = token.cancelled() => Err(GifGroupError::Cancelled),
        res = fut => res,
    }
}

/// Refuse to start a write once cancellation has been requested.
///
/// Writes that already started are run to completion so readers never see
/// half of a multi-key update.
pub(crate) fn ensure_active(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        Err(GifGroupError::Cancelled)
    } else {
        Ok(())
    }
}
