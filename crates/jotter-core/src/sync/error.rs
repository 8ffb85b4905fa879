//! Sync error types

use thiserror::Error;

use crate::remote::ApiError;
use crate::storage::StorageError;

/// Errors that abort a drain or prevent one from starting
///
/// A single queued item failing against the API is not an error at this
/// level; it is counted in the drain's `SyncResult`.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The local store could not be read or written
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// No API URL or token configured
    #[error("Sync is not configured. Set api_url and api_token first.")]
    NotConfigured,

    /// The API client could not be built
    #[error("API client error: {0}")]
    Api(#[from] ApiError),
}
