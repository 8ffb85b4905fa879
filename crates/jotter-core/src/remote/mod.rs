//! Remote notes API
//!
//! The sync engine only talks to the server through [`NotesApi`], so tests
//! can drive it with an in-memory double. [`HttpNotesApi`] is the real
//! implementation.
//!
//! ## Endpoints
//!
//! - `POST {base}/notes` creates a note
//! - `PUT {base}/notes/{id}` replaces a note's title and content
//! - `DELETE {base}/notes/{id}` removes a note
//!
//! Every request carries a bearer token. Error bodies look like
//! `{ "error": "..." }`.

mod error;
mod http;

pub use error::{ApiError, ApiResult};
pub use http::HttpNotesApi;

use async_trait::async_trait;

use crate::models::{NotePayload, RemoteNote};

/// Operations the sync engine replays against the server
#[async_trait]
pub trait NotesApi: Send + Sync {
    /// Create a note under the id it was given locally
    async fn create_note(&self, note_id: &str, payload: &NotePayload) -> ApiResult<RemoteNote>;

    async fn update_note(&self, note_id: &str, payload: &NotePayload) -> ApiResult<RemoteNote>;

    async fn delete_note(&self, note_id: &str) -> ApiResult<()>;
}

/// Answers "can we reach the server right now?"
#[async_trait]
pub trait ReachabilityCheck: Send + Sync {
    async fn is_reachable(&self) -> bool;
}
