//! Storage layer
//!
//! Persists the local cache in SQLite.
//!
//! ## Layout
//!
//! - **notes**: Cached copies of the user's notes
//! - **sync_queue**: Mutations waiting to be replayed remotely
//! - **settings**: Scalar values such as the last successful sync time
//!
//! Every change to a note and the queue entry describing it are written
//! in the same transaction.

pub mod database;
pub mod error;
pub mod schema;

pub use database::Database;
pub use error::{StorageError, StorageResult};
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};
