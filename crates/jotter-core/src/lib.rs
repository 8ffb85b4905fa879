//! Jotter Core Library
//!
//! This crate provides the core functionality for Jotter, an offline-first
//! notes client. Notes are edited against a local SQLite cache and every
//! edit is queued for replay against a remote notes API.
//!
//! # Architecture
//!
//! - **Local cache**: Source of truth while offline; all reads are local
//! - **Sync queue**: Ordered, persistent list of pending mutations
//! - **Sync engine**: Replays the queue with bounded retry
//! - **Monitor**: Drains when connectivity returns and on an interval
//!
//! # Quick Start
//!
//! ```text
//! let store = Store::open()?;
//!
//! // Edit offline
//! let note = store.create_note("Ideas", "...")?;
//!
//! // Later, when online
//! let api = HttpNotesApi::from_config(store.config())?;
//! let result = store.sync(&api).await?;
//! ```
//!
//! # Modules
//!
//! - `store`: Notebook interface (main entry point)
//! - `models`: Notes, mutations, queue items, drain results
//! - `storage`: SQLite persistence
//! - `queue`: FIFO view over pending mutations
//! - `sync`: Drain engine and connectivity monitor
//! - `remote`: Remote notes API
//! - `config`: Application configuration

pub mod config;
pub mod models;
pub mod queue;
pub mod remote;
pub mod storage;
pub mod store;
pub mod sync;

pub use config::Config;
pub use models::{CachedNote, EntityType, Mutation, NotePayload, Operation, QueueItem, SyncResult};
pub use queue::SyncQueue;
pub use remote::{ApiError, ReachabilityCheck, HttpNotesApi, NotesApi};
pub use storage::{Database, StorageError};
pub use store::Store;
pub use sync::{SyncEngine, SyncError};
