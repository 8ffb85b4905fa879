//! Offline-first synchronization
//!
//! Local edits land in the sync queue first. The engine replays them against
//! the remote API; the monitor decides when.
//!
//! ## Flow
//!
//! 1. The notebook writes a note and queues its mutation in one transaction
//! 2. The monitor sees the client come online (or its interval fire)
//! 3. `SyncEngine::drain` replays the queue oldest first
//! 4. Replayed items are removed and their notes marked synced
//!
//! ## Usage
//!
//! ```ignore
//! let engine = SyncEngine::from_config(db, &config);
//! let api = HttpNotesApi::from_config(&config)?;
//! let result = engine.drain(&api).await?;
//! println!("{}", result);
//! ```

mod engine;
mod error;
pub mod monitor;
mod state;

pub use engine::{SyncEngine, LAST_SYNC_KEY};
pub use error::SyncError;
pub use monitor::{
    spawn_monitor, spawn_reachability_poll, Connectivity, MonitorCommand, MonitorConfig,
    MonitorEvent, MonitorHandle,
};
pub use state::{DrainGuard, DrainLatch, DrainState};
