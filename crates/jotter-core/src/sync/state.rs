//! Drain state machine
//!
//! At most one drain runs per engine. A drain starts by moving the latch
//! from `Idle` to `Draining` with a compare-and-swap; the returned guard
//! moves it back when dropped, including on early return or panic.
//!
//! The latch only covers one process. Processes sharing a database file
//! (a daemon and one-shot CLI commands) also take a [`DrainLease`] stored in
//! the database itself.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::storage::{Database, StorageResult};

/// Name of the lease row held while draining
const DRAIN_LEASE: &str = "drain";

const IDLE: u8 = 0;
const DRAINING: u8 = 1;

/// Whether a drain is currently running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DrainState {
    Idle,
    Draining,
}

impl DrainState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrainState::Idle => "idle",
            DrainState::Draining => "draining",
        }
    }
}

/// Shared drain latch
#[derive(Debug)]
pub struct DrainLatch {
    state: AtomicU8,
}

impl Default for DrainLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl DrainLatch {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
        }
    }

    pub fn state(&self) -> DrainState {
        match self.state.load(Ordering::Acquire) {
            DRAINING => DrainState::Draining,
            _ => DrainState::Idle,
        }
    }

    /// Enter `Draining`, or `None` if a drain already holds the latch
    pub fn try_begin(&self) -> Option<DrainGuard<'_>> {
        self.state
            .compare_exchange(IDLE, DRAINING, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| DrainGuard { latch: self })
    }
}

/// Holds the latch in `Draining` until dropped
#[derive(Debug)]
pub struct DrainGuard<'a> {
    latch: &'a DrainLatch,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.latch.state.store(IDLE, Ordering::Release);
    }
}

/// Cross-process drain lease
///
/// Expires after `ttl` unless renewed, so a process that dies mid-drain
/// blocks others only briefly. Released when dropped.
pub(crate) struct DrainLease<'a> {
    db: &'a Database,
    owner: String,
    ttl: Duration,
}

impl<'a> DrainLease<'a> {
    /// Take the lease, or `None` if another drain holds it
    pub(crate) fn acquire(db: &'a Database, ttl: Duration) -> StorageResult<Option<Self>> {
        let owner = format!("{}:{}", std::process::id(), Uuid::new_v4());
        if !db.try_claim_lease(DRAIN_LEASE, &owner, ttl)? {
            return Ok(None);
        }
        Ok(Some(Self { db, owner, ttl }))
    }

    /// Push the expiry out by another `ttl`; false if the lease was lost
    pub(crate) fn renew(&self) -> StorageResult<bool> {
        self.db.try_claim_lease(DRAIN_LEASE, &self.owner, self.ttl)
    }
}

impl Drop for DrainLease<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.db.release_lease(DRAIN_LEASE, &self.owner) {
            warn!("Failed to release drain lease: {}", e);
        }
    }
}
