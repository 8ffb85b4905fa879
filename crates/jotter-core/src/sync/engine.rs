//! Queue drain
//!
//! A drain walks the queue oldest first and replays each mutation against
//! the remote API. Successes are dequeued; failures stay queued with one
//! more attempt recorded until they reach `max_attempts`, at which point
//! they are dropped and reported as failed.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::error::SyncError;
use super::state::{DrainLatch, DrainLease, DrainState};
use crate::config::{Config, DEFAULT_MAX_ATTEMPTS};
use crate::models::{Mutation, QueueItem, SyncResult};
use crate::queue::SyncQueue;
use crate::remote::{ApiError, ApiResult, NotesApi};
use crate::storage::{Database, StorageError};

/// Settings key holding the time of the last drain that synced anything
pub const LAST_SYNC_KEY: &str = "last_sync_timestamp";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Slack on top of one request timeout before a drain lease expires
const LEASE_MARGIN: Duration = Duration::from_secs(30);

/// Replays queued mutations against a [`NotesApi`]
///
/// Clones share the same drain latch, so at most one drain runs across all
/// of them. Engines in other processes on the same database are kept out by
/// a lease stored in the database.
#[derive(Clone)]
pub struct SyncEngine {
    db: Arc<Database>,
    queue: SyncQueue,
    latch: Arc<DrainLatch>,
    max_attempts: u32,
    request_timeout: Duration,
}

impl SyncEngine {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            queue: SyncQueue::new(db.clone()),
            db,
            latch: Arc::new(DrainLatch::new()),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Engine using the configured attempt bound and request timeout
    pub fn from_config(db: Arc<Database>, config: &Config) -> Self {
        Self::new(db)
            .with_max_attempts(config.max_attempts)
            .with_request_timeout(config.request_timeout())
    }

    /// Failed replays before an item is dropped (at least 1)
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Upper bound on a single API call
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn state(&self) -> DrainState {
        self.latch.state()
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    /// When a drain last synced at least one item
    pub fn last_sync(&self) -> Result<Option<DateTime<Utc>>, SyncError> {
        let Some(raw) = self.db.get_setting(LAST_SYNC_KEY)? else {
            return Ok(None);
        };

        match DateTime::parse_from_rfc3339(&raw) {
            Ok(ts) => Ok(Some(ts.with_timezone(&Utc))),
            Err(e) => {
                warn!("Ignoring unreadable {} '{}': {}", LAST_SYNC_KEY, raw, e);
                Ok(None)
            }
        }
    }

    /// Replay every queued mutation once
    ///
    /// Returns immediately with an empty result if another drain holds the
    /// latch or the database lease. Item failures are counted, never
    /// returned; only store errors abort the pass.
    pub async fn drain<A>(&self, api: &A) -> Result<SyncResult, SyncError>
    where
        A: NotesApi + ?Sized,
    {
        self.drain_while(api, || true).await
    }

    /// Like [`drain`](Self::drain), but checks `keep_going` before each item
    ///
    /// Once it returns false the pass ends and the items not yet attempted
    /// are counted as deferred, with their attempts untouched.
    pub async fn drain_while<A, F>(&self, api: &A, keep_going: F) -> Result<SyncResult, SyncError>
    where
        A: NotesApi + ?Sized,
        F: Fn() -> bool,
    {
        let Some(_guard) = self.latch.try_begin() else {
            debug!("Drain already in progress, skipping");
            return Ok(SyncResult::empty());
        };

        let Some(lease) = DrainLease::acquire(&self.db, self.lease_ttl())? else {
            debug!("Another process is draining, skipping");
            return Ok(SyncResult::empty());
        };

        let items = self.queue.pending()?;
        if items.is_empty() {
            debug!("Sync queue is empty");
            return Ok(SyncResult::empty());
        }

        let total = items.len();
        info!("Draining {} queued mutation(s)", total);

        let mut result = SyncResult::empty();
        // Notes with an earlier item still queued; later items wait a pass
        let mut held: HashSet<String> = HashSet::new();

        for (done, item) in items.into_iter().enumerate() {
            if !keep_going() {
                info!("Drain stopped early, {} item(s) left for later", total - done);
                result.deferred_count += total - done;
                break;
            }
            if !lease.renew()? {
                warn!("Lost the drain lease, {} item(s) left for later", total - done);
                result.deferred_count += total - done;
                break;
            }

            if held.contains(item.entity_id()) {
                debug!(
                    "Holding {} for note {} behind an earlier failure",
                    item.operation(),
                    item.entity_id()
                );
                result.deferred_count += 1;
                continue;
            }

            if item.attempts >= self.max_attempts {
                warn!(
                    "Dropping {} for note {}: permanently failed after {} attempts",
                    item.operation(),
                    item.entity_id(),
                    item.attempts
                );
                self.queue.drop_item(item.id)?;
                held.insert(item.entity_id().to_string());
                result.failed_count += 1;
                continue;
            }

            match self.dispatch(api, &item).await {
                Ok(()) => {
                    self.on_success(&item)?;
                    result.success_count += 1;
                }
                Err(err) => {
                    held.insert(item.entity_id().to_string());
                    if self.on_failure(&item, &err)? {
                        result.failed_count += 1;
                    } else {
                        result.deferred_count += 1;
                    }
                }
            }
        }

        result.timestamp = Utc::now();
        if result.success_count > 0 {
            self.db
                .set_setting(LAST_SYNC_KEY, &result.timestamp.to_rfc3339())?;
        }

        info!("Drain finished: {}", result);
        Ok(result)
    }

    /// How long the lease survives without renewal: one call plus slack
    fn lease_ttl(&self) -> Duration {
        self.request_timeout + LEASE_MARGIN
    }

    async fn dispatch<A>(&self, api: &A, item: &QueueItem) -> ApiResult<()>
    where
        A: NotesApi + ?Sized,
    {
        let call = async {
            match &item.mutation {
                Mutation::Create { entity_id, payload } => {
                    api.create_note(entity_id, payload).await.map(|_| ())
                }
                Mutation::Update { entity_id, payload } => {
                    api.update_note(entity_id, payload).await.map(|_| ())
                }
                Mutation::Delete { entity_id } => api.delete_note(entity_id).await,
            }
        };

        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout),
        }
    }

    fn on_success(&self, item: &QueueItem) -> Result<(), SyncError> {
        if self.queue.complete(item)? {
            debug!("Synced {} for note {}", item.operation(), item.entity_id());
        } else {
            debug!(
                "Note {} was edited while syncing; newer version stays queued",
                item.entity_id()
            );
        }
        Ok(())
    }

    /// Record a failed replay; true if the item was dropped for good
    fn on_failure(&self, item: &QueueItem, err: &ApiError) -> Result<bool, SyncError> {
        let attempts = match self.queue.record_failure(item.id, &err.to_string()) {
            Ok(n) => n,
            Err(StorageError::QueueItemNotFound(_)) => {
                debug!("Queue item {} vanished during drain", item.id);
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        if attempts >= self.max_attempts {
            warn!(
                "Dropping {} for note {}: permanently failed after {} attempts ({})",
                item.operation(),
                item.entity_id(),
                attempts,
                err
            );
            self.queue.drop_item(item.id)?;
            return Ok(true);
        }

        if err.is_transient() {
            debug!(
                "{} for note {} failed (attempt {}/{}): {}",
                item.operation(),
                item.entity_id(),
                attempts,
                self.max_attempts,
                err
            );
        } else {
            warn!(
                "{} for note {} rejected (attempt {}/{}): {}",
                item.operation(),
                item.entity_id(),
                attempts,
                self.max_attempts,
                err
            );
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CachedNote, NotePayload, RemoteNote};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// In-memory API that records every call
    #[derive(Default)]
    struct RecordingApi {
        calls: Mutex<Vec<String>>,
        fail: AtomicBool,
        delay: Option<Duration>,
    }

    impl RecordingApi {
        fn failing() -> Self {
            Self {
                fail: AtomicBool::new(true),
                ..Self::default()
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        async fn record(&self, call: String) -> ApiResult<()> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.calls.lock().unwrap().push(call);
            if self.fail.load(Ordering::SeqCst) {
                Err(ApiError::Status {
                    status: 500,
                    message: "boom".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl NotesApi for RecordingApi {
        async fn create_note(&self, note_id: &str, payload: &NotePayload) -> ApiResult<RemoteNote> {
            self.record(format!("create {}", note_id)).await?;
            Ok(remote(note_id, payload))
        }

        async fn update_note(&self, note_id: &str, payload: &NotePayload) -> ApiResult<RemoteNote> {
            self.record(format!("update {}", note_id)).await?;
            Ok(remote(note_id, payload))
        }

        async fn delete_note(&self, note_id: &str) -> ApiResult<()> {
            self.record(format!("delete {}", note_id)).await
        }
    }

    fn remote(id: &str, payload: &NotePayload) -> RemoteNote {
        RemoteNote {
            id: id.to_string(),
            title: payload.title.clone(),
            content: payload.content.clone(),
            updated_at: None,
        }
    }

    fn setup() -> (Arc<Database>, SyncEngine) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let engine = SyncEngine::new(db.clone());
        (db, engine)
    }

    /// Cache a note and queue its create, as the notebook does
    fn create_note(engine: &SyncEngine, db: &Database, id: &str) {
        let note = CachedNote::with_id(id, "owner", "A", "B");
        db.put(&note).unwrap();
        engine
            .queue()
            .push(&Mutation::Create {
                entity_id: id.to_string(),
                payload: note.payload(),
            })
            .unwrap();
    }

    fn update(id: &str, title: &str) -> Mutation {
        Mutation::Update {
            entity_id: id.to_string(),
            payload: NotePayload::new(title, ""),
        }
    }

    #[tokio::test]
    async fn test_empty_drain() {
        let (_db, engine) = setup();
        let api = RecordingApi::default();

        let result = engine.drain(&api).await.unwrap();
        assert!(result.is_empty());
        assert!(api.calls().is_empty());
        assert!(engine.last_sync().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_successful_create_marks_synced() {
        let (db, engine) = setup();
        create_note(&engine, &db, "n1");
        let api = RecordingApi::default();

        let result = engine.drain(&api).await.unwrap();

        assert_eq!(result.success_count, 1);
        assert_eq!(result.failed_count, 0);
        assert_eq!(api.calls(), vec!["create n1"]);
        assert!(engine.queue().is_empty().unwrap());
        assert!(db.get("n1").unwrap().unwrap().synced);
        assert!(engine.last_sync().unwrap().is_some());
        assert_eq!(engine.state(), DrainState::Idle);
    }

    #[tokio::test]
    async fn test_failure_is_deferred_and_counted() {
        let (db, engine) = setup();
        create_note(&engine, &db, "n1");
        let api = RecordingApi::failing();

        let result = engine.drain(&api).await.unwrap();

        assert_eq!(result.success_count, 0);
        assert_eq!(result.failed_count, 0);
        assert_eq!(result.deferred_count, 1);

        let item = &engine.queue().pending().unwrap()[0];
        assert_eq!(item.attempts, 1);
        assert_eq!(item.last_error.as_deref(), Some("API returned 500: boom"));
        assert!(!db.get("n1").unwrap().unwrap().synced);
        assert!(engine.last_sync().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bounded_retry() {
        let (db, engine) = setup();
        let engine = engine.with_max_attempts(3);
        create_note(&engine, &db, "n1");
        let api = RecordingApi::failing();

        for pass in 1..=2 {
            let result = engine.drain(&api).await.unwrap();
            assert_eq!(result.failed_count, 0, "pass {}", pass);
            assert_eq!(engine.queue().len().unwrap(), 1);
        }

        let result = engine.drain(&api).await.unwrap();
        assert_eq!(result.failed_count, 1);
        assert!(engine.queue().is_empty().unwrap());
        assert_eq!(api.calls().len(), 3);

        // Nothing left to fail
        let result = engine.drain(&api).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_item_dropped_without_call() {
        let (db, engine) = setup();
        create_note(&engine, &db, "n1");
        let id = engine.queue().pending().unwrap()[0].id;
        for _ in 0..3 {
            engine.queue().record_failure(id, "earlier").unwrap();
        }

        // Bound lowered below the recorded attempts
        let engine = engine.with_max_attempts(2);
        let api = RecordingApi::default();
        let result = engine.drain(&api).await.unwrap();

        assert_eq!(result.failed_count, 1);
        assert_eq!(result.success_count, 0);
        assert!(api.calls().is_empty());
        assert!(engine.queue().is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_dropped_create_holds_its_update() {
        let (db, engine) = setup();
        create_note(&engine, &db, "n1");
        engine.queue().push(&update("n1", "later")).unwrap();
        create_note(&engine, &db, "n2");
        let exhausted = engine.queue().pending().unwrap()[0].id;
        for _ in 0..2 {
            engine.queue().record_failure(exhausted, "earlier").unwrap();
        }

        let engine = engine.with_max_attempts(2);
        let api = RecordingApi::default();
        let result = engine.drain(&api).await.unwrap();

        assert_eq!(api.calls(), vec!["create n2"]);
        assert_eq!(result.failed_count, 1);
        assert_eq!(result.deferred_count, 1);
        assert_eq!(result.success_count, 1);
        assert_eq!(engine.queue().pending_for_entity("n1").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_drain_while_stops_early() {
        let (db, engine) = setup();
        for id in ["n1", "n2", "n3"] {
            create_note(&engine, &db, id);
        }
        let api = RecordingApi::default();

        let result = engine
            .drain_while(&api, || api.calls().is_empty())
            .await
            .unwrap();

        assert_eq!(api.calls(), vec!["create n1"]);
        assert_eq!(result.success_count, 1);
        assert_eq!(result.deferred_count, 2);

        let pending = engine.queue().pending().unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|item| item.attempts == 0));
    }

    #[tokio::test]
    async fn test_drain_skipped_while_other_process_holds_lease() {
        let (db, engine) = setup();
        create_note(&engine, &db, "n1");
        assert!(db
            .try_claim_lease("drain", "someone-else", Duration::from_secs(60))
            .unwrap());

        let api = RecordingApi::default();
        let result = engine.drain(&api).await.unwrap();

        assert!(result.is_empty());
        assert!(api.calls().is_empty());
        assert_eq!(engine.queue().len().unwrap(), 1);

        db.release_lease("drain", "someone-else").unwrap();
        assert_eq!(engine.drain(&api).await.unwrap().success_count, 1);
    }

    #[tokio::test]
    async fn test_create_replayed_before_update() {
        let (db, engine) = setup();
        create_note(&engine, &db, "n1");
        engine.queue().push(&update("n1", "later")).unwrap();
        let api = RecordingApi::default();

        let result = engine.drain(&api).await.unwrap();

        assert_eq!(result.success_count, 2);
        assert_eq!(api.calls(), vec!["create n1", "update n1"]);
        assert!(db.get("n1").unwrap().unwrap().synced);
    }

    #[tokio::test]
    async fn test_later_items_wait_behind_a_failure() {
        let (db, engine) = setup();
        create_note(&engine, &db, "n1");
        engine.queue().push(&update("n1", "later")).unwrap();
        let api = RecordingApi::failing();

        let result = engine.drain(&api).await.unwrap();

        assert_eq!(api.calls(), vec!["create n1"]);
        assert_eq!(result.deferred_count, 2);
        let pending = engine.queue().pending().unwrap();
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[1].attempts, 0);
    }

    #[tokio::test]
    async fn test_success_does_not_mask_later_edit() {
        let (db, engine) = setup();
        create_note(&engine, &db, "n1");
        engine.queue().push(&update("n1", "later")).unwrap();

        // Replay just the create
        let api = RecordingApi::default();
        let create = engine.queue().pending().unwrap().remove(0);
        engine.dispatch(&api, &create).await.unwrap();
        engine.on_success(&create).unwrap();

        assert!(!db.get("n1").unwrap().unwrap().synced);
        assert_eq!(engine.queue().len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_success() {
        let (_db, engine) = setup();
        engine
            .queue()
            .push(&Mutation::Delete {
                entity_id: "n1".into(),
            })
            .unwrap();
        let api = RecordingApi::default();

        let result = engine.drain(&api).await.unwrap();
        assert_eq!(result.success_count, 1);
        assert_eq!(api.calls(), vec!["delete n1"]);
    }

    #[tokio::test]
    async fn test_overlapping_drains() {
        let (db, engine) = setup();
        create_note(&engine, &db, "n1");
        create_note(&engine, &db, "n2");
        let other = engine.clone();
        let api = RecordingApi::slow(Duration::from_millis(20));

        let (first, second) = tokio::join!(engine.drain(&api), other.drain(&api));
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_eq!(first.success_count, 2);
        assert!(second.is_empty());
        assert_eq!(api.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let (db, engine) = setup();
        let engine = engine.with_request_timeout(Duration::from_millis(10));
        create_note(&engine, &db, "n1");
        let api = RecordingApi::slow(Duration::from_millis(500));

        let result = engine.drain(&api).await.unwrap();

        assert_eq!(result.deferred_count, 1);
        let item = &engine.queue().pending().unwrap()[0];
        assert_eq!(item.last_error.as_deref(), Some("Request timed out"));
    }

    /// Pushes a newer edit for the same note while an update is in flight
    struct EditingApi {
        queue: SyncQueue,
    }

    #[async_trait]
    impl NotesApi for EditingApi {
        async fn create_note(&self, note_id: &str, payload: &NotePayload) -> ApiResult<RemoteNote> {
            Ok(remote(note_id, payload))
        }

        async fn update_note(&self, note_id: &str, payload: &NotePayload) -> ApiResult<RemoteNote> {
            self.queue.push(&update(note_id, "edited mid-flight")).unwrap();
            Ok(remote(note_id, payload))
        }

        async fn delete_note(&self, _note_id: &str) -> ApiResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_edit_during_sync_stays_queued() {
        let (db, engine) = setup();
        let mut note = CachedNote::with_id("n1", "owner", "A", "");
        note.synced = true;
        db.put(&note).unwrap();
        engine.queue().push(&update("n1", "first")).unwrap();

        let api = EditingApi {
            queue: engine.queue().clone(),
        };
        let result = engine.drain(&api).await.unwrap();

        assert_eq!(result.success_count, 1);
        let pending = engine.queue().pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(
            pending[0].mutation.payload().unwrap().title,
            "edited mid-flight"
        );
    }

    #[test]
    fn test_from_config() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let config = Config {
            max_attempts: 0,
            request_timeout_secs: 7,
            ..Config::default()
        };

        let engine = SyncEngine::from_config(db, &config);
        assert_eq!(engine.max_attempts(), 1);
        assert_eq!(engine.request_timeout, Duration::from_secs(7));
    }
}
