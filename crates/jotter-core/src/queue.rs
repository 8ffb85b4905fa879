//! FIFO queue of pending mutations
//!
//! A thin view over the `sync_queue` table. Items come back oldest first;
//! two mutations to the same note always replay in the order they were
//! pushed.
//!
//! Consecutive updates to the same note are coalesced: pushing an update
//! while the newest queued item for that note is also an update replaces
//! that item's payload instead of appending a second one.

use std::sync::Arc;

use rusqlite::Connection;
use tracing::debug;
use uuid::Uuid;

use crate::models::{Mutation, QueueItem};
use crate::storage::database::{insert_queue_item, latest_for_entity, replace_queued_payload};
use crate::storage::{Database, StorageError, StorageResult};

/// Ordered queue of mutations waiting to be replayed
#[derive(Clone)]
pub struct SyncQueue {
    db: Arc<Database>,
}

impl SyncQueue {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Queue a mutation, returning the id of the item that now carries it
    pub fn push(&self, mutation: &Mutation) -> StorageResult<Uuid> {
        self.db.transaction(|tx| push_mutation(tx, mutation))
    }

    /// All pending items, oldest first
    pub fn pending(&self) -> StorageResult<Vec<QueueItem>> {
        self.db.list_queue()
    }

    pub fn len(&self) -> StorageResult<usize> {
        self.db.queue_len()
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Number of pending items for one note
    pub fn pending_for_entity(&self, entity_id: &str) -> StorageResult<usize> {
        self.db.pending_for_entity(entity_id)
    }

    /// Remove an item that was replayed successfully
    ///
    /// Marks the note synced in the same transaction when nothing else is
    /// queued for it. Returns false if the item was rewritten by a coalesced
    /// update while it was in flight; it then stays queued with the newer
    /// payload.
    pub fn complete(&self, item: &QueueItem) -> StorageResult<bool> {
        self.db.complete_replayed(item)
    }

    /// Count a failed replay, returning the item's new attempt count
    pub fn record_failure(&self, id: Uuid, message: &str) -> StorageResult<u32> {
        self.db.record_failure(id, message)
    }

    /// Remove an item that will not be retried
    pub fn drop_item(&self, id: Uuid) -> StorageResult<()> {
        self.db.dequeue(id)
    }

    /// Discard everything, returning how many items were removed
    pub fn clear(&self) -> StorageResult<usize> {
        self.db.clear_queue()
    }
}

/// Queue a mutation on an open connection, coalescing back-to-back updates
///
/// Runs inside the caller's transaction so a note write and its queue entry
/// commit together.
pub(crate) fn push_mutation(conn: &Connection, mutation: &Mutation) -> StorageResult<Uuid> {
    if let Mutation::Update { entity_id, payload } = mutation {
        if let Some(latest) = latest_for_entity(conn, entity_id)? {
            if let Mutation::Update { .. } = latest.mutation {
                match replace_queued_payload(conn, latest.id, payload) {
                    Ok(()) => {
                        debug!("Coalesced update for note {} into {}", entity_id, latest.id);
                        return Ok(latest.id);
                    }
                    // Removed underneath us; fall through and append
                    Err(StorageError::QueueItemNotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }
    }

    let id = insert_queue_item(conn, mutation)?;
    debug!(
        "Queued {} for note {} as {}",
        mutation.operation(),
        mutation.entity_id(),
        id
    );
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NotePayload, Operation};

    fn queue() -> SyncQueue {
        SyncQueue::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    fn update(id: &str, title: &str) -> Mutation {
        Mutation::Update {
            entity_id: id.to_string(),
            payload: NotePayload::new(title, ""),
        }
    }

    #[test]
    fn test_push_and_complete() {
        let q = queue();
        assert!(q.is_empty().unwrap());

        q.push(&Mutation::Create {
            entity_id: "n1".into(),
            payload: NotePayload::new("A", "B"),
        })
        .unwrap();
        assert_eq!(q.len().unwrap(), 1);

        let item = q.pending().unwrap().remove(0);
        assert!(q.complete(&item).unwrap());
        assert!(q.is_empty().unwrap());
    }

    #[test]
    fn test_complete_keeps_item_rewritten_in_flight() {
        let q = queue();
        q.push(&update("n1", "one")).unwrap();
        let in_flight = q.pending().unwrap().remove(0);

        q.push(&update("n1", "two")).unwrap();

        assert!(!q.complete(&in_flight).unwrap());
        let pending = q.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].mutation.payload().unwrap().title, "two");
    }

    #[test]
    fn test_consecutive_updates_coalesce() {
        let q = queue();
        let first = q.push(&update("n1", "one")).unwrap();
        q.record_failure(first, "boom").unwrap();

        let second = q.push(&update("n1", "two")).unwrap();
        assert_eq!(first, second);

        let pending = q.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 0);
        assert!(pending[0].last_error.is_none());
        assert_eq!(pending[0].mutation.payload().unwrap().title, "two");
    }

    #[test]
    fn test_create_then_update_is_not_folded() {
        let q = queue();
        q.push(&Mutation::Create {
            entity_id: "n1".into(),
            payload: NotePayload::new("A", ""),
        })
        .unwrap();
        q.push(&update("n1", "B")).unwrap();

        let ops: Vec<Operation> = q.pending().unwrap().iter().map(|i| i.operation()).collect();
        assert_eq!(ops, vec![Operation::Create, Operation::Update]);
    }

    #[test]
    fn test_update_after_delete_appends() {
        let q = queue();
        q.push(&update("n1", "A")).unwrap();
        q.push(&Mutation::Delete {
            entity_id: "n1".into(),
        })
        .unwrap();
        q.push(&update("n1", "B")).unwrap();

        let ops: Vec<Operation> = q.pending().unwrap().iter().map(|i| i.operation()).collect();
        assert_eq!(
            ops,
            vec![Operation::Update, Operation::Delete, Operation::Update]
        );
    }

    #[test]
    fn test_updates_to_different_notes_stay_separate() {
        let q = queue();
        q.push(&update("n1", "A")).unwrap();
        q.push(&update("n2", "B")).unwrap();
        q.push(&update("n1", "C")).unwrap();

        let pending = q.pending().unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].entity_id(), "n1");
        assert_eq!(pending[0].mutation.payload().unwrap().title, "C");
        assert_eq!(q.pending_for_entity("n2").unwrap(), 1);
    }

    #[test]
    fn test_record_failure_and_drop() {
        let q = queue();
        let id = q.push(&update("n1", "A")).unwrap();

        assert_eq!(q.record_failure(id, "500").unwrap(), 1);
        assert_eq!(q.record_failure(id, "500").unwrap(), 2);

        q.drop_item(id).unwrap();
        assert!(q.is_empty().unwrap());
        assert!(matches!(
            q.record_failure(id, "gone"),
            Err(StorageError::QueueItemNotFound(_))
        ));
    }

    #[test]
    fn test_clear() {
        let q = queue();
        q.push(&update("n1", "A")).unwrap();
        q.push(&update("n2", "B")).unwrap();
        assert_eq!(q.clear().unwrap(), 2);
        assert!(q.is_empty().unwrap());
    }
}
