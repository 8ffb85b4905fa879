//! Persistent local cache
//!
//! Holds cached notes, the pending mutation queue, and scalar settings in a
//! single SQLite file. Every multi-step operation runs in one immediate
//! transaction so overlapping writers cannot lose updates.
//!
//! The free functions at the bottom take a plain `&Connection` so they can
//! run either on their own or inside a caller's transaction (a
//! `Transaction` derefs to `Connection`).

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use tracing::debug;
use uuid::Uuid;

use super::error::{StorageError, StorageResult};
use super::schema::{init_schema, needs_init};
use crate::models::{CachedNote, EntityType, Mutation, NotePayload, Operation, QueueItem};

/// How long a writer waits for another process holding the database lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed persistent store
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open or create the database file
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::create_directory(e, parent.to_path_buf()))?;
        }

        let conn = Connection::open(path).map_err(|source| StorageError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        // WAL lets the CLI read while a daemon drains
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        if needs_init(&conn) {
            init_schema(&conn)?;
        }

        debug!("Opened database at {:?}", path);
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Path of the database file, if on disk
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` inside a single immediate transaction
    ///
    /// Commits when `f` returns `Ok`, rolls back otherwise.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    // ==================== Notes ====================

    /// Insert or replace a note by id
    pub fn put(&self, note: &CachedNote) -> StorageResult<()> {
        put_note(&*self.lock()?, note)
    }

    /// Get a note by id
    pub fn get(&self, id: &str) -> StorageResult<Option<CachedNote>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, title, content, last_modified, owner_id, synced FROM notes WHERE id = ?",
                params![id],
                note_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// All notes for an owner, in no particular order
    pub fn list_by_owner(&self, owner_id: &str) -> StorageResult<Vec<CachedNote>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, content, last_modified, owner_id, synced FROM notes WHERE owner_id = ?",
        )?;
        let notes = stmt
            .query_map(params![owner_id], note_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notes)
    }

    /// Notes for an owner that still have a pending remote mutation
    pub fn list_unsynced(&self, owner_id: &str) -> StorageResult<Vec<CachedNote>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, content, last_modified, owner_id, synced FROM notes \
             WHERE owner_id = ? AND synced = 0",
        )?;
        let notes = stmt
            .query_map(params![owner_id], note_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notes)
    }

    /// Delete a note; no-op if absent
    pub fn remove(&self, id: &str) -> StorageResult<()> {
        remove_note(&*self.lock()?, id)
    }

    /// Flag a note as synced; no-op if absent
    pub fn mark_synced(&self, id: &str) -> StorageResult<()> {
        self.lock()?
            .execute("UPDATE notes SET synced = 1 WHERE id = ?", params![id])?;
        Ok(())
    }

    pub fn note_count(&self) -> StorageResult<usize> {
        let count: i64 = self
            .lock()?
            .query_row("SELECT COUNT(*) FROM notes", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ==================== Queue ====================

    /// Append a mutation to the queue, returning the new item's id
    pub fn enqueue(&self, mutation: &Mutation) -> StorageResult<Uuid> {
        self.transaction(|tx| insert_queue_item(tx, mutation))
    }

    /// All queued items, oldest first
    pub fn list_queue(&self) -> StorageResult<Vec<QueueItem>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, operation, entity_type, entity_id, payload, enqueued_at, attempts, last_error \
             FROM sync_queue ORDER BY enqueued_at ASC, seq ASC",
        )?;
        let rows = stmt
            .query_map([], queue_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(QueueRow::into_item).collect()
    }

    /// Remove a queued item; no-op if absent
    pub fn dequeue(&self, id: Uuid) -> StorageResult<()> {
        self.lock()?.execute(
            "DELETE FROM sync_queue WHERE id = ?",
            params![id.to_string()],
        )?;
        Ok(())
    }

    /// Remove a replayed item and mark its note synced, in one transaction
    ///
    /// The item is only removed if its payload is still the one that was
    /// replayed; returns false when it is gone or was rewritten since. The
    /// note is flagged synced only for a create or update, and only when no
    /// other queued item references it.
    pub fn complete_replayed(&self, item: &QueueItem) -> StorageResult<bool> {
        let payload = item.mutation.payload().map(serde_json::to_string).transpose()?;

        self.transaction(|tx| {
            let removed = tx.execute(
                "DELETE FROM sync_queue WHERE id = ? AND payload IS ?",
                params![item.id.to_string(), payload],
            )?;
            if removed == 0 {
                return Ok(false);
            }

            if item.operation() != Operation::Delete {
                tx.execute(
                    "UPDATE notes SET synced = 1 WHERE id = ?1 \
                     AND NOT EXISTS (SELECT 1 FROM sync_queue WHERE entity_id = ?1)",
                    params![item.entity_id()],
                )?;
            }
            Ok(true)
        })
    }

    /// Atomically add one to an item's attempt counter, returning the new count
    pub fn increment_attempts(&self, id: Uuid) -> StorageResult<u32> {
        self.transaction(|tx| bump_attempts(tx, id, None))
    }

    /// Like `increment_attempts`, also remembering why the attempt failed
    pub fn record_failure(&self, id: Uuid, message: &str) -> StorageResult<u32> {
        self.transaction(|tx| bump_attempts(tx, id, Some(message)))
    }

    pub fn queue_len(&self) -> StorageResult<usize> {
        let count: i64 = self
            .lock()?
            .query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Number of queued items that reference an entity
    pub fn pending_for_entity(&self, entity_id: &str) -> StorageResult<usize> {
        let count: i64 = self.lock()?.query_row(
            "SELECT COUNT(*) FROM sync_queue WHERE entity_id = ?",
            params![entity_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Drop every queued item, returning how many were removed
    pub fn clear_queue(&self) -> StorageResult<usize> {
        let removed = self.lock()?.execute("DELETE FROM sync_queue", [])?;
        Ok(removed)
    }

    // ==================== Settings ====================

    pub fn set_setting(&self, key: &str, value: &str) -> StorageResult<()> {
        self.lock()?.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Claim the named lease for `owner` until `ttl` from now
    ///
    /// Succeeds when the lease is free, expired, or already held by `owner`
    /// (which extends it). Other processes sharing the file see the claim.
    pub fn try_claim_lease(&self, name: &str, owner: &str, ttl: Duration) -> StorageResult<bool> {
        let key = lease_key(name);
        let now = Utc::now().timestamp_millis();
        let expires = now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX));

        self.transaction(|tx| {
            let current: Option<String> = tx
                .query_row(
                    "SELECT value FROM settings WHERE key = ?",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some((holder, until)) = current.as_deref().and_then(parse_lease) {
                if holder != owner && until > now {
                    return Ok(false);
                }
            }

            tx.execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
                params![key, format!("{} {}", owner, expires)],
            )?;
            Ok(true)
        })
    }

    /// Give up the named lease if `owner` still holds it
    pub fn release_lease(&self, name: &str, owner: &str) -> StorageResult<()> {
        let key = lease_key(name);
        self.transaction(|tx| {
            let current: Option<String> = tx
                .query_row(
                    "SELECT value FROM settings WHERE key = ?",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;

            if current.as_deref().and_then(parse_lease).map(|(holder, _)| holder) == Some(owner) {
                tx.execute("DELETE FROM settings WHERE key = ?", params![key])?;
            }
            Ok(())
        })
    }

    pub fn get_setting(&self, key: &str) -> StorageResult<Option<String>> {
        let value = self
            .lock()?
            .query_row(
                "SELECT value FROM settings WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }
}

// ==================== Internal structs ====================

struct QueueRow {
    id: String,
    operation: String,
    entity_type: String,
    entity_id: String,
    payload: Option<String>,
    enqueued_at: i64,
    attempts: u32,
    last_error: Option<String>,
}

impl QueueRow {
    fn into_item(self) -> StorageResult<QueueItem> {
        let invalid = |details: String| StorageError::InvalidRecord {
            table: "sync_queue",
            details,
        };

        let id = Uuid::parse_str(&self.id).map_err(|e| invalid(format!("bad id {}: {}", self.id, e)))?;
        let operation: Operation = self.operation.parse().map_err(invalid)?;
        let _entity_type: EntityType = self.entity_type.parse().map_err(invalid)?;
        let payload = self
            .payload
            .as_deref()
            .map(serde_json::from_str::<NotePayload>)
            .transpose()?;
        let mutation = Mutation::from_parts(operation, self.entity_id, payload).map_err(invalid)?;

        Ok(QueueItem {
            id,
            mutation,
            enqueued_at: from_millis(self.enqueued_at),
            attempts: self.attempts,
            last_error: self.last_error,
        })
    }
}

fn queue_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueRow> {
    Ok(QueueRow {
        id: row.get(0)?,
        operation: row.get(1)?,
        entity_type: row.get(2)?,
        entity_id: row.get(3)?,
        payload: row.get(4)?,
        enqueued_at: row.get(5)?,
        attempts: row.get(6)?,
        last_error: row.get(7)?,
    })
}

fn note_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CachedNote> {
    Ok(CachedNote {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        last_modified: from_millis(row.get(3)?),
        owner_id: row.get(4)?,
        synced: row.get(5)?,
    })
}

fn lease_key(name: &str) -> String {
    format!("lease:{}", name)
}

/// `"<owner> <expiry millis>"`; unreadable values count as no lease
fn parse_lease(value: &str) -> Option<(&str, i64)> {
    let (owner, until) = value.rsplit_once(' ')?;
    Some((owner, until.parse().ok()?))
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

// ==================== Transaction helpers ====================

pub(crate) fn put_note(conn: &Connection, note: &CachedNote) -> StorageResult<()> {
    conn.execute(
        r#"
        INSERT OR REPLACE INTO notes (id, title, content, last_modified, owner_id, synced)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
        params![
            note.id,
            note.title,
            note.content,
            note.last_modified.timestamp_millis(),
            note.owner_id,
            note.synced,
        ],
    )?;
    Ok(())
}

pub(crate) fn remove_note(conn: &Connection, id: &str) -> StorageResult<()> {
    conn.execute("DELETE FROM notes WHERE id = ?", params![id])?;
    Ok(())
}

/// Append a queue item
///
/// `enqueued_at` never goes below the newest queued timestamp, so a clock
/// stepping backwards cannot reorder the queue.
pub(crate) fn insert_queue_item(conn: &Connection, mutation: &Mutation) -> StorageResult<Uuid> {
    let newest: i64 = conn.query_row(
        "SELECT COALESCE(MAX(enqueued_at), 0) FROM sync_queue",
        [],
        |row| row.get(0),
    )?;
    let enqueued_at = Utc::now().timestamp_millis().max(newest);

    let id = Uuid::new_v4();
    let payload = mutation.payload().map(serde_json::to_string).transpose()?;

    conn.execute(
        r#"
        INSERT INTO sync_queue (id, operation, entity_type, entity_id, payload, enqueued_at, attempts)
        VALUES (?, ?, ?, ?, ?, ?, 0)
        "#,
        params![
            id.to_string(),
            mutation.operation().as_str(),
            mutation.entity_type().as_str(),
            mutation.entity_id(),
            payload,
            enqueued_at,
        ],
    )?;

    Ok(id)
}

/// Most recently queued item for an entity
pub(crate) fn latest_for_entity(
    conn: &Connection,
    entity_id: &str,
) -> StorageResult<Option<QueueItem>> {
    let row = conn
        .query_row(
            "SELECT id, operation, entity_type, entity_id, payload, enqueued_at, attempts, last_error \
             FROM sync_queue WHERE entity_id = ? ORDER BY enqueued_at DESC, seq DESC LIMIT 1",
            params![entity_id],
            queue_row,
        )
        .optional()?;
    row.map(QueueRow::into_item).transpose()
}

/// Swap the payload of a queued item and give it a fresh set of attempts
pub(crate) fn replace_queued_payload(
    conn: &Connection,
    id: Uuid,
    payload: &NotePayload,
) -> StorageResult<()> {
    let changed = conn.execute(
        "UPDATE sync_queue SET payload = ?, attempts = 0, last_error = NULL WHERE id = ?",
        params![serde_json::to_string(payload)?, id.to_string()],
    )?;
    if changed == 0 {
        return Err(StorageError::QueueItemNotFound(id));
    }
    Ok(())
}

fn bump_attempts(conn: &Connection, id: Uuid, error: Option<&str>) -> StorageResult<u32> {
    let changed = conn.execute(
        "UPDATE sync_queue SET attempts = attempts + 1, last_error = COALESCE(?, last_error) WHERE id = ?",
        params![error, id.to_string()],
    )?;
    if changed == 0 {
        return Err(StorageError::QueueItemNotFound(id));
    }

    let attempts = conn.query_row(
        "SELECT attempts FROM sync_queue WHERE id = ?",
        params![id.to_string()],
        |row| row.get(0),
    )?;
    Ok(attempts)
}
