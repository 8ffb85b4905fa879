//! Unified notebook interface
//!
//! The `Store` is what front ends talk to. Every edit is applied to the
//! local cache and recorded in the sync queue in the same transaction, so
//! an unsynced note always has a queued mutation behind it.
//!
//! ## Usage
//!
//! ```ignore
//! let store = Store::open()?;
//!
//! // Works offline
//! let note = store.create_note("Groceries", "- milk")?;
//! store.update_note(&note.id, None, Some("- milk\n- eggs"))?;
//!
//! // Replay the queue once the API is reachable
//! let api = HttpNotesApi::from_config(store.config())?;
//! let result = store.sync(&api).await?;
//! ```

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};

use crate::config::{Config, DEFAULT_OWNER};
use crate::models::{CachedNote, Mutation, QueueItem, SyncResult};
use crate::queue::{push_mutation, SyncQueue};
use crate::remote::NotesApi;
use crate::storage::database::{put_note, remove_note};
use crate::storage::Database;
use crate::sync::SyncEngine;

/// Offline-first notebook
pub struct Store {
    db: Arc<Database>,
    engine: SyncEngine,
    config: Config,
}

impl Store {
    /// Open the store from the default configuration
    pub fn open() -> Result<Self> {
        let config = Config::load().context("Failed to load configuration")?;
        Self::open_with_config(config)
    }

    /// Open the store with a specific configuration
    pub fn open_with_config(config: Config) -> Result<Self> {
        let db = Database::open(&config.database_path()).context("Failed to open database")?;
        Ok(Self::from_parts(Arc::new(db), config))
    }

    /// Open a throwaway in-memory store (for testing)
    pub fn open_in_memory(owner_id: &str) -> Result<Self> {
        let config = Config {
            owner_id: Some(owner_id.to_string()),
            ..Config::default()
        };
        let db = Database::open_in_memory().context("Failed to open in-memory database")?;
        Ok(Self::from_parts(Arc::new(db), config))
    }

    fn from_parts(db: Arc<Database>, config: Config) -> Self {
        let engine = SyncEngine::from_config(db.clone(), &config);
        Self { db, engine, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Owner of notes created through this store
    pub fn owner(&self) -> &str {
        self.config.owner()
    }

    /// Shared handle to the underlying database
    pub fn database(&self) -> Arc<Database> {
        self.db.clone()
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn queue(&self) -> &SyncQueue {
        self.engine.queue()
    }

    // ==================== Note Operations ====================

    /// Create a note and queue its creation remotely
    pub fn create_note(&self, title: &str, content: &str) -> Result<CachedNote> {
        let note = CachedNote::new(self.owner(), title, content);
        let mutation = Mutation::Create {
            entity_id: note.id.clone(),
            payload: note.payload(),
        };

        self.db
            .transaction(|tx| {
                put_note(tx, &note)?;
                push_mutation(tx, &mutation)
            })
            .context("Failed to create note")?;

        Ok(note)
    }

    /// Change a note's title and/or content and queue the update
    ///
    /// Returns the note unchanged, without queueing, if nothing differs.
    pub fn update_note(
        &self,
        id: &str,
        title: Option<&str>,
        content: Option<&str>,
    ) -> Result<CachedNote> {
        let Some(mut note) = self.get_note(id)? else {
            bail!("Note not found: {}", id);
        };

        let mut changed = false;
        if let Some(title) = title.filter(|t| *t != note.title) {
            note.set_title(title);
            changed = true;
        }
        if let Some(content) = content.filter(|c| *c != note.content) {
            note.set_content(content);
            changed = true;
        }
        if !changed {
            return Ok(note);
        }

        let mutation = Mutation::Update {
            entity_id: note.id.clone(),
            payload: note.payload(),
        };
        self.db
            .transaction(|tx| {
                put_note(tx, &note)?;
                push_mutation(tx, &mutation)
            })
            .context("Failed to update note")?;

        Ok(note)
    }

    /// Delete a note locally and queue its deletion remotely
    ///
    /// Earlier queued creates or updates for the note are left in place and
    /// replayed before the delete.
    pub fn delete_note(&self, id: &str) -> Result<CachedNote> {
        let Some(note) = self.get_note(id)? else {
            bail!("Note not found: {}", id);
        };

        let mutation = Mutation::Delete {
            entity_id: note.id.clone(),
        };
        self.db
            .transaction(|tx| {
                remove_note(tx, &note.id)?;
                push_mutation(tx, &mutation)
            })
            .context("Failed to delete note")?;

        Ok(note)
    }

    /// Get a note by ID
    pub fn get_note(&self, id: &str) -> Result<Option<CachedNote>> {
        self.db.get(id).context("Failed to get note")
    }

    /// Resolve a full note ID from a unique prefix
    pub fn resolve_note_id(&self, prefix: &str) -> Result<String> {
        if self.get_note(prefix)?.is_some() {
            return Ok(prefix.to_string());
        }

        let matches: Vec<String> = self
            .list_notes()?
            .into_iter()
            .filter(|n| n.id.starts_with(prefix))
            .map(|n| n.id)
            .collect();

        match matches.as_slice() {
            [] => bail!("Note not found: {}", prefix),
            [id] => Ok(id.clone()),
            _ => bail!(
                "Ambiguous note ID '{}' matches {} notes",
                prefix,
                matches.len()
            ),
        }
    }

    /// All notes for this owner, most recently edited first
    pub fn list_notes(&self) -> Result<Vec<CachedNote>> {
        let mut notes = self
            .db
            .list_by_owner(self.owner())
            .context("Failed to list notes")?;
        notes.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(notes)
    }

    /// Notes with a change that has not reached the server yet
    pub fn list_unsynced(&self) -> Result<Vec<CachedNote>> {
        let mut notes = self
            .db
            .list_unsynced(self.owner())
            .context("Failed to list unsynced notes")?;
        notes.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(notes)
    }

    pub fn note_count(&self) -> Result<usize> {
        self.db.note_count().context("Failed to count notes")
    }

    // ==================== Sync ====================

    /// Queued mutations, oldest first
    pub fn pending(&self) -> Result<Vec<QueueItem>> {
        self.queue().pending().context("Failed to read sync queue")
    }

    pub fn queue_len(&self) -> Result<usize> {
        self.queue().len().context("Failed to read sync queue")
    }

    /// When a drain last synced anything
    pub fn last_sync(&self) -> Result<Option<DateTime<Utc>>> {
        self.engine
            .last_sync()
            .context("Failed to read last sync time")
    }

    /// Replay the queue against `api` once
    pub async fn sync<A>(&self, api: &A) -> Result<SyncResult>
    where
        A: NotesApi + ?Sized,
    {
        self.engine.drain(api).await.context("Sync failed")
    }

    /// True when this store still uses the fallback owner
    pub fn has_default_owner(&self) -> bool {
        self.owner() == DEFAULT_OWNER
    }
}
