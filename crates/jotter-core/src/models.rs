//! Data models for Jotter
//!
//! Defines the cached note, the queued mutations that replay local edits
//! against the remote API, and the summary of a drain pass.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A note as held in the local cache
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedNote {
    /// Unique identifier (shared with the remote API)
    pub id: String,
    /// Note title
    pub title: String,
    /// Note body (markdown)
    pub content: String,
    /// When this note was last edited locally
    pub last_modified: DateTime<Utc>,
    /// Owner of the note
    pub owner_id: String,
    /// True once no remote mutation is pending for this note
    pub synced: bool,
}

impl CachedNote {
    /// Create a new, not yet synced note
    pub fn new(
        owner_id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), owner_id, title, content)
    }

    /// Create a note with a specific ID
    pub fn with_id(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            last_modified: Utc::now(),
            owner_id: owner_id.into(),
            synced: false,
        }
    }

    /// Update the title
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.touch();
    }

    /// Update the content
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.touch();
    }

    /// The payload sent to the remote API for this note
    pub fn payload(&self) -> NotePayload {
        NotePayload {
            title: self.title.clone(),
            content: self.content.clone(),
        }
    }

    fn touch(&mut self) {
        self.last_modified = Utc::now();
        self.synced = false;
    }
}

/// Data needed to replay a create or update remotely
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotePayload {
    pub title: String,
    pub content: String,
}

impl NotePayload {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }
}

/// Kind of entity a queued mutation applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Note,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Note => "note",
        }
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "note" => Ok(EntityType::Note),
            other => Err(format!("unknown entity type '{}'", other)),
        }
    }
}

/// Operation tag of a queued mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(format!("unknown operation '{}'", other)),
        }
    }
}

/// A pending change to replay against the remote API
///
/// Pairing the operation with its payload in one enum means a delete can
/// never carry a body and a create can never lack one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
pub enum Mutation {
    Create {
        entity_id: String,
        payload: NotePayload,
    },
    Update {
        entity_id: String,
        payload: NotePayload,
    },
    Delete {
        entity_id: String,
    },
}

impl Mutation {
    pub fn operation(&self) -> Operation {
        match self {
            Mutation::Create { .. } => Operation::Create,
            Mutation::Update { .. } => Operation::Update,
            Mutation::Delete { .. } => Operation::Delete,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        EntityType::Note
    }

    pub fn entity_id(&self) -> &str {
        match self {
            Mutation::Create { entity_id, .. }
            | Mutation::Update { entity_id, .. }
            | Mutation::Delete { entity_id } => entity_id,
        }
    }

    pub fn payload(&self) -> Option<&NotePayload> {
        match self {
            Mutation::Create { payload, .. } | Mutation::Update { payload, .. } => Some(payload),
            Mutation::Delete { .. } => None,
        }
    }

    /// Rebuild a mutation from its stored columns
    pub fn from_parts(
        operation: Operation,
        entity_id: String,
        payload: Option<NotePayload>,
    ) -> Result<Self, String> {
        match (operation, payload) {
            (Operation::Create, Some(payload)) => Ok(Mutation::Create { entity_id, payload }),
            (Operation::Update, Some(payload)) => Ok(Mutation::Update { entity_id, payload }),
            (Operation::Delete, _) => Ok(Mutation::Delete { entity_id }),
            (op, None) => Err(format!("{} for '{}' has no payload", op, entity_id)),
        }
    }
}

/// A mutation waiting in the sync queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueItem {
    /// Unique ID for this queue item
    pub id: Uuid,
    /// The change to replay
    pub mutation: Mutation,
    /// When this item was queued
    pub enqueued_at: DateTime<Utc>,
    /// Failed replay attempts so far
    pub attempts: u32,
    /// Last failure message, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl QueueItem {
    pub fn operation(&self) -> Operation {
        self.mutation.operation()
    }

    pub fn entity_type(&self) -> EntityType {
        self.mutation.entity_type()
    }

    pub fn entity_id(&self) -> &str {
        self.mutation.entity_id()
    }
}

/// Summary of one drain pass
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncResult {
    /// Items replayed and removed from the queue
    pub success_count: usize,
    /// Items dropped after exhausting their attempts
    pub failed_count: usize,
    /// Items that failed or were held back and stay queued for the next pass
    pub deferred_count: usize,
    /// When the pass finished
    pub timestamp: DateTime<Utc>,
}

impl SyncResult {
    /// A pass that did nothing
    pub fn empty() -> Self {
        Self {
            success_count: 0,
            failed_count: 0,
            deferred_count: 0,
            timestamp: Utc::now(),
        }
    }

    /// True when the pass touched no items
    pub fn is_empty(&self) -> bool {
        self.success_count == 0 && self.failed_count == 0 && self.deferred_count == 0
    }
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} synced, {} failed, {} pending retry",
            self.success_count, self.failed_count, self.deferred_count
        )
    }
}

/// A note as returned by the remote API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteNote {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, alias = "updatedAt", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}
