//! Note command handlers
//!
//! Every write lands in the local cache and the sync queue; nothing here
//! talks to the API directly.

use anyhow::{bail, Context, Result};

use jotter_core::Store;

use crate::editor::{confirm, edit_text, strip_comment_lines};
use crate::output::{short_id, Output};

/// Create a new note
pub fn create(
    store: &Store,
    title: String,
    content: Option<String>,
    output: &Output,
) -> Result<()> {
    if title.trim().is_empty() {
        bail!("Note title cannot be empty");
    }

    let content = match content {
        Some(c) => c,
        None => {
            let initial = format!("<!-- New note: {} -->\n\n", title);
            let edited = edit_text(&initial).context("Failed to edit note")?;
            strip_comment_lines(&edited)
        }
    };

    let note = store.create_note(&title, &content)?;

    output.success(&format!("Created note {}: {}", short_id(&note.id), note.title));
    Ok(())
}

/// Edit a note's title and/or content
///
/// With neither flag given, opens the current content in the editor.
pub fn edit(
    store: &Store,
    id: String,
    title: Option<String>,
    content: Option<String>,
    output: &Output,
) -> Result<()> {
    let note_id = store.resolve_note_id(&id)?;
    let note = store
        .get_note(&note_id)?
        .ok_or_else(|| anyhow::anyhow!("Note not found: {}", id))?;

    let content = match (&title, content) {
        (None, None) => {
            let initial = format!("<!-- Editing: {} -->\n{}\n", note.title, note.content);
            let edited = edit_text(&initial).context("Failed to edit note")?;
            Some(strip_comment_lines(&edited))
        }
        (_, content) => content,
    };

    if let Some(ref t) = title {
        if t.trim().is_empty() {
            bail!("Note title cannot be empty");
        }
    }

    let updated = store.update_note(&note_id, title.as_deref(), content.as_deref())?;

    if updated.last_modified == note.last_modified {
        output.message("No changes.");
    } else {
        output.success(&format!("Updated note {}", short_id(&note_id)));
    }
    Ok(())
}

/// List notes
pub fn list(store: &Store, unsynced: bool, output: &Output) -> Result<()> {
    let notes = if unsynced {
        store.list_unsynced()?
    } else {
        store.list_notes()?
    };
    output.print_notes(&notes);
    Ok(())
}

/// Show a single note
pub fn show(store: &Store, id: String, output: &Output) -> Result<()> {
    let note_id = store.resolve_note_id(&id)?;
    let note = store
        .get_note(&note_id)?
        .ok_or_else(|| anyhow::anyhow!("Note not found: {}", id))?;
    output.print_note(&note);
    Ok(())
}

/// Delete a note
pub fn delete(store: &Store, id: String, output: &Output) -> Result<()> {
    let note_id = store.resolve_note_id(&id)?;

    if output.should_prompt() {
        if let Some(note) = store.get_note(&note_id)? {
            println!("Delete note: {} - {}", short_id(&note.id), note.title);
        }
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let note = store.delete_note(&note_id)?;
    output.success(&format!("Deleted note: {}", short_id(&note.id)));
    Ok(())
}
