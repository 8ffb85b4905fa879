//! Queue command handlers

use anyhow::{Context, Result};

use jotter_core::Store;

use crate::editor::confirm;
use crate::output::Output;

/// List pending mutations, oldest first
pub fn list(store: &Store, output: &Output) -> Result<()> {
    let items = store.pending()?;
    output.print_queue(&items);
    Ok(())
}

/// Discard every pending mutation
///
/// Local notes keep their content but stay marked as unsynced.
pub fn clear(store: &Store, output: &Output) -> Result<()> {
    let pending = store.queue_len()?;
    if pending == 0 {
        output.message("Nothing waiting to sync.");
        return Ok(());
    }

    if output.should_prompt() {
        println!("{} pending mutation(s) will never reach the server.", pending);
        if !confirm("Discard them?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let removed = store.queue().clear().context("Failed to clear sync queue")?;
    output.success(&format!("Discarded {} pending mutation(s)", removed));
    Ok(())
}
