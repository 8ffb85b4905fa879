//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;

use jotter_core::{CachedNote, QueueItem, SyncResult};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print a single note in full
    pub fn print_note(&self, note: &CachedNote) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:       {}", note.id);
                println!("Title:    {}", note.title);
                println!(
                    "Modified: {}",
                    note.last_modified.format("%Y-%m-%d %H:%M")
                );
                println!("Synced:   {}", if note.synced { "yes" } else { "no" });
                if !note.content.is_empty() {
                    println!();
                    println!("{}", note.content);
                }
            }
            OutputFormat::Json => print_json(note),
            OutputFormat::Quiet => println!("{}", note.id),
        }
    }

    /// Print a list of notes
    pub fn print_notes(&self, notes: &[CachedNote]) {
        match self.format {
            OutputFormat::Human => {
                if notes.is_empty() {
                    println!("No notes found.");
                    return;
                }
                for note in notes {
                    println!(
                        "{} {} | {} | {}",
                        if note.synced { " " } else { "*" },
                        short_id(&note.id),
                        truncate(&note.title, 35),
                        truncate_line(&note.content, 40)
                    );
                }
                let unsynced = notes.iter().filter(|n| !n.synced).count();
                if unsynced > 0 {
                    println!("\n{} note(s), {} not yet synced (*)", notes.len(), unsynced);
                } else {
                    println!("\n{} note(s)", notes.len());
                }
            }
            OutputFormat::Json => print_json(&notes),
            OutputFormat::Quiet => {
                for note in notes {
                    println!("{}", note.id);
                }
            }
        }
    }

    /// Print pending queue items
    pub fn print_queue(&self, items: &[QueueItem]) {
        match self.format {
            OutputFormat::Human => {
                if items.is_empty() {
                    println!("Nothing waiting to sync.");
                    return;
                }
                for item in items {
                    println!(
                        "{} | {:<6} | note {} | queued {} | attempts {}",
                        short_id(&item.id.to_string()),
                        item.operation(),
                        short_id(item.entity_id()),
                        item.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
                        item.attempts
                    );
                    if let Some(ref err) = item.last_error {
                        println!("         last error: {}", truncate(err, 60));
                    }
                }
                println!("\n{} pending mutation(s)", items.len());
            }
            OutputFormat::Json => print_json(&items),
            OutputFormat::Quiet => {
                for item in items {
                    println!("{}", item.id);
                }
            }
        }
    }

    /// Print the outcome of a drain
    pub fn print_sync_result(&self, result: &SyncResult) {
        match self.format {
            OutputFormat::Human => {
                if result.is_empty() {
                    println!("✓ Nothing to sync");
                } else if result.failed_count == 0 && result.deferred_count == 0 {
                    println!("✓ Sync complete - {}", result);
                } else {
                    println!("⚠ Sync finished - {}", result);
                }
            }
            OutputFormat::Json => print_json(result),
            OutputFormat::Quiet => {}
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}

/// First 8 characters of an ID
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Truncate to first line and max length
fn truncate_line(s: &str, max_len: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    truncate(first_line, max_len)
}
