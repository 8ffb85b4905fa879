//! Status command handler

use anyhow::Result;

use jotter_core::Store;

use crate::output::{Output, OutputFormat};

/// Show notes, queue and sync status
pub fn show(store: &Store, output: &Output) -> Result<()> {
    let config = store.config();
    let notes = store.note_count()?;
    let unsynced = store.list_unsynced()?.len();
    let pending = store.queue_len()?;
    let last_sync = store.last_sync()?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "owner_id": store.owner(),
                    "api_url": config.api_url,
                    "sync_configured": config.is_sync_configured(),
                    "data_dir": config.data_dir,
                    "counts": {
                        "notes": notes,
                        "unsynced": unsynced,
                        "pending": pending
                    },
                    "last_sync": last_sync.map(|t| t.to_rfc3339())
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", pending);
        }
        OutputFormat::Human => {
            println!("Jotter Status");
            println!("=============");
            println!();
            println!("Owner: {}", store.owner());
            if store.has_default_owner() {
                println!("  (default; set one with `jotter config set owner_id <id>`)");
            }
            println!();
            println!("Sync:");
            match config.api_url {
                Some(ref url) if config.is_sync_configured() => println!("  Server:    {}", url),
                Some(ref url) => println!("  Server:    {} (no api_token set)", url),
                None => println!("  Server:    (not configured)"),
            }
            println!(
                "  Last sync: {}",
                last_sync
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                    .unwrap_or_else(|| "never".to_string())
            );
            println!("  Pending:   {}", pending);
            println!();
            println!("Storage:");
            println!("  Location: {}", config.data_dir.display());
            println!();
            println!("Contents:");
            println!("  Notes:    {}", notes);
            println!("  Unsynced: {}", unsynced);
        }
    }

    Ok(())
}
