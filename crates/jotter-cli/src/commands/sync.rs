//! Sync command handler

use anyhow::{bail, Result};
use tracing::{debug, warn};

use jotter_core::{ReachabilityCheck, HttpNotesApi, Store, SyncError};

use crate::output::Output;

/// Replay the queue against the configured API once
pub async fn sync(store: &Store, output: &Output) -> Result<()> {
    let api = match HttpNotesApi::from_config(store.config()) {
        Ok(api) => api,
        Err(SyncError::NotConfigured) => bail!(
            "Sync is not configured. Set it up with:\n  \
             jotter config set api_url https://notes.example.com/api\n  \
             jotter config set api_token <token>"
        ),
        Err(e) => return Err(e.into()),
    };

    output.message(&format!("Checking {}...", api.base_url()));
    if !api.is_reachable().await {
        let pending = store.queue_len()?;
        bail!(
            "API at {} is unreachable; {} mutation(s) stay queued",
            api.base_url(),
            pending
        );
    }

    let result = store.sync(&api).await?;
    output.print_sync_result(&result);
    Ok(())
}

/// Sync quietly after a local write
///
/// Does nothing when sync is not configured or the API is unreachable; the
/// edit stays queued either way.
pub async fn auto_sync(store: &Store, output: &Output) {
    if !store.config().is_sync_configured() {
        return;
    }

    let api = match HttpNotesApi::from_config(store.config()) {
        Ok(api) => api,
        Err(e) => {
            warn!("Auto-sync skipped: {}", e);
            return;
        }
    };

    if !api.is_reachable().await {
        debug!("Offline, leaving changes queued");
        return;
    }

    match store.sync(&api).await {
        Ok(result) => debug!("Auto-sync: {}", result),
        Err(e) => {
            if !output.is_quiet() {
                eprintln!("Warning: Auto-sync failed: {:#}", e);
            }
        }
    }
}
