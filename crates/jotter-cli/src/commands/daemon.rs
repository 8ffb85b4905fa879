//! Daemon command handler
//!
//! Keeps a reachability poll and the sync monitor running until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use jotter_core::sync::{
    spawn_monitor, spawn_reachability_poll, Connectivity, MonitorConfig, MonitorEvent,
};
use jotter_core::{HttpNotesApi, Store};

use crate::output::Output;

/// How often the API is polled for reachability
const REACHABILITY_INTERVAL: Duration = Duration::from_secs(10);

/// Run until interrupted, draining whenever the API is reachable
pub async fn run(store: &Store, output: &Output) -> Result<()> {
    let api = Arc::new(HttpNotesApi::from_config(store.config()).context("Cannot start daemon")?);

    let connectivity = Connectivity::new(false);
    let poller =
        spawn_reachability_poll(api.clone(), connectivity.clone(), REACHABILITY_INTERVAL);
    let mut handle = spawn_monitor(
        store.engine().clone(),
        api.clone(),
        connectivity.subscribe(),
        MonitorConfig::from_config(store.config()),
    );

    info!("Daemon started for {}", api.base_url());
    output.message(&format!(
        "Watching {} (every {}s). Press Ctrl-C to stop.",
        api.base_url(),
        store.config().sync_interval().as_secs()
    ));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            event = handle.event_rx.recv() => match event {
                Some(MonitorEvent::ConnectivityChanged(online)) => {
                    output.message(if online { "Online" } else { "Offline, queueing changes" });
                }
                Some(MonitorEvent::Drained(result)) if !result.is_empty() => {
                    output.print_sync_result(&result);
                }
                Some(MonitorEvent::Drained(_)) => {}
                Some(MonitorEvent::Error(e)) => {
                    eprintln!("Warning: Sync failed: {}", e);
                }
                None => break,
            },
        }
    }

    poller.abort();
    handle.shutdown().await;
    output.message("Stopped.");
    Ok(())
}
