//! Connectivity monitor
//!
//! Runs as a background task that drains the queue when the client comes
//! back online, on a fixed interval while online, and on request. Drain
//! outcomes are reported as events; a failed drain never stops the task.
//!
//! The online flag itself is a `watch` channel ([`Connectivity`]). Anything
//! that can tell whether the API is reachable can feed it;
//! [`spawn_reachability_poll`] does so by polling a [`ReachabilityCheck`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::engine::SyncEngine;
use crate::config::Config;
use crate::models::SyncResult;
use crate::remote::{ReachabilityCheck, NotesApi};

/// Shared online/offline flag
#[derive(Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Update the flag; subscribers are only woken on an actual change
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Commands sent to the monitor task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorCommand {
    /// Drain now if online
    SyncNow,
    /// Stop the task
    Shutdown,
}

/// Events emitted by the monitor task
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// The online flag flipped
    ConnectivityChanged(bool),
    /// A drain pass finished
    Drained(SyncResult),
    /// A drain pass aborted
    Error(String),
}

/// Monitor settings
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Time between drains while online
    pub interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

impl MonitorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.sync_interval(),
        }
    }
}

/// Handle to control the monitor task
pub struct MonitorHandle {
    /// Send commands to the task
    pub command_tx: mpsc::Sender<MonitorCommand>,
    /// Receive events from the task
    pub event_rx: mpsc::Receiver<MonitorEvent>,
    online_rx: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Current value of the online flag
    pub fn is_online(&self) -> bool {
        *self.online_rx.borrow()
    }

    /// Ask for a drain; false if the task has already stopped
    pub async fn sync_now(&self) -> bool {
        self.command_tx.send(MonitorCommand::SyncNow).await.is_ok()
    }

    /// Stop the task and wait for it to exit
    ///
    /// A drain in progress is abandoned; items it had not yet removed stay
    /// queued for the next run.
    pub async fn shutdown(self) {
        let _ = self.command_tx.send(MonitorCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!("Monitor task ended abnormally: {}", e);
        }
    }
}

/// Spawn the monitor task
///
/// If the flag is already online the queue is drained once at start.
pub fn spawn_monitor(
    engine: SyncEngine,
    api: Arc<dyn NotesApi>,
    mut online_rx: watch::Receiver<bool>,
    config: MonitorConfig,
) -> MonitorHandle {
    let (command_tx, command_rx) = mpsc::channel(16);
    let (event_tx, event_rx) = mpsc::channel(64);

    // Start state; any later flip arrives through `changed()`
    let online = *online_rx.borrow_and_update();

    let task = tokio::spawn(monitor_loop(
        engine,
        api,
        online,
        online_rx.clone(),
        config,
        command_rx,
        event_tx,
    ));

    MonitorHandle {
        command_tx,
        event_rx,
        online_rx,
        task,
    }
}

async fn monitor_loop(
    engine: SyncEngine,
    api: Arc<dyn NotesApi>,
    mut online: bool,
    mut online_rx: watch::Receiver<bool>,
    config: MonitorConfig,
    mut command_rx: mpsc::Receiver<MonitorCommand>,
    event_tx: mpsc::Sender<MonitorEvent>,
) {
    // Cleared once every sender is gone, so `changed()` stops firing
    let mut watching = true;

    let mut ticker = tokio::time::interval_at(Instant::now() + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "Connectivity monitor started ({}, every {:?})",
        if online { "online" } else { "offline" },
        config.interval
    );

    if online && drain(&engine, &api, &online_rx, &mut command_rx, &event_tx).await {
        return;
    }

    loop {
        let should_drain = tokio::select! {
            cmd = command_rx.recv() => match cmd {
                Some(MonitorCommand::SyncNow) => {
                    if !online {
                        debug!("Sync requested while offline, skipping");
                    }
                    online
                }
                Some(MonitorCommand::Shutdown) | None => break,
            },
            changed = online_rx.changed(), if watching => {
                if changed.is_err() {
                    debug!("Connectivity source closed");
                    watching = false;
                    false
                } else {
                    let now_online = *online_rx.borrow_and_update();
                    let came_online = now_online && !online;
                    if now_online != online {
                        online = now_online;
                        info!("Connectivity changed: {}", if online { "online" } else { "offline" });
                        let _ = event_tx.try_send(MonitorEvent::ConnectivityChanged(online));
                    }
                    came_online
                }
            }
            _ = ticker.tick() => online,
        };

        if should_drain && drain(&engine, &api, &online_rx, &mut command_rx, &event_tx).await {
            break;
        }
    }

    info!("Connectivity monitor stopped");
}

/// Run one drain and report it; true if shutdown was requested meanwhile
///
/// The pass ends early if the flag goes offline, leaving the rest queued.
async fn drain(
    engine: &SyncEngine,
    api: &Arc<dyn NotesApi>,
    online_rx: &watch::Receiver<bool>,
    command_rx: &mut mpsc::Receiver<MonitorCommand>,
    event_tx: &mpsc::Sender<MonitorEvent>,
) -> bool {
    let online = online_rx.clone();
    let pass = engine.drain_while(api.as_ref(), move || *online.borrow());
    tokio::pin!(pass);

    loop {
        tokio::select! {
            result = &mut pass => {
                let event = match result {
                    Ok(result) => MonitorEvent::Drained(result),
                    Err(e) => {
                        warn!("Drain failed: {}", e);
                        MonitorEvent::Error(e.to_string())
                    }
                };
                let _ = event_tx.try_send(event);
                return false;
            }
            cmd = command_rx.recv() => match cmd {
                Some(MonitorCommand::SyncNow) => debug!("Already draining"),
                Some(MonitorCommand::Shutdown) | None => return true,
            },
        }
    }
}

/// Poll `check` every `interval` and feed the result into `connectivity`
///
/// Runs until the returned handle is aborted.
pub fn spawn_reachability_poll(
    check: Arc<dyn ReachabilityCheck>,
    connectivity: Connectivity,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            connectivity.set_online(check.is_reachable().await);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Mutation, NotePayload, RemoteNote};
    use crate::remote::ApiResult;
    use crate::storage::Database;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingApi {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl NotesApi for CountingApi {
        async fn create_note(&self, note_id: &str, payload: &NotePayload) -> ApiResult<RemoteNote> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RemoteNote {
                id: note_id.to_string(),
                title: payload.title.clone(),
                content: payload.content.clone(),
                updated_at: None,
            })
        }

        async fn update_note(&self, note_id: &str, payload: &NotePayload) -> ApiResult<RemoteNote> {
            self.create_note(note_id, payload).await
        }

        async fn delete_note(&self, _note_id: &str) -> ApiResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn engine_with_item() -> SyncEngine {
        let engine = SyncEngine::new(Arc::new(Database::open_in_memory().unwrap()));
        push_create(&engine, "n1");
        engine
    }

    fn push_create(engine: &SyncEngine, id: &str) {
        engine
            .queue()
            .push(&Mutation::Create {
                entity_id: id.to_string(),
                payload: NotePayload::new("A", "B"),
            })
            .unwrap();
    }

    fn hourly() -> MonitorConfig {
        MonitorConfig {
            interval: Duration::from_secs(3600),
        }
    }

    async fn next_event(handle: &mut MonitorHandle) -> MonitorEvent {
        tokio::time::timeout(Duration::from_secs(5), handle.event_rx.recv())
            .await
            .expect("timed out waiting for monitor event")
            .expect("monitor stopped")
    }

    #[test]
    fn test_connectivity_only_notifies_on_change() {
        let connectivity = Connectivity::new(false);
        let mut rx = connectivity.subscribe();

        connectivity.set_online(false);
        assert!(!rx.has_changed().unwrap());

        connectivity.set_online(true);
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());
        assert!(connectivity.is_online());
    }

    #[tokio::test]
    async fn test_coming_online_triggers_drain() {
        let engine = engine_with_item();
        let api = Arc::new(CountingApi::default());
        let connectivity = Connectivity::new(false);

        let mut handle = spawn_monitor(engine.clone(), api.clone(), connectivity.subscribe(), hourly());
        assert!(!handle.is_online());

        connectivity.set_online(true);

        assert!(matches!(
            next_event(&mut handle).await,
            MonitorEvent::ConnectivityChanged(true)
        ));
        match next_event(&mut handle).await {
            MonitorEvent::Drained(result) => assert_eq!(result.success_count, 1),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(handle.is_online());
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
        assert!(engine.queue().is_empty().unwrap());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_sync_now_ignored_while_offline() {
        let engine = engine_with_item();
        let api = Arc::new(CountingApi::default());
        let connectivity = Connectivity::new(false);

        let mut handle = spawn_monitor(engine.clone(), api.clone(), connectivity.subscribe(), hourly());
        assert!(handle.sync_now().await);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
        assert!(handle.event_rx.try_recv().is_err());
        assert_eq!(engine.queue().len().unwrap(), 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_sync_now_while_online() {
        let engine = SyncEngine::new(Arc::new(Database::open_in_memory().unwrap()));
        let api = Arc::new(CountingApi::default());
        let connectivity = Connectivity::new(true);

        let mut handle = spawn_monitor(engine.clone(), api.clone(), connectivity.subscribe(), hourly());

        // Startup drain of an empty queue
        match next_event(&mut handle).await {
            MonitorEvent::Drained(result) => assert!(result.is_empty()),
            other => panic!("unexpected event {:?}", other),
        }

        push_create(&engine, "n2");
        assert!(handle.sync_now().await);
        match next_event(&mut handle).await {
            MonitorEvent::Drained(result) => assert_eq!(result.success_count, 1),
            other => panic!("unexpected event {:?}", other),
        }

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_interval_drains_while_online() {
        let engine = SyncEngine::new(Arc::new(Database::open_in_memory().unwrap()));
        let api = Arc::new(CountingApi::default());
        let connectivity = Connectivity::new(true);
        let config = MonitorConfig {
            interval: Duration::from_millis(20),
        };

        let mut handle = spawn_monitor(engine.clone(), api.clone(), connectivity.subscribe(), config);
        assert!(matches!(next_event(&mut handle).await, MonitorEvent::Drained(_)));

        push_create(&engine, "n3");
        loop {
            if let MonitorEvent::Drained(result) = next_event(&mut handle).await {
                if result.success_count == 1 {
                    break;
                }
            }
        }
        assert!(engine.queue().is_empty().unwrap());

        handle.shutdown().await;
    }

    /// Drops the connection after its first call
    struct FlakyLinkApi {
        connectivity: Connectivity,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl NotesApi for FlakyLinkApi {
        async fn create_note(&self, note_id: &str, payload: &NotePayload) -> ApiResult<RemoteNote> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.connectivity.set_online(false);
            Ok(RemoteNote {
                id: note_id.to_string(),
                title: payload.title.clone(),
                content: payload.content.clone(),
                updated_at: None,
            })
        }

        async fn update_note(&self, note_id: &str, payload: &NotePayload) -> ApiResult<RemoteNote> {
            self.create_note(note_id, payload).await
        }

        async fn delete_note(&self, _note_id: &str) -> ApiResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_going_offline_ends_pass_early() {
        let engine = engine_with_item();
        push_create(&engine, "n2");
        push_create(&engine, "n3");
        let connectivity = Connectivity::new(true);
        let api = Arc::new(FlakyLinkApi {
            connectivity: connectivity.clone(),
            calls: AtomicUsize::new(0),
        });

        let mut handle = spawn_monitor(engine.clone(), api.clone(), connectivity.subscribe(), hourly());

        match next_event(&mut handle).await {
            MonitorEvent::Drained(result) => {
                assert_eq!(result.success_count, 1);
                assert_eq!(result.deferred_count, 2);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(
            next_event(&mut handle).await,
            MonitorEvent::ConnectivityChanged(false)
        ));
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);

        let pending = engine.queue().pending().unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|item| item.attempts == 0));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_with_dropped_source() {
        let engine = engine_with_item();
        let api = Arc::new(CountingApi::default());
        let connectivity = Connectivity::new(false);
        let handle = spawn_monitor(engine, api, connectivity.subscribe(), hourly());

        drop(connectivity);
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .expect("shutdown hung");
    }

    struct FlagCheck {
        reachable: AtomicBool,
    }

    #[async_trait]
    impl ReachabilityCheck for FlagCheck {
        async fn is_reachable(&self) -> bool {
            self.reachable.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_reachability_poll_feeds_connectivity() {
        let check = Arc::new(FlagCheck {
            reachable: AtomicBool::new(false),
        });
        let connectivity = Connectivity::new(false);
        let mut rx = connectivity.subscribe();

        let task = spawn_reachability_poll(
            check.clone(),
            connectivity.clone(),
            Duration::from_millis(10),
        );

        check.reachable.store(true, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("check never reported online")
            .unwrap();
        assert!(connectivity.is_online());

        task.abort();
    }
}
