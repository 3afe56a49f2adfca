//! State poller: periodic `fetch_state` for the active session.
//!
//! One loop per session. A tick that finds the session's [`StateGate`] taken,
//! by an earlier tick or an explicit refresh, is skipped rather than queued,
//! so a slow server never builds a backlog.
//! The interval is re-read every tick from the stage watch channel, switching
//! to the fast interval during processing-heavy stages.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::gate::StateGate;
use crate::client::{SessionApi, SessionId};
use crate::config::PollConfig;
use crate::error::ApiError;
use crate::workflow::{SessionState, Stage};

/// Receives the outcome of each poll that is still relevant.
///
/// Runs while the fetch permit is still held, so no other state fetch for
/// the session starts until it returns.
#[async_trait]
pub trait PollHandler: Send + Sync {
    /// `issued_epoch` is the gate's stage epoch when the fetch was issued.
    async fn on_poll_result(
        &self,
        session_id: &SessionId,
        issued_epoch: u64,
        result: Result<SessionState, ApiError>,
    );
}

struct Running {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

#[derive(Default)]
struct Shared {
    /// Session and run the scheduler currently polls for.
    active: Mutex<Option<(SessionId, u64)>>,
    skipped: AtomicU64,
}

impl Shared {
    fn is_active(&self, session_id: &SessionId, run: u64) -> bool {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        matches!(&*active, Some((id, r)) if id == session_id && *r == run)
    }

    fn set_active(&self, value: Option<(SessionId, u64)>) {
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = value;
    }
}

/// Drives periodic state fetches without overlap.
pub struct PollingScheduler {
    api: Arc<dyn SessionApi>,
    stage_rx: watch::Receiver<Option<Stage>>,
    shared: Arc<Shared>,
    next_run: AtomicU64,
    running: Mutex<Option<Running>>,
}

impl PollingScheduler {
    /// `stage_rx` supplies the current stage for interval selection.
    pub fn new(api: Arc<dyn SessionApi>, stage_rx: watch::Receiver<Option<Stage>>) -> Self {
        Self {
            api,
            stage_rx,
            shared: Arc::new(Shared::default()),
            next_run: AtomicU64::new(0),
            running: Mutex::new(None),
        }
    }

    /// Start polling `session_id`, replacing any previous loop.
    pub fn start(
        &self,
        session_id: SessionId,
        config: PollConfig,
        gate: Arc<StateGate>,
        handler: Arc<dyn PollHandler>,
    ) {
        self.stop();

        let run = self.next_run.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.set_active(Some((session_id.clone(), run)));

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let api = Arc::clone(&self.api);
        let shared = Arc::clone(&self.shared);
        let stage_rx = self.stage_rx.clone();

        info!(
            session_id = %session_id,
            base_ms = config.base_interval.as_millis() as u64,
            fast_ms = config.fast_interval.as_millis() as u64,
            "State poller started"
        );

        let handle = tokio::spawn(async move {
            loop {
                let interval = config.interval_for(*stage_rx.borrow());

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown_rx.changed() => {
                        debug!(session_id = %session_id, "State poller shutting down");
                        return;
                    }
                }

                let Some(permit) = gate.try_acquire() else {
                    shared.skipped.fetch_add(1, Ordering::Relaxed);
                    debug!(session_id = %session_id, "State fetch already in flight; skipping tick");
                    continue;
                };

                let api = Arc::clone(&api);
                let shared = Arc::clone(&shared);
                let handler = Arc::clone(&handler);
                let session_id = session_id.clone();
                // The permit moves into the task and is released when it ends
                tokio::spawn(async move {
                    let result = api.fetch_state(&session_id).await;
                    if shared.is_active(&session_id, run) {
                        handler
                            .on_poll_result(&session_id, permit.issued_epoch(), result)
                            .await;
                    } else {
                        debug!(session_id = %session_id, "Discarding poll result for inactive session");
                    }
                    drop(permit);
                });
            }
        });

        *self.lock_running() = Some(Running {
            handle,
            shutdown: shutdown_tx,
        });
    }

    /// Cancel pending ticks. An in-flight fetch finishes but its result is dropped.
    pub fn stop(&self) {
        self.shared.set_active(None);
        if let Some(running) = self.lock_running().take() {
            let _ = running.shutdown.send(true);
            running.handle.abort();
            info!("State poller stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_running()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Ticks skipped because a fetch was still in flight, across all runs.
    pub fn skipped_ticks(&self) -> u64 {
        self.shared.skipped.load(Ordering::Relaxed)
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
