//! Orchestrator: owns the active session and drives the workflow.
//!
//! User actions (start, resume, chat, skip, refresh) and poll results all
//! funnel through here. Each request captures a [`SessionLease`] when it is
//! issued; completions whose lease went stale are dropped without touching
//! the tracker or the adapter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::active::{ActiveSession, SessionLease};
use super::poller::{PollHandler, PollingScheduler};
use crate::adapter::{ErrorContext, UiAdapter};
use crate::client::{
    ChatReply, SessionApi, SessionId, SkipOutcome, VisualizationManifest, validate_message,
    validate_session_path,
};
use crate::config::{ClientConfig, PollConfig, RetryPolicy};
use crate::error::ApiError;
use crate::workflow::{SessionState, Stage, StageSequence, StageTracker, TransitionEvent};

const WELCOME_MESSAGE: &str =
    "Welcome to the Architecture AI Design System! Please describe your building project and requirements.";
const RESUMED_MESSAGE: &str = "Session resumed. You can continue from where you left off.";
const AUTO_ADVANCE_MESSAGE: &str =
    "All key questions have been answered! Moving to constraint generation stage...";

/// Root of the client: wires API, tracker, poller and adapter.
pub struct Orchestrator {
    api: Arc<dyn SessionApi>,
    adapter: Arc<dyn UiAdapter>,
    poll_config: PollConfig,
    visualization_retry: RetryPolicy,
    active: ActiveSession,
    tracker: Mutex<StageTracker>,
    stage_tx: watch::Sender<Option<Stage>>,
    poller: PollingScheduler,
    /// Set once an automatic skip is issued; cleared when the session
    /// (re-)enters requirement gathering.
    auto_advance_issued: AtomicBool,
    visualization_task: Mutex<Option<JoinHandle<()>>>,
    last_manifest: Mutex<Option<VisualizationManifest>>,
}

impl Orchestrator {
    pub fn new(
        api: Arc<dyn SessionApi>,
        adapter: Arc<dyn UiAdapter>,
        poll_config: PollConfig,
        visualization_retry: RetryPolicy,
    ) -> Arc<Self> {
        let (stage_tx, stage_rx) = watch::channel(None);
        let poller = PollingScheduler::new(Arc::clone(&api), stage_rx);
        Arc::new(Self {
            api,
            adapter,
            poll_config,
            visualization_retry,
            active: ActiveSession::new(),
            tracker: Mutex::new(StageTracker::new()),
            stage_tx,
            poller,
            auto_advance_issued: AtomicBool::new(false),
            visualization_task: Mutex::new(None),
            last_manifest: Mutex::new(None),
        })
    }

    pub fn from_config(
        api: Arc<dyn SessionApi>,
        adapter: Arc<dyn UiAdapter>,
        config: &ClientConfig,
    ) -> Arc<Self> {
        Self::new(api, adapter, config.poll.clone(), config.visualization_retry.clone())
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn session_id(&self) -> Option<SessionId> {
        self.active.session_id()
    }

    pub fn current_stage(&self) -> Option<Stage> {
        self.tracker().current_stage()
    }

    pub fn progress_fraction(&self) -> f64 {
        self.tracker().progress_fraction()
    }

    pub fn snapshot(&self) -> Option<SessionState> {
        self.tracker().snapshot().cloned()
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_running()
    }

    /// Watch the tracked stage.
    pub fn subscribe_stage(&self) -> watch::Receiver<Option<Stage>> {
        self.stage_tx.subscribe()
    }

    // ── Session lifecycle ───────────────────────────────────────────────

    /// Create a new server session and make it active.
    pub async fn start_session(self: &Arc<Self>) -> Result<SessionId, ApiError> {
        self.adapter.on_system_message("Starting new session...");
        match self.api.start().await {
            Ok(id) => {
                self.activate(id.clone()).await;
                self.adapter.on_system_message(WELCOME_MESSAGE);
                Ok(id)
            }
            Err(e) => Err(self.report(e, ErrorContext::Start)),
        }
    }

    /// Resume a stored session by path and make it active.
    pub async fn resume_session(self: &Arc<Self>, session_path: &str) -> Result<SessionId, ApiError> {
        let path = validate_session_path(session_path).map_err(|e| self.report(e, ErrorContext::Resume))?;

        self.adapter.on_system_message("Resuming session...");
        match self.api.resume(path).await {
            Ok(id) => {
                self.activate(id.clone()).await;
                self.adapter.on_system_message(RESUMED_MESSAGE);
                Ok(id)
            }
            Err(e) => Err(self.report(e, ErrorContext::Resume)),
        }
    }

    pub async fn list_sessions(&self) -> Result<Vec<String>, ApiError> {
        self.api
            .list_sessions()
            .await
            .map_err(|e| self.report(e, ErrorContext::ListSessions))
    }

    /// Stop polling and release the active session.
    pub fn dispose(&self) {
        self.poller.stop();
        self.abort_visualization_task();
        let released = self.active.dispose();
        self.tracker().reset();
        self.stage_tx.send_replace(None);
        self.auto_advance_issued.store(false, Ordering::SeqCst);
        *lock(&self.last_manifest) = None;

        if let Some(id) = released {
            info!(session_id = %id, "Session disposed");
            self.adapter.on_session_changed(None);
        }
    }

    async fn activate(self: &Arc<Self>, session_id: SessionId) {
        self.poller.stop();
        self.abort_visualization_task();
        self.tracker().reset();
        self.stage_tx.send_replace(None);
        self.auto_advance_issued.store(false, Ordering::SeqCst);
        *lock(&self.last_manifest) = None;

        let lease = self.active.create(session_id.clone());
        info!(session_id = %session_id, generation = lease.generation, "Session active");
        self.adapter.on_session_changed(Some(&session_id));

        // Reported through the adapter already
        let _ = self.refresh_state().await;

        if self.active.is_current(&lease) {
            let bridge = Arc::new(PollBridge {
                orchestrator: Arc::downgrade(self),
            });
            self.poller.start(
                session_id,
                self.poll_config.clone(),
                Arc::clone(&lease.gate),
                bridge,
            );
        }
    }

    // ── Actions ─────────────────────────────────────────────────────────

    /// Send one chat message. Never retried.
    pub async fn send_chat(self: &Arc<Self>, message: &str) -> Result<ChatReply, ApiError> {
        let message = validate_message(message).map_err(|e| self.report(e, ErrorContext::Chat))?;
        let lease = self.require_lease(ErrorContext::Chat)?;

        let reply = self
            .api
            .send_chat(&lease.session_id, message)
            .await
            .map_err(|e| self.report_if_current(&lease, e, ErrorContext::Chat))?;

        if !self.active.is_current(&lease) {
            debug!(session_id = %lease.session_id, "Dropping chat reply for inactive session");
            return Ok(reply);
        }

        self.adapter.on_chat_reply(&reply.body);

        match reply.stage_target() {
            Some(stage) => {
                let description = reply.stage_description.clone().unwrap_or_default();
                self.apply_stage(&lease, stage, &description);
            }
            None if reply.stage_change => {
                warn!("Chat reply reported a stage change without a resolvable stage");
            }
            None => {}
        }

        let _ = self.refresh_state().await;
        Ok(reply)
    }

    /// Skip the current stage, then refresh.
    pub async fn skip_stage(self: &Arc<Self>) -> Result<SkipOutcome, ApiError> {
        let lease = self.require_lease(ErrorContext::Skip)?;
        self.adapter.on_system_message("Skipping current stage...");
        let outcome = self.skip_for(&lease).await?;
        let _ = self.refresh_state().await;
        Ok(outcome)
    }

    async fn skip_for(self: &Arc<Self>, lease: &SessionLease) -> Result<SkipOutcome, ApiError> {
        let outcome = self
            .api
            .skip_stage(&lease.session_id)
            .await
            .map_err(|e| self.report_if_current(lease, e, ErrorContext::Skip))?;

        if self.active.is_current(lease) {
            self.apply_stage(lease, outcome.current_stage, &outcome.stage_description);
        } else {
            debug!(session_id = %lease.session_id, "Dropping skip outcome for inactive session");
        }
        Ok(outcome)
    }

    /// Fetch and apply a fresh snapshot.
    ///
    /// Waits for any state fetch already in flight for the session (a poll
    /// tick or another refresh) before issuing its own.
    pub async fn refresh_state(self: &Arc<Self>) -> Result<SessionState, ApiError> {
        let lease = self.require_lease(ErrorContext::Refresh)?;
        let permit = lease.gate.acquire().await;
        let result = self.api.fetch_state(&lease.session_id).await;
        self.handle_state(&lease, permit.issued_epoch(), result, ErrorContext::Refresh)
            .await
    }

    /// Apply a fetched snapshot. Callers hold the session's fetch permit.
    async fn handle_state(
        self: &Arc<Self>,
        lease: &SessionLease,
        issued_epoch: u64,
        result: Result<SessionState, ApiError>,
        context: ErrorContext,
    ) -> Result<SessionState, ApiError> {
        if !self.active.is_current(lease) {
            debug!(session_id = %lease.session_id, "Dropping state for inactive session");
            return result;
        }

        let state = result.map_err(|e| self.report(e, context))?;

        if lease.gate.is_stale(issued_epoch) {
            debug!(
                session_id = %lease.session_id,
                issued_epoch,
                "Dropping snapshot fetched before the latest stage change"
            );
            return Ok(state);
        }

        let (event, auto_advance, stage) = {
            let mut tracker = self.tracker();
            let event = tracker.apply_snapshot(state.clone());
            let auto_advance = tracker.should_auto_advance(&state);
            (event, auto_advance, tracker.current_stage())
        };
        self.stage_tx.send_replace(stage);

        self.adapter.on_state_snapshot(&state);
        if let Some(event) = &event {
            self.on_transition(lease, event);
        }

        if stage == Some(Stage::ConstraintGeneration) {
            if let Some(progress) = &state.constraint_progress {
                self.adapter.on_progress(progress.percent, &progress.message);
            }
        }

        if auto_advance && !self.auto_advance_issued.swap(true, Ordering::SeqCst) {
            info!(session_id = %lease.session_id, "All key questions known; advancing");
            self.adapter.on_system_message(AUTO_ADVANCE_MESSAGE);
            if self.skip_for(lease).await.is_err() {
                // Let a later snapshot try again
                self.auto_advance_issued.store(false, Ordering::SeqCst);
            }
        }

        if StageSequence::is_at_or_after(self.current_stage(), Stage::ConstraintVisualization) {
            self.schedule_visualization_refresh(lease, false);
        }

        Ok(state)
    }

    fn apply_stage(self: &Arc<Self>, lease: &SessionLease, stage: Stage, description: &str) {
        lease.gate.bump_epoch();
        let event = self.tracker().set_stage(stage, description);
        self.stage_tx.send_replace(Some(stage));
        if let Some(event) = &event {
            self.on_transition(lease, event);
        }
    }

    fn on_transition(self: &Arc<Self>, lease: &SessionLease, event: &TransitionEvent) {
        info!(
            session_id = %lease.session_id,
            from = %event.previous_stage,
            to = %event.next_stage,
            "Stage changed"
        );
        if event.next_stage == Stage::RequirementGathering {
            self.auto_advance_issued.store(false, Ordering::SeqCst);
        }
        self.adapter.on_stage_changed(event);

        if event.next_stage == Stage::ConstraintGeneration {
            self.adapter.on_progress(10, "Starting constraint generation...");
        } else if event.previous_stage == Stage::ConstraintGeneration
            && event.next_stage > Stage::ConstraintGeneration
        {
            self.adapter.on_progress(100, "Constraint generation complete!");
            self.schedule_visualization_refresh(lease, true);
        } else if event.next_stage >= Stage::ConstraintVisualization {
            self.schedule_visualization_refresh(lease, true);
        }
    }

    // ── Visualizations ──────────────────────────────────────────────────

    /// Look for visualization artifacts, retrying per the configured policy.
    ///
    /// Returns `Ok(None)` when retries ran out (the adapter is told) or the
    /// session changed mid-way.
    pub async fn refresh_visualizations(&self) -> Result<Option<VisualizationManifest>, ApiError> {
        let lease = self.require_lease(ErrorContext::Visualize)?;
        self.retry_visualizations(&lease).await
    }

    fn schedule_visualization_refresh(self: &Arc<Self>, lease: &SessionLease, force: bool) {
        let mut slot = lock(&self.visualization_task);
        if let Some(task) = slot.as_ref() {
            if !task.is_finished() {
                if !force {
                    return;
                }
                task.abort();
            }
        }

        let this = Arc::clone(self);
        let lease = lease.clone();
        *slot = Some(tokio::spawn(async move {
            let _ = this.retry_visualizations(&lease).await;
        }));
    }

    fn abort_visualization_task(&self) {
        if let Some(task) = lock(&self.visualization_task).take() {
            task.abort();
        }
    }

    async fn retry_visualizations(
        &self,
        lease: &SessionLease,
    ) -> Result<Option<VisualizationManifest>, ApiError> {
        let max_attempts = self.visualization_retry.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if !self.active.is_current(lease) {
                debug!(session_id = %lease.session_id, "Session changed; abandoning visualization refresh");
                return Ok(None);
            }

            match self.fetch_manifest(&lease.session_id).await {
                Ok(manifest) if !manifest.is_empty() => {
                    if self.active.is_current(lease) {
                        self.publish_manifest(&manifest);
                    }
                    return Ok(Some(manifest));
                }
                Ok(_) => debug!(attempt, "No visualizations yet"),
                Err(e) if e.is_transient() => {
                    warn!(attempt, error = %e, "Visualization fetch failed");
                }
                Err(e) => return Err(self.report_if_current(lease, e, ErrorContext::Visualize)),
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.visualization_retry.jittered_delay_after(attempt)).await;
            }
        }

        if self.active.is_current(lease) {
            warn!(session_id = %lease.session_id, attempts = max_attempts, "Gave up waiting for visualizations");
            self.adapter.on_visualizations_gave_up(max_attempts);
        }
        Ok(None)
    }

    /// Typed manifest when offered, else the flat listing classified by name.
    async fn fetch_manifest(&self, session_id: &SessionId) -> Result<VisualizationManifest, ApiError> {
        let manifest = match self.api.check_visualization_files(session_id).await? {
            Some(manifest) => manifest,
            None => {
                let paths = self.api.fetch_visualization_manifest(session_id).await?;
                VisualizationManifest::from_paths(&paths)
            }
        };
        Ok(manifest.map_paths(|p| self.api.asset_url(p)))
    }

    fn publish_manifest(&self, manifest: &VisualizationManifest) {
        let mut last = lock(&self.last_manifest);
        if last.as_ref() == Some(manifest) {
            return;
        }
        *last = Some(manifest.clone());
        drop(last);
        self.adapter.on_visualizations(manifest);
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    fn tracker(&self) -> MutexGuard<'_, StageTracker> {
        lock(&self.tracker)
    }

    fn require_lease(&self, context: ErrorContext) -> Result<SessionLease, ApiError> {
        self.active.lease().ok_or_else(|| {
            self.report(
                ApiError::InvalidInput("no active session; start or resume one first".to_string()),
                context,
            )
        })
    }

    fn report(&self, error: ApiError, context: ErrorContext) -> ApiError {
        match &error {
            ApiError::InvalidInput(_) => debug!(%context, error = %error, "Rejected locally"),
            _ => warn!(%context, error = %error, "Workflow request failed"),
        }
        self.adapter.on_error(&error, context);
        error
    }

    fn report_if_current(&self, lease: &SessionLease, error: ApiError, context: ErrorContext) -> ApiError {
        if self.active.is_current(lease) {
            self.report(error, context)
        } else {
            debug!(%context, error = %error, "Dropping error for inactive session");
            error
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.poller.stop();
        self.abort_visualization_task();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Routes poll results back into the orchestrator without keeping it alive.
struct PollBridge {
    orchestrator: Weak<Orchestrator>,
}

#[async_trait]
impl PollHandler for PollBridge {
    async fn on_poll_result(
        &self,
        session_id: &SessionId,
        issued_epoch: u64,
        result: Result<SessionState, ApiError>,
    ) {
        let Some(orchestrator) = self.orchestrator.upgrade() else {
            return;
        };
        let Some(lease) = orchestrator
            .active
            .lease()
            .filter(|lease| &lease.session_id == session_id)
        else {
            debug!(session_id = %session_id, "Poll result for released session");
            return;
        };
        let _ = orchestrator
            .handle_state(&lease, issued_epoch, result, ErrorContext::Poll)
            .await;
    }
}
