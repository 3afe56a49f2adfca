//! Stage tracker: holds the current stage and the latest snapshot.
//!
//! Pure state: no I/O. The orchestrator feeds it snapshots from polling and
//! explicit stage-sets from skip/chat replies, and acts on what it returns.

use tracing::debug;

use super::stage::{Stage, StageSequence};
use super::state::{SessionState, TransitionEvent};

/// Tracks the workflow stage of the active session.
#[derive(Debug, Default)]
pub struct StageTracker {
    current: Option<Stage>,
    snapshot: Option<SessionState>,
}

impl StageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current stage, `None` until the first resolved stage is seen.
    pub fn current_stage(&self) -> Option<Stage> {
        self.current
    }

    /// Most recently applied snapshot.
    pub fn snapshot(&self) -> Option<&SessionState> {
        self.snapshot.as_ref()
    }

    /// Apply a freshly fetched snapshot.
    ///
    /// The stored snapshot is always replaced. Returns a transition event only
    /// when a previously held stage differs from the incoming one; the first
    /// resolved stage is adopted silently. An unresolved incoming stage leaves
    /// the held stage untouched.
    pub fn apply_snapshot(&mut self, state: SessionState) -> Option<TransitionEvent> {
        let incoming = state.current_stage;
        let description = state.stage_description.clone();
        self.snapshot = Some(state);

        match incoming {
            Some(stage) => self.transition(stage, description),
            None => {
                debug!("Snapshot carried no resolvable stage; keeping current");
                None
            }
        }
    }

    /// Explicit stage-set after a successful skip or a chat stage change.
    /// Same event rules as [`apply_snapshot`](Self::apply_snapshot).
    pub fn set_stage(&mut self, stage: Stage, description: &str) -> Option<TransitionEvent> {
        if let Some(snapshot) = self.snapshot.as_mut() {
            snapshot.current_stage = Some(stage);
            snapshot.stage_description = description.to_string();
        }
        self.transition(stage, description.to_string())
    }

    fn transition(&mut self, next: Stage, description: String) -> Option<TransitionEvent> {
        let previous = self.current.replace(next);
        match previous {
            Some(prev) if prev != next => Some(TransitionEvent::new(prev, next, description)),
            _ => None,
        }
    }

    /// Whether the orchestrator should skip requirement gathering now.
    ///
    /// Requires the held stage to be RequirementGathering and every key
    /// question in `state` to be known. The server's
    /// `all_key_questions_known` flag is only consulted for a disagreement
    /// log; the per-question count decides.
    pub fn should_auto_advance(&self, state: &SessionState) -> bool {
        if self.current != Some(Stage::RequirementGathering) {
            return false;
        }

        let local = state.all_questions_known();
        if let Some(flag) = state.all_key_questions_known {
            if flag != local {
                debug!(
                    server_flag = flag,
                    known = state.known_question_count(),
                    total = state.key_questions.len(),
                    "Key question flag disagrees with per-question status"
                );
            }
        }
        local
    }

    /// `(index + 1) / len` of the current stage, 0 when unset.
    pub fn progress_fraction(&self) -> f64 {
        match StageSequence::index_of(self.current) {
            Some(idx) => (idx + 1) as f64 / StageSequence::LEN as f64,
            None => 0.0,
        }
    }

    /// Forget everything (used when switching sessions).
    pub fn reset(&mut self) {
        self.current = None;
        self.snapshot = None;
    }
}
