//! Event hub: broadcasts UI events to any number of subscribers and keeps
//! enough state to sync a late joiner.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use super::{ErrorContext, UiAdapter, UiEvent};
use crate::client::{ReplyBody, SessionId, VisualizationManifest};
use crate::error::ApiError;
use crate::workflow::{SessionState, Stage, StageSequence, TransitionEvent};

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// What a freshly connected renderer needs to draw the current screen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HubStatus {
    pub session_id: Option<SessionId>,
    pub stage: Option<Stage>,
    pub stage_label: String,
    /// Workflow progress, `(index + 1) / len` as a percentage.
    pub stage_percent: u8,
    pub stage_description: String,
    pub snapshot: Option<SessionState>,
    pub visualizations: Option<VisualizationManifest>,
}

impl HubStatus {
    fn set_stage(&mut self, stage: Option<Stage>) {
        if stage.is_none() {
            return;
        }
        self.stage = stage;
        self.stage_label = StageSequence::display_name(stage).to_string();
        self.stage_percent = match StageSequence::index_of(stage) {
            Some(idx) => (((idx + 1) * 100) / StageSequence::LEN) as u8,
            None => 0,
        };
    }
}

/// Broadcasting [`UiAdapter`].
pub struct EventHub {
    tx: broadcast::Sender<UiEvent>,
    status: RwLock<HubStatus>,
}

impl EventHub {
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Arc::new(Self {
            tx,
            status: RwLock::new(HubStatus::default()),
        })
    }

    /// Subscribe to live events. Each relay client calls this.
    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.tx.subscribe()
    }

    /// Current status for sync-on-connect.
    pub fn status(&self) -> HubStatus {
        self.status.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn update(&self, f: impl FnOnce(&mut HubStatus)) {
        let mut status = self.status.write().unwrap_or_else(|e| e.into_inner());
        f(&mut status);
    }

    fn publish(&self, event: UiEvent) {
        // Ok if no receivers are listening yet
        if self.tx.send(event).is_err() {
            debug!("No UI subscribers for event");
        }
    }
}

impl UiAdapter for EventHub {
    fn on_session_changed(&self, session_id: Option<&SessionId>) {
        self.update(|s| {
            *s = HubStatus {
                session_id: session_id.cloned(),
                ..Default::default()
            };
        });
        self.publish(UiEvent::SessionChanged {
            session_id: session_id.cloned(),
        });
    }

    fn on_stage_changed(&self, event: &TransitionEvent) {
        self.update(|s| {
            s.set_stage(Some(event.next_stage));
            s.stage_description = event.description.clone();
        });
        self.publish(UiEvent::StageChanged { event: event.clone() });
    }

    fn on_state_snapshot(&self, state: &SessionState) {
        self.update(|s| {
            s.set_stage(state.current_stage);
            s.stage_description = state.stage_description.clone();
            s.snapshot = Some(state.clone());
        });
        self.publish(UiEvent::StateSnapshot { state: state.clone() });
    }

    fn on_error(&self, error: &ApiError, context: ErrorContext) {
        self.publish(UiEvent::Error {
            context,
            message: error.to_string(),
        });
    }

    fn on_progress(&self, percent: u8, message: &str) {
        self.publish(UiEvent::Progress {
            percent,
            message: message.to_string(),
        });
    }

    fn on_chat_reply(&self, reply: &ReplyBody) {
        self.publish(UiEvent::ChatReply {
            text: reply.display_text(),
            body: reply.clone(),
        });
    }

    fn on_system_message(&self, message: &str) {
        self.publish(UiEvent::SystemMessage {
            message: message.to_string(),
        });
    }

    fn on_visualizations(&self, manifest: &VisualizationManifest) {
        self.update(|s| s.visualizations = Some(manifest.clone()));
        self.publish(UiEvent::Visualizations {
            manifest: manifest.clone(),
        });
    }

    fn on_visualizations_gave_up(&self, attempts: u32) {
        self.publish(UiEvent::VisualizationsGaveUp { attempts });
    }
}
