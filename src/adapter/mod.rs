//! Rendering boundary.
//!
//! The core reports everything a UI needs through [`UiAdapter`]. Adapters
//! here render to a terminal, fan events out over a broadcast channel, and
//! relay that channel to browsers over WebSocket.

pub mod hub;
pub mod terminal;
pub mod ws;

pub use hub::EventHub;
pub use terminal::TerminalAdapter;
pub use ws::{event_routes, serve_relay};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::client::{ReplyBody, SessionId, VisualizationManifest};
use crate::error::ApiError;
use crate::workflow::{SessionState, TransitionEvent};

/// Where an error surfaced, so the UI can word it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorContext {
    Start,
    Resume,
    ListSessions,
    Chat,
    Skip,
    Refresh,
    Poll,
    Visualize,
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Start => "starting session",
            Self::Resume => "resuming session",
            Self::ListSessions => "listing sessions",
            Self::Chat => "sending message",
            Self::Skip => "skipping stage",
            Self::Refresh => "refreshing state",
            Self::Poll => "polling state",
            Self::Visualize => "loading visualizations",
        };
        f.write_str(s)
    }
}

/// Receives state-change events from the orchestrator and poller.
///
/// Calls arrive in the order the underlying requests completed. Methods must
/// not block; adapters that do I/O should hand off to a task.
pub trait UiAdapter: Send + Sync {
    /// A session became active (`Some`) or was released (`None`).
    fn on_session_changed(&self, _session_id: Option<&SessionId>) {}

    fn on_stage_changed(&self, event: &TransitionEvent);

    fn on_state_snapshot(&self, state: &SessionState);

    fn on_error(&self, error: &ApiError, context: ErrorContext);

    /// Constraint generation progress, 0..=100.
    fn on_progress(&self, percent: u8, message: &str);

    fn on_chat_reply(&self, _reply: &ReplyBody) {}

    fn on_system_message(&self, _message: &str) {}

    fn on_visualizations(&self, _manifest: &VisualizationManifest) {}

    /// Visualization retries were exhausted without finding any artifact.
    fn on_visualizations_gave_up(&self, _attempts: u32) {}
}

/// Serializable form of every adapter callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    SessionChanged { session_id: Option<SessionId> },
    StageChanged { event: TransitionEvent },
    StateSnapshot { state: SessionState },
    Error { context: ErrorContext, message: String },
    Progress { percent: u8, message: String },
    ChatReply { text: String, body: ReplyBody },
    SystemMessage { message: String },
    Visualizations { manifest: VisualizationManifest },
    VisualizationsGaveUp { attempts: u32 },
}

/// Forwards every callback to each wrapped adapter in order.
#[derive(Default)]
pub struct FanoutAdapter {
    adapters: Vec<Arc<dyn UiAdapter>>,
}

impl FanoutAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, adapter: Arc<dyn UiAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl UiAdapter for FanoutAdapter {
    fn on_session_changed(&self, session_id: Option<&SessionId>) {
        self.adapters.iter().for_each(|a| a.on_session_changed(session_id));
    }

    fn on_stage_changed(&self, event: &TransitionEvent) {
        self.adapters.iter().for_each(|a| a.on_stage_changed(event));
    }

    fn on_state_snapshot(&self, state: &SessionState) {
        self.adapters.iter().for_each(|a| a.on_state_snapshot(state));
    }

    fn on_error(&self, error: &ApiError, context: ErrorContext) {
        self.adapters.iter().for_each(|a| a.on_error(error, context));
    }

    fn on_progress(&self, percent: u8, message: &str) {
        self.adapters.iter().for_each(|a| a.on_progress(percent, message));
    }

    fn on_chat_reply(&self, reply: &ReplyBody) {
        self.adapters.iter().for_each(|a| a.on_chat_reply(reply));
    }

    fn on_system_message(&self, message: &str) {
        self.adapters.iter().for_each(|a| a.on_system_message(message));
    }

    fn on_visualizations(&self, manifest: &VisualizationManifest) {
        self.adapters.iter().for_each(|a| a.on_visualizations(manifest));
    }

    fn on_visualizations_gave_up(&self, attempts: u32) {
        self.adapters.iter().for_each(|a| a.on_visualizations_gave_up(attempts));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_type_tag() {
        let event = UiEvent::Progress {
            percent: 40,
            message: "Generating constraints...".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["percent"], 40);

        let json = serde_json::to_value(UiEvent::VisualizationsGaveUp { attempts: 3 }).unwrap();
        assert_eq!(json["type"], "visualizations_gave_up");
    }

    #[test]
    fn fanout_reaches_every_adapter() {
        let a = EventHub::new();
        let b = EventHub::new();
        let mut rx_a = a.subscribe();
        let mut rx_b = b.subscribe();

        let fanout = FanoutAdapter::new()
            .with(a.clone() as Arc<dyn UiAdapter>)
            .with(b.clone() as Arc<dyn UiAdapter>);
        assert_eq!(fanout.len(), 2);

        fanout.on_system_message("hello");
        assert!(matches!(rx_a.try_recv().unwrap(), UiEvent::SystemMessage { .. }));
        assert!(matches!(rx_b.try_recv().unwrap(), UiEvent::SystemMessage { .. }));
    }
}
