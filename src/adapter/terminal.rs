//! Terminal renderer: assistant replies on stdout, status on stderr.

use super::{ErrorContext, UiAdapter};
use crate::client::{ReplyBody, SessionId, VisualizationManifest};
use crate::error::ApiError;
use crate::workflow::{SessionState, StageSequence, TransitionEvent};

/// Renders UI events for the interactive REPL.
pub struct TerminalAdapter {
    /// Print full snapshots (requirements, key questions) on every poll.
    verbose: bool,
}

impl TerminalAdapter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

/// Multi-line summary of a snapshot for the `/state` command.
pub fn render_snapshot(state: &SessionState) -> String {
    let mut parts = vec![format!(
        "Stage: {} — {}",
        StageSequence::display_name(state.current_stage),
        state.stage_description
    )];

    parts.push(format!(
        "Requirements: {}",
        state
            .user_requirement_guess
            .as_deref()
            .unwrap_or("No requirements gathered yet.")
    ));
    parts.push(format!(
        "Spatial understanding: {}",
        state
            .spatial_understanding_record
            .as_deref()
            .unwrap_or("No spatial information gathered yet.")
    ));

    if !state.key_questions.is_empty() {
        parts.push(format!(
            "Key questions ({}/{} known):",
            state.known_question_count(),
            state.key_questions.len()
        ));
        for q in &state.key_questions {
            let mark = if q.is_known() { "✓" } else { "·" };
            match &q.details {
                Some(details) => parts.push(format!("  {mark} {}: {details}", q.category)),
                None => parts.push(format!("  {mark} {}", q.category)),
            }
        }
    }

    parts.join("\n")
}

impl UiAdapter for TerminalAdapter {
    fn on_session_changed(&self, session_id: Option<&SessionId>) {
        match session_id {
            Some(id) => eprintln!("ℹ️  Session {id}"),
            None => eprintln!("ℹ️  Session closed"),
        }
    }

    fn on_stage_changed(&self, event: &TransitionEvent) {
        let position = event.next_stage.index() + 1;
        eprintln!(
            "➡️  Stage changed from {} to {} ({position}/{})",
            event.previous_stage.display_name(),
            event.next_stage.display_name(),
            StageSequence::LEN,
        );
        if !event.description.is_empty() {
            eprintln!("   {}", event.description);
        }
    }

    fn on_state_snapshot(&self, state: &SessionState) {
        if self.verbose {
            eprintln!("{}", render_snapshot(state));
        }
    }

    fn on_error(&self, error: &ApiError, context: ErrorContext) {
        eprintln!("❌ Error {context}: {error}");
    }

    fn on_progress(&self, percent: u8, message: &str) {
        eprintln!("⏳ [{percent:>3}%] {message}");
    }

    fn on_chat_reply(&self, reply: &ReplyBody) {
        println!("\n{}\n", reply.display_text());
        eprint!("> ");
    }

    fn on_system_message(&self, message: &str) {
        eprintln!("ℹ️  {message}");
    }

    fn on_visualizations(&self, manifest: &VisualizationManifest) {
        let entries = [
            ("Room graph", &manifest.room_graph),
            ("Constraints table", &manifest.constraints_table),
            ("Layout", &manifest.layout),
        ];
        for (label, path) in entries {
            if let Some(path) = path {
                eprintln!("🖼️  {label}: {path}");
            }
        }
    }

    fn on_visualizations_gave_up(&self, attempts: u32) {
        eprintln!("⚠️  No visualizations available after {attempts} attempts. Try /vis later.");
    }
}
