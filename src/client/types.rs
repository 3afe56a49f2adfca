//! Typed results of workflow API calls.

use serde::{Deserialize, Serialize};

use crate::workflow::Stage;

/// Opaque server-issued session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The `response` part of a chat reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplyBody {
    /// Plain assistant text.
    Text { text: String },
    /// Structured payload; `question` is the follow-up to show when present.
    Structured {
        question: Option<String>,
        raw: serde_json::Value,
    },
}

impl ReplyBody {
    /// Build from the raw `response` value of a chat payload.
    pub fn from_value(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(text) => Self::Text { text },
            serde_json::Value::Null => Self::Text {
                text: String::new(),
            },
            other => {
                let question = other
                    .get("question")
                    .and_then(|q| q.as_str())
                    .map(str::to_string);
                Self::Structured {
                    question,
                    raw: other,
                }
            }
        }
    }

    /// Text to show the user: the plain text, the question, or the raw JSON.
    pub fn display_text(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::Structured {
                question: Some(q), ..
            } => q.clone(),
            Self::Structured { raw, .. } => raw.to_string(),
        }
    }
}

/// Reply to `send_chat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub body: ReplyBody,
    pub stage_change: bool,
    /// Resolved `next_stage`; `None` when absent or unknown.
    pub next_stage: Option<Stage>,
    pub current_stage: Option<Stage>,
    pub stage_description: Option<String>,
}

impl ChatReply {
    /// Stage the tracker should move to, if the reply reports a change.
    pub fn stage_target(&self) -> Option<Stage> {
        if !self.stage_change {
            return None;
        }
        self.next_stage.or(self.current_stage)
    }
}

/// Reply to `skip_stage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipOutcome {
    pub previous_stage: Option<Stage>,
    pub current_stage: Stage,
    pub stage_description: String,
}
