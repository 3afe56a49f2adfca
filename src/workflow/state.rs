//! Server-reported session snapshot and the events derived from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::stage::{Stage, lenient_stage};

/// Whether a key question has been answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum QuestionStatus {
    Known,
    Unknown,
}

impl From<String> for QuestionStatus {
    fn from(value: String) -> Self {
        let value = value.trim();
        if value.eq_ignore_ascii_case("known") || value == "已知" {
            Self::Known
        } else {
            Self::Unknown
        }
    }
}

/// A requirement item the server tracks during requirement gathering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyQuestion {
    #[serde(default)]
    pub category: String,
    pub status: QuestionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl KeyQuestion {
    pub fn is_known(&self) -> bool {
        self.status == QuestionStatus::Known
    }
}

/// Progress of the server's constraint generation job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintProgress {
    /// 0..=100, clamped on input.
    #[serde(alias = "progress", deserialize_with = "clamped_percent")]
    pub percent: u8,
    #[serde(default)]
    pub message: String,
}

/// Full replace-on-fetch snapshot of a session, as returned by `/api/state`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    /// `None` when the server reported a stage outside the known sequence.
    #[serde(default, deserialize_with = "lenient_stage")]
    pub current_stage: Option<Stage>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub stage_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_requirement_guess: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spatial_understanding_record: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub key_questions: Vec<KeyQuestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint_progress: Option<ConstraintProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_key_questions_known: Option<bool>,
}

impl SessionState {
    /// Number of key questions with status known.
    pub fn known_question_count(&self) -> usize {
        self.key_questions.iter().filter(|q| q.is_known()).count()
    }

    /// Locally verified completion: at least one question and all known.
    pub fn all_questions_known(&self) -> bool {
        !self.key_questions.is_empty() && self.key_questions.iter().all(KeyQuestion::is_known)
    }
}

/// Emitted when the tracked stage changes from one resolved stage to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub previous_stage: Stage,
    pub next_stage: Stage,
    pub description: String,
    pub observed_at: DateTime<Utc>,
}

impl TransitionEvent {
    pub fn new(previous_stage: Stage, next_stage: Stage, description: impl Into<String>) -> Self {
        Self {
            previous_stage,
            next_stage,
            description: description.into(),
            observed_at: Utc::now(),
        }
    }

    /// Whether this event moves forward in the sequence.
    pub fn is_forward(&self) -> bool {
        self.next_stage > self.previous_stage
    }
}

fn clamped_percent<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    if raw.is_nan() {
        return Ok(0);
    }
    Ok(raw.clamp(0.0, 100.0).round() as u8)
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
