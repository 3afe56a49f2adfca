//! Workflow model: the stage catalog, server snapshots, and the tracker
//! that reconciles them.

pub mod stage;
pub mod state;
pub mod tracker;

pub use stage::{Stage, StageSequence};
pub use state::{ConstraintProgress, KeyQuestion, QuestionStatus, SessionState, TransitionEvent};
pub use tracker::StageTracker;
