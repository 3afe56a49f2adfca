//! Workflow stage catalog: the fixed, ordered sequence a session moves through.

use serde::{Deserialize, Deserializer, Serialize};

/// The phases of a design session.
///
/// Progresses linearly: RequirementGathering → ConstraintGeneration →
/// ConstraintVisualization → ConstraintRefinement → SolutionGeneration →
/// SolutionRefinement. The server may loop SolutionRefinement back to
/// SolutionGeneration for another iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "STAGE_REQUIREMENT_GATHERING", alias = "需求收集阶段")]
    RequirementGathering,
    #[serde(rename = "STAGE_CONSTRAINT_GENERATION", alias = "约束条件生成阶段")]
    ConstraintGeneration,
    #[serde(rename = "STAGE_CONSTRAINT_VISUALIZATION", alias = "约束条件可视化阶段")]
    ConstraintVisualization,
    #[serde(rename = "STAGE_CONSTRAINT_REFINEMENT", alias = "约束条件优化阶段")]
    ConstraintRefinement,
    #[serde(rename = "STAGE_SOLUTION_GENERATION", alias = "布局方案生成阶段")]
    SolutionGeneration,
    #[serde(rename = "STAGE_SOLUTION_REFINEMENT", alias = "布局方案优化阶段")]
    SolutionRefinement,
}

impl Stage {
    /// Every stage, in workflow order.
    pub const ALL: [Stage; 6] = [
        Stage::RequirementGathering,
        Stage::ConstraintGeneration,
        Stage::ConstraintVisualization,
        Stage::ConstraintRefinement,
        Stage::SolutionGeneration,
        Stage::SolutionRefinement,
    ];

    /// Canonical wire identifier (`STAGE_*`).
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::RequirementGathering => "STAGE_REQUIREMENT_GATHERING",
            Self::ConstraintGeneration => "STAGE_CONSTRAINT_GENERATION",
            Self::ConstraintVisualization => "STAGE_CONSTRAINT_VISUALIZATION",
            Self::ConstraintRefinement => "STAGE_CONSTRAINT_REFINEMENT",
            Self::SolutionGeneration => "STAGE_SOLUTION_GENERATION",
            Self::SolutionRefinement => "STAGE_SOLUTION_REFINEMENT",
        }
    }

    /// Label the workflow server uses natively for this stage.
    pub fn native_label(&self) -> &'static str {
        match self {
            Self::RequirementGathering => "需求收集阶段",
            Self::ConstraintGeneration => "约束条件生成阶段",
            Self::ConstraintVisualization => "约束条件可视化阶段",
            Self::ConstraintRefinement => "约束条件优化阶段",
            Self::SolutionGeneration => "布局方案生成阶段",
            Self::SolutionRefinement => "布局方案优化阶段",
        }
    }

    /// Human-readable label.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::RequirementGathering => "Requirement Gathering",
            Self::ConstraintGeneration => "Constraint Generation",
            Self::ConstraintVisualization => "Constraint Visualization",
            Self::ConstraintRefinement => "Constraint Refinement",
            Self::SolutionGeneration => "Solution Generation",
            Self::SolutionRefinement => "Solution Refinement",
        }
    }

    /// Resolve a wire value. Accepts the canonical `STAGE_*` identifier or
    /// the server's native label; anything else is `None`.
    pub fn parse(value: &str) -> Option<Stage> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|s| s.wire_name() == value || s.native_label() == value)
    }

    /// Position in the sequence.
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Next stage in the linear progression, if any.
    pub fn next(&self) -> Option<Stage> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// Whether this is the last stage in the sequence.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SolutionRefinement)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Lookups over the ordered stage catalog.
///
/// Free functions take `Option<Stage>` so an unresolved server value can be
/// passed straight through; it never matches anything.
pub struct StageSequence;

impl StageSequence {
    /// Number of stages.
    pub const LEN: usize = Stage::ALL.len();

    /// Sequence index of `stage`, or `None` when unresolved.
    pub fn index_of(stage: Option<Stage>) -> Option<usize> {
        stage.map(|s| s.index())
    }

    /// True when `stage` is `reference` or later. Unresolved yields false.
    pub fn is_at_or_after(stage: Option<Stage>, reference: Stage) -> bool {
        match Self::index_of(stage) {
            Some(idx) => idx >= reference.index(),
            None => false,
        }
    }

    /// Display label, `"Unknown"` when unresolved.
    pub fn display_name(stage: Option<Stage>) -> &'static str {
        stage.map(|s| s.display_name()).unwrap_or("Unknown")
    }
}

/// Deserialize a stage leniently: unknown or missing values become `None`
/// instead of failing the whole payload.
pub(crate) fn lenient_stage<'de, D>(deserializer: D) -> Result<Option<Stage>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(|value| {
        let parsed = Stage::parse(value);
        if parsed.is_none() {
            tracing::warn!(stage = %value, "Ignoring unknown stage value");
        }
        parsed
    }))
}
