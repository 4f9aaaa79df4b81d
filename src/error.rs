//! Error taxonomy for the scheduling engine.
//!
//! Errors fall into two groups:
//!
//! - **Structural** (cycle, invalid interval, ambiguous template, setup
//!   problems): authoring mistakes that must reach a human. Never retried.
//! - **Search outcomes** ([`ConflictError`], [`InfeasibleError`]): normal
//!   results of probing a constrained timeline. Callers may retry with a
//!   different slot or fall back to manual placement.
//!
//! [`ScheduleError::is_retryable`] tells the two apart.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::EntryStatus;
use crate::validation::ValidationError;

/// A single edge taking part in a dependency cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleEdge {
    /// Stage requirement that waits.
    pub dependent: String,
    /// Stage requirement being waited on.
    pub prerequisite: String,
}

impl fmt::Display for CycleEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.dependent, self.prerequisite)
    }
}

fn join_edges(edges: &[CycleEdge]) -> String {
    edges
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// The hard dependency graph of a part contains a cycle.
///
/// `edges` lists every edge of the detected cycle, in traversal order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle in part '{part_id}': {}", join_edges(.edges))]
pub struct CycleError {
    pub part_id: String,
    pub edges: Vec<CycleEdge>,
}

/// Stage catalog errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("stage definition '{0}' already exists")]
    Duplicate(String),
    #[error("unknown stage definition '{0}'")]
    Unknown(String),
}

/// Custom field validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("required field '{0}' is missing")]
    Missing(String),
    #[error("field '{0}' is not declared by the stage definition")]
    Undeclared(String),
    #[error("field '{field}' expects a {expected} value")]
    TypeMismatch { field: String, expected: String },
    #[error("field '{field}' does not allow '{value}'")]
    InvalidChoice { field: String, value: String },
}

/// Dependency graph construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("stage requirement '{0}' is not in the graph")]
    UnknownStage(String),
    #[error("stage requirement '{0}' is already in the graph")]
    DuplicateStage(String),
    #[error("stage requirement '{0}' cannot depend on itself")]
    SelfDependency(String),
}

/// Workflow authoring inconsistencies found while resolving a part.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(
        "part '{part_id}' has explicit requirements and template '{template_id}' \
         overrides for stages it does not contain: {}", .stages.join(", ")
    )]
    AmbiguousTemplate {
        part_id: String,
        template_id: String,
        stages: Vec<String>,
    },

    #[error("part '{part_id}' references unknown workflow template '{template_id}'")]
    UnknownTemplate { part_id: String, template_id: String },

    #[error("requirement '{requirement_id}' references unknown stage '{stage_id}'")]
    UnknownStage {
        requirement_id: String,
        stage_id: String,
    },

    #[error("requirement '{requirement_id}' belongs to part '{owner}', not '{part_id}'")]
    ForeignRequirement {
        part_id: String,
        requirement_id: String,
        owner: String,
    },

    #[error("part '{part_id}' lists requirement '{requirement_id}' twice")]
    DuplicateRequirement {
        part_id: String,
        requirement_id: String,
    },

    #[error(
        "dependency '{dependent}' -> '{prerequisite}' crosses outside part '{part_id}'"
    )]
    CrossPartDependency {
        part_id: String,
        dependent: String,
        prerequisite: String,
    },

    #[error("blocking stage '{requirement_id}' of part '{part_id}' gates no successor")]
    OrphanedBlockingStage {
        part_id: String,
        requirement_id: String,
    },

    #[error("requirement '{requirement_id}': {source}")]
    InvalidField {
        requirement_id: String,
        #[source]
        source: FieldError,
    },

    #[error("part '{0}' has no stage requirements and no template")]
    EmptyWorkflow(String),

    #[error("requirement '{requirement_id}' must run on a specific machine but names none")]
    MissingPinnedMachine { requirement_id: String },
}

/// The candidate interval overlaps committed work on the machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "interval [{start_ms}, {end_ms}) conflicts on machine '{machine_id}' with {}",
    .conflicting_entries.join(", ")
)]
pub struct ConflictError {
    pub machine_id: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub conflicting_entries: Vec<String>,
}

/// Machine timeline errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimelineError {
    #[error("invalid interval [{start_ms}, {end_ms}): length must be positive")]
    InvalidInterval { start_ms: i64, end_ms: i64 },

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error("unknown machine '{0}'")]
    UnknownMachine(String),

    #[error("entry '{entry_id}' is already on machine '{machine_id}'")]
    DuplicateEntry { machine_id: String, entry_id: String },
}

/// Why a candidate machine could not host a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionReason {
    /// Machine id is not registered with the orchestrator.
    UnknownMachine,
    /// Machine is outside the stage definition's eligibility set.
    NotEligible,
    /// Machine is not a member of the pool the stage draws from.
    NotInPool { pool_id: String },
    /// A resource pool marks the machine unavailable.
    PoolUnavailable { pool_id: String },
    /// No feasible slot before the search horizon.
    HorizonExhausted { searched_until_ms: i64 },
    /// Probe budget spent before a slot was found.
    ProbeLimitReached { probes: usize },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownMachine => write!(f, "unknown machine"),
            Self::NotEligible => write!(f, "not eligible for stage"),
            Self::NotInPool { pool_id } => write!(f, "not a member of pool '{pool_id}'"),
            Self::PoolUnavailable { pool_id } => write!(f, "unavailable in pool '{pool_id}'"),
            Self::HorizonExhausted { searched_until_ms } => {
                write!(f, "no free slot before {searched_until_ms}")
            }
            Self::ProbeLimitReached { probes } => write!(f, "gave up after {probes} probes"),
        }
    }
}

/// One exhausted candidate in an [`InfeasibleError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRejection {
    pub machine_id: String,
    pub reason: RejectionReason,
}

fn join_rejections(candidates: &[CandidateRejection]) -> String {
    if candidates.is_empty() {
        return "no candidate machines".to_string();
    }
    candidates
        .iter()
        .map(|c| format!("{} ({})", c.machine_id, c.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// No candidate machine and time satisfies the constraints.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "stage '{requirement_id}' of job '{job_id}' is infeasible from {earliest_start_ms}: {}",
    join_rejections(.candidates)
)]
pub struct InfeasibleError {
    pub requirement_id: String,
    pub job_id: String,
    pub earliest_start_ms: i64,
    /// Candidates in evaluation order.
    pub candidates: Vec<CandidateRejection>,
}

/// Top-level error returned by the orchestrator.
#[derive(Debug, Clone, Error)]
pub enum ScheduleError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Timeline(#[from] TimelineError),

    #[error(transparent)]
    Infeasible(#[from] InfeasibleError),

    #[error(
        "stage '{requirement_id}' of job '{job_id}' needs upstream stage \
         '{upstream_id}' scheduled first"
    )]
    UpstreamNotScheduled {
        requirement_id: String,
        upstream_id: String,
        job_id: String,
    },

    #[error("unknown stage requirement '{0}'")]
    UnknownRequirement(String),

    #[error("unknown stage definition '{0}'")]
    UnknownStage(String),

    #[error("unknown schedule entry '{0}'")]
    UnknownEntry(String),

    #[error("entry '{entry_id}' cannot move from {from} to {to}")]
    InvalidTransition {
        entry_id: String,
        from: EntryStatus,
        to: EntryStatus,
    },

    #[error(
        "entry '{entry_id}' cannot move: placed dependent '{dependent_id}' would have \
         to start at or after {required_start_ms}"
    )]
    DependentsPlaced {
        entry_id: String,
        dependent_id: String,
        required_start_ms: i64,
    },

    #[error("invalid scheduling setup ({} problems)", .0.len())]
    InvalidSetup(Vec<ValidationError>),

    #[error("placement cancelled before commit")]
    Cancelled,
}

impl ScheduleError {
    /// Whether the caller may retry with adjusted parameters.
    ///
    /// Only timeline conflicts and infeasibility are search outcomes; every
    /// other variant needs a human to fix the inputs.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeline(TimelineError::Conflict(_)) | Self::Infeasible(_)
        )
    }
}

impl From<CycleError> for ScheduleError {
    fn from(err: CycleError) -> Self {
        Self::Resolution(ResolutionError::Cycle(err))
    }
}

impl From<ConflictError> for ScheduleError {
    fn from(err: ConflictError) -> Self {
        Self::Timeline(TimelineError::Conflict(err))
    }
}

pub type Result<T> = std::result::Result<T, ScheduleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_lists_edges() {
        let err = CycleError {
            part_id: "P1".into(),
            edges: vec![
                CycleEdge {
                    dependent: "A".into(),
                    prerequisite: "B".into(),
                },
                CycleEdge {
                    dependent: "B".into(),
                    prerequisite: "A".into(),
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "dependency cycle in part 'P1': A -> B, B -> A"
        );
    }

    #[test]
    fn test_retryable_classification() {
        let conflict = ScheduleError::from(ConflictError {
            machine_id: "M1".into(),
            start_ms: 0,
            end_ms: 10,
            conflicting_entries: vec!["SE-1".into()],
        });
        assert!(conflict.is_retryable());

        let infeasible = ScheduleError::from(InfeasibleError {
            requirement_id: "R1".into(),
            job_id: "J1".into(),
            earliest_start_ms: 0,
            candidates: vec![],
        });
        assert!(infeasible.is_retryable());
        assert!(infeasible.to_string().contains("no candidate machines"));

        let cycle = ScheduleError::from(CycleError {
            part_id: "P1".into(),
            edges: vec![],
        });
        assert!(!cycle.is_retryable());

        let invalid = ScheduleError::from(TimelineError::InvalidInterval {
            start_ms: 5,
            end_ms: 5,
        });
        assert!(!invalid.is_retryable());

        let blocked = ScheduleError::DependentsPlaced {
            entry_id: "SE-000001".into(),
            dependent_id: "SE-000002".into(),
            required_start_ms: 28,
        };
        assert!(!blocked.is_retryable());
        assert!(blocked.to_string().contains("SE-000002"));
    }

    #[test]
    fn test_rejection_display() {
        let err = InfeasibleError {
            requirement_id: "R1".into(),
            job_id: "J1".into(),
            earliest_start_ms: 100,
            candidates: vec![
                CandidateRejection {
                    machine_id: "M1".into(),
                    reason: RejectionReason::HorizonExhausted {
                        searched_until_ms: 500,
                    },
                },
                CandidateRejection {
                    machine_id: "M2".into(),
                    reason: RejectionReason::PoolUnavailable {
                        pool_id: "printers".into(),
                    },
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("M1 (no free slot before 500)"));
        assert!(msg.contains("M2 (unavailable in pool 'printers')"));
    }
}
