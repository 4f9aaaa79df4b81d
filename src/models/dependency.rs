//! Stage-to-stage dependency model.
//!
//! A dependency is a directed edge from a dependent stage requirement to the
//! prerequisite it waits on, typed the way project schedules type them
//! (finish-to-start, start-to-start, finish-to-finish, start-to-finish) and
//! offset by a lag. Negative lag models permitted overlap.
//!
//! # Reference
//! PMI (2017), "PMBOK Guide", 6.3 Sequence Activities (dependency types)

use std::fmt;

use serde::{Deserialize, Serialize};

use super::calendar::hours_to_ms;

/// Which endpoints of the two stages a dependency relates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    /// Dependent starts after the prerequisite finishes.
    #[default]
    FinishToStart,
    /// Dependent starts after the prerequisite starts.
    StartToStart,
    /// Dependent finishes after the prerequisite finishes.
    FinishToFinish,
    /// Dependent finishes after the prerequisite starts.
    StartToFinish,
}

impl DependencyType {
    /// Whether the constraint bounds the dependent's end rather than its start.
    pub fn constrains_finish(&self) -> bool {
        matches!(self, Self::FinishToFinish | Self::StartToFinish)
    }
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Self::FinishToStart => "FS",
            Self::StartToStart => "SS",
            Self::FinishToFinish => "FF",
            Self::StartToFinish => "SF",
        };
        f.write_str(code)
    }
}

/// A directed dependency between two stage requirements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDependency {
    /// Requirement that waits.
    pub dependent: String,
    /// Requirement being waited on.
    pub prerequisite: String,
    pub dependency_type: DependencyType,
    /// Offset applied to the constraint (ms). May be negative.
    pub lag_ms: i64,
    /// Optional dependencies are advisory: shown, never enforced.
    pub optional: bool,
}

impl StageDependency {
    /// Creates a zero-lag finish-to-start dependency.
    pub fn new(dependent: impl Into<String>, prerequisite: impl Into<String>) -> Self {
        Self {
            dependent: dependent.into(),
            prerequisite: prerequisite.into(),
            dependency_type: DependencyType::FinishToStart,
            lag_ms: 0,
            optional: false,
        }
    }

    pub fn with_type(mut self, dependency_type: DependencyType) -> Self {
        self.dependency_type = dependency_type;
        self
    }

    pub fn with_lag_ms(mut self, lag_ms: i64) -> Self {
        self.lag_ms = lag_ms;
        self
    }

    pub fn with_lag_hours(mut self, hours: f64) -> Self {
        self.lag_ms = hours_to_ms(hours);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}
