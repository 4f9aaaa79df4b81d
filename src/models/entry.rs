//! Schedule entries and their execution state machine.
//!
//! An entry is the committed plan unit: one stage requirement of one job on
//! one machine between a planned start and end. Entries are never deleted;
//! they are cancelled or superseded so the plan history stays auditable.
//!
//! # State Machine
//!
//! ```text
//! Scheduled -> Ready -> InProgress -> Completed
//!     |          |          |
//!     +----------+----------+--> OnHold | Delayed | Blocked | Cancelled
//!
//! OnHold | Delayed | Blocked --> Scheduled | Ready | InProgress | Cancelled
//! ```
//!
//! `Completed` and `Cancelled` are terminal.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::TimeWindow;

/// Execution status of a schedule entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Placed on a machine timeline.
    #[default]
    Scheduled,
    /// Inputs staged, waiting for the machine.
    Ready,
    /// Running on the machine.
    InProgress,
    /// Finished.
    Completed,
    /// Paused by an operator.
    OnHold,
    /// Running late against plan.
    Delayed,
    /// Waiting on an external condition (material, inspection).
    Blocked,
    /// Withdrawn from the plan.
    Cancelled,
}

impl EntryStatus {
    /// No further transitions allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Still occupies its machine slot.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }

    /// Paused on a side branch.
    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::OnHold | Self::Delayed | Self::Blocked)
    }

    /// Whether moving from `self` to `to` is a legal transition.
    pub fn can_transition_to(&self, to: EntryStatus) -> bool {
        use EntryStatus::*;
        match (*self, to) {
            (Scheduled, Ready) | (Ready, InProgress) | (InProgress, Completed) => true,
            (Scheduled | Ready | InProgress, OnHold | Delayed | Blocked | Cancelled) => true,
            (OnHold | Delayed | Blocked, Scheduled | Ready | InProgress | Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Scheduled => "scheduled",
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::OnHold => "on_hold",
            Self::Delayed => "delayed",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "ready" => Ok(Self::Ready),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "on_hold" => Ok(Self::OnHold),
            "delayed" => Ok(Self::Delayed),
            "blocked" => Ok(Self::Blocked),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid entry status: {s}")),
        }
    }
}

/// A committed placement of one stage of one job on one machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: String,
    pub machine_id: String,
    pub requirement_id: String,
    pub part_id: String,
    pub job_id: String,
    /// Planned start (ms), after any changeover gap.
    pub planned_start_ms: i64,
    /// Planned end (ms), exclusive.
    pub planned_end_ms: i64,
    /// Changeover required before `planned_start_ms` (ms).
    pub changeover_ms: i64,
    pub material: Option<String>,
    pub allow_parallel: bool,
    pub actual_start_ms: Option<i64>,
    pub actual_end_ms: Option<i64>,
    pub status: EntryStatus,
    /// Entry that replaced this one after a reschedule.
    pub superseded_by: Option<String>,
}

impl ScheduleEntry {
    /// Planned occupancy window on the machine.
    pub fn planned_window(&self) -> TimeWindow {
        TimeWindow::new(self.planned_start_ms, self.planned_end_ms)
    }

    /// Window used for downstream dependency math.
    ///
    /// Actual times reported by execution tracking replace planned ones.
    pub fn effective_window(&self) -> TimeWindow {
        TimeWindow::new(
            self.actual_start_ms.unwrap_or(self.planned_start_ms),
            self.actual_end_ms.unwrap_or(self.planned_end_ms),
        )
    }

    /// Planned duration (ms).
    #[inline]
    pub fn duration_ms(&self) -> i64 {
        self.planned_end_ms - self.planned_start_ms
    }
}
