//! Stage requirement model.
//!
//! A stage requirement binds a part to a stage definition: where the stage
//! sits in the workflow, whether it gates downstream work, which machines it
//! prefers, and any per-part overrides of the definition's defaults.
//!
//! Requirements are authored with the part (or instantiated from a workflow
//! template) and are read-only at schedule time: the orchestrator only
//! produces [`ScheduleEntry`](super::ScheduleEntry) values from them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::FieldValue;

/// Machine preference for a stage requirement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineAffinity {
    /// Machine ids, most preferred first.
    pub preferred: Vec<String>,
    /// When set, only the first preferred machine may be used.
    pub requires_specific_machine: bool,
}

impl MachineAffinity {
    /// The pinned machine, if the requirement demands one.
    pub fn specific_machine(&self) -> Option<&str> {
        if self.requires_specific_machine {
            self.preferred.first().map(String::as_str)
        } else {
            None
        }
    }
}

/// A part's requirement for one manufacturing stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRequirement {
    /// Unique requirement identifier.
    pub id: String,
    /// Owning part identifier.
    pub part_id: String,
    /// Stage definition identifier.
    pub stage_id: String,
    /// Default ordering key (not required to be unique).
    pub execution_order: i32,
    /// Whether the stage must run for the part to be complete.
    pub is_required: bool,
    /// Whether downstream stages wait for this one.
    pub is_blocking: bool,
    /// Whether this stage may share a machine with other parallel stages.
    pub allow_parallel: bool,
    pub affinity: MachineAffinity,
    pub duration_hours_override: Option<f64>,
    pub setup_minutes_override: Option<i64>,
    pub teardown_minutes_override: Option<i64>,
    pub hourly_rate_override: Option<f64>,
    /// Material for this stage when it differs from the part's material.
    pub material: Option<String>,
    /// Values for the definition's custom field schema.
    pub custom_fields: HashMap<String, FieldValue>,
}

impl StageRequirement {
    /// Creates a required, blocking requirement.
    pub fn new(
        id: impl Into<String>,
        part_id: impl Into<String>,
        stage_id: impl Into<String>,
        execution_order: i32,
    ) -> Self {
        Self {
            id: id.into(),
            part_id: part_id.into(),
            stage_id: stage_id.into(),
            execution_order,
            is_required: true,
            is_blocking: true,
            allow_parallel: false,
            affinity: MachineAffinity::default(),
            duration_hours_override: None,
            setup_minutes_override: None,
            teardown_minutes_override: None,
            hourly_rate_override: None,
            material: None,
            custom_fields: HashMap::new(),
        }
    }

    /// Marks the stage optional.
    pub fn optional(mut self) -> Self {
        self.is_required = false;
        self
    }

    /// Marks the stage as non-blocking for downstream stages.
    pub fn non_blocking(mut self) -> Self {
        self.is_blocking = false;
        self
    }

    pub fn with_parallel(mut self) -> Self {
        self.allow_parallel = true;
        self
    }

    /// Appends a preferred machine (lower rank than those already listed).
    pub fn with_preferred_machine(mut self, machine_id: impl Into<String>) -> Self {
        self.affinity.preferred.push(machine_id.into());
        self
    }

    /// Pins the stage to one machine.
    pub fn with_specific_machine(mut self, machine_id: impl Into<String>) -> Self {
        self.affinity.preferred.insert(0, machine_id.into());
        self.affinity.requires_specific_machine = true;
        self
    }

    pub fn with_duration_hours(mut self, hours: f64) -> Self {
        self.duration_hours_override = Some(hours);
        self
    }

    pub fn with_setup_minutes(mut self, minutes: i64) -> Self {
        self.setup_minutes_override = Some(minutes);
        self
    }

    pub fn with_teardown_minutes(mut self, minutes: i64) -> Self {
        self.teardown_minutes_override = Some(minutes);
        self
    }

    pub fn with_hourly_rate(mut self, rate: f64) -> Self {
        self.hourly_rate_override = Some(rate);
        self
    }

    pub fn with_material(mut self, material: impl Into<String>) -> Self {
        self.material = Some(material.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.custom_fields.insert(name.into(), value);
        self
    }

    /// Whether this stage must finish before dependents may be placed.
    pub fn gates_downstream(&self) -> bool {
        self.is_required && self.is_blocking
    }
}
