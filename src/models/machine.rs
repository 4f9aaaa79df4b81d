//! Machines and resource pools.
//!
//! A machine hosts stage executions: SLS/DMLS printers, wire EDM, CNC mills,
//! coating booths, assembly cells. Machines that can stand in for one another
//! are grouped into [`ResourcePool`]s; a stage that does not pin a specific
//! machine may be placed on any available pool member.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::Calendar;

/// A machine that can be assigned stage executions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    /// Unique machine identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Process family (e.g., "SLS", "EDM", "CNC").
    pub machine_type: String,
    /// Maintenance/availability calendar.
    pub calendar: Option<Calendar>,
    /// Material currently loaded, as last reported by the shop floor.
    pub current_material: Option<String>,
    /// Job currently running, as last reported by the shop floor.
    pub current_job: Option<String>,
}

impl Machine {
    /// Creates a new machine.
    pub fn new(id: impl Into<String>, machine_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            machine_type: machine_type.into(),
            calendar: None,
            current_material: None,
            current_job: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_calendar(mut self, calendar: Calendar) -> Self {
        self.calendar = Some(calendar);
        self
    }

    pub fn with_material(mut self, material: impl Into<String>) -> Self {
        self.current_material = Some(material.into());
        self
    }

    pub fn with_current_job(mut self, job_id: impl Into<String>) -> Self {
        self.current_job = Some(job_id.into());
        self
    }

    /// Checks the maintenance calendar. No calendar = always available.
    pub fn is_available_at(&self, time_ms: i64) -> bool {
        self.calendar
            .as_ref()
            .map_or(true, |cal| cal.is_working_time(time_ms))
    }

    /// First instant in `[start_ms, end_ms)` blocked by the maintenance calendar.
    pub fn first_unavailable_in(&self, start_ms: i64, end_ms: i64) -> Option<i64> {
        self.calendar
            .as_ref()
            .and_then(|cal| cal.first_unavailable_in(start_ms, end_ms))
    }
}

/// Resource classification for pools.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResourceType {
    /// Processing machine (printer, mill, EDM).
    #[default]
    Machine,
    /// Operator crew.
    Operator,
    /// Tooling or fixtures.
    Tool,
    /// Domain-specific type.
    Custom(String),
}

/// A named set of interchangeable resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcePool {
    /// Unique pool identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    pub resource_type: ResourceType,
    /// Member machine ids, in preference order.
    pub members: Vec<String>,
    /// Members currently withdrawn from service.
    pub unavailable: HashSet<String>,
    /// Most stages the pool can serve at once across all members.
    /// `None` leaves members limited only by their own timelines.
    #[serde(default)]
    pub capacity: Option<usize>,
}

impl ResourcePool {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            resource_type: ResourceType::Machine,
            members: Vec::new(),
            unavailable: HashSet::new(),
            capacity: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_resource_type(mut self, resource_type: ResourceType) -> Self {
        self.resource_type = resource_type;
        self
    }

    pub fn with_member(mut self, machine_id: impl Into<String>) -> Self {
        self.members.push(machine_id.into());
        self
    }

    /// Caps concurrent stages across the pool (e.g. one operator crew
    /// tending two printers).
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Marks a member unavailable (breakdown, operator shortage).
    pub fn with_unavailable(mut self, machine_id: impl Into<String>) -> Self {
        self.unavailable.insert(machine_id.into());
        self
    }

    pub fn contains(&self, machine_id: &str) -> bool {
        self.members.iter().any(|m| m == machine_id)
    }

    /// Whether the member is in service. Non-members are never available.
    pub fn is_available(&self, machine_id: &str) -> bool {
        self.contains(machine_id) && !self.unavailable.contains(machine_id)
    }

    /// Members in service, in preference order.
    pub fn available_members(&self) -> impl Iterator<Item = &str> {
        self.members
            .iter()
            .map(String::as_str)
            .filter(|m| !self.unavailable.contains(*m))
    }
}
