//! Production scheduling domain models.
//!
//! Plain data types describing what to build (parts, stage requirements,
//! dependencies, templates), what to build it with (stage definitions,
//! machines, pools, calendars) and the committed plan (schedule entries).
//!
//! # Domain Mappings
//!
//! | u-stage | Shop floor |
//! |---------|------------|
//! | Part | Part number / router |
//! | StageRequirement | Routing step |
//! | StageDefinition | Work center operation |
//! | Machine | Printer, mill, EDM |
//! | ScheduleEntry | Dispatch line |

pub mod calendar;
mod dependency;
mod entry;
mod machine;
mod part;
mod requirement;
mod schedule;
mod stage;

pub use calendar::{
    hours_to_ms, minutes_to_ms, AlwaysOperating, Calendar, OperatingCalendar, Shift,
    ShiftCalendar, TimeWindow,
};
pub use dependency::{DependencyType, StageDependency};
pub use entry::{EntryStatus, ScheduleEntry};
pub use machine::{Machine, ResourcePool, ResourceType};
pub use part::{
    Part, RequirementOverride, TemplateDependency, TemplateStep, WorkflowTemplate,
};
pub use requirement::{MachineAffinity, StageRequirement};
pub use schedule::Schedule;
pub use stage::{CustomFieldSchema, FieldType, FieldValue, StageCatalog, StageDefinition};
