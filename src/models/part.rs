//! Part and workflow template models.
//!
//! A part carries its manufacturing workflow in one of two ways:
//!
//! - **Explicit**: its own [`StageRequirement`] list and [`StageDependency`] edges.
//! - **Templated**: a reference to a [`WorkflowTemplate`], instantiated at
//!   resolution time with per-part [`RequirementOverride`]s applied.
//!
//! Explicit requirements always win; a template is scaffolding only.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{DependencyType, StageDependency, StageRequirement};

/// A manufactured part and its workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    /// Unique part identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Alloy or feedstock (e.g., "Ti-6Al-4V", "Inconel 718").
    pub material: Option<String>,
    /// Explicit stage requirements.
    pub requirements: Vec<StageRequirement>,
    /// Explicit dependencies between this part's requirements.
    pub dependencies: Vec<StageDependency>,
    /// Workflow template used when no explicit requirements exist.
    pub template_id: Option<String>,
    /// Per-part overrides applied to template steps, keyed by stage id.
    pub template_overrides: HashMap<String, RequirementOverride>,
}

impl Part {
    /// Creates a new part with the given ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            material: None,
            requirements: Vec::new(),
            dependencies: Vec::new(),
            template_id: None,
            template_overrides: HashMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_material(mut self, material: impl Into<String>) -> Self {
        self.material = Some(material.into());
        self
    }

    pub fn with_requirement(mut self, requirement: StageRequirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    pub fn with_dependency(mut self, dependency: StageDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_template(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = Some(template_id.into());
        self
    }

    pub fn with_template_override(
        mut self,
        stage_id: impl Into<String>,
        overrides: RequirementOverride,
    ) -> Self {
        self.template_overrides.insert(stage_id.into(), overrides);
        self
    }

    /// Whether the part authors its own stage list.
    pub fn has_explicit_workflow(&self) -> bool {
        !self.requirements.is_empty()
    }
}

/// Per-part values that replace template defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequirementOverride {
    pub duration_hours: Option<f64>,
    pub setup_minutes: Option<i64>,
    pub teardown_minutes: Option<i64>,
    pub hourly_rate: Option<f64>,
    /// Replaces the template's preference list when non-empty.
    pub preferred_machines: Vec<String>,
}

impl RequirementOverride {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_duration_hours(mut self, hours: f64) -> Self {
        self.duration_hours = Some(hours);
        self
    }

    pub fn with_setup_minutes(mut self, minutes: i64) -> Self {
        self.setup_minutes = Some(minutes);
        self
    }

    pub fn with_teardown_minutes(mut self, minutes: i64) -> Self {
        self.teardown_minutes = Some(minutes);
        self
    }

    pub fn with_hourly_rate(mut self, rate: f64) -> Self {
        self.hourly_rate = Some(rate);
        self
    }

    pub fn with_preferred_machine(mut self, machine_id: impl Into<String>) -> Self {
        self.preferred_machines.push(machine_id.into());
        self
    }

    /// Writes the set values onto `requirement`.
    pub fn apply(&self, requirement: &mut StageRequirement) {
        if let Some(h) = self.duration_hours {
            requirement.duration_hours_override = Some(h);
        }
        if let Some(m) = self.setup_minutes {
            requirement.setup_minutes_override = Some(m);
        }
        if let Some(m) = self.teardown_minutes {
            requirement.teardown_minutes_override = Some(m);
        }
        if let Some(r) = self.hourly_rate {
            requirement.hourly_rate_override = Some(r);
        }
        if !self.preferred_machines.is_empty() {
            requirement.affinity.preferred = self.preferred_machines.clone();
        }
    }
}

/// One step of a workflow template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateStep {
    /// Step identifier, unique within the template.
    pub id: String,
    pub stage_id: String,
    pub execution_order: i32,
    pub is_required: bool,
    pub is_blocking: bool,
    pub allow_parallel: bool,
    pub duration_hours: Option<f64>,
    pub hourly_rate: Option<f64>,
    pub preferred_machines: Vec<String>,
}

impl TemplateStep {
    pub fn new(id: impl Into<String>, stage_id: impl Into<String>, execution_order: i32) -> Self {
        Self {
            id: id.into(),
            stage_id: stage_id.into(),
            execution_order,
            is_required: true,
            is_blocking: true,
            allow_parallel: false,
            duration_hours: None,
            hourly_rate: None,
            preferred_machines: Vec::new(),
        }
    }

    pub fn optional(mut self) -> Self {
        self.is_required = false;
        self
    }

    pub fn non_blocking(mut self) -> Self {
        self.is_blocking = false;
        self
    }

    pub fn with_parallel(mut self) -> Self {
        self.allow_parallel = true;
        self
    }

    pub fn with_duration_hours(mut self, hours: f64) -> Self {
        self.duration_hours = Some(hours);
        self
    }

    pub fn with_hourly_rate(mut self, rate: f64) -> Self {
        self.hourly_rate = Some(rate);
        self
    }

    pub fn with_preferred_machine(mut self, machine_id: impl Into<String>) -> Self {
        self.preferred_machines.push(machine_id.into());
        self
    }
}

/// A dependency between two template steps, by step id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateDependency {
    pub dependent_step: String,
    pub prerequisite_step: String,
    pub dependency_type: DependencyType,
    pub lag_ms: i64,
    pub optional: bool,
}

impl TemplateDependency {
    pub fn new(dependent_step: impl Into<String>, prerequisite_step: impl Into<String>) -> Self {
        Self {
            dependent_step: dependent_step.into(),
            prerequisite_step: prerequisite_step.into(),
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

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// A reusable stage list shared by many parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: String,
    pub name: String,
    pub steps: Vec<TemplateStep>,
    pub dependencies: Vec<TemplateDependency>,
}

impl WorkflowTemplate {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            steps: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_step(mut self, step: TemplateStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_dependency(mut self, dependency: TemplateDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn step(&self, step_id: &str) -> Option<&TemplateStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }
}
