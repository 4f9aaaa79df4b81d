//! Part workflow resolution.
//!
//! Turns a [`Part`] into a validated, ordered stage list:
//!
//! 1. Pick the source. Explicit requirements always win; a template is
//!    instantiated only for parts without them.
//! 2. Check every requirement (ownership, uniqueness, stage id, custom
//!    fields).
//! 3. Build the [`DependencyGraph`] and reject cross-part edges and cycles.
//! 4. Reject blocking stages that gate nothing yet are not terminal.
//!
//! Resolution is read-only: the part, the catalog and the templates are
//! never modified.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ResolutionError;
use crate::graph::DependencyGraph;
use crate::models::{
    Part, StageCatalog, StageDependency, StageRequirement, WorkflowTemplate,
};

/// Where a resolved workflow came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowSource {
    /// The part's own requirement list.
    Explicit,
    /// Instantiated from the named template.
    Template(String),
}

/// A part's validated workflow.
#[derive(Debug, Clone)]
pub struct ResolvedWorkflow {
    pub part_id: String,
    /// Part material, used for stages without their own.
    pub material: Option<String>,
    pub source: WorkflowSource,
    /// Requirements in topological order.
    pub stages: Vec<StageRequirement>,
    pub graph: DependencyGraph,
}

impl ResolvedWorkflow {
    pub fn requirement(&self, requirement_id: &str) -> Option<&StageRequirement> {
        self.stages.iter().find(|r| r.id == requirement_id)
    }

    /// Requirement ids in topological order.
    pub fn stage_ids(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|r| r.id.as_str())
    }

    /// Material a stage runs with: its own, else the part's.
    pub fn material_for<'a>(&'a self, requirement: &'a StageRequirement) -> Option<&'a str> {
        requirement
            .material
            .as_deref()
            .or(self.material.as_deref())
    }
}

/// Resolves parts against a stage catalog and template library.
#[derive(Debug, Clone)]
pub struct WorkflowResolver<'a> {
    catalog: &'a StageCatalog,
    templates: HashMap<&'a str, &'a WorkflowTemplate>,
}

impl<'a> WorkflowResolver<'a> {
    pub fn new(catalog: &'a StageCatalog, templates: &'a [WorkflowTemplate]) -> Self {
        Self {
            catalog,
            templates: templates.iter().map(|t| (t.id.as_str(), t)).collect(),
        }
    }

    /// Resolves a part's workflow.
    ///
    /// # Errors
    /// The first authoring problem found, as a [`ResolutionError`].
    pub fn resolve(&self, part: &Part) -> Result<ResolvedWorkflow, ResolutionError> {
        let result = self.resolve_inner(part);
        match &result {
            Ok(wf) => debug!(
                part_id = %part.id,
                stages = wf.stages.len(),
                source = ?wf.source,
                "workflow resolved"
            ),
            Err(err) => warn!(part_id = %part.id, error = %err, "workflow rejected"),
        }
        result
    }

    fn resolve_inner(&self, part: &Part) -> Result<ResolvedWorkflow, ResolutionError> {
        let (source, requirements, dependencies) = self.select_source(part)?;
        self.check_requirements(part, &requirements)?;

        let owned: HashSet<&str> = requirements.iter().map(|r| r.id.as_str()).collect();
        let mut graph = DependencyGraph::new();
        for req in &requirements {
            graph.add_stage(req.id.clone(), part.id.clone(), req.execution_order)?;
        }
        for dep in dependencies {
            if !owned.contains(dep.dependent.as_str()) || !owned.contains(dep.prerequisite.as_str())
            {
                return Err(ResolutionError::CrossPartDependency {
                    part_id: part.id.clone(),
                    dependent: dep.dependent,
                    prerequisite: dep.prerequisite,
                });
            }
            graph.add_edge(dep)?;
        }

        let order = graph.topological_order(&part.id)?;
        check_orphans(part, &requirements, &graph)?;

        let mut by_id: HashMap<String, StageRequirement> =
            requirements.into_iter().map(|r| (r.id.clone(), r)).collect();
        let stages = order.iter().filter_map(|id| by_id.remove(id)).collect();

        Ok(ResolvedWorkflow {
            part_id: part.id.clone(),
            material: part.material.clone(),
            source,
            stages,
            graph,
        })
    }

    fn select_source(
        &self,
        part: &Part,
    ) -> Result<(WorkflowSource, Vec<StageRequirement>, Vec<StageDependency>), ResolutionError> {
        if part.has_explicit_workflow() {
            if let Some(template_id) = &part.template_id {
                let explicit: HashSet<&str> =
                    part.requirements.iter().map(|r| r.stage_id.as_str()).collect();
                let stray: BTreeSet<&str> = part
                    .template_overrides
                    .keys()
                    .map(String::as_str)
                    .filter(|stage| !explicit.contains(stage))
                    .collect();
                if !stray.is_empty() {
                    return Err(ResolutionError::AmbiguousTemplate {
                        part_id: part.id.clone(),
                        template_id: template_id.clone(),
                        stages: stray.into_iter().map(String::from).collect(),
                    });
                }
                debug!(part_id = %part.id, template_id = %template_id, "explicit requirements override template");
            }
            return Ok((
                WorkflowSource::Explicit,
                part.requirements.clone(),
                part.dependencies.clone(),
            ));
        }

        let Some(template_id) = &part.template_id else {
            return Err(ResolutionError::EmptyWorkflow(part.id.clone()));
        };
        let template = self.templates.get(template_id.as_str()).ok_or_else(|| {
            ResolutionError::UnknownTemplate {
                part_id: part.id.clone(),
                template_id: template_id.clone(),
            }
        })?;
        let (requirements, dependencies) = instantiate(part, template);
        Ok((
            WorkflowSource::Template(template.id.clone()),
            requirements,
            dependencies,
        ))
    }

    fn check_requirements(
        &self,
        part: &Part,
        requirements: &[StageRequirement],
    ) -> Result<(), ResolutionError> {
        let mut seen = HashSet::new();
        for req in requirements {
            if req.part_id != part.id {
                return Err(ResolutionError::ForeignRequirement {
                    part_id: part.id.clone(),
                    requirement_id: req.id.clone(),
                    owner: req.part_id.clone(),
                });
            }
            if !seen.insert(req.id.as_str()) {
                return Err(ResolutionError::DuplicateRequirement {
                    part_id: part.id.clone(),
                    requirement_id: req.id.clone(),
                });
            }
            let definition =
                self.catalog
                    .get(&req.stage_id)
                    .ok_or_else(|| ResolutionError::UnknownStage {
                        requirement_id: req.id.clone(),
                        stage_id: req.stage_id.clone(),
                    })?;
            if req.affinity.requires_specific_machine && req.affinity.preferred.is_empty() {
                return Err(ResolutionError::MissingPinnedMachine {
                    requirement_id: req.id.clone(),
                });
            }
            definition
                .validate_fields(&req.custom_fields)
                .map_err(|source| ResolutionError::InvalidField {
                    requirement_id: req.id.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}

/// Template steps become `"{part_id}/{step_id}"` requirements with the
/// part's overrides applied.
fn instantiate(
    part: &Part,
    template: &WorkflowTemplate,
) -> (Vec<StageRequirement>, Vec<StageDependency>) {
    let req_id = |step: &str| format!("{}/{}", part.id, step);

    let requirements = template
        .steps
        .iter()
        .map(|step| {
            let mut req = StageRequirement::new(
                req_id(&step.id),
                part.id.clone(),
                step.stage_id.clone(),
                step.execution_order,
            );
            req.is_required = step.is_required;
            req.is_blocking = step.is_blocking;
            req.allow_parallel = step.allow_parallel;
            req.duration_hours_override = step.duration_hours;
            req.hourly_rate_override = step.hourly_rate;
            req.affinity.preferred = step.preferred_machines.clone();
            if let Some(ov) = part.template_overrides.get(&step.stage_id) {
                ov.apply(&mut req);
            }
            req
        })
        .collect();

    let dependencies = template
        .dependencies
        .iter()
        .map(|d| StageDependency {
            dependent: req_id(&d.dependent_step),
            prerequisite: req_id(&d.prerequisite_step),
            dependency_type: d.dependency_type,
            lag_ms: d.lag_ms,
            optional: d.optional,
        })
        .collect();

    (requirements, dependencies)
}

/// A blocking stage that gates no successor must be terminal.
fn check_orphans(
    part: &Part,
    requirements: &[StageRequirement],
    graph: &DependencyGraph,
) -> Result<(), ResolutionError> {
    let Some(last) = requirements.iter().map(|r| r.execution_order).max() else {
        return Ok(());
    };
    match requirements
        .iter()
        .find(|r| r.is_blocking && r.execution_order < last && graph.dependents_of(&r.id).is_empty())
    {
        Some(orphan) => Err(ResolutionError::OrphanedBlockingStage {
            part_id: part.id.clone(),
            requirement_id: orphan.id.clone(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FieldError, GraphError};
    use crate::models::{
        CustomFieldSchema, DependencyType, FieldType, FieldValue, RequirementOverride,
        StageDefinition, TemplateDependency, TemplateStep,
    };

    fn catalog() -> StageCatalog {
        StageCatalog::new()
            .with_definition(StageDefinition::new("SLS", 8.0))
            .unwrap()
            .with_definition(StageDefinition::new("CNC", 3.0))
            .unwrap()
            .with_definition(
                StageDefinition::new("QA", 1.0).with_field(
                    CustomFieldSchema::new(
                        "method",
                        FieldType::Choice(vec!["CMM".into(), "CT".into()]),
                    )
                    .required(),
                ),
            )
            .unwrap()
    }

    fn template() -> WorkflowTemplate {
        WorkflowTemplate::new("AM-STD")
            .with_step(TemplateStep::new("print", "SLS", 1).with_duration_hours(10.0))
            .with_step(TemplateStep::new("machine", "CNC", 2).with_preferred_machine("CNC1"))
            .with_dependency(TemplateDependency::new("machine", "print").with_lag_ms(3_600_000))
    }

    fn explicit_part() -> Part {
        Part::new("P1")
            .with_material("Ti-6Al-4V")
            .with_requirement(StageRequirement::new("P1/CNC", "P1", "CNC", 2))
            .with_requirement(StageRequirement::new("P1/SLS", "P1", "SLS", 1))
            .with_dependency(StageDependency::new("P1/CNC", "P1/SLS").with_lag_hours(1.0))
    }

    #[test]
    fn test_explicit_workflow_in_dependency_order() {
        let cat = catalog();
        let templates: [WorkflowTemplate; 0] = [];
        let wf = WorkflowResolver::new(&cat, &templates)
            .resolve(&explicit_part())
            .unwrap();

        assert_eq!(wf.source, WorkflowSource::Explicit);
        assert_eq!(wf.stage_ids().collect::<Vec<_>>(), vec!["P1/SLS", "P1/CNC"]);
        let cnc = wf.requirement("P1/CNC").unwrap();
        assert_eq!(wf.material_for(cnc), Some("Ti-6Al-4V"));
        assert_eq!(wf.graph.prerequisites_of("P1/CNC")[0].lag_ms, 3_600_000);
    }

    #[test]
    fn test_template_instantiation_with_overrides() {
        let cat = catalog();
        let templates = [template()];
        let part = Part::new("P7").with_template("AM-STD").with_template_override(
            "SLS",
            RequirementOverride::new()
                .with_duration_hours(12.0)
                .with_preferred_machine("TI2"),
        );
        let wf = WorkflowResolver::new(&cat, &templates).resolve(&part).unwrap();

        assert_eq!(wf.source, WorkflowSource::Template("AM-STD".into()));
        assert_eq!(wf.stage_ids().collect::<Vec<_>>(), vec!["P7/print", "P7/machine"]);
        let print = wf.requirement("P7/print").unwrap();
        assert_eq!(print.duration_hours_override, Some(12.0));
        assert_eq!(print.affinity.preferred, vec!["TI2"]);
        let machine = wf.requirement("P7/machine").unwrap();
        assert_eq!(machine.affinity.preferred, vec!["CNC1"]);
        let dep = &wf.graph.prerequisites_of("P7/machine")[0];
        assert_eq!(dep.prerequisite, "P7/print");
        assert_eq!(dep.dependency_type, DependencyType::FinishToStart);
    }

    #[test]
    fn test_explicit_wins_over_template() {
        let cat = catalog();
        let templates = [template()];
        let part = explicit_part()
            .with_template("AM-STD")
            .with_template_override("CNC", RequirementOverride::new().with_duration_hours(9.0));
        let wf = WorkflowResolver::new(&cat, &templates).resolve(&part).unwrap();
        assert_eq!(wf.source, WorkflowSource::Explicit);
        assert_eq!(wf.requirement("P1/CNC").unwrap().duration_hours_override, None);
    }

    #[test]
    fn test_ambiguous_template() {
        let cat = catalog();
        let templates = [template()];
        let part = explicit_part()
            .with_template("AM-STD")
            .with_template_override("HIP", RequirementOverride::new().with_duration_hours(4.0));
        let err = WorkflowResolver::new(&cat, &templates).resolve(&part).unwrap_err();
        assert_eq!(
            err,
            ResolutionError::AmbiguousTemplate {
                part_id: "P1".into(),
                template_id: "AM-STD".into(),
                stages: vec!["HIP".into()],
            }
        );
    }

    #[test]
    fn test_missing_sources() {
        let cat = catalog();
        let templates: [WorkflowTemplate; 0] = [];
        let resolver = WorkflowResolver::new(&cat, &templates);
        assert_eq!(
            resolver.resolve(&Part::new("P1")).unwrap_err(),
            ResolutionError::EmptyWorkflow("P1".into())
        );
        assert!(matches!(
            resolver.resolve(&Part::new("P1").with_template("NOPE")),
            Err(ResolutionError::UnknownTemplate { .. })
        ));
    }

    #[test]
    fn test_cycle_creates_nothing() {
        let cat = catalog();
        let templates: [WorkflowTemplate; 0] = [];
        let part = Part::new("P1")
            .with_requirement(StageRequirement::new("P1/SLS", "P1", "SLS", 1))
            .with_requirement(StageRequirement::new("P1/CNC", "P1", "CNC", 2))
            .with_dependency(StageDependency::new("P1/CNC", "P1/SLS"))
            .with_dependency(StageDependency::new("P1/SLS", "P1/CNC"));
        match WorkflowResolver::new(&cat, &templates).resolve(&part) {
            Err(ResolutionError::Cycle(c)) => assert_eq!(c.edges.len(), 2),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_requirement_checks() {
        let cat = catalog();
        let templates: [WorkflowTemplate; 0] = [];
        let resolver = WorkflowResolver::new(&cat, &templates);

        let foreign = Part::new("P1").with_requirement(StageRequirement::new("P2/SLS", "P2", "SLS", 1));
        assert!(matches!(
            resolver.resolve(&foreign),
            Err(ResolutionError::ForeignRequirement { .. })
        ));

        let dup = Part::new("P1")
            .with_requirement(StageRequirement::new("P1/SLS", "P1", "SLS", 1))
            .with_requirement(StageRequirement::new("P1/SLS", "P1", "SLS", 1));
        assert!(matches!(
            resolver.resolve(&dup),
            Err(ResolutionError::DuplicateRequirement { .. })
        ));

        let unknown = Part::new("P1").with_requirement(StageRequirement::new("P1/X", "P1", "EBM", 1));
        assert!(matches!(
            resolver.resolve(&unknown),
            Err(ResolutionError::UnknownStage { .. })
        ));

        let mut unpinned = StageRequirement::new("P1/SLS", "P1", "SLS", 1);
        unpinned.affinity.requires_specific_machine = true;
        assert_eq!(
            resolver.resolve(&Part::new("P1").with_requirement(unpinned)).unwrap_err(),
            ResolutionError::MissingPinnedMachine {
                requirement_id: "P1/SLS".into()
            }
        );

        let cross = Part::new("P1")
            .with_requirement(StageRequirement::new("P1/SLS", "P1", "SLS", 1))
            .with_dependency(StageDependency::new("P1/SLS", "P2/SLS"));
        assert!(matches!(
            resolver.resolve(&cross),
            Err(ResolutionError::CrossPartDependency { .. })
        ));

        let self_loop = Part::new("P1")
            .with_requirement(StageRequirement::new("P1/SLS", "P1", "SLS", 1))
            .with_dependency(StageDependency::new("P1/SLS", "P1/SLS"));
        assert_eq!(
            resolver.resolve(&self_loop).unwrap_err(),
            ResolutionError::Graph(GraphError::SelfDependency("P1/SLS".into()))
        );
    }

    #[test]
    fn test_custom_fields_validated() {
        let cat = catalog();
        let templates: [WorkflowTemplate; 0] = [];
        let resolver = WorkflowResolver::new(&cat, &templates);

        let missing = Part::new("P1").with_requirement(StageRequirement::new("P1/QA", "P1", "QA", 1));
        match resolver.resolve(&missing) {
            Err(ResolutionError::InvalidField { source, .. }) => {
                assert_eq!(source, FieldError::Missing("method".into()))
            }
            other => panic!("expected field error, got {other:?}"),
        }

        let ok = Part::new("P1").with_requirement(
            StageRequirement::new("P1/QA", "P1", "QA", 1)
                .with_field("method", FieldValue::Choice("CT".into())),
        );
        assert!(resolver.resolve(&ok).is_ok());
    }

    #[test]
    fn test_orphaned_blocking_stage() {
        let cat = catalog();
        let templates: [WorkflowTemplate; 0] = [];
        let resolver = WorkflowResolver::new(&cat, &templates);

        let orphan = Part::new("P1")
            .with_requirement(StageRequirement::new("P1/SLS", "P1", "SLS", 1))
            .with_requirement(StageRequirement::new("P1/CNC", "P1", "CNC", 2));
        assert_eq!(
            resolver.resolve(&orphan).unwrap_err(),
            ResolutionError::OrphanedBlockingStage {
                part_id: "P1".into(),
                requirement_id: "P1/SLS".into(),
            }
        );

        let relaxed = Part::new("P1")
            .with_requirement(StageRequirement::new("P1/SLS", "P1", "SLS", 1).non_blocking())
            .with_requirement(StageRequirement::new("P1/CNC", "P1", "CNC", 2));
        assert!(resolver.resolve(&relaxed).is_ok());
    }
}
