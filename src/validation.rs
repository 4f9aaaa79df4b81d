//! Setup validation for the scheduling engine.
//!
//! Checks the structural integrity of the stage catalog, machines and
//! resource pools before the orchestrator accepts them. Detects:
//! - Duplicate machine and pool IDs
//! - Eligibility and pool references to unknown machines
//! - Stage definitions drawing from unknown pools
//! - Non-positive default durations, negative setup/teardown
//!
//! Every problem is reported, not just the first.

use std::collections::HashSet;
use std::fmt;

use crate::models::{Machine, ResourcePool, StageCatalog};

/// Validation result.
pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// A validation error.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// Error category.
    pub kind: ValidationErrorKind,
    /// Human-readable description.
    pub message: String,
}

/// Categories of validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// Two entities share the same ID.
    DuplicateId,
    /// A definition or pool references a machine that doesn't exist.
    UnknownMachine,
    /// A definition draws from a pool that doesn't exist.
    UnknownPool,
    /// A default duration is zero or negative.
    InvalidDuration,
    /// Setup or teardown minutes are negative.
    NegativeOverhead,
    /// A pool capacity of zero can never serve a stage.
    InvalidCapacity,
}

impl ValidationError {
    fn new(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Validates the catalog, machines and pools the orchestrator runs on.
///
/// Checks:
/// 1. No duplicate machine IDs
/// 2. No duplicate pool IDs
/// 3. Pool members are known machines
/// 4. Definition eligibility lists name known machines
/// 5. Definition resource pools exist
/// 6. Default durations are positive, overheads non-negative
///
/// # Returns
/// `Ok(())` if all checks pass, `Err(errors)` with all detected issues.
pub fn validate_setup(
    catalog: &StageCatalog,
    machines: &[Machine],
    pools: &[ResourcePool],
) -> ValidationResult {
    let mut errors = Vec::new();

    let mut machine_ids = HashSet::new();
    for m in machines {
        if !machine_ids.insert(m.id.as_str()) {
            errors.push(ValidationError::new(
                ValidationErrorKind::DuplicateId,
                format!("Duplicate machine ID: {}", m.id),
            ));
        }
    }

    let mut pool_ids = HashSet::new();
    for pool in pools {
        if !pool_ids.insert(pool.id.as_str()) {
            errors.push(ValidationError::new(
                ValidationErrorKind::DuplicateId,
                format!("Duplicate pool ID: {}", pool.id),
            ));
        }
        for member in &pool.members {
            if !machine_ids.contains(member.as_str()) {
                errors.push(ValidationError::new(
                    ValidationErrorKind::UnknownMachine,
                    format!("Pool '{}' references unknown machine '{}'", pool.id, member),
                ));
            }
        }
        if pool.capacity == Some(0) {
            errors.push(ValidationError::new(
                ValidationErrorKind::InvalidCapacity,
                format!("Pool '{}' has zero capacity", pool.id),
            ));
        }
    }

    for def in catalog.iter() {
        for machine in &def.eligible_machines {
            if !machine_ids.contains(machine.as_str()) {
                errors.push(ValidationError::new(
                    ValidationErrorKind::UnknownMachine,
                    format!("Stage '{}' lists unknown machine '{}'", def.id, machine),
                ));
            }
        }
        if let Some(pool) = &def.resource_pool {
            if !pool_ids.contains(pool.as_str()) {
                errors.push(ValidationError::new(
                    ValidationErrorKind::UnknownPool,
                    format!("Stage '{}' draws from unknown pool '{}'", def.id, pool),
                ));
            }
        }
        if def.default_duration_hours.is_nan() || def.default_duration_hours <= 0.0 {
            errors.push(ValidationError::new(
                ValidationErrorKind::InvalidDuration,
                format!(
                    "Stage '{}' has non-positive duration {}h",
                    def.id, def.default_duration_hours
                ),
            ));
        }
        if def.default_setup_minutes < 0 || def.default_teardown_minutes < 0 {
            errors.push(ValidationError::new(
                ValidationErrorKind::NegativeOverhead,
                format!("Stage '{}' has negative setup or teardown", def.id),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StageDefinition;

    fn sample_machines() -> Vec<Machine> {
        vec![
            Machine::new("TI1", "SLS"),
            Machine::new("TI2", "SLS"),
            Machine::new("CNC1", "CNC"),
        ]
    }

    fn sample_catalog() -> StageCatalog {
        StageCatalog::new()
            .with_definition(
                StageDefinition::new("SLS", 8.0)
                    .with_eligible_machine("TI1")
                    .with_eligible_machine("TI2")
                    .with_resource_pool("printers"),
            )
            .unwrap()
            .with_definition(StageDefinition::new("CNC", 3.0).with_eligible_machine("CNC1"))
            .unwrap()
    }

    fn sample_pools() -> Vec<ResourcePool> {
        vec![ResourcePool::new("printers")
            .with_member("TI1")
            .with_member("TI2")]
    }

    #[test]
    fn test_valid_setup() {
        assert!(validate_setup(&sample_catalog(), &sample_machines(), &sample_pools()).is_ok());
    }

    #[test]
    fn test_zero_capacity_pool() {
        let pools = vec![ResourcePool::new("printers")
            .with_member("TI1")
            .with_capacity(0)];
        let errs = validate_setup(&sample_catalog(), &sample_machines(), &pools).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].kind, ValidationErrorKind::InvalidCapacity);
    }

    #[test]
    fn test_duplicate_machine_id() {
        let mut machines = sample_machines();
        machines.push(Machine::new("TI1", "SLS"));
        let errs = validate_setup(&sample_catalog(), &machines, &sample_pools()).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].kind, ValidationErrorKind::DuplicateId);
        assert!(errs[0].message.contains("TI1"));
    }

    #[test]
    fn test_unknown_references() {
        let catalog = StageCatalog::new()
            .with_definition(
                StageDefinition::new("EDM", 4.0)
                    .with_eligible_machine("EDM9")
                    .with_resource_pool("sparks"),
            )
            .unwrap();
        let pools = vec![ResourcePool::new("printers").with_member("TI7")];
        let errs = validate_setup(&catalog, &sample_machines(), &pools).unwrap_err();

        let kinds: Vec<_> = errs.iter().map(|e| e.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                ValidationErrorKind::UnknownMachine,
                ValidationErrorKind::UnknownMachine,
                ValidationErrorKind::UnknownPool,
            ]
        );
    }

    #[test]
    fn test_invalid_timing() {
        let catalog = StageCatalog::new()
            .with_definition(StageDefinition::new("QA", 0.0))
            .unwrap()
            .with_definition(StageDefinition::new("HIP", 2.0).with_setup_minutes(-5))
            .unwrap();
        let errs = validate_setup(&catalog, &sample_machines(), &[]).unwrap_err();
        assert_eq!(errs.len(), 2);
        assert!(errs
            .iter()
            .any(|e| e.kind == ValidationErrorKind::InvalidDuration && e.message.contains("QA")));
        assert!(errs
            .iter()
            .any(|e| e.kind == ValidationErrorKind::NegativeOverhead));
    }

    #[test]
    fn test_multiple_errors() {
        let mut machines = sample_machines();
        machines.push(Machine::new("CNC1", "CNC"));
        let pools = vec![
            ResourcePool::new("printers").with_member("TI1"),
            ResourcePool::new("printers").with_member("TI2"),
        ];
        let errs = validate_setup(&sample_catalog(), &machines, &pools).unwrap_err();
        assert_eq!(errs.len(), 2);
        assert!(errs.iter().all(|e| e.kind == ValidationErrorKind::DuplicateId));
    }
}
