#![allow(dead_code)]

pub mod strategies;

use chrono::NaiveDate;
use tracing_subscriber::EnvFilter;

use u_stage::changeover::ChangeoverRules;
use u_stage::config::{ChangeoverConfig, SearchConfig};
use u_stage::models::{Machine, Part, StageCatalog, StageDefinition, StageRequirement};
use u_stage::scheduler::Orchestrator;
use u_stage::workflow::{ResolvedWorkflow, WorkflowResolver};

pub const HOUR: i64 = 3_600_000;

pub const TI64: &str = "Ti-6Al-4V";
pub const IN718: &str = "Inconel 718";

/// Installs a test subscriber once; `RUST_LOG` overrides the default level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Epoch milliseconds of a UTC wall-clock time.
pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> i64 {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
        .expect("valid test date")
}

/// Monday 2024-01-08 at `hour`:00 UTC.
pub fn monday(hour: u32) -> i64 {
    at(2024, 1, 8, hour, 0)
}

/// Sunday 2024-01-07 at `hour`:00 UTC.
pub fn sunday(hour: u32) -> i64 {
    at(2024, 1, 7, hour, 0)
}

/// SLS on the titanium printers, CNC on the mill.
pub fn plant_catalog() -> StageCatalog {
    StageCatalog::new()
        .with_definition(
            StageDefinition::new("SLS", 8.0)
                .with_eligible_machine("TI1")
                .with_eligible_machine("TI2"),
        )
        .unwrap()
        .with_definition(StageDefinition::new("CNC", 3.0).with_eligible_machine("CNC1"))
        .unwrap()
}

pub fn plant_machines() -> Vec<Machine> {
    vec![
        Machine::new("TI1", "SLS").with_name("Titanium printer 1"),
        Machine::new("TI2", "SLS").with_name("Titanium printer 2"),
        Machine::new("CNC1", "CNC").with_name("5-axis mill"),
    ]
}

pub fn alloy_families() -> ChangeoverConfig {
    ChangeoverConfig::default()
        .with_family("titanium", [TI64, "Ti-6Al-2Sn-4Zr-6Mo"])
        .with_family("nickel", [IN718, "Inconel 625"])
}

pub fn orchestrator() -> Orchestrator {
    orchestrator_with(SearchConfig::default())
}

pub fn orchestrator_with(search: SearchConfig) -> Orchestrator {
    Orchestrator::new(
        plant_catalog(),
        plant_machines(),
        vec![],
        ChangeoverRules::from_config(&alloy_families()),
        search,
    )
    .unwrap()
}

pub fn resolve(part: &Part) -> ResolvedWorkflow {
    let catalog = plant_catalog();
    WorkflowResolver::new(&catalog, &[]).resolve(part).unwrap()
}

/// Single SLS stage pinned to one printer.
pub fn print_job(part_id: &str, material: &str, machine_id: &str) -> ResolvedWorkflow {
    resolve(
        &Part::new(part_id).with_material(material).with_requirement(
            StageRequirement::new(format!("{part_id}/SLS"), part_id, "SLS", 1)
                .with_specific_machine(machine_id),
        ),
    )
}
