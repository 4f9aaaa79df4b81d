//! Multi-stage production scheduling and dependency engine.
//!
//! Expands a part's manufacturing stages (printing, EDM, CNC, coating,
//! assembly) into an ordered, machine-constrained plan, detects timeline
//! conflicts, and accounts for material changeover, setup and teardown.
//!
//! # Modules
//!
//! - **`models`**: Domain types: `StageDefinition`, `StageRequirement`,
//!   `StageDependency`, `Part`, `WorkflowTemplate`, `Machine`, `ResourcePool`,
//!   `Calendar`, `ScheduleEntry`, `Schedule`
//! - **`graph`**: Dependency graph, cycle detection, topological order,
//!   dependency start bounds
//! - **`workflow`**: Part workflow resolution (explicit vs. template)
//! - **`timeline`**: Per-machine interval timelines and conflict detection
//! - **`changeover`**: Material changeover and effective stage timing
//! - **`scheduler`**: The placement orchestrator
//! - **`telemetry`**: Injected "current material" feed
//! - **`validation`**: Setup integrity checks (duplicate IDs, dangling refs)
//! - **`config`**: Engine configuration (file + environment)
//! - **`error`**: Error taxonomy
//!
//! # Time
//!
//! Instants are `i64` milliseconds since the Unix epoch (UTC); intervals are
//! half-open `[start, end)`.
//!
//! # Example
//!
//! ```
//! use u_stage::changeover::ChangeoverRules;
//! use u_stage::config::SearchConfig;
//! use u_stage::models::{Machine, Part, StageCatalog, StageDefinition, StageDependency, StageRequirement};
//! use u_stage::scheduler::Orchestrator;
//! use u_stage::workflow::WorkflowResolver;
//!
//! let catalog = StageCatalog::new()
//!     .with_definition(StageDefinition::new("SLS", 8.0).with_eligible_machine("TI1"))
//!     .unwrap()
//!     .with_definition(StageDefinition::new("CNC", 3.0).with_eligible_machine("CNC1"))
//!     .unwrap();
//! let part = Part::new("P1")
//!     .with_material("Ti-6Al-4V")
//!     .with_requirement(StageRequirement::new("P1/SLS", "P1", "SLS", 1))
//!     .with_requirement(StageRequirement::new("P1/CNC", "P1", "CNC", 2))
//!     .with_dependency(StageDependency::new("P1/CNC", "P1/SLS"));
//! let workflow = WorkflowResolver::new(&catalog, &[]).resolve(&part).unwrap();
//!
//! let orchestrator = Orchestrator::new(
//!     catalog,
//!     vec![Machine::new("TI1", "SLS"), Machine::new("CNC1", "CNC")],
//!     vec![],
//!     ChangeoverRules::default(),
//!     SearchConfig::default(),
//! )
//! .unwrap();
//!
//! let plan = orchestrator.schedule_job(&workflow, "J1", 0);
//! assert!(plan.is_complete());
//! assert_eq!(plan.completion_ms(), Some(11 * 3_600_000));
//! ```
//!
//! # References
//!
//! - Pinedo (2016), "Scheduling: Theory, Algorithms, and Systems"
//! - Brucker (2007), "Scheduling Algorithms"
//! - Allahverdi et al. (2008), "A survey of scheduling problems with setup times or costs"

pub mod changeover;
pub mod config;
pub mod error;
pub mod graph;
pub mod models;
pub mod scheduler;
pub mod telemetry;
pub mod timeline;
pub mod validation;
pub mod workflow;

pub use error::{Result, ScheduleError};
