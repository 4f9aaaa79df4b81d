//! Stage placement.
//!
//! [`Orchestrator`] turns resolved workflows into committed schedule
//! entries on machine timelines, one stage at a time or one job at a time.
//!
//! # Algorithm
//!
//! First-fit by machine preference order: the first candidate machine that
//! yields a feasible slot wins, even when a later candidate could start
//! sooner. Makespan is not optimized.
//!
//! # References
//!
//! - Pinedo (2016), "Scheduling: Theory, Algorithms, and Systems", Ch. 4
//! - Allahverdi et al. (2008), "A survey of scheduling problems with setup times or costs"

mod orchestrator;

pub use orchestrator::{CancelToken, JobPlan, Orchestrator, StageFailure};
