//! Schedule view.
//!
//! A read-only snapshot of schedule entries with the queries reporting
//! collaborators need: per-machine and per-job lookups, makespan, and machine
//! utilization. Cancelled entries stay in the snapshot for audit but are
//! excluded from every occupancy metric.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::ScheduleEntry;

/// A snapshot of schedule entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schedule {
    pub entries: Vec<ScheduleEntry>,
}

impl Schedule {
    pub fn new(entries: Vec<ScheduleEntry>) -> Self {
        Self { entries }
    }

    /// Entries that still occupy a machine.
    pub fn active(&self) -> impl Iterator<Item = &ScheduleEntry> {
        self.entries.iter().filter(|e| e.status.is_active())
    }

    /// Latest planned end across active entries (ms). 0 when empty.
    pub fn makespan_ms(&self) -> i64 {
        self.active().map(|e| e.planned_end_ms).max().unwrap_or(0)
    }

    pub fn entry(&self, entry_id: &str) -> Option<&ScheduleEntry> {
        self.entries.iter().find(|e| e.id == entry_id)
    }

    /// Active entries for a machine, ordered by planned start.
    pub fn entries_for_machine(&self, machine_id: &str) -> Vec<&ScheduleEntry> {
        let mut entries: Vec<_> = self.active().filter(|e| e.machine_id == machine_id).collect();
        entries.sort_by_key(|e| e.planned_start_ms);
        entries
    }

    /// All entries of a job (including cancelled), in placement order.
    pub fn entries_for_job(&self, job_id: &str) -> Vec<&ScheduleEntry> {
        self.entries.iter().filter(|e| e.job_id == job_id).collect()
    }

    /// Planned completion of a job: latest end of its active entries.
    pub fn job_completion_ms(&self, job_id: &str) -> Option<i64> {
        self.active()
            .filter(|e| e.job_id == job_id)
            .map(|e| e.planned_end_ms)
            .max()
    }

    /// Busy fraction of a machine over `horizon_ms`, changeover included.
    ///
    /// Returns `None` if `horizon_ms` is not positive.
    pub fn machine_utilization(&self, machine_id: &str, horizon_ms: i64) -> Option<f64> {
        if horizon_ms <= 0 {
            return None;
        }
        let busy: i64 = self
            .active()
            .filter(|e| e.machine_id == machine_id)
            .map(|e| e.duration_ms() + e.changeover_ms)
            .sum();
        Some(busy as f64 / horizon_ms as f64)
    }

    /// Total changeover time per machine (ms).
    pub fn changeover_by_machine(&self) -> HashMap<String, i64> {
        let mut totals: HashMap<String, i64> = HashMap::new();
        for e in self.active() {
            *totals.entry(e.machine_id.clone()).or_insert(0) += e.changeover_ms;
        }
        totals
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntryStatus;

    fn entry(id: &str, job: &str, machine: &str, start: i64, end: i64) -> ScheduleEntry {
        ScheduleEntry {
            id: id.into(),
            machine_id: machine.into(),
            requirement_id: format!("{job}/{id}"),
            part_id: "P1".into(),
            job_id: job.into(),
            planned_start_ms: start,
            planned_end_ms: end,
            changeover_ms: 0,
            material: None,
            allow_parallel: false,
            actual_start_ms: None,
            actual_end_ms: None,
            status: EntryStatus::Scheduled,
            superseded_by: None,
        }
    }

    fn sample() -> Schedule {
        let mut changed = entry("SE-3", "J2", "M1", 6_000, 8_000);
        changed.changeover_ms = 1_000;
        let mut cancelled = entry("SE-4", "J2", "M2", 0, 20_000);
        cancelled.status = EntryStatus::Cancelled;
        Schedule::new(vec![
            entry("SE-1", "J1", "M1", 0, 5_000),
            entry("SE-2", "J1", "M2", 5_000, 7_000),
            changed,
            cancelled,
        ])
    }

    #[test]
    fn test_makespan_ignores_cancelled() {
        assert_eq!(sample().makespan_ms(), 8_000);
        assert_eq!(Schedule::default().makespan_ms(), 0);
    }

    #[test]
    fn test_lookups() {
        let s = sample();
        let m1: Vec<_> = s.entries_for_machine("M1").iter().map(|e| e.id.as_str()).collect();
        assert_eq!(m1, vec!["SE-1", "SE-3"]);
        assert_eq!(s.entries_for_machine("M2").len(), 1);
        assert_eq!(s.entries_for_job("J2").len(), 2);
        assert_eq!(s.job_completion_ms("J1"), Some(7_000));
        assert_eq!(s.job_completion_ms("J9"), None);
        assert!(s.entry("SE-2").is_some());
    }

    #[test]
    fn test_utilization_and_changeover() {
        let s = sample();
        // M1: 5000 + 2000 + 1000 changeover over 10000.
        let util = s.machine_utilization("M1", 10_000).unwrap();
        assert!((util - 0.8).abs() < 1e-10);
        assert_eq!(s.machine_utilization("M1", 0), None);
        assert_eq!(s.changeover_by_machine()["M1"], 1_000);
    }
}
