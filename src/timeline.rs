//! Machine timelines and conflict detection.
//!
//! Each machine owns a [`MachineTimeline`]: its committed intervals sorted by
//! start time. Intervals are half-open `[start, end)`, so back-to-back work
//! does not conflict. Two intervals may overlap only when both allow
//! parallel execution.
//!
//! # Algorithm
//! Intervals live in a sorted `Vec`. The timeline also tracks the longest
//! interval length `L`; any interval overlapping `[s, e)` must start in
//! `(s - L, e)`, so a query is two binary searches plus a scan of that
//! window. Insert is a binary search plus a `Vec` shift.
//!
//! # Concurrency
//! [`TimelineBook`] holds one `parking_lot::Mutex` per machine behind a
//! `RwLock`ed registry. Work on different machines never contends; work on
//! the same machine serializes on that machine's mutex. The registry lock
//! is only held long enough to clone the machine's `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ConflictError, TimelineError};
use crate::models::{Machine, TimeWindow};

/// One committed occupancy of a machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineInterval {
    /// Schedule entry that owns the interval.
    pub entry_id: String,
    pub job_id: String,
    pub start_ms: i64,
    pub end_ms: i64,
    /// Material loaded while the interval runs.
    pub material: Option<String>,
    pub allow_parallel: bool,
}

impl TimelineInterval {
    pub fn new(
        entry_id: impl Into<String>,
        job_id: impl Into<String>,
        start_ms: i64,
        end_ms: i64,
    ) -> Self {
        Self {
            entry_id: entry_id.into(),
            job_id: job_id.into(),
            start_ms,
            end_ms,
            material: None,
            allow_parallel: false,
        }
    }

    pub fn with_material(mut self, material: impl Into<String>) -> Self {
        self.material = Some(material.into());
        self
    }

    pub fn with_parallel(mut self) -> Self {
        self.allow_parallel = true;
        self
    }

    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.start_ms, self.end_ms)
    }

    /// Whether this interval blocks `[start_ms, end_ms)` for a stage with
    /// the given parallel flag.
    #[inline]
    pub fn blocks(&self, start_ms: i64, end_ms: i64, allow_parallel: bool) -> bool {
        start_ms < self.end_ms && end_ms > self.start_ms && !(allow_parallel && self.allow_parallel)
    }
}

/// Committed intervals of one machine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MachineTimeline {
    machine_id: String,
    /// Sorted by `(start_ms, entry_id)`.
    intervals: Vec<TimelineInterval>,
    longest_ms: i64,
    current_material: Option<String>,
    current_job: Option<String>,
}

impl MachineTimeline {
    pub fn new(machine_id: impl Into<String>) -> Self {
        Self {
            machine_id: machine_id.into(),
            ..Default::default()
        }
    }

    /// Seeds a timeline with the machine's loaded material and job.
    pub fn for_machine(machine: &Machine) -> Self {
        Self {
            machine_id: machine.id.clone(),
            current_material: machine.current_material.clone(),
            current_job: machine.current_job.clone(),
            ..Default::default()
        }
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    pub fn intervals(&self) -> &[TimelineInterval] {
        &self.intervals
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Material currently loaded on the machine.
    pub fn current_material(&self) -> Option<&str> {
        self.current_material.as_deref()
    }

    pub fn set_current_material(&mut self, material: Option<String>) {
        self.current_material = material;
    }

    /// Job currently running on the machine.
    pub fn current_job(&self) -> Option<&str> {
        self.current_job.as_deref()
    }

    pub fn set_current_job(&mut self, job_id: Option<String>) {
        self.current_job = job_id;
    }

    /// Index range of intervals that can overlap `[start_ms, end_ms)`.
    fn candidate_range(&self, start_ms: i64, end_ms: i64) -> std::ops::Range<usize> {
        let floor = start_ms.saturating_sub(self.longest_ms);
        let lo = self.intervals.partition_point(|i| i.start_ms <= floor);
        let hi = self.intervals.partition_point(|i| i.start_ms < end_ms);
        lo..hi.max(lo)
    }

    /// Intervals blocking `[start_ms, end_ms)`, in start order.
    pub fn conflicts(
        &self,
        start_ms: i64,
        end_ms: i64,
        allow_parallel: bool,
    ) -> Vec<&TimelineInterval> {
        self.intervals[self.candidate_range(start_ms, end_ms)]
            .iter()
            .filter(|i| i.blocks(start_ms, end_ms, allow_parallel))
            .collect()
    }

    pub fn has_conflict(&self, start_ms: i64, end_ms: i64, allow_parallel: bool) -> bool {
        self.intervals[self.candidate_range(start_ms, end_ms)]
            .iter()
            .any(|i| i.blocks(start_ms, end_ms, allow_parallel))
    }

    /// Checks that `[start_ms, end_ms)` could be inserted.
    pub fn check(&self, start_ms: i64, end_ms: i64, allow_parallel: bool) -> Result<(), TimelineError> {
        if end_ms <= start_ms {
            return Err(TimelineError::InvalidInterval { start_ms, end_ms });
        }
        let conflicting = self.conflicts(start_ms, end_ms, allow_parallel);
        if conflicting.is_empty() {
            Ok(())
        } else {
            Err(ConflictError {
                machine_id: self.machine_id.clone(),
                start_ms,
                end_ms,
                conflicting_entries: conflicting.iter().map(|i| i.entry_id.clone()).collect(),
            }
            .into())
        }
    }

    /// Commits an interval.
    ///
    /// # Errors
    /// - [`TimelineError::InvalidInterval`] for zero or negative length
    /// - [`TimelineError::DuplicateEntry`] if the entry is already present
    /// - [`TimelineError::Conflict`] if a committed interval blocks it
    pub fn insert(&mut self, interval: TimelineInterval) -> Result<(), TimelineError> {
        self.check(interval.start_ms, interval.end_ms, interval.allow_parallel)?;
        if self.position(&interval.entry_id).is_some() {
            return Err(TimelineError::DuplicateEntry {
                machine_id: self.machine_id.clone(),
                entry_id: interval.entry_id,
            });
        }
        let at = self.intervals.partition_point(|i| {
            (i.start_ms, i.entry_id.as_str()) < (interval.start_ms, interval.entry_id.as_str())
        });
        self.longest_ms = self.longest_ms.max(interval.end_ms - interval.start_ms);
        self.intervals.insert(at, interval);
        Ok(())
    }

    /// Removes an entry's interval, returning it.
    pub fn remove(&mut self, entry_id: &str) -> Option<TimelineInterval> {
        let idx = self.position(entry_id)?;
        let removed = self.intervals.remove(idx);
        if removed.end_ms - removed.start_ms >= self.longest_ms {
            self.longest_ms = self
                .intervals
                .iter()
                .map(|i| i.end_ms - i.start_ms)
                .max()
                .unwrap_or(0);
        }
        Some(removed)
    }

    fn position(&self, entry_id: &str) -> Option<usize> {
        self.intervals.iter().position(|i| i.entry_id == entry_id)
    }

    pub fn get(&self, entry_id: &str) -> Option<&TimelineInterval> {
        self.position(entry_id).map(|idx| &self.intervals[idx])
    }

    /// The interval ending last at or before `at_ms`.
    pub fn preceding(&self, at_ms: i64) -> Option<&TimelineInterval> {
        let hi = self.intervals.partition_point(|i| i.start_ms < at_ms);
        let mut best: Option<&TimelineInterval> = None;
        for interval in self.intervals[..hi].iter().rev() {
            if let Some(b) = best {
                if interval.start_ms + self.longest_ms <= b.end_ms {
                    break;
                }
            }
            if interval.end_ms <= at_ms && best.map_or(true, |b| interval.end_ms > b.end_ms) {
                best = Some(interval);
            }
        }
        best
    }

    /// The first interval starting at or after `at_ms`.
    pub fn following(&self, at_ms: i64) -> Option<&TimelineInterval> {
        let idx = self.intervals.partition_point(|i| i.start_ms < at_ms);
        self.intervals.get(idx)
    }
}

/// Registry of machine timelines, one lock per machine.
#[derive(Debug, Default)]
pub struct TimelineBook {
    timelines: RwLock<HashMap<String, Arc<Mutex<MachineTimeline>>>>,
}

impl TimelineBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a book with one empty timeline per machine.
    pub fn for_machines<'a>(machines: impl IntoIterator<Item = &'a Machine>) -> Self {
        let book = Self::new();
        for machine in machines {
            book.register(MachineTimeline::for_machine(machine));
        }
        book
    }

    /// Adds (or replaces) a machine's timeline.
    pub fn register(&self, timeline: MachineTimeline) {
        let id = timeline.machine_id.clone();
        self.timelines
            .write()
            .insert(id, Arc::new(Mutex::new(timeline)));
    }

    pub fn contains(&self, machine_id: &str) -> bool {
        self.timelines.read().contains_key(machine_id)
    }

    /// Registered machine ids, sorted.
    pub fn machine_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.timelines.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn handle(&self, machine_id: &str) -> Result<Arc<Mutex<MachineTimeline>>, TimelineError> {
        self.timelines
            .read()
            .get(machine_id)
            .cloned()
            .ok_or_else(|| TimelineError::UnknownMachine(machine_id.to_string()))
    }

    /// Runs `f` inside the machine's critical section.
    pub fn with_timeline<R>(
        &self,
        machine_id: &str,
        f: impl FnOnce(&mut MachineTimeline) -> R,
    ) -> Result<R, TimelineError> {
        let handle = self.handle(machine_id)?;
        let mut timeline = handle.lock();
        Ok(f(&mut timeline))
    }

    /// Copy of a machine's timeline.
    pub fn snapshot(&self, machine_id: &str) -> Result<MachineTimeline, TimelineError> {
        self.with_timeline(machine_id, |t| t.clone())
    }

    pub fn intervals(&self, machine_id: &str) -> Result<Vec<TimelineInterval>, TimelineError> {
        self.with_timeline(machine_id, |t| t.intervals.clone())
    }

    pub fn has_conflict(
        &self,
        machine_id: &str,
        start_ms: i64,
        end_ms: i64,
        allow_parallel: bool,
    ) -> Result<bool, TimelineError> {
        self.with_timeline(machine_id, |t| t.has_conflict(start_ms, end_ms, allow_parallel))
    }

    pub fn insert(&self, machine_id: &str, interval: TimelineInterval) -> Result<(), TimelineError> {
        let entry_id = interval.entry_id.clone();
        let result = self.with_timeline(machine_id, |t| t.insert(interval))?;
        match &result {
            Ok(()) => debug!(machine_id, entry_id = %entry_id, "interval committed"),
            Err(err) => warn!(machine_id, entry_id = %entry_id, error = %err, "interval rejected"),
        }
        result
    }

    pub fn remove(
        &self,
        machine_id: &str,
        entry_id: &str,
    ) -> Result<Option<TimelineInterval>, TimelineError> {
        let removed = self.with_timeline(machine_id, |t| t.remove(entry_id))?;
        if removed.is_some() {
            debug!(machine_id, entry_id, "interval removed");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(id: &str, start: i64, end: i64) -> TimelineInterval {
        TimelineInterval::new(id, "J1", start, end)
    }

    #[test]
    fn test_insert_keeps_start_order() {
        let mut t = MachineTimeline::new("TI1");
        t.insert(iv("c", 200, 300)).unwrap();
        t.insert(iv("a", 0, 100)).unwrap();
        t.insert(iv("b", 100, 200)).unwrap();

        let ids: Vec<_> = t.intervals().iter().map(|i| i.entry_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_touching_intervals_do_not_conflict() {
        let mut t = MachineTimeline::new("TI1");
        t.insert(iv("a", 100, 200)).unwrap();
        assert!(!t.has_conflict(200, 300, false));
        assert!(!t.has_conflict(0, 100, false));
        assert!(t.has_conflict(199, 201, false));
        assert!(t.has_conflict(50, 500, false));
    }

    #[test]
    fn test_conflict_lists_entries() {
        let mut t = MachineTimeline::new("TI1");
        t.insert(iv("a", 0, 100)).unwrap();
        t.insert(iv("b", 150, 250)).unwrap();

        match t.insert(iv("x", 50, 200)) {
            Err(TimelineError::Conflict(c)) => {
                assert_eq!(c.machine_id, "TI1");
                assert_eq!(c.conflicting_entries, vec!["a", "b"]);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_long_interval_found_from_far_left() {
        let mut t = MachineTimeline::new("TI1");
        t.insert(iv("long", 0, 10_000)).unwrap();
        t.insert(iv("short", 10_000, 10_010)).unwrap();
        // Starts after "long" starts; only the longest-interval window finds it.
        let hits: Vec<_> = t.conflicts(9_000, 9_500, false).into_iter().map(|i| i.entry_id.as_str()).collect();
        assert_eq!(hits, vec!["long"]);
    }

    #[test]
    fn test_parallel_overlap() {
        let mut t = MachineTimeline::new("OVEN");
        t.insert(iv("a", 0, 100).with_parallel()).unwrap();
        t.insert(iv("b", 50, 150).with_parallel()).unwrap();
        assert!(t.has_conflict(60, 70, false));
        assert!(matches!(
            t.insert(iv("c", 60, 70)),
            Err(TimelineError::Conflict(_))
        ));
    }

    #[test]
    fn test_invalid_and_duplicate() {
        let mut t = MachineTimeline::new("TI1");
        assert_eq!(
            t.insert(iv("a", 100, 100)),
            Err(TimelineError::InvalidInterval {
                start_ms: 100,
                end_ms: 100
            })
        );
        assert!(matches!(
            t.insert(iv("a", 100, 50)),
            Err(TimelineError::InvalidInterval { .. })
        ));
        t.insert(iv("a", 0, 10)).unwrap();
        assert!(matches!(
            t.insert(iv("a", 20, 30)),
            Err(TimelineError::DuplicateEntry { .. })
        ));
    }

    #[test]
    fn test_remove_frees_slot_and_longest() {
        let mut t = MachineTimeline::new("TI1");
        t.insert(iv("a", 0, 1_000)).unwrap();
        t.insert(iv("b", 2_000, 2_100)).unwrap();
        assert_eq!(t.remove("a").map(|i| i.entry_id), Some("a".to_string()));
        assert!(t.remove("a").is_none());
        assert!(!t.has_conflict(0, 1_000, false));
        assert_eq!(t.longest_ms, 100);
    }

    #[test]
    fn test_neighbors() {
        let mut t = MachineTimeline::new("TI1");
        t.insert(iv("a", 0, 100).with_material("Ti-6Al-4V")).unwrap();
        t.insert(iv("b", 300, 400).with_material("Inconel 718")).unwrap();

        assert_eq!(t.preceding(200).map(|i| i.entry_id.as_str()), Some("a"));
        assert_eq!(t.preceding(100).map(|i| i.entry_id.as_str()), Some("a"));
        assert!(t.preceding(99).is_none());
        assert_eq!(t.following(200).map(|i| i.entry_id.as_str()), Some("b"));
        assert_eq!(t.following(300).map(|i| i.entry_id.as_str()), Some("b"));
        assert!(t.following(301).is_none());
        assert_eq!(t.preceding(1_000).map(|i| i.entry_id.as_str()), Some("b"));
    }

    #[test]
    fn test_book_routes_by_machine() {
        let machines = [
            Machine::new("TI1", "SLS").with_material("Ti-6Al-4V"),
            Machine::new("TI2", "SLS"),
        ];
        let book = TimelineBook::for_machines(&machines);
        assert_eq!(book.machine_ids(), vec!["TI1", "TI2"]);

        book.insert("TI1", iv("a", 0, 100)).unwrap();
        assert!(book.has_conflict("TI1", 50, 60, false).unwrap());
        assert!(!book.has_conflict("TI2", 50, 60, false).unwrap());
        assert_eq!(
            book.snapshot("TI1").unwrap().current_material(),
            Some("Ti-6Al-4V")
        );
        assert!(matches!(
            book.insert("XX", iv("b", 0, 1)),
            Err(TimelineError::UnknownMachine(_))
        ));
        assert!(book.remove("TI1", "a").unwrap().is_some());
        assert!(book.intervals("TI1").unwrap().is_empty());
    }
}
