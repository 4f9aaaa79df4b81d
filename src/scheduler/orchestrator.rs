//! Stage placement orchestrator.
//!
//! # Algorithm
//!
//! `place_stage` is first-fit by machine preference order:
//!
//! 1. Derive the earliest start from the job's already-placed upstream
//!    entries (actual times where execution reported them).
//! 2. Build the candidate list: the pinned machine, else the preferred
//!    machines followed by the remaining eligible machines by id. Pool
//!    membership and availability filter the list.
//! 3. For each candidate, under that machine's lock, probe forward from the
//!    earliest start for a slot that clears committed intervals, the
//!    changeover gaps on both sides, the capacity of any limited pool the
//!    machine belongs to, the machine's maintenance calendar and the plant
//!    operating calendar.
//! 4. Commit on the first machine that yields a slot. If none does, return
//!    [`InfeasibleError`] listing every candidate and why it failed.
//!
//! Probing is read-only. A cancelled or failed call leaves no trace, and a
//! repeated call with the same inputs evaluates candidates in the same
//! order with the same outcome.
//!
//! # Rescheduling
//! A move searches with the old interval treated as free but still booked,
//! and the old entry is retired only after the replacement commits. At most
//! one machine lock is held at a time.
//!
//! # Lock Order
//! Machine timeline first, then the entry store. The entry store is never
//! held while acquiring a timeline lock.
//!
//! # Reference
//! Pinedo (2016), "Scheduling", Ch. 4: Priority Dispatching

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::changeover::{ChangeoverRules, EffectiveDuration, TimingCalculator};
use crate::config::{EngineConfig, SearchConfig};
use crate::error::{
    CandidateRejection, InfeasibleError, RejectionReason, Result, ScheduleError, TimelineError,
};
use crate::graph::minimum_start;
use crate::models::{
    AlwaysOperating, EntryStatus, Machine, OperatingCalendar, ResourcePool, Schedule,
    ScheduleEntry, StageCatalog, StageDefinition, StageRequirement, TimeWindow,
};
use crate::telemetry::{MaterialFeed, NoTelemetry};
use crate::timeline::{MachineTimeline, TimelineBook, TimelineInterval};
use crate::validation::validate_setup;
use crate::workflow::ResolvedWorkflow;

/// Cooperative cancellation for an in-flight placement.
///
/// Checked before each candidate machine and again right before commit.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A stage that could not be placed while scheduling a job.
#[derive(Debug, Clone)]
pub struct StageFailure {
    pub requirement_id: String,
    pub error: ScheduleError,
}

/// Outcome of [`Orchestrator::schedule_job`].
#[derive(Debug, Clone)]
pub struct JobPlan {
    pub job_id: String,
    pub part_id: String,
    /// Committed entries, in placement order.
    pub placed: Vec<ScheduleEntry>,
    /// Optional stages that could not be placed.
    pub skipped: Vec<StageFailure>,
    /// The required stage that stopped the job, if any.
    pub failure: Option<StageFailure>,
}

impl JobPlan {
    /// Every required stage was placed.
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }

    /// Planned end of the last placed stage.
    pub fn completion_ms(&self) -> Option<i64> {
        self.placed.iter().map(|e| e.planned_end_ms).max()
    }
}

/// A feasible slot found by a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    start_ms: i64,
    changeover_ms: i64,
}

/// Inputs of one candidate probe.
struct ProbeRequest<'a> {
    machine: &'a Machine,
    material: Option<&'a str>,
    allow_parallel: bool,
    /// Caller's earliest start; floor for a changeover with no predecessor.
    requested_ms: i64,
    /// Earliest start after dependency constraints.
    earliest_ms: i64,
    occupied_ms: i64,
    /// Capacity-limited pools the machine belongs to.
    capped_pools: Vec<&'a ResourcePool>,
    /// Entry being moved; it does not count against pool capacity.
    replacing: Option<&'a str>,
}

enum Attempt {
    Placed(ScheduleEntry),
    Rejected(RejectionReason),
}

#[derive(Debug, Default)]
struct EntryStore {
    entries: Vec<ScheduleEntry>,
    index: HashMap<String, usize>,
}

impl EntryStore {
    fn push(&mut self, entry: ScheduleEntry) {
        self.index.insert(entry.id.clone(), self.entries.len());
        self.entries.push(entry);
    }

    fn get(&self, entry_id: &str) -> Option<&ScheduleEntry> {
        self.index.get(entry_id).map(|&i| &self.entries[i])
    }

    fn get_mut(&mut self, entry_id: &str) -> Option<&mut ScheduleEntry> {
        self.index.get(entry_id).map(|&i| &mut self.entries[i])
    }

    /// The job's live entry for a requirement.
    fn active_for(&self, job_id: &str, requirement_id: &str) -> Option<&ScheduleEntry> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.job_id == job_id && e.requirement_id == requirement_id && e.status.is_active())
    }
}

/// Places stage requirements onto machine timelines.
pub struct Orchestrator {
    catalog: StageCatalog,
    machines: BTreeMap<String, Machine>,
    pools: BTreeMap<String, ResourcePool>,
    timing: TimingCalculator,
    search: SearchConfig,
    calendar: Arc<dyn OperatingCalendar>,
    feed: Arc<dyn MaterialFeed>,
    book: TimelineBook,
    entries: RwLock<EntryStore>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("machines", &self.machines.keys().collect::<Vec<_>>())
            .field("pools", &self.pools.keys().collect::<Vec<_>>())
            .field("search", &self.search)
            .field("entries", &self.entries.read().entries.len())
            .finish()
    }
}

impl Orchestrator {
    /// Creates an orchestrator over a validated setup.
    ///
    /// # Errors
    /// [`ScheduleError::InvalidSetup`] with every problem found by
    /// [`validate_setup`].
    pub fn new(
        catalog: StageCatalog,
        machines: Vec<Machine>,
        pools: Vec<ResourcePool>,
        rules: ChangeoverRules,
        search: SearchConfig,
    ) -> Result<Self> {
        validate_setup(&catalog, &machines, &pools).map_err(ScheduleError::InvalidSetup)?;

        let book = TimelineBook::for_machines(&machines);
        info!(
            machines = machines.len(),
            pools = pools.len(),
            stages = catalog.len(),
            "orchestrator ready"
        );
        Ok(Self {
            catalog,
            machines: machines.into_iter().map(|m| (m.id.clone(), m)).collect(),
            pools: pools.into_iter().map(|p| (p.id.clone(), p)).collect(),
            timing: TimingCalculator::new(rules),
            search,
            calendar: Arc::new(AlwaysOperating),
            feed: Arc::new(NoTelemetry),
            book,
            entries: RwLock::new(EntryStore::default()),
            next_id: AtomicU64::new(0),
        })
    }

    /// Creates an orchestrator from an [`EngineConfig`].
    pub fn from_config(
        catalog: StageCatalog,
        machines: Vec<Machine>,
        pools: Vec<ResourcePool>,
        config: &EngineConfig,
    ) -> Result<Self> {
        Self::new(
            catalog,
            machines,
            pools,
            ChangeoverRules::from_config(&config.changeover),
            config.search.clone(),
        )
    }

    /// Sets the plant operating calendar.
    pub fn with_calendar(mut self, calendar: impl OperatingCalendar + 'static) -> Self {
        self.calendar = Arc::new(calendar);
        self
    }

    /// Sets the material telemetry feed.
    pub fn with_material_feed(mut self, feed: impl MaterialFeed + 'static) -> Self {
        self.feed = Arc::new(feed);
        self
    }

    /// Shares an existing material feed.
    pub fn with_shared_feed(mut self, feed: Arc<dyn MaterialFeed>) -> Self {
        self.feed = feed;
        self
    }

    pub fn catalog(&self) -> &StageCatalog {
        &self.catalog
    }

    pub fn timing(&self) -> &TimingCalculator {
        &self.timing
    }

    pub fn machine(&self, machine_id: &str) -> Option<&Machine> {
        self.machines.get(machine_id)
    }

    /// Places one stage of a job.
    pub fn place_stage(
        &self,
        workflow: &ResolvedWorkflow,
        requirement_id: &str,
        job_id: &str,
        earliest_start_ms: i64,
    ) -> Result<ScheduleEntry> {
        self.place_stage_cancellable(
            workflow,
            requirement_id,
            job_id,
            earliest_start_ms,
            &CancelToken::new(),
        )
    }

    /// Places one stage of a job, abandoning the search if `cancel` fires.
    ///
    /// # Errors
    /// - [`ScheduleError::UpstreamNotScheduled`] if a gating prerequisite of
    ///   the same job has no live entry
    /// - [`ScheduleError::Infeasible`] if no candidate has a slot
    /// - [`ScheduleError::Cancelled`] if cancelled before commit
    #[instrument(
        level = "debug",
        skip(self, workflow, cancel),
        fields(part_id = %workflow.part_id)
    )]
    pub fn place_stage_cancellable(
        &self,
        workflow: &ResolvedWorkflow,
        requirement_id: &str,
        job_id: &str,
        earliest_start_ms: i64,
        cancel: &CancelToken,
    ) -> Result<ScheduleEntry> {
        self.place(workflow, requirement_id, job_id, earliest_start_ms, cancel, None)
    }

    /// First-fit placement. With `replacing`, the old entry's interval is
    /// ignored on its own machine and retired in the same commit.
    fn place(
        &self,
        workflow: &ResolvedWorkflow,
        requirement_id: &str,
        job_id: &str,
        earliest_start_ms: i64,
        cancel: &CancelToken,
        replacing: Option<&ScheduleEntry>,
    ) -> Result<ScheduleEntry> {
        let requirement = workflow
            .requirement(requirement_id)
            .ok_or_else(|| ScheduleError::UnknownRequirement(requirement_id.to_string()))?;
        let definition = self
            .catalog
            .get(&requirement.stage_id)
            .ok_or_else(|| ScheduleError::UnknownStage(requirement.stage_id.clone()))?;

        let base = self.timing.base_duration(requirement, definition);
        let occupied_ms = base.occupied_ms();
        if occupied_ms <= 0 {
            return Err(TimelineError::InvalidInterval {
                start_ms: earliest_start_ms,
                end_ms: earliest_start_ms + occupied_ms,
            }
            .into());
        }

        let earliest_ms =
            self.dependency_earliest(workflow, requirement, job_id, earliest_start_ms, occupied_ms)?;
        let material = workflow.material_for(requirement);

        let mut rejections = Vec::new();
        for candidate in self.candidates(requirement, definition) {
            if cancel.is_cancelled() {
                debug!(job_id, requirement_id, "placement cancelled");
                return Err(ScheduleError::Cancelled);
            }
            let machine = match candidate {
                Ok(machine) => machine,
                Err(rejection) => {
                    debug!(machine_id = %rejection.machine_id, reason = %rejection.reason, "candidate filtered");
                    rejections.push(rejection);
                    continue;
                }
            };

            let request = ProbeRequest {
                machine,
                material,
                allow_parallel: requirement.allow_parallel,
                requested_ms: earliest_start_ms,
                earliest_ms,
                occupied_ms,
                capped_pools: self
                    .pools
                    .values()
                    .filter(|p| p.capacity.is_some() && p.contains(&machine.id))
                    .collect(),
                replacing: replacing.map(|old| old.id.as_str()),
            };
            let attempt = self.book.with_timeline(&machine.id, |timeline| {
                let released = match replacing {
                    Some(old) if old.machine_id == machine.id => timeline.remove(&old.id),
                    _ => None,
                };
                let outcome = self.commit_first_slot(
                    timeline,
                    &request,
                    workflow,
                    requirement,
                    job_id,
                    base,
                    cancel,
                    replacing,
                );
                if !matches!(outcome, Ok(Attempt::Placed(_))) {
                    if let Some(interval) = released {
                        timeline.insert(interval)?;
                    }
                }
                outcome
            })??;

            match attempt {
                Attempt::Placed(entry) => {
                    info!(
                        entry_id = %entry.id,
                        machine_id = %entry.machine_id,
                        job_id,
                        requirement_id,
                        start_ms = entry.planned_start_ms,
                        end_ms = entry.planned_end_ms,
                        changeover_ms = entry.changeover_ms,
                        "stage placed"
                    );
                    return Ok(entry);
                }
                Attempt::Rejected(reason) => {
                    debug!(machine_id = %machine.id, reason = %reason, "no slot on candidate");
                    rejections.push(CandidateRejection {
                        machine_id: machine.id.clone(),
                        reason,
                    });
                }
            }
        }

        let err = InfeasibleError {
            requirement_id: requirement_id.to_string(),
            job_id: job_id.to_string(),
            earliest_start_ms: earliest_ms,
            candidates: rejections,
        };
        warn!(job_id, requirement_id, error = %err, "stage infeasible");
        Err(err.into())
    }

    /// Searches the locked timeline and commits the first slot found.
    ///
    /// Pool capacity is checked again under the entry-store write lock; a
    /// slot taken meanwhile on another pool member sends the search on.
    #[allow(clippy::too_many_arguments)]
    fn commit_first_slot(
        &self,
        timeline: &mut MachineTimeline,
        request: &ProbeRequest<'_>,
        workflow: &ResolvedWorkflow,
        requirement: &StageRequirement,
        job_id: &str,
        base: EffectiveDuration,
        cancel: &CancelToken,
        replacing: Option<&ScheduleEntry>,
    ) -> Result<Attempt> {
        loop {
            let slot = match self.probe(timeline, request) {
                Ok(slot) => slot,
                Err(reason) => return Ok(Attempt::Rejected(reason)),
            };
            if cancel.is_cancelled() {
                return Err(ScheduleError::Cancelled);
            }
            let end_ms = slot.start_ms + request.occupied_ms;
            if let Some(old) = replacing {
                self.check_dependents(workflow, old, TimeWindow::new(slot.start_ms, end_ms))?;
            }

            let mut store = self.entries.write();
            if pool_saturation(&store, request, slot.start_ms, end_ms).is_some() {
                debug!(machine_id = %request.machine.id, start_ms = slot.start_ms, "pool filled before commit");
                continue;
            }
            let entry = self.new_entry(workflow, requirement, job_id, request.machine, request.material, slot, base);
            let mut interval = TimelineInterval::new(
                entry.id.clone(),
                job_id,
                entry.planned_start_ms,
                entry.planned_end_ms,
            );
            interval.material = entry.material.clone();
            interval.allow_parallel = entry.allow_parallel;
            timeline.insert(interval)?;
            if let Some(old) = replacing.filter(|old| old.machine_id == request.machine.id) {
                retire(timeline, &mut store, &old.id, &entry.id);
            }
            store.push(entry.clone());
            return Ok(Attempt::Placed(entry));
        }
    }

    /// Places every stage of a workflow for one job, in dependency order.
    ///
    /// Stops at the first required stage that fails; entries placed before
    /// it stay committed (see [`Orchestrator::rollback_job`]). Optional stages
    /// that fail are recorded and skipped.
    #[instrument(level = "debug", skip(self, workflow), fields(part_id = %workflow.part_id))]
    pub fn schedule_job(
        &self,
        workflow: &ResolvedWorkflow,
        job_id: &str,
        earliest_start_ms: i64,
    ) -> JobPlan {
        let mut plan = JobPlan {
            job_id: job_id.to_string(),
            part_id: workflow.part_id.clone(),
            placed: Vec::new(),
            skipped: Vec::new(),
            failure: None,
        };
        for requirement in &workflow.stages {
            match self.place_stage(workflow, &requirement.id, job_id, earliest_start_ms) {
                Ok(entry) => plan.placed.push(entry),
                Err(error) => {
                    let failure = StageFailure {
                        requirement_id: requirement.id.clone(),
                        error,
                    };
                    if requirement.is_required {
                        warn!(job_id, requirement_id = %requirement.id, "job stopped at required stage");
                        plan.failure = Some(failure);
                        break;
                    }
                    debug!(job_id, requirement_id = %requirement.id, "optional stage skipped");
                    plan.skipped.push(failure);
                }
            }
        }
        info!(
            job_id,
            placed = plan.placed.len(),
            skipped = plan.skipped.len(),
            complete = plan.is_complete(),
            "job scheduled"
        );
        plan
    }

    /// Cancels every live, cancellable entry of a job, latest first.
    ///
    /// Returns the ids of the cancelled entries. Completed entries stay.
    pub fn rollback_job(&self, job_id: &str) -> Result<Vec<String>> {
        let targets: Vec<String> = self
            .entries
            .read()
            .entries
            .iter()
            .rev()
            .filter(|e| e.job_id == job_id && e.status.can_transition_to(EntryStatus::Cancelled))
            .map(|e| e.id.clone())
            .collect();
        for id in &targets {
            self.cancel_entry(id)?;
        }
        info!(job_id, cancelled = targets.len(), "job rolled back");
        Ok(targets)
    }

    /// Cancels an entry and frees its machine interval.
    pub fn cancel_entry(&self, entry_id: &str) -> Result<ScheduleEntry> {
        self.apply_transition(entry_id, EntryStatus::Cancelled, None)
    }

    /// Records an execution-tracking status change.
    ///
    /// `InProgress` stamps the actual start and marks the machine busy with
    /// the job; `Completed` stamps the actual end; `Cancelled` frees the
    /// interval.
    pub fn transition(&self, entry_id: &str, to: EntryStatus, at_ms: i64) -> Result<ScheduleEntry> {
        self.apply_transition(entry_id, to, Some(at_ms))
    }

    fn apply_transition(
        &self,
        entry_id: &str,
        to: EntryStatus,
        at_ms: Option<i64>,
    ) -> Result<ScheduleEntry> {
        let machine_id = self
            .entry(entry_id)
            .map(|e| e.machine_id)
            .ok_or_else(|| ScheduleError::UnknownEntry(entry_id.to_string()))?;

        let updated = self.book.with_timeline(&machine_id, |timeline| {
            let mut store = self.entries.write();
            let entry = store
                .get_mut(entry_id)
                .ok_or_else(|| ScheduleError::UnknownEntry(entry_id.to_string()))?;
            if !entry.status.can_transition_to(to) {
                return Err(ScheduleError::InvalidTransition {
                    entry_id: entry_id.to_string(),
                    from: entry.status,
                    to,
                });
            }
            match to {
                EntryStatus::InProgress => {
                    if entry.actual_start_ms.is_none() {
                        entry.actual_start_ms = at_ms;
                    }
                    timeline.set_current_job(Some(entry.job_id.clone()));
                    if entry.material.is_some() {
                        timeline.set_current_material(entry.material.clone());
                    }
                }
                EntryStatus::Completed => {
                    entry.actual_end_ms = at_ms;
                    if timeline.current_job() == Some(entry.job_id.as_str()) {
                        timeline.set_current_job(None);
                    }
                }
                EntryStatus::Cancelled => {
                    timeline.remove(&entry.id);
                    if timeline.current_job() == Some(entry.job_id.as_str()) {
                        timeline.set_current_job(None);
                    }
                }
                _ => {}
            }
            let from = entry.status;
            entry.status = to;
            debug!(entry_id, machine_id = %entry.machine_id, %from, %to, "entry transitioned");
            Ok(entry.clone())
        })??;
        Ok(updated)
    }

    /// Moves an entry to a new slot.
    ///
    /// The stage is re-placed from `earliest_start_ms` as if its old
    /// interval were free. The old interval stays booked until the
    /// replacement commits, so a failed move changes nothing. On success the
    /// old entry is cancelled and points at its replacement.
    ///
    /// # Errors
    /// - [`ScheduleError::DependentsPlaced`] if a live downstream entry of
    ///   the same job would start before the new slot allows
    /// - any error of [`Orchestrator::place_stage`]
    pub fn reschedule_entry(
        &self,
        workflow: &ResolvedWorkflow,
        entry_id: &str,
        earliest_start_ms: i64,
    ) -> Result<ScheduleEntry> {
        let old = self
            .entry(entry_id)
            .ok_or_else(|| ScheduleError::UnknownEntry(entry_id.to_string()))?;
        if !old.status.can_transition_to(EntryStatus::Cancelled) {
            return Err(ScheduleError::InvalidTransition {
                entry_id: entry_id.to_string(),
                from: old.status,
                to: EntryStatus::Cancelled,
            });
        }

        let new_entry = self.place(
            workflow,
            &old.requirement_id,
            &old.job_id,
            earliest_start_ms,
            &CancelToken::new(),
            Some(&old),
        )?;
        if new_entry.machine_id != old.machine_id {
            self.book.with_timeline(&old.machine_id, |timeline| {
                retire(timeline, &mut self.entries.write(), &old.id, &new_entry.id);
            })?;
        }
        info!(old_entry = %old.id, new_entry = %new_entry.id, "entry rescheduled");
        Ok(new_entry)
    }

    pub fn entry(&self, entry_id: &str) -> Option<ScheduleEntry> {
        self.entries.read().get(entry_id).cloned()
    }

    /// All entries in creation order, cancelled ones included.
    pub fn entries(&self) -> Vec<ScheduleEntry> {
        self.entries.read().entries.clone()
    }

    pub fn entries_for_job(&self, job_id: &str) -> Vec<ScheduleEntry> {
        self.entries
            .read()
            .entries
            .iter()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect()
    }

    /// Live entries on a machine, by planned start.
    pub fn entries_for_machine(&self, machine_id: &str) -> Vec<ScheduleEntry> {
        let mut entries: Vec<ScheduleEntry> = self
            .entries
            .read()
            .entries
            .iter()
            .filter(|e| e.machine_id == machine_id && e.status.is_active())
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.planned_start_ms);
        entries
    }

    /// Snapshot of a machine's timeline.
    pub fn timeline(&self, machine_id: &str) -> Result<MachineTimeline> {
        Ok(self.book.snapshot(machine_id)?)
    }

    /// Read-only view of every entry.
    pub fn schedule(&self) -> Schedule {
        Schedule::new(self.entries())
    }

    /// Earliest start allowed by the job's placed prerequisites.
    fn dependency_earliest(
        &self,
        workflow: &ResolvedWorkflow,
        requirement: &StageRequirement,
        job_id: &str,
        earliest_start_ms: i64,
        occupied_ms: i64,
    ) -> Result<i64> {
        let store = self.entries.read();
        let mut earliest = earliest_start_ms;
        for dep in workflow.graph.prerequisites_of(&requirement.id) {
            match store.active_for(job_id, &dep.prerequisite) {
                Some(upstream) => {
                    let bound =
                        minimum_start(upstream.effective_window(), dep.dependency_type, dep.lag_ms);
                    earliest = earliest.max(bound.to_start(occupied_ms));
                }
                None => {
                    let gates = workflow
                        .requirement(&dep.prerequisite)
                        .map_or(true, StageRequirement::gates_downstream);
                    if gates {
                        return Err(ScheduleError::UpstreamNotScheduled {
                            requirement_id: requirement.id.clone(),
                            upstream_id: dep.prerequisite.clone(),
                            job_id: job_id.to_string(),
                        });
                    }
                    debug!(
                        requirement_id = %requirement.id,
                        upstream_id = %dep.prerequisite,
                        "unplaced non-gating upstream ignored"
                    );
                }
            }
        }
        Ok(earliest)
    }

    /// Rejects a move that would pull the ground from under the job's
    /// already-placed dependents.
    fn check_dependents(
        &self,
        workflow: &ResolvedWorkflow,
        old: &ScheduleEntry,
        window: TimeWindow,
    ) -> Result<()> {
        let store = self.entries.read();
        for dep in workflow.graph.dependents_of(&old.requirement_id) {
            let Some(downstream) = store.active_for(&old.job_id, &dep.dependent) else {
                continue;
            };
            let placed = downstream.effective_window();
            let required_start_ms =
                minimum_start(window, dep.dependency_type, dep.lag_ms).to_start(placed.duration_ms());
            if placed.start_ms < required_start_ms {
                debug!(entry_id = %old.id, dependent_id = %downstream.id, required_start_ms, "move blocked by dependent");
                return Err(ScheduleError::DependentsPlaced {
                    entry_id: old.id.clone(),
                    dependent_id: downstream.id.clone(),
                    required_start_ms,
                });
            }
        }
        Ok(())
    }

    /// Candidate machines in evaluation order, each either usable or
    /// rejected with a reason.
    fn candidates(
        &self,
        requirement: &StageRequirement,
        definition: &StageDefinition,
    ) -> Vec<std::result::Result<&Machine, CandidateRejection>> {
        let mut ids: Vec<&str> = Vec::new();
        if let Some(pinned) = requirement.affinity.specific_machine() {
            ids.push(pinned);
        } else {
            for id in &requirement.affinity.preferred {
                if !ids.contains(&id.as_str()) {
                    ids.push(id.as_str());
                }
            }
            let mut rest: Vec<&str> = if !definition.eligible_machines.is_empty() {
                definition.eligible_machines.iter().map(String::as_str).collect()
            } else if let Some(pool) = definition.resource_pool.as_ref().and_then(|p| self.pools.get(p)) {
                pool.members.iter().map(String::as_str).collect()
            } else {
                self.machines.keys().map(String::as_str).collect()
            };
            rest.sort_unstable();
            for id in rest {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }

        ids.into_iter()
            .map(|id| -> std::result::Result<&Machine, CandidateRejection> {
                let reject = |reason| CandidateRejection {
                    machine_id: id.to_string(),
                    reason,
                };
                let machine = self
                    .machines
                    .get(id)
                    .ok_or_else(|| reject(RejectionReason::UnknownMachine))?;
                if !definition.is_eligible(id) {
                    return Err(reject(RejectionReason::NotEligible));
                }
                if let Some(pool_id) = &definition.resource_pool {
                    if let Some(pool) = self.pools.get(pool_id) {
                        if !pool.contains(id) {
                            return Err(reject(RejectionReason::NotInPool {
                                pool_id: pool_id.clone(),
                            }));
                        }
                    }
                }
                if let Some(pool) = self.pools.values().find(|p| p.contains(id) && !p.is_available(id)) {
                    return Err(reject(RejectionReason::PoolUnavailable {
                        pool_id: pool.id.clone(),
                    }));
                }
                Ok(machine)
            })
            .collect()
    }

    /// Earliest feasible slot on one machine, or why there is none.
    fn probe(
        &self,
        timeline: &MachineTimeline,
        request: &ProbeRequest<'_>,
    ) -> std::result::Result<Slot, RejectionReason> {
        let machine = request.machine;
        let rules = self.timing.rules();
        let resolution = self.search.resolution_ms();
        let horizon_end = request.earliest_ms.saturating_add(self.search.horizon_ms());
        let loaded = self
            .feed
            .current_material(&machine.id)
            .or_else(|| timeline.current_material().map(String::from));

        let mut t = request.earliest_ms;
        for _ in 0..self.search.max_probes {
            if t > horizon_end {
                return Err(RejectionReason::HorizonExhausted {
                    searched_until_ms: horizon_end,
                });
            }
            let end = t + request.occupied_ms;

            // Changeover from whatever precedes the slot.
            let (floor, from) = match timeline.preceding(t) {
                Some(prev) => (prev.end_ms, prev.material.as_deref()),
                None => (request.requested_ms, loaded.as_deref()),
            };
            let changeover_ms = rules.changeover_ms(from, request.material);
            if floor + changeover_ms > t {
                t = floor + changeover_ms;
                continue;
            }

            if let Some(block_end) = timeline
                .conflicts(t, end, request.allow_parallel)
                .iter()
                .map(|i| i.end_ms)
                .max()
            {
                t = block_end;
                continue;
            }

            if !request.capped_pools.is_empty() {
                let saturated = pool_saturation(&self.entries.read(), request, t, end);
                if let Some(free_at) = saturated {
                    t = free_at;
                    continue;
                }
            }

            // Changeover into whatever follows the slot.
            if let Some(next) = timeline.following(end) {
                let gap = rules.changeover_ms(request.material, next.material.as_deref());
                if next.start_ms < end + gap {
                    t = next.end_ms;
                    continue;
                }
            }

            if let Some(down) = machine.first_unavailable_in(t, end) {
                match machine.calendar.as_ref().and_then(|c| c.next_available_time(down)) {
                    Some(next) if next > t => {
                        t = next;
                        continue;
                    }
                    _ => {
                        return Err(RejectionReason::HorizonExhausted {
                            searched_until_ms: horizon_end,
                        })
                    }
                }
            }

            if let Some(closed) = self.calendar.first_closed_in(&machine.id, t, end, resolution) {
                t = next_grid(closed, resolution);
                continue;
            }

            return Ok(Slot {
                start_ms: t,
                changeover_ms,
            });
        }
        Err(RejectionReason::ProbeLimitReached {
            probes: self.search.max_probes,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn new_entry(
        &self,
        workflow: &ResolvedWorkflow,
        requirement: &StageRequirement,
        job_id: &str,
        machine: &Machine,
        material: Option<&str>,
        slot: Slot,
        base: EffectiveDuration,
    ) -> ScheduleEntry {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        ScheduleEntry {
            id: format!("SE-{n:06}"),
            machine_id: machine.id.clone(),
            requirement_id: requirement.id.clone(),
            part_id: workflow.part_id.clone(),
            job_id: job_id.to_string(),
            planned_start_ms: slot.start_ms,
            planned_end_ms: slot.start_ms + base.occupied_ms(),
            changeover_ms: slot.changeover_ms,
            material: material.map(String::from),
            allow_parallel: requirement.allow_parallel,
            actual_start_ms: None,
            actual_end_ms: None,
            status: EntryStatus::Scheduled,
            superseded_by: None,
        }
    }
}

/// Earliest instant a saturated capacity pool frees a seat for
/// `[start_ms, end_ms)`, or `None` if every pool has room.
fn pool_saturation(
    store: &EntryStore,
    request: &ProbeRequest<'_>,
    start_ms: i64,
    end_ms: i64,
) -> Option<i64> {
    let mut free_at: Option<i64> = None;
    for pool in &request.capped_pools {
        let Some(capacity) = pool.capacity else {
            continue;
        };
        let busy_until: Vec<i64> = store
            .entries
            .iter()
            .filter(|e| e.status.is_active() && Some(e.id.as_str()) != request.replacing)
            .filter(|e| pool.contains(&e.machine_id))
            .map(ScheduleEntry::effective_window)
            .filter(|w| w.start_ms < end_ms && w.end_ms > start_ms)
            .map(|w| w.end_ms)
            .collect();
        if busy_until.len() >= capacity {
            if let Some(&first) = busy_until.iter().min() {
                free_at = Some(free_at.map_or(first, |t| t.max(first)));
            }
        }
    }
    free_at
}

/// Cancels a replaced entry and drops its interval, under its machine lock.
fn retire(timeline: &mut MachineTimeline, store: &mut EntryStore, old_id: &str, new_id: &str) {
    let Some(entry) = store.get_mut(old_id) else {
        return;
    };
    if !entry.status.can_transition_to(EntryStatus::Cancelled) {
        warn!(entry_id = old_id, status = %entry.status, "replaced entry changed state during move");
        return;
    }
    timeline.remove(old_id);
    if entry.status == EntryStatus::InProgress && timeline.current_job() == Some(entry.job_id.as_str()) {
        timeline.set_current_job(None);
    }
    entry.status = EntryStatus::Cancelled;
    entry.superseded_by = Some(new_id.to_string());
}

/// Next multiple of `step` strictly after `t`.
fn next_grid(t: i64, step: i64) -> i64 {
    (t.div_euclid(step) + 1) * step
}
