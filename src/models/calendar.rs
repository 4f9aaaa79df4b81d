//! Calendars: machine maintenance windows and plant operating shifts.
//!
//! Two layers decide whether a machine may run at an instant:
//!
//! - [`Calendar`]: per-machine availability windows and blocked periods
//!   (planned maintenance, calibration), owned by the [`Machine`](super::Machine).
//! - [`OperatingCalendar`]: the plant-wide shift/holiday lookup supplied by the
//!   surrounding application. [`ShiftCalendar`] is a weekly implementation.
//!
//! # Time Model
//! Instants are milliseconds since the Unix epoch (UTC).
//!
//! # Precedence
//! Blocked periods override time windows. An instant is available iff it
//! falls within at least one `time_windows` entry (or none are defined) AND
//! does not fall within any `blocked_periods` entry.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// A time interval [start, end).
///
/// Half-open interval: includes start, excludes end.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeWindow {
    /// Interval start (ms, inclusive).
    pub start_ms: i64,
    /// Interval end (ms, exclusive).
    pub end_ms: i64,
}

impl TimeWindow {
    /// Creates a new time window.
    pub fn new(start_ms: i64, end_ms: i64) -> Self {
        Self { start_ms, end_ms }
    }

    /// Duration of this window (ms).
    #[inline]
    pub fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }

    /// Whether a timestamp falls within this window.
    #[inline]
    pub fn contains(&self, time_ms: i64) -> bool {
        time_ms >= self.start_ms && time_ms < self.end_ms
    }

    /// Whether two windows overlap. Touching windows do not.
    #[inline]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start_ms < other.end_ms && self.end_ms > other.start_ms
    }
}

/// Machine availability calendar.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Calendar {
    /// Calendar identifier.
    pub id: String,
    /// Periods when the machine is available. Empty = always available.
    pub time_windows: Vec<TimeWindow>,
    /// Periods when the machine is down (overrides `time_windows`).
    pub blocked_periods: Vec<TimeWindow>,
}

impl Calendar {
    /// Creates an unconstrained calendar.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Adds an availability window.
    pub fn with_window(mut self, start_ms: i64, end_ms: i64) -> Self {
        self.time_windows.push(TimeWindow::new(start_ms, end_ms));
        self
    }

    /// Adds a blocked period (maintenance, calibration).
    pub fn with_blocked(mut self, start_ms: i64, end_ms: i64) -> Self {
        self.blocked_periods.push(TimeWindow::new(start_ms, end_ms));
        self
    }

    /// Whether a timestamp is within working time.
    pub fn is_working_time(&self, time_ms: i64) -> bool {
        if self.blocked_periods.iter().any(|w| w.contains(time_ms)) {
            return false;
        }
        self.time_windows.is_empty() || self.time_windows.iter().any(|w| w.contains(time_ms))
    }

    /// First instant in `[start_ms, end_ms)` that is not working time.
    ///
    /// Exact: checks the window start plus every boundary of the calendar's
    /// own windows inside the range, since availability only changes there.
    pub fn first_unavailable_in(&self, start_ms: i64, end_ms: i64) -> Option<i64> {
        let mut probes: Vec<i64> = vec![start_ms];
        for w in self.time_windows.iter().chain(&self.blocked_periods) {
            for t in [w.start_ms, w.end_ms] {
                if t > start_ms && t < end_ms {
                    probes.push(t);
                }
            }
        }
        probes.sort_unstable();
        probes.into_iter().find(|&t| !self.is_working_time(t))
    }

    /// Earliest working instant at or after `from_ms`.
    ///
    /// Returns `None` if the calendar never becomes available again.
    pub fn next_available_time(&self, from_ms: i64) -> Option<i64> {
        if self.is_working_time(from_ms) {
            return Some(from_ms);
        }
        let mut candidates: Vec<i64> = self
            .time_windows
            .iter()
            .filter(|w| w.end_ms > from_ms)
            .map(|w| w.start_ms.max(from_ms))
            .chain(
                self.blocked_periods
                    .iter()
                    .filter(|b| b.end_ms > from_ms)
                    .map(|b| b.end_ms),
            )
            .collect();
        candidates.sort_unstable();
        candidates.into_iter().find(|&t| self.is_working_time(t))
    }
}

/// Plant shift/holiday lookup consumed by the orchestrator.
///
/// Implemented by [`AlwaysOperating`], [`ShiftCalendar`], and any
/// `Fn(&str, i64) -> bool` closure (machine id, instant in ms).
pub trait OperatingCalendar: Send + Sync {
    /// Whether `machine_id` may operate at `instant_ms`.
    fn is_operating_time(&self, machine_id: &str, instant_ms: i64) -> bool;

    /// First instant in `[start_ms, end_ms)` outside operating time.
    ///
    /// The default samples `start_ms`, every multiple of `step_ms` inside the
    /// range and the last millisecond. Calendars that know where their
    /// boundaries fall should check those instead.
    fn first_closed_in(
        &self,
        machine_id: &str,
        start_ms: i64,
        end_ms: i64,
        step_ms: i64,
    ) -> Option<i64> {
        let step = step_ms.max(1);
        let mut t = start_ms;
        while t < end_ms {
            if !self.is_operating_time(machine_id, t) {
                return Some(t);
            }
            t = (t.div_euclid(step) + 1) * step;
        }
        let last = end_ms - 1;
        (last >= start_ms && !self.is_operating_time(machine_id, last)).then_some(last)
    }
}

impl<F> OperatingCalendar for F
where
    F: Fn(&str, i64) -> bool + Send + Sync,
{
    fn is_operating_time(&self, machine_id: &str, instant_ms: i64) -> bool {
        self(machine_id, instant_ms)
    }
}

/// Calendar with no shift restrictions.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOperating;

impl OperatingCalendar for AlwaysOperating {
    fn is_operating_time(&self, _machine_id: &str, _instant_ms: i64) -> bool {
        true
    }

    fn first_closed_in(&self, _machine_id: &str, _start_ms: i64, _end_ms: i64, _step_ms: i64) -> Option<i64> {
        None
    }
}

/// A recurring weekly shift.
///
/// A shift whose `end` is not after `start` runs overnight into the next
/// day; `start == end` covers the whole day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shift {
    pub name: String,
    /// Days on which the shift starts.
    pub weekdays: Vec<Weekday>,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Shift {
    pub fn new(
        name: impl Into<String>,
        weekdays: Vec<Weekday>,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Self {
        Self {
            name: name.into(),
            weekdays,
            start,
            end,
        }
    }

    fn starts_on(&self, day: Weekday) -> bool {
        self.weekdays.contains(&day)
    }

    /// Whether the shift covers the given wall-clock instant.
    pub fn covers(&self, at: NaiveDateTime) -> bool {
        let day = at.date().weekday();
        let time = at.time();
        if self.start < self.end {
            return self.starts_on(day) && time >= self.start && time < self.end;
        }
        // Overnight: the tail belongs to the previous day's shift.
        (self.starts_on(day) && time >= self.start) || (self.starts_on(day.pred()) && time < self.end)
    }
}

/// Weekly shift calendar with holidays and weekend control.
///
/// With no shifts defined every hour of an allowed day is operating.
/// Machine-specific shift lists replace the plant default for that machine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShiftCalendar {
    pub shifts: Vec<Shift>,
    pub machine_shifts: HashMap<String, Vec<Shift>>,
    pub holidays: BTreeSet<NaiveDate>,
    pub weekends_enabled: bool,
}

impl ShiftCalendar {
    /// Creates a calendar that operates around the clock, weekends included.
    pub fn new() -> Self {
        Self {
            weekends_enabled: true,
            ..Default::default()
        }
    }

    /// Plant default shift.
    pub fn with_shift(mut self, shift: Shift) -> Self {
        self.shifts.push(shift);
        self
    }

    /// Machine-specific shift (replaces plant defaults for that machine).
    pub fn with_machine_shift(mut self, machine_id: impl Into<String>, shift: Shift) -> Self {
        self.machine_shifts
            .entry(machine_id.into())
            .or_default()
            .push(shift);
        self
    }

    pub fn with_holiday(mut self, date: NaiveDate) -> Self {
        self.holidays.insert(date);
        self
    }

    pub fn with_weekends(mut self, enabled: bool) -> Self {
        self.weekends_enabled = enabled;
        self
    }

    fn shifts_for(&self, machine_id: &str) -> &[Shift] {
        self.machine_shifts
            .get(machine_id)
            .map(Vec::as_slice)
            .unwrap_or(&self.shifts)
    }

    /// Wall-clock check, independent of epoch conversion.
    pub fn is_operating_at(&self, machine_id: &str, at: NaiveDateTime) -> bool {
        let day = at.date();
        if self.holidays.contains(&day) {
            return false;
        }
        if !self.weekends_enabled && matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let shifts = self.shifts_for(machine_id);
        shifts.is_empty() || shifts.iter().any(|s| s.covers(at))
    }
}

impl OperatingCalendar for ShiftCalendar {
    fn is_operating_time(&self, machine_id: &str, instant_ms: i64) -> bool {
        DateTime::from_timestamp_millis(instant_ms)
            .map(|dt| self.is_operating_at(machine_id, dt.naive_utc()))
            .unwrap_or(false)
    }

    /// Exact: operating state only changes at midnight and at shift start
    /// and end times, so those are the only instants checked.
    fn first_closed_in(
        &self,
        machine_id: &str,
        start_ms: i64,
        end_ms: i64,
        _step_ms: i64,
    ) -> Option<i64> {
        if start_ms >= end_ms {
            return None;
        }
        let (Some(first), Some(last)) = (
            DateTime::from_timestamp_millis(start_ms),
            DateTime::from_timestamp_millis(end_ms - 1),
        ) else {
            return Some(start_ms);
        };

        let shifts = self.shifts_for(machine_id);
        let mut instants = vec![start_ms];
        let mut day = first.date_naive();
        while day <= last.date_naive() {
            let boundaries = day
                .and_hms_opt(0, 0, 0)
                .into_iter()
                .chain(shifts.iter().flat_map(|s| [day.and_time(s.start), day.and_time(s.end)]));
            for boundary in boundaries {
                let ms = boundary.and_utc().timestamp_millis();
                if ms > start_ms && ms < end_ms {
                    instants.push(ms);
                }
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        instants.sort_unstable();
        instants
            .into_iter()
            .find(|&ms| !self.is_operating_time(machine_id, ms))
    }
}

const MS_PER_MINUTE: i64 = 60_000;
const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;

/// Converts fractional hours to milliseconds.
pub fn hours_to_ms(hours: f64) -> i64 {
    (hours * MS_PER_HOUR as f64).round() as i64
}

/// Converts whole minutes to milliseconds.
pub fn minutes_to_ms(minutes: i64) -> i64 {
    minutes * MS_PER_MINUTE
}
