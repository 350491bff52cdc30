//! Schedule evaluator
//!
//! Pure calendar matcher: given the schedule, the previous tick's clock
//! reading, and the current one, decide whether a cycle is due. A trigger
//! T fires when it falls in the half-open window (last_check, now].
//!
//! Edge cases:
//! - Day rollover: entries left between `last_check` and midnight on the
//!   previous day are still eligible, and today's entries are measured
//!   from midnight.
//! - Forward clock jumps widen the window; the earliest missed trigger
//!   fires once and the orchestrator's cursor advance consumes the rest.
//! - Backward clock jumps produce an empty window, so a just-completed
//!   time never re-fires.
//! - A running cycle vetoes evaluation entirely.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};

use crate::settings::schedule::MonthlyDay;
use crate::settings::BackupSchedule;

/// Which calendar matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Weekly,
    Monthly,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Weekly => "weekly",
            TriggerSource::Monthly => "monthly",
        }
    }
}

/// A due trigger: what matched and the scheduled instant that fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Due {
    pub source: TriggerSource,
    pub fired_at: NaiveDateTime,
}

/// Decide whether a cycle is due in the window (last_check, now].
pub fn next_due(
    schedule: &BackupSchedule,
    last_check: NaiveDateTime,
    now: NaiveDateTime,
    in_progress: bool,
) -> Option<Due> {
    if in_progress || schedule.is_empty() {
        return None;
    }

    let mut candidates: Vec<Due> = Vec::new();

    if now.date() == last_check.date() {
        for (time, source) in entries_for_date(schedule, now.date()) {
            if time > last_check.time() && time <= now.time() {
                candidates.push(Due {
                    source,
                    fired_at: now.date().and_time(time),
                });
            }
        }
    } else if now.date() > last_check.date() {
        // Entries still pending on the day the last tick saw.
        for (time, source) in entries_for_date(schedule, last_check.date()) {
            if time > last_check.time() {
                candidates.push(Due {
                    source,
                    fired_at: last_check.date().and_time(time),
                });
            }
        }
        // Today's entries, measured from midnight.
        for (time, source) in entries_for_date(schedule, now.date()) {
            if time <= now.time() {
                candidates.push(Due {
                    source,
                    fired_at: now.date().and_time(time),
                });
            }
        }
    }
    // now.date() < last_check.date(): backward jump across midnight, empty window.

    // Earliest wins; weekly beats monthly at the same instant.
    candidates
        .into_iter()
        .min_by_key(|due| (due.fired_at, due.source == TriggerSource::Monthly))
}

/// True when the gap between clock readings indicates a jump rather than
/// a normal tick.
pub fn is_clock_jump(last_check: NaiveDateTime, now: NaiveDateTime) -> bool {
    let gap = (now - last_check).num_seconds().abs();
    gap > Duration::minutes(5).num_seconds()
}

fn entries_for_date(schedule: &BackupSchedule, date: NaiveDate) -> Vec<(NaiveTime, TriggerSource)> {
    let mut entries = Vec::new();

    if let Some(times) = schedule.weekly.get(&date.weekday()) {
        entries.extend(times.iter().map(|t| (*t, TriggerSource::Weekly)));
    }

    if let Some(times) = schedule.monthly.get(&MonthlyDay::Day(date.day())) {
        entries.extend(times.iter().map(|t| (*t, TriggerSource::Monthly)));
    }
    if date.day() == last_day_of_month(date) {
        if let Some(times) = schedule.monthly.get(&MonthlyDay::LastDay) {
            entries.extend(times.iter().map(|t| (*t, TriggerSource::Monthly)));
        }
    }

    entries
}

fn last_day_of_month(date: NaiveDate) -> u32 {
    let (year, month) = (date.year(), date.month());
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .expect("valid first of month");
    (first_of_next - Duration::days(1)).day()
}
