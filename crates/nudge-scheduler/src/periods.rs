//! Fire-time computation from schedule periods.
//!
//! Candidate slots are whole minutes inside the enabled windows, all in
//! UTC. Window ends are exclusive.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use rand::Rng;

use nudge_core::error::{NudgeError, Result};
use nudge_core::types::ScheduleData;

/// How far forward [`next_fire_time`] scans before giving up.
const SCAN_DAYS: i64 = 14;

/// Every minute slot the schedule allows on the given day, as a sorted
/// union across its periods. Empty when no period covers the weekday.
pub fn slots_for_day(data: &ScheduleData, day: NaiveDate) -> Result<Vec<NaiveTime>> {
    let weekday = day.weekday();
    let mut slots = BTreeSet::new();
    for period in data.periods.values() {
        if !period.covers(weekday)? {
            continue;
        }
        let (start, end) = period.window()?;
        let mut t = start;
        while t < end {
            slots.insert(t);
            t += chrono::Duration::minutes(1);
        }
    }
    Ok(slots.into_iter().collect())
}

/// One uniform draw from the day's slots, excluding anything at or
/// before `after` and anything already used.
fn draw_slot(
    data: &ScheduleData,
    day: NaiveDate,
    after: Option<NaiveTime>,
    used: &[NaiveTime],
    rng: &mut impl Rng,
) -> Result<Option<NaiveTime>> {
    let candidates: Vec<NaiveTime> = slots_for_day(data, day)?
        .into_iter()
        .filter(|slot| after.is_none_or(|cut| *slot > cut))
        .filter(|slot| !used.contains(slot))
        .collect();
    if candidates.is_empty() {
        return Ok(None);
    }
    Ok(Some(candidates[rng.gen_range(0..candidates.len())]))
}

/// The next fire instant for an enabled schedule: today's remaining
/// slots first, then a forward scan of up to two weeks.
pub fn next_fire_time(
    data: &ScheduleData,
    now: DateTime<Utc>,
    used_today: &[NaiveTime],
    rng: &mut impl Rng,
) -> Result<DateTime<Utc>> {
    if !data.enabled {
        return Err(NudgeError::schedule("schedule is disabled"));
    }

    let today = now.date_naive();
    if let Some(slot) = draw_slot(data, today, Some(now.time()), used_today, rng)? {
        return Ok(at(today, slot));
    }
    for offset in 1..=SCAN_DAYS {
        let day = today + chrono::Duration::days(offset);
        if let Some(slot) = draw_slot(data, day, None, &[], rng)? {
            return Ok(at(day, slot));
        }
    }
    Err(NudgeError::schedule(format!(
        "No enabled period within the next {SCAN_DAYS} days"
    )))
}

fn at(day: NaiveDate, slot: NaiveTime) -> DateTime<Utc> {
    day.and_time(slot).and_utc()
}
