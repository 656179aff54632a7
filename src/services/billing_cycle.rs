//! Billing-cycle window computation.
//!
//! A client's billing cycle starts on a fixed day of the month. Given that day
//! and a reference date, the active cycle runs from the most recent occurrence
//! of the cycle day (00:00:00) up to 23:59:59 on the day before the next one.

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, Utc};

use crate::{
    config::MAX_CYCLE_DAY,
    models::{CycleWindow, WindowKind},
};

/// Time a billing window ends on its last day.
const END_OF_DAY: NaiveTime = match NaiveTime::from_hms_opt(23, 59, 59) {
    Some(time) => time,
    None => panic!("23:59:59 is a valid time"),
};

/// Errors from billing window computation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CycleError {
    #[error("Invalid cycle day {cycle_day}: must be between 1 and {MAX_CYCLE_DAY}")]
    OutOfRange { cycle_day: u32 },

    #[error("Invalid cycle day {cycle_day}: {year}-{month:02} has no day {day}")]
    NotInMonth {
        cycle_day: u32,
        year: i32,
        month: u32,
        day: u32,
    },
}

/// Resolve the billing window containing `reference_date`, or today (UTC) if
/// no reference date is given.
pub fn compute_window(
    cycle_day: u32,
    reference_date: Option<NaiveDate>,
) -> Result<CycleWindow, CycleError> {
    let reference = reference_date.unwrap_or_else(|| Utc::now().date_naive());
    cycle_window_for(cycle_day, reference)
}

/// Resolve the billing window containing `reference`.
///
/// If the reference day of month is before `cycle_day`, the cycle began in
/// the previous month; otherwise it began this month. A cycle day that does
/// not exist in the month it has to land in (e.g. 30 for February) is an
/// error rather than being rolled into the following month.
pub fn cycle_window_for(cycle_day: u32, reference: NaiveDate) -> Result<CycleWindow, CycleError> {
    if !(1..=MAX_CYCLE_DAY).contains(&cycle_day) {
        return Err(CycleError::OutOfRange { cycle_day });
    }

    let (year, month) = (reference.year(), reference.month());
    let ((start_year, start_month), (end_year, end_month)) = if reference.day() < cycle_day {
        (previous_month(year, month), (year, month))
    } else {
        ((year, month), next_month(year, month))
    };

    let start_date = date_in_month(cycle_day, start_year, start_month, cycle_day)?;

    // The cycle ends the day before the next cycle day. For cycle day 1 that is
    // the last day of the preceding month, not "day 0".
    let end_date = if cycle_day == 1 {
        let first = date_in_month(cycle_day, end_year, end_month, 1)?;
        first
            .checked_sub_days(Days::new(1))
            .ok_or(CycleError::NotInMonth {
                cycle_day,
                year: end_year,
                month: end_month,
                day: 0,
            })?
    } else {
        date_in_month(cycle_day, end_year, end_month, cycle_day - 1)?
    };

    Ok(CycleWindow {
        start: start_date.and_time(NaiveTime::MIN),
        end: last_second_of(end_date),
        kind: WindowKind::Cycle { cycle_day },
    })
}

/// Trailing window of `days` days ending at `now`.
pub fn rolling_window(days: u32, now: DateTime<Utc>) -> CycleWindow {
    let end = now.naive_utc();
    CycleWindow {
        start: end - chrono::Duration::days(i64::from(days)),
        end,
        kind: WindowKind::Rolling { days },
    }
}

fn date_in_month(cycle_day: u32, year: i32, month: u32, day: u32) -> Result<NaiveDate, CycleError> {
    NaiveDate::from_ymd_opt(year, month, day).ok_or(CycleError::NotInMonth {
        cycle_day,
        year,
        month,
        day,
    })
}

fn last_second_of(day: NaiveDate) -> chrono::NaiveDateTime {
    day.and_time(END_OF_DAY)
}

fn previous_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}
