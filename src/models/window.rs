use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Serialize;

/// How a usage window was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WindowKind {
    /// Billing cycle starting on `cycle_day` of the month.
    Cycle { cycle_day: u32 },
    /// Trailing range of `days` ending now.
    Rolling { days: u32 },
}

/// A usage time window.
///
/// `start` is inclusive. `end` is the last instant included in the window;
/// for billing cycles that is 23:59:59 of the day before the next cycle day.
/// Times are UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub kind: WindowKind,
}

impl CycleWindow {
    pub fn cycle_based(&self) -> bool {
        matches!(self.kind, WindowKind::Cycle { .. })
    }

    /// Whole days between start and end, truncated.
    ///
    /// For a billing cycle this is one less than [`calendar_days`](Self::calendar_days)
    /// because `end` stops one second short of the next cycle.
    pub fn period_days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Every calendar date from the start date through the end date, ascending.
    pub fn calendar_days(&self) -> Vec<NaiveDate> {
        let last = self.end.date();
        self.start
            .date()
            .iter_days()
            .take_while(|day| *day <= last)
            .collect()
    }

    pub fn start_utc(&self) -> DateTime<Utc> {
        self.start.and_utc()
    }

    pub fn end_utc(&self) -> DateTime<Utc> {
        self.end.and_utc()
    }
}

/// First and last instant of a calendar day, in UTC.
///
/// The end is 23:59:59.999999, matching the per-day query granularity of the
/// metrics source.
pub fn day_bounds(day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = day.and_time(NaiveTime::MIN).and_utc();
    let end = day
        .checked_add_days(Days::new(1))
        .map(|next| next.and_time(NaiveTime::MIN) - chrono::Duration::microseconds(1))
        .unwrap_or(NaiveDateTime::MAX)
        .and_utc();
    (start, end)
}
