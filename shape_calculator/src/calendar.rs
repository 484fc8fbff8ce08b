//! Hourly calendar expansion.
//!
//! Every range operation takes an explicit [`EndBound`]; callers state whether
//! the end instant belongs to the range instead of relying on a convention.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::error::PipelineError;
use crate::models::YearMonth;

/// Whether the end instant of a range is part of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndBound {
    Inclusive,
    Exclusive,
}

/// One hour of the dense calendar with its join fields.
///
/// `month`, `day` and `hour` are stored narrow; keys built from them compare
/// by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CalendarHour {
    pub timestamp: NaiveDateTime,
    pub year: i32,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
}

impl CalendarHour {
    pub fn from_timestamp(timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp,
            year: timestamp.year(),
            month: timestamp.month() as u8,
            day: timestamp.day() as u8,
            hour: timestamp.hour() as u8,
        }
    }

    pub fn year_month(&self) -> YearMonth {
        YearMonth {
            year: self.year,
            month: self.month,
        }
    }
}

/// Rebuild an instant from split calendar fields.
pub fn timestamp_from_parts(year: i32, month: u32, day: u32, hour: u32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, 0, 0)
}

fn first_day(ym: YearMonth) -> Result<NaiveDate, PipelineError> {
    NaiveDate::from_ymd_opt(ym.year, ym.month as u32, 1)
        .ok_or_else(|| PipelineError::config(format!("invalid month {}", ym)))
}

pub fn days_in_month(year: i32, month: u8) -> u32 {
    let ym = YearMonth { year, month };
    match (first_day(ym), first_day(ym.next())) {
        (Ok(start), Ok(end)) => (end - start).num_days() as u32,
        _ => 0,
    }
}

pub fn days_in_year(year: i32) -> u32 {
    if NaiveDate::from_ymd_opt(year, 2, 29).is_some() {
        366
    } else {
        365
    }
}

pub fn hours_in_month(year: i32, month: u8) -> u32 {
    days_in_month(year, month) * 24
}

/// Average MW over a month to MWh.
pub fn mwm_to_mwh(year: i32, month: u8, mwm: f64) -> f64 {
    mwm * hours_in_month(year, month) as f64
}

/// Dense hourly calendar between two instants.
///
/// `start` is floored to the hour. With [`EndBound::Inclusive`] the hour
/// containing `end` is the last row; with [`EndBound::Exclusive`] the range
/// stops before `end`.
pub fn expand_hourly(
    start: NaiveDateTime,
    end: NaiveDateTime,
    bound: EndBound,
) -> Result<Vec<CalendarHour>, PipelineError> {
    let start = floor_to_hour(start);
    if end < start {
        return Err(PipelineError::config(format!(
            "calendar range ends ({}) before it starts ({})",
            end, start
        )));
    }
    if bound == EndBound::Exclusive && end == start {
        return Err(PipelineError::config(format!(
            "exclusive calendar range [{}, {}) is empty",
            start, end
        )));
    }

    let capacity = ((end - start).num_hours() + 1).max(0) as usize;
    let mut hours = Vec::with_capacity(capacity);
    let mut current = start;
    loop {
        let inside = match bound {
            EndBound::Inclusive => current <= end,
            EndBound::Exclusive => current < end,
        };
        if !inside {
            break;
        }
        hours.push(CalendarHour::from_timestamp(current));
        current += Duration::hours(1);
    }

    Ok(hours)
}

/// All hours of one calendar month.
pub fn expand_month(ym: YearMonth) -> Result<Vec<CalendarHour>, PipelineError> {
    let start = first_day(ym)?.and_time(NaiveTime::default());
    let end = first_day(ym.next())?.and_time(NaiveTime::default());
    expand_hourly(start, end, EndBound::Exclusive)
}

/// All hours from the first hour of `first` through the last hour of `last`.
pub fn expand_months(first: YearMonth, last: YearMonth) -> Result<Vec<CalendarHour>, PipelineError> {
    if last < first {
        return Err(PipelineError::config(format!(
            "month range {}..={} is reversed",
            first, last
        )));
    }
    let start = first_day(first)?.and_time(NaiveTime::default());
    let end = first_day(last.next())?.and_time(NaiveTime::default());
    expand_hourly(start, end, EndBound::Exclusive)
}

/// Hours of a date window where both dates are included (00:00 of `start`
/// through 23:00 of `end`).
pub fn expand_dates(start: NaiveDate, end: NaiveDate) -> Result<Vec<CalendarHour>, PipelineError> {
    let last_hour = end
        .and_hms_opt(23, 0, 0)
        .ok_or_else(|| PipelineError::config(format!("invalid end date {}", end)))?;
    expand_hourly(start.and_time(NaiveTime::default()), last_hour, EndBound::Inclusive)
}

fn floor_to_hour(ts: NaiveDateTime) -> NaiveDateTime {
    ts.date()
        .and_hms_opt(ts.hour(), 0, 0)
        .unwrap_or(ts)
}
