//! Resolution of extracted time specifications into concrete date ranges.

use crate::error::{CostwiseError, Result};
use crate::ups::schema::{TimePreset, TimeSpec};
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inclusive date range. Construction rejects inverted ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(CostwiseError::validation(
                "time_range",
                format!("the start date {} is after the end date {}", start, end),
            ));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Range of equal length ending the day before this one starts.
    pub fn previous_period(&self) -> DateRange {
        // Whole calendar months compare against the preceding whole months.
        if self.start.day() == 1 && is_month_end(self.end) {
            let months = month_index(self.end) - month_index(self.start) + 1;
            let start = shift_months(self.start, -months);
            let end = self.start - Duration::days(1);
            return DateRange { start, end };
        }
        let len = self.days();
        let end = self.start - Duration::days(1);
        let start = end - Duration::days(len - 1);
        DateRange { start, end }
    }

    /// Smallest range covering both.
    pub fn span(&self, other: &DateRange) -> DateRange {
        DateRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// `YYYY-MM` partition keys touched by this range, in order.
    pub fn billing_periods(&self) -> Vec<String> {
        let mut periods = Vec::new();
        let mut cursor = first_of_month(self.start);
        while cursor <= self.end {
            periods.push(cursor.format("%Y-%m").to_string());
            cursor = shift_months(cursor, 1);
        }
        periods
    }

    pub fn label(&self) -> String {
        format!("{} to {}", self.start, self.end)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Resolve a time spec against `today`.
pub fn resolve(spec: &TimeSpec, today: NaiveDate) -> Result<DateRange> {
    match spec {
        TimeSpec::Absolute { start, end } => DateRange::new(*start, *end),
        TimeSpec::Preset { preset, n } => resolve_preset(*preset, n.unwrap_or(1), today),
    }
}

fn resolve_preset(preset: TimePreset, n: u32, today: NaiveDate) -> Result<DateRange> {
    let n = i64::from(n.max(1));
    let this_month = first_of_month(today);
    let range = match preset {
        TimePreset::Today => (today, today),
        TimePreset::Yesterday => {
            let d = today - Duration::days(1);
            (d, d)
        }
        TimePreset::LastNDays => (today - Duration::days(n), today - Duration::days(1)),
        TimePreset::ThisMonth => (this_month, today),
        TimePreset::LastMonth => {
            let start = shift_months(this_month, -1);
            (start, this_month - Duration::days(1))
        }
        TimePreset::LastNMonths => {
            let start = shift_months(this_month, -(n as i32));
            (start, this_month - Duration::days(1))
        }
        TimePreset::ThisQuarter => (quarter_start(today), today),
        TimePreset::LastQuarter => {
            let this_quarter = quarter_start(today);
            (shift_months(this_quarter, -3), this_quarter - Duration::days(1))
        }
        TimePreset::YearToDate => (ymd(today.year(), 1, 1)?, today),
        TimePreset::LastYear => (ymd(today.year() - 1, 1, 1)?, ymd(today.year() - 1, 12, 31)?),
    };
    DateRange::new(range.0, range.1)
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

pub fn last_of_month(date: NaiveDate) -> NaiveDate {
    shift_months(first_of_month(date), 1) - Duration::days(1)
}

fn is_month_end(date: NaiveDate) -> bool {
    last_of_month(date) == date
}

fn month_index(date: NaiveDate) -> i32 {
    date.year() * 12 + date.month0() as i32
}

/// Shift the first of a month by whole months.
fn shift_months(first: NaiveDate, months: i32) -> NaiveDate {
    let index = month_index(first) + months;
    let year = index.div_euclid(12);
    let month = index.rem_euclid(12) as u32 + 1;
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(first)
}

fn quarter_start(date: NaiveDate) -> NaiveDate {
    let month = (date.month0() / 3) * 3 + 1;
    NaiveDate::from_ymd_opt(date.year(), month, 1).unwrap_or(date)
}

pub(crate) fn ymd(year: i32, month: u32, day: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
        CostwiseError::validation("time_range", format!("{}-{:02}-{:02} is not a valid date", year, month, day))
    })
}
