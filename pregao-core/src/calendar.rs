//! Calendar reconciliation: which dates (or months) are still missing locally.
//!
//! The reconciler treats every calendar day as a candidate. Sources that only
//! publish on business days simply answer "not found" for the rest, and
//! adapters that want to save those requests apply [`skip_weekends`] on top.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A year-month bucket used by discovery-based sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeriodKey {
    pub year: i32,
    pub month: u32,
}

impl PeriodKey {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|_| Self { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// First calendar day of the month. Inventory keys for monthly artifacts
    /// are stored as this date.
    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}_{:02}", self.year, self.month)
    }
}

/// Every date in `[start, today]` that is not in `inventory`, ascending.
///
/// Returns an empty sequence when `start > today`.
pub fn missing_dates(
    start: NaiveDate,
    today: NaiveDate,
    inventory: &BTreeSet<NaiveDate>,
) -> Vec<NaiveDate> {
    if start > today {
        return Vec::new();
    }
    start
        .iter_days()
        .take_while(|d| *d <= today)
        .filter(|d| !inventory.contains(d))
        .collect()
}

/// Month-granular variant of [`missing_dates`].
///
/// `inventory` holds first-of-month dates, as produced by scanning monthly
/// artifacts. Every month touching `[start, today]` is a candidate.
pub fn missing_months(
    start: NaiveDate,
    today: NaiveDate,
    inventory: &BTreeSet<NaiveDate>,
) -> Vec<PeriodKey> {
    if start > today {
        return Vec::new();
    }
    let last = PeriodKey::of(today);
    let mut period = PeriodKey::of(start);
    let mut out = Vec::new();
    while period <= last {
        if !inventory.contains(&period.first_day()) {
            out.push(period);
        }
        period = period.next();
    }
    out
}

/// Start of a lookback window of `days` calendar days ending at `today`.
///
/// The window is inclusive, so `days = 1` is just `today`. `days = 0` is
/// treated as 1.
pub fn lookback_start(today: NaiveDate, days: u32) -> NaiveDate {
    let span = i64::from(days.max(1)) - 1;
    today
        .checked_sub_signed(Duration::days(span))
        .unwrap_or(NaiveDate::MIN)
}

/// Drop Saturdays and Sundays.
pub fn skip_weekends(dates: Vec<NaiveDate>) -> Vec<NaiveDate> {
    dates
        .into_iter()
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .collect()
}
