//! Calendar buckets used to thin backup history.

use std::fmt;

use chrono::{DateTime, Datelike, IsoWeek, NaiveDate, TimeDelta, Utc};

/// Calendar period a backup falls into.
///
/// Recent backups are grouped per UTC day; older ones per ISO week, so the
/// same week number in different years never collides.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BucketKey {
    /// UTC calendar day.
    Day(NaiveDate),
    /// ISO year and week.
    Week(IsoWeek),
}

impl BucketKey {
    /// Day key when `age` is below `daily_window`, week key otherwise.
    #[must_use]
    pub fn classify(created_at: DateTime<Utc>, age: TimeDelta, daily_window: TimeDelta) -> Self {
        let day = created_at.date_naive();
        if age < daily_window {
            Self::Day(day)
        } else {
            Self::Week(day.iso_week())
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Day(day) => write!(f, "{}", day.format("%d-%b-%Y")),
            Self::Week(week) => write!(f, "{}-W{:02}", week.year(), week.week()),
        }
    }
}
