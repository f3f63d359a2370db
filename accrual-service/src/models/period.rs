//! Accrual period value object.
//!
//! The ledger's metadata bags record the accrual month in three historical
//! shapes. Rather than ad hoc field sniffing at each call site, every
//! consumer goes through [`AccrualPeriod::from_entry`], which applies one
//! ordered parsing strategy and rejects garbage with a typed error.

use super::ledger::LedgerEntry;
use chrono::{Datelike, NaiveDate};
use mongodb::bson::Bson;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeriodError {
    #[error("accrual month {0} outside 1-12")]
    MonthOutOfRange(i64),
    #[error("accrual month present but year missing")]
    MissingYear,
    #[error("unparseable accrual period '{0}'")]
    Unparseable(String),
}

/// A calendar month a rent obligation accrues in. Ordered chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccrualPeriod {
    pub year: i32,
    pub month: u32,
}

impl AccrualPeriod {
    pub fn new(year: i32, month: u32) -> Result<Self, PeriodError> {
        if !(1..=12).contains(&month) {
            return Err(PeriodError::MonthOutOfRange(month as i64));
        }
        Ok(Self { year, month })
    }

    /// The month containing `date`.
    pub fn containing(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// The month after the one containing `date`.
    pub fn following(date: NaiveDate) -> Self {
        Self::containing(date).next()
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

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).expect("month is in 1..=12")
    }

    /// Resolve an entry's accrual month. Strategies in order, first match
    /// wins: explicit numeric metadata fields, the "YYYY-MM" string field,
    /// the posting date. A month field that is present but malformed (or an
    /// orphaned month with no year) is an error, not a silent fallback.
    pub fn from_entry(entry: &LedgerEntry) -> Result<Self, PeriodError> {
        match (&entry.metadata.accrual_month, &entry.metadata.accrual_year) {
            (Some(month), Some(year)) => {
                let month = bson_int(month)
                    .ok_or_else(|| PeriodError::Unparseable(month.to_string()))?;
                let year =
                    bson_int(year).ok_or_else(|| PeriodError::Unparseable(year.to_string()))?;
                if !(1..=12).contains(&month) {
                    return Err(PeriodError::MonthOutOfRange(month));
                }
                return Self::new(year as i32, month as u32);
            }
            (Some(_), None) => return Err(PeriodError::MissingYear),
            _ => {}
        }

        if let Some(s) = entry.metadata.accrual_period.as_deref() {
            return Self::parse_year_month(s);
        }

        Ok(Self::containing(entry.date.date_naive()))
    }

    /// Fixed "YYYY-MM" pattern, nothing looser.
    fn parse_year_month(s: &str) -> Result<Self, PeriodError> {
        let (year, month) = s
            .split_once('-')
            .ok_or_else(|| PeriodError::Unparseable(s.to_string()))?;
        let year: i32 = year
            .parse()
            .map_err(|_| PeriodError::Unparseable(s.to_string()))?;
        let month: i64 = month
            .parse()
            .map_err(|_| PeriodError::Unparseable(s.to_string()))?;
        if !(1..=12).contains(&month) {
            return Err(PeriodError::MonthOutOfRange(month));
        }
        Self::new(year, month as u32)
    }
}

/// Midnight UTC of a calendar date, for storing date-valued fields in BSON.
pub fn start_of_day(date: NaiveDate) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_naive_utc_and_offset(date.and_time(chrono::NaiveTime::MIN), chrono::Utc)
}

impl std::fmt::Display for AccrualPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Numeric coercion across the bson shapes the month/year fields have been
/// written in over the years.
fn bson_int(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(*v as i64),
        Bson::Int64(v) => Some(*v),
        Bson::Double(v) if v.fract() == 0.0 => Some(*v as i64),
        Bson::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
