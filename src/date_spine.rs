//! Gap-free calendar used to densify metric time series.
//!
//! The spine is generated once over a fixed horizon and shared read-only by
//! every request. Lookups for a sub-range are slices into the generated rows.

use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpineError {
    #[error("Invalid date range: {start} is after {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("Date {date} is outside the supported horizon {start} to {end}")]
    OutOfHorizon {
        date: NaiveDate,
        start: NaiveDate,
        end: NaiveDate,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateSpineRow {
    pub date_day: NaiveDate,
    /// Monday of the ISO week.
    pub date_week: NaiveDate,
    pub date_month: NaiveDate,
    pub date_quarter: NaiveDate,
    pub date_year: NaiveDate,
}

impl DateSpineRow {
    pub fn for_day(day: NaiveDate) -> Self {
        let week = day - Duration::days(day.weekday().num_days_from_monday() as i64);
        let quarter_month = (day.month0() / 3) * 3 + 1;
        DateSpineRow {
            date_day: day,
            date_week: week,
            date_month: first_of(day.year(), day.month()),
            date_quarter: first_of(day.year(), quarter_month),
            date_year: first_of(day.year(), 1),
        }
    }
}

fn first_of(year: i32, month: u32) -> NaiveDate {
    // Day 1 of a month taken from an existing date always exists.
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

#[derive(Debug, Clone)]
pub struct DateSpine {
    start: NaiveDate,
    end: NaiveDate,
    rows: Vec<DateSpineRow>,
}

impl DateSpine {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, SpineError> {
        if start > end {
            return Err(SpineError::InvalidRange { start, end });
        }
        let rows = start
            .iter_days()
            .take_while(|day| *day <= end)
            .map(DateSpineRow::for_day)
            .collect();
        Ok(DateSpine { start, end, rows })
    }

    pub fn horizon(&self) -> (NaiveDate, NaiveDate) {
        (self.start, self.end)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows for the inclusive range `[start, end]`, ascending by day.
    pub fn spine_for(&self, start: NaiveDate, end: NaiveDate) -> Result<&[DateSpineRow], SpineError> {
        if start > end {
            return Err(SpineError::InvalidRange { start, end });
        }
        self.check_horizon(start)?;
        self.check_horizon(end)?;
        let first = self.offset(start);
        let last = self.offset(end);
        Ok(&self.rows[first..=last])
    }

    pub fn check_horizon(&self, date: NaiveDate) -> Result<(), SpineError> {
        if self.contains(date) {
            Ok(())
        } else {
            Err(SpineError::OutOfHorizon {
                date,
                start: self.start,
                end: self.end,
            })
        }
    }

    fn offset(&self, date: NaiveDate) -> usize {
        (date - self.start).num_days() as usize
    }
}
