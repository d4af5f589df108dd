//! Seven-day evaluation windows.
//!
//! The schedule and table are always computed over the Monday-to-Sunday week
//! that contains the reference date. The stock decrement instead counts the
//! seven days starting exactly at the reference date. Both derivations are
//! kept as separately named functions so neither can silently become the other.

use chrono::{Datelike, Duration, NaiveDate};

/// Number of days in every window
pub const WINDOW_DAYS: usize = 7;

/// The Monday on or before `date`
pub fn monday_of(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// Monday..Sunday of the week containing `reference_date`
pub fn weekly_window_from_monday(reference_date: NaiveDate) -> [NaiveDate; WINDOW_DAYS] {
    weekly_window_from_date(monday_of(reference_date))
}

/// `reference_date` and the six days after it, with no normalisation
pub fn weekly_window_from_date(reference_date: NaiveDate) -> [NaiveDate; WINDOW_DAYS] {
    std::array::from_fn(|offset| reference_date + Duration::days(offset as i64))
}
