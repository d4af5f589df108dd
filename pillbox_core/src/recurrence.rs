//! Recurrence engine: is a rule due on a given date?
//!
//! A rule is due on `date` when the number of days since its anchor is
//! non-negative and a multiple of its interval.

use crate::{Error, MedicationRule, Result};
use chrono::NaiveDate;

impl MedicationRule {
    /// Reject rules the recurrence engine cannot evaluate
    pub fn validate(&self) -> Result<()> {
        check_interval(self)?;
        if !self.tablet_count.is_positive() {
            return Err(Error::Validation(format!(
                "tablet_count must be positive, got {}",
                self.tablet_count
            )));
        }
        Ok(())
    }
}

/// Decide whether `rule` produces a dose on `date`.
///
/// A rule without a `start_date` is anchored on `date` itself, which makes it
/// due on every date it is evaluated against.
///
/// Fails with [`Error::Validation`] if `interval_days` is zero.
pub fn is_due(rule: &MedicationRule, date: NaiveDate) -> Result<bool> {
    check_interval(rule)?;

    let anchor = rule.start_date.unwrap_or(date);
    let delta = (date - anchor).num_days();
    if delta < 0 {
        return Ok(false);
    }

    Ok(delta % i64::from(rule.interval_days) == 0)
}

fn check_interval(rule: &MedicationRule) -> Result<()> {
    if rule.interval_days < 1 {
        return Err(Error::Validation(format!(
            "interval_days must be at least 1, got {}",
            rule.interval_days
        )));
    }
    Ok(())
}
