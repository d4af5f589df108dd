//! Table builder: the week pivoted by slot, then by medication.

use crate::recurrence::is_due;
use crate::window::weekly_window_from_monday;
use crate::{PrescribedRule, Result, TableEntry, TimeSlot, WeekCells, WeeklyTable};
use chrono::{Datelike, NaiveDate};

/// Build the weekly table for the Monday..Sunday week containing
/// `reference_date`.
///
/// Rules for the same `(title, dose)` in the same slot share one row and
/// their tablet counts are summed per day. Each bucket is sorted by title,
/// ignoring case. Rules with an unknown time of day are dropped.
pub fn generate_table(reference_date: NaiveDate, rules: &[PrescribedRule]) -> Result<WeeklyTable> {
    let window = weekly_window_from_monday(reference_date);
    let mut table = WeeklyTable::default();

    for prescribed in rules {
        let mut cells = WeekCells::default();
        for date in window {
            if is_due(&prescribed.rule, date)? {
                cells.add(date.weekday(), prescribed.rule.tablet_count)?;
            }
        }

        match prescribed.rule.time_of_day.slot() {
            Some(slot) => fold_into(table.bucket_mut(slot), prescribed, cells)?,
            // Unknown slot: contributes to no bucket, same as the schedule
            None => continue,
        }
    }

    for slot in TimeSlot::ALL {
        table
            .bucket_mut(slot)
            .sort_by_cached_key(|entry| entry.title.to_lowercase());
    }

    Ok(table)
}

fn fold_into(
    bucket: &mut Vec<TableEntry>,
    prescribed: &PrescribedRule,
    cells: WeekCells,
) -> Result<()> {
    let existing = bucket
        .iter_mut()
        .find(|entry| entry.title == prescribed.title && entry.dose == prescribed.dose);

    match existing {
        Some(entry) => entry.cells.merge(&cells)?,
        None => bucket.push(TableEntry {
            title: prescribed.title.clone(),
            dose: prescribed.dose.clone(),
            cells,
        }),
    }
    Ok(())
}
