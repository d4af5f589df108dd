//! Schedule builder: the flat list of dose events for one week.

use crate::recurrence::is_due;
use crate::window::weekly_window_from_monday;
use crate::{Error, PrescribedRule, Result, ScheduleEvent};
use chrono::{NaiveDate, NaiveTime};

/// Build every dose event in the Monday..Sunday week containing
/// `reference_date`.
///
/// Events are ordered by timestamp, then by title. Rules whose time of day is
/// not one of the known slots produce no events. A rule that fails
/// validation fails the whole schedule rather than dropping one medication.
pub fn generate_schedule(
    reference_date: NaiveDate,
    rules: &[PrescribedRule],
) -> Result<Vec<ScheduleEvent>> {
    let mut events = Vec::new();

    for date in weekly_window_from_monday(reference_date) {
        for prescribed in rules {
            if !is_due(&prescribed.rule, date)? {
                continue;
            }

            let slot = match prescribed.rule.time_of_day.slot() {
                Some(slot) => slot,
                // Unknown slot: skipped, not an error
                None => continue,
            };

            let time = NaiveTime::from_hms_opt(slot.hour(), 0, 0)
                .ok_or_else(|| Error::Other(format!("invalid hour for slot {}", slot)))?;

            events.push(ScheduleEvent {
                title: prescribed.title.clone(),
                timestamp: date.and_time(time),
                color: slot.color(),
                tablet_count: prescribed.rule.tablet_count,
                dose: prescribed.dose.clone(),
            });
        }
    }

    events.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.title.cmp(&b.title))
    });

    Ok(events)
}
