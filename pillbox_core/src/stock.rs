//! Stock decrement calculator and the actions that apply it.
//!
//! The calculation counts the tablets due over the seven days starting at the
//! reference date (not the Monday-normalised week used for the schedule) and
//! subtracts them from the on-hand stock, flooring at zero.

use crate::journal::{DecrementRecord, DecrementSink, Trigger};
use crate::recurrence::is_due;
use crate::store::{RuleSource, StockSink};
use crate::window::weekly_window_from_date;
use crate::{Calendar, MedicationRule, MedicineBox, Result, StockDecrementMode, Tablets};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

/// Total tablets due over the seven days starting at `reference_date`
pub fn weekly_consumption(rules: &[MedicationRule], reference_date: NaiveDate) -> Result<Tablets> {
    let mut total = Tablets::zero();
    for date in weekly_window_from_date(reference_date) {
        for rule in rules {
            if is_due(rule, date)? {
                total = total.checked_add(rule.tablet_count)?;
            }
        }
    }
    Ok(total)
}

/// New stock after one week of the given rules, never below zero.
///
/// A week with no consumption leaves the stock as it was.
pub fn apply_weekly_decrement(
    rules: &[MedicationRule],
    current_stock: Tablets,
    reference_date: NaiveDate,
) -> Result<Tablets> {
    let total = weekly_consumption(rules, reference_date)?;
    if total.is_zero() {
        return Ok(current_stock);
    }
    current_stock.saturating_sub(total)
}

/// Why a box was left alone
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The owning calendar is not in manual decrement mode
    NotManual,
    /// The box has no capacity configured
    NoCapacity,
    /// Nothing left to decrement (weekly sweep only)
    OutOfStock,
    /// Already decremented by an earlier, interrupted sweep of the same week
    AlreadySwept,
}

/// Result of running the calculator over one box
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DecrementOutcome {
    Skipped { reason: SkipReason },
    Unchanged,
    Decremented {
        previous: Tablets,
        consumed: Tablets,
        new: Tablets,
    },
}

/// Apply gating, then the calculator, to one box. Pure: nothing is written.
pub fn decrement_box(
    mode: StockDecrementMode,
    medicine_box: &MedicineBox,
    reference_date: NaiveDate,
) -> Result<DecrementOutcome> {
    if mode != StockDecrementMode::Manual {
        return Ok(DecrementOutcome::Skipped {
            reason: SkipReason::NotManual,
        });
    }
    if medicine_box.box_capacity == 0 {
        return Ok(DecrementOutcome::Skipped {
            reason: SkipReason::NoCapacity,
        });
    }

    let previous = medicine_box.stock_quantity;
    let new = apply_weekly_decrement(&medicine_box.rules, previous, reference_date)?;
    if new == previous {
        return Ok(DecrementOutcome::Unchanged);
    }

    Ok(DecrementOutcome::Decremented {
        previous,
        consumed: previous.checked_sub(new)?,
        new,
    })
}

/// Raised when a box ends at or below its alert threshold
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StockAlert {
    pub calendar_id: String,
    pub box_id: String,
    pub name: String,
    pub stock: Tablets,
    pub threshold: Tablets,
}

/// What happened to one box during an action
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BoxReport {
    pub calendar_id: String,
    pub box_id: String,
    pub name: String,
    pub outcome: DecrementOutcome,
}

/// Summary of an on-demand action or a weekly sweep
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SweepReport {
    pub trigger: Trigger,
    pub reference_date: NaiveDate,
    pub boxes: Vec<BoxReport>,
    pub alerts: Vec<StockAlert>,
}

impl SweepReport {
    fn new(trigger: Trigger, reference_date: NaiveDate) -> Self {
        Self {
            trigger,
            reference_date,
            boxes: Vec::new(),
            alerts: Vec::new(),
        }
    }

    pub fn decremented_count(&self) -> usize {
        self.boxes
            .iter()
            .filter(|b| matches!(b.outcome, DecrementOutcome::Decremented { .. }))
            .count()
    }
}

/// Mark one calendar's pillbox as used: decrement every eligible box in it
pub fn mark_pillbox_used<S, J>(
    store: &mut S,
    journal: &mut J,
    calendar_id: &str,
    reference_date: NaiveDate,
) -> Result<SweepReport>
where
    S: RuleSource + StockSink,
    J: DecrementSink,
{
    let calendar = store.calendar(calendar_id)?;
    let mut report = SweepReport::new(Trigger::OnDemand, reference_date);

    if calendar.stock_decrement_mode != StockDecrementMode::Manual {
        tracing::info!(
            "Calendar {} is not in manual decrement mode, nothing to do",
            calendar.id
        );
    }

    for medicine_box in &calendar.boxes {
        apply_to_box(store, journal, &calendar, medicine_box, &mut report)?;
    }

    tracing::info!(
        "Pillbox used for calendar {}: {} of {} boxes decremented",
        calendar.id,
        report.decremented_count(),
        report.boxes.len()
    );
    Ok(report)
}

/// Which boxes a weekly sweep has already decremented
///
/// A sweep that fails part way leaves the boxes it finished marked here, so
/// running it again for the same week only touches the rest.
pub trait SweepProgress {
    fn already_applied(&self, box_id: &str) -> bool;

    fn mark_applied(&mut self, box_id: &str) -> Result<()>;
}

impl SweepProgress for HashSet<String> {
    fn already_applied(&self, box_id: &str) -> bool {
        self.contains(box_id)
    }

    fn mark_applied(&mut self, box_id: &str) -> Result<()> {
        self.insert(box_id.to_string());
        Ok(())
    }
}

/// Weekly sweep over every box in the store that still has stock
///
/// Boxes are independent; the first store or journal failure aborts the
/// sweep and is returned. Boxes `progress` reports as done are skipped.
pub fn run_weekly_sweep<S, J, P>(
    store: &mut S,
    journal: &mut J,
    progress: &mut P,
    reference_date: NaiveDate,
) -> Result<SweepReport>
where
    S: RuleSource + StockSink,
    J: DecrementSink,
    P: SweepProgress,
{
    let calendars = store.calendars()?;
    let mut report = SweepReport::new(Trigger::WeeklySweep, reference_date);

    for calendar in &calendars {
        for medicine_box in &calendar.boxes {
            let skip = if progress.already_applied(&medicine_box.id) {
                Some(SkipReason::AlreadySwept)
            } else if !medicine_box.stock_quantity.is_positive() {
                Some(SkipReason::OutOfStock)
            } else {
                None
            };

            if let Some(reason) = skip {
                report.boxes.push(BoxReport {
                    calendar_id: calendar.id.clone(),
                    box_id: medicine_box.id.clone(),
                    name: medicine_box.name.clone(),
                    outcome: DecrementOutcome::Skipped { reason },
                });
                continue;
            }

            if apply_to_box(store, journal, calendar, medicine_box, &mut report)? {
                progress.mark_applied(&medicine_box.id)?;
            }
        }
    }

    tracing::info!(
        "Weekly sweep from {}: {} of {} boxes decremented, {} alerts",
        reference_date,
        report.decremented_count(),
        report.boxes.len(),
        report.alerts.len()
    );
    Ok(report)
}

/// Decrement one box, write it through and journal it.
///
/// Returns whether stock was changed. If the journal append fails the stock
/// write is reverted, so every change on disk has its journal line.
fn apply_to_box<S, J>(
    store: &mut S,
    journal: &mut J,
    calendar: &Calendar,
    medicine_box: &MedicineBox,
    report: &mut SweepReport,
) -> Result<bool>
where
    S: StockSink,
    J: DecrementSink,
{
    let outcome = decrement_box(
        calendar.stock_decrement_mode,
        medicine_box,
        report.reference_date,
    )?;

    let changed = matches!(outcome, DecrementOutcome::Decremented { .. });
    if let DecrementOutcome::Decremented {
        previous,
        consumed,
        new,
    } = outcome
    {
        store.update_stock(&medicine_box.id, new)?;
        let appended = journal.append(&DecrementRecord {
            id: Uuid::new_v4(),
            calendar_id: calendar.id.clone(),
            box_id: medicine_box.id.clone(),
            trigger: report.trigger,
            reference_date: report.reference_date,
            previous_stock: previous,
            consumed,
            new_stock: new,
            recorded_at: Utc::now(),
        });
        if let Err(e) = appended {
            if let Err(revert) = store.update_stock(&medicine_box.id, previous) {
                tracing::error!(
                    "Journal append failed and box {} could not be restored to {}: {}",
                    medicine_box.id,
                    previous,
                    revert
                );
            }
            return Err(e);
        }

        tracing::debug!(
            "Box {} stock {} -> {} ({} consumed)",
            medicine_box.id,
            previous,
            new,
            consumed
        );

        if new <= medicine_box.stock_alert_threshold {
            report.alerts.push(StockAlert {
                calendar_id: calendar.id.clone(),
                box_id: medicine_box.id.clone(),
                name: medicine_box.name.clone(),
                stock: new,
                threshold: medicine_box.stock_alert_threshold,
            });
        }
    }

    report.boxes.push(BoxReport {
        calendar_id: calendar.id.clone(),
        box_id: medicine_box.id.clone(),
        name: medicine_box.name.clone(),
        outcome,
    });
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::MemoryJournal;
    use crate::store::MemoryStore;
    use crate::{Error, TimeOfDay, TimeSlot};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn daily(tablets: Tablets) -> MedicationRule {
        MedicationRule {
            tablet_count: tablets,
            interval_days: 1,
            start_date: Some(date(2025, 1, 1)),
            time_of_day: TimeOfDay::Known(TimeSlot::Morning),
        }
    }

    fn medicine_box(id: &str, stock: i64, rules: Vec<MedicationRule>) -> MedicineBox {
        MedicineBox {
            id: id.into(),
            name: id.to_uppercase(),
            dose: "10 mg".into(),
            stock_quantity: Tablets::whole(stock),
            stock_alert_threshold: Tablets::whole(5),
            box_capacity: 30,
            rules,
        }
    }

    fn calendar(id: &str, mode: StockDecrementMode, boxes: Vec<MedicineBox>) -> Calendar {
        Calendar {
            id: id.into(),
            name: id.into(),
            stock_decrement_mode: mode,
            boxes,
        }
    }

    #[test]
    fn test_consumption_counts_seven_days_from_reference() {
        let rule = MedicationRule {
            tablet_count: Tablets::whole(1),
            interval_days: 2,
            start_date: Some(date(2025, 3, 30)),
            time_of_day: TimeOfDay::Known(TimeSlot::Morning),
        };

        // Window 2025-04-02..2025-04-08 (not normalised to Monday):
        // due 04-03, 04-05, 04-07
        let total = weekly_consumption(&[rule.clone()], date(2025, 4, 2)).unwrap();
        assert_eq!(total, Tablets::whole(3));

        // Window 2025-04-01..2025-04-07: due 04-01, 04-03, 04-05, 04-07
        let total = weekly_consumption(&[rule], date(2025, 4, 1)).unwrap();
        assert_eq!(total, Tablets::whole(4));
    }

    #[test]
    fn test_half_tablets_accumulate() {
        let total = weekly_consumption(&[daily(Tablets::new(1, 2))], date(2025, 4, 2)).unwrap();
        assert_eq!(total, Tablets::new(7, 2));
    }

    #[test]
    fn test_decrement_floors_at_zero() {
        let rules = vec![MedicationRule {
            tablet_count: Tablets::whole(1),
            interval_days: 1,
            start_date: Some(date(2025, 4, 2)),
            time_of_day: TimeOfDay::Known(TimeSlot::Noon),
        }];
        // Due on every day of 04-04..04-10
        let new = apply_weekly_decrement(&rules, Tablets::whole(2), date(2025, 4, 4)).unwrap();
        assert_eq!(new, Tablets::zero());
    }

    #[test]
    fn test_decrement_stock_two_consumption_five() {
        let rules = vec![MedicationRule {
            tablet_count: Tablets::whole(1),
            interval_days: 1,
            start_date: Some(date(2025, 4, 4)),
            time_of_day: TimeOfDay::Known(TimeSlot::Noon),
        }];
        // Window 04-02..04-08, anchor 04-04: due 04-04..04-08, five doses
        assert_eq!(
            weekly_consumption(&rules, date(2025, 4, 2)).unwrap(),
            Tablets::whole(5)
        );
        let new = apply_weekly_decrement(&rules, Tablets::whole(2), date(2025, 4, 2)).unwrap();
        assert_eq!(new, Tablets::zero());
    }

    #[test]
    fn test_zero_consumption_leaves_stock() {
        let new = apply_weekly_decrement(&[], Tablets::whole(12), date(2025, 4, 2)).unwrap();
        assert_eq!(new, Tablets::whole(12));
    }

    #[test]
    fn test_invalid_rule_is_rejected() {
        let mut rule = daily(Tablets::whole(1));
        rule.interval_days = 0;
        assert!(matches!(
            apply_weekly_decrement(&[rule], Tablets::whole(12), date(2025, 4, 2)),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_gating() {
        let b = medicine_box("aspirin", 20, vec![daily(Tablets::whole(1))]);

        assert_eq!(
            decrement_box(StockDecrementMode::Automatic, &b, date(2025, 4, 2)).unwrap(),
            DecrementOutcome::Skipped {
                reason: SkipReason::NotManual
            }
        );

        let mut no_capacity = b.clone();
        no_capacity.box_capacity = 0;
        assert_eq!(
            decrement_box(StockDecrementMode::Manual, &no_capacity, date(2025, 4, 2)).unwrap(),
            DecrementOutcome::Skipped {
                reason: SkipReason::NoCapacity
            }
        );

        assert_eq!(
            decrement_box(StockDecrementMode::Manual, &b, date(2025, 4, 2)).unwrap(),
            DecrementOutcome::Decremented {
                previous: Tablets::whole(20),
                consumed: Tablets::whole(7),
                new: Tablets::whole(13),
            }
        );
    }

    #[test]
    fn test_sweep_leaves_non_manual_calendars_untouched() {
        let mut store = MemoryStore::new(vec![
            calendar(
                "auto",
                StockDecrementMode::Automatic,
                vec![medicine_box("zinc", 20, vec![daily(Tablets::whole(1))])],
            ),
            calendar(
                "manual",
                StockDecrementMode::Manual,
                vec![medicine_box("aspirin", 20, vec![daily(Tablets::whole(1))])],
            ),
        ]);
        let mut journal = MemoryJournal::default();

        let mut done: HashSet<String> = HashSet::new();
        let report = run_weekly_sweep(&mut store, &mut journal, &mut done, date(2025, 4, 2)).unwrap();

        assert_eq!(report.decremented_count(), 1);
        assert_eq!(
            store.calendar("auto").unwrap().boxes[0].stock_quantity,
            Tablets::whole(20)
        );
        assert_eq!(
            store.calendar("manual").unwrap().boxes[0].stock_quantity,
            Tablets::whole(13)
        );
        assert_eq!(journal.records.len(), 1);
        assert_eq!(journal.records[0].box_id, "aspirin");
        assert_eq!(journal.records[0].trigger, Trigger::WeeklySweep);
    }

    #[test]
    fn test_sweep_skips_boxes_without_stock() {
        let mut store = MemoryStore::new(vec![calendar(
            "manual",
            StockDecrementMode::Manual,
            vec![medicine_box("aspirin", 0, vec![daily(Tablets::whole(1))])],
        )]);
        let mut journal = MemoryJournal::default();

        let mut done: HashSet<String> = HashSet::new();
        let report = run_weekly_sweep(&mut store, &mut journal, &mut done, date(2025, 4, 2)).unwrap();

        assert_eq!(
            report.boxes[0].outcome,
            DecrementOutcome::Skipped {
                reason: SkipReason::OutOfStock
            }
        );
        assert!(journal.records.is_empty());
    }

    #[test]
    fn test_low_stock_alert() {
        let mut store = MemoryStore::new(vec![calendar(
            "manual",
            StockDecrementMode::Manual,
            vec![
                medicine_box("aspirin", 10, vec![daily(Tablets::whole(1))]),
                medicine_box("zinc", 30, vec![daily(Tablets::whole(1))]),
            ],
        )]);
        let mut journal = MemoryJournal::default();

        let report = mark_pillbox_used(&mut store, &mut journal, "manual", date(2025, 4, 2)).unwrap();

        assert_eq!(report.trigger, Trigger::OnDemand);
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].box_id, "aspirin");
        assert_eq!(report.alerts[0].stock, Tablets::whole(3));
    }

    #[test]
    fn test_mark_used_on_automatic_calendar_is_a_noop() {
        let mut store = MemoryStore::new(vec![calendar(
            "auto",
            StockDecrementMode::Automatic,
            vec![medicine_box("zinc", 20, vec![daily(Tablets::whole(1))])],
        )]);
        let mut journal = MemoryJournal::default();

        let report = mark_pillbox_used(&mut store, &mut journal, "auto", date(2025, 4, 2)).unwrap();

        assert_eq!(report.decremented_count(), 0);
        assert!(journal.records.is_empty());
    }

    #[test]
    fn test_mark_used_unknown_calendar() {
        let mut store = MemoryStore::default();
        let mut journal = MemoryJournal::default();

        let err = mark_pillbox_used(&mut store, &mut journal, "nope", date(2025, 4, 2)).unwrap_err();
        assert!(err.is_not_found());
    }

    struct FailingSink;

    impl StockSink for FailingSink {
        fn update_stock(&mut self, _box_id: &str, _new_stock: Tablets) -> Result<()> {
            Err(Error::Store("disk full".into()))
        }
    }

    impl RuleSource for FailingSink {
        fn calendars(&self) -> Result<Vec<Calendar>> {
            Ok(vec![calendar(
                "manual",
                StockDecrementMode::Manual,
                vec![medicine_box("aspirin", 20, vec![daily(Tablets::whole(1))])],
            )])
        }
    }

    #[test]
    fn test_store_failure_is_propagated() {
        let mut journal = MemoryJournal::default();
        let mut done: HashSet<String> = HashSet::new();
        let err = run_weekly_sweep(&mut FailingSink, &mut journal, &mut done, date(2025, 4, 2))
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert!(journal.records.is_empty());
        assert!(done.is_empty());
    }

    #[test]
    fn test_high_precision_counts_do_not_overflow() {
        let rules: Vec<_> = [0.1234567891, 0.9876543217, 0.3333333333]
            .into_iter()
            .map(|count| daily(Tablets::from_f64(count).unwrap()))
            .collect();

        // Each count is rounded to thousandths: 7 * (0.123 + 0.988 + 0.333)
        let total = weekly_consumption(&rules, date(2025, 4, 2)).unwrap();
        assert_eq!(total, Tablets::new(10108, 1000));

        let new = apply_weekly_decrement(&rules, Tablets::whole(20), date(2025, 4, 2)).unwrap();
        assert_eq!(new, Tablets::new(9892, 1000));
    }

    #[test]
    fn test_quantity_overflow_is_a_validation_error() {
        let rules = vec![daily(Tablets::whole(i64::MAX / 2))];
        assert!(matches!(
            weekly_consumption(&rules, date(2025, 4, 2)),
            Err(Error::Validation(_))
        ));
    }

    /// Memory store whose writes to one box fail until `fail_on` is cleared
    struct FlakyStore {
        inner: MemoryStore,
        fail_on: Option<String>,
    }

    impl RuleSource for FlakyStore {
        fn calendars(&self) -> Result<Vec<Calendar>> {
            self.inner.calendars()
        }
    }

    impl StockSink for FlakyStore {
        fn update_stock(&mut self, box_id: &str, new_stock: Tablets) -> Result<()> {
            if self.fail_on.as_deref() == Some(box_id) {
                return Err(Error::Store("disk full".into()));
            }
            self.inner.update_stock(box_id, new_stock)
        }
    }

    fn stock_of(store: &MemoryStore, box_id: &str) -> Tablets {
        store
            .document
            .calendars
            .iter()
            .flat_map(|c| c.boxes.iter())
            .find(|b| b.id == box_id)
            .map(|b| b.stock_quantity)
            .unwrap()
    }

    #[test]
    fn test_sweep_resumes_after_failure_on_second_box() {
        let mut store = FlakyStore {
            inner: MemoryStore::new(vec![calendar(
                "manual",
                StockDecrementMode::Manual,
                vec![
                    medicine_box("aspirin", 20, vec![daily(Tablets::whole(1))]),
                    medicine_box("zinc", 20, vec![daily(Tablets::whole(1))]),
                ],
            )]),
            fail_on: Some("zinc".into()),
        };
        let mut journal = MemoryJournal::default();
        let mut done: HashSet<String> = HashSet::new();

        let err = run_weekly_sweep(&mut store, &mut journal, &mut done, date(2025, 4, 2))
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert_eq!(stock_of(&store.inner, "aspirin"), Tablets::whole(13));
        assert_eq!(stock_of(&store.inner, "zinc"), Tablets::whole(20));
        assert!(done.contains("aspirin"));

        store.fail_on = None;
        let report = run_weekly_sweep(&mut store, &mut journal, &mut done, date(2025, 4, 2)).unwrap();

        assert_eq!(
            report.boxes[0].outcome,
            DecrementOutcome::Skipped {
                reason: SkipReason::AlreadySwept
            }
        );
        assert_eq!(report.decremented_count(), 1);
        assert_eq!(stock_of(&store.inner, "aspirin"), Tablets::whole(13));
        assert_eq!(stock_of(&store.inner, "zinc"), Tablets::whole(13));

        let journaled: Vec<_> = journal.records.iter().map(|r| r.box_id.as_str()).collect();
        assert_eq!(journaled, vec!["aspirin", "zinc"]);
    }

    struct FailingJournal;

    impl DecrementSink for FailingJournal {
        fn append(&mut self, _record: &DecrementRecord) -> Result<()> {
            Err(Error::Other("journal unavailable".into()))
        }
    }

    #[test]
    fn test_journal_failure_restores_stock() {
        let mut store = MemoryStore::new(vec![calendar(
            "manual",
            StockDecrementMode::Manual,
            vec![medicine_box("aspirin", 20, vec![daily(Tablets::whole(1))])],
        )]);
        let mut done: HashSet<String> = HashSet::new();

        let err = run_weekly_sweep(&mut store, &mut FailingJournal, &mut done, date(2025, 4, 2))
            .unwrap_err();

        assert!(matches!(err, Error::Other(_)));
        assert_eq!(stock_of(&store, "aspirin"), Tablets::whole(20));
        assert!(done.is_empty());
    }
}
