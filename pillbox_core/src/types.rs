//! Core domain types for the pillbox system.
//!
//! This module defines the fundamental types used throughout the system:
//! - Tablet quantities (exact, half tablets allowed)
//! - Time-of-day slots and the raw rule value they are parsed from
//! - Medication rules, medicine boxes and calendars as read from the store
//! - Derived schedule events and weekly table rows

use crate::{Error, Result};
use chrono::{NaiveDate, NaiveDateTime, Weekday};
use num_rational::Rational64;
use num_traits::{CheckedAdd, CheckedSub, Zero};
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Tablet quantities
// ============================================================================

/// An exact tablet quantity. Half and quarter tablets are common, so counts
/// are kept as rationals and only converted to floats at the JSON boundary.
///
/// Decimal input is rounded to thousandths of a tablet, which keeps every
/// denominator a divisor of [`Tablets::PRECISION`]. Arithmetic is checked and
/// reports overflow as [`Error::Validation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tablets(Rational64);

impl Tablets {
    /// Finest fraction of a tablet a decimal count is rounded to
    pub const PRECISION: i64 = 1000;

    pub fn zero() -> Self {
        Tablets(Rational64::zero())
    }

    pub fn whole(count: i64) -> Self {
        Tablets(Rational64::from_integer(count))
    }

    pub fn new(numer: i64, denom: i64) -> Self {
        Tablets(Rational64::new(numer, denom))
    }

    /// Convert a decimal count such as `0.5` into an exact quantity, rounded
    /// to the nearest thousandth. Returns `None` for NaN, infinities and
    /// values too large to hold exactly.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let scaled = (value * Self::PRECISION as f64).round();
        if scaled.abs() > MAX_EXACT_F64 {
            return None;
        }
        Some(Tablets(Rational64::new(scaled as i64, Self::PRECISION)))
    }

    pub fn to_f64(self) -> f64 {
        *self.0.numer() as f64 / *self.0.denom() as f64
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Rational64::zero()
    }

    pub fn checked_add(self, rhs: Tablets) -> Result<Tablets> {
        self.0
            .checked_add(&rhs.0)
            .map(Tablets)
            .ok_or_else(|| overflow("+", self, rhs))
    }

    pub fn checked_sub(self, rhs: Tablets) -> Result<Tablets> {
        self.0
            .checked_sub(&rhs.0)
            .map(Tablets)
            .ok_or_else(|| overflow("-", self, rhs))
    }

    /// Subtract, flooring the result at zero.
    pub fn saturating_sub(self, rhs: Tablets) -> Result<Tablets> {
        if rhs >= self {
            return Ok(Tablets::zero());
        }
        self.checked_sub(rhs)
    }

    /// Sum a sequence of quantities, failing on overflow
    pub fn checked_sum<I: IntoIterator<Item = Tablets>>(iter: I) -> Result<Tablets> {
        iter.into_iter()
            .try_fold(Tablets::zero(), |acc, t| acc.checked_add(t))
    }
}

/// Largest integer an `f64` represents exactly
const MAX_EXACT_F64: f64 = 9_007_199_254_740_992.0;

fn overflow(op: &str, lhs: Tablets, rhs: Tablets) -> Error {
    Error::Validation(format!("tablet quantity overflow: {} {} {}", lhs, op, rhs))
}

impl Default for Tablets {
    fn default() -> Self {
        Tablets::zero()
    }
}

impl fmt::Display for Tablets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_integer() {
            write!(f, "{}", self.0.to_integer())
        } else {
            write!(f, "{}", self.to_f64())
        }
    }
}

impl Serialize for Tablets {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if self.0.is_integer() {
            serializer.serialize_i64(self.0.to_integer())
        } else {
            serializer.serialize_f64(self.to_f64())
        }
    }
}

impl<'de> Deserialize<'de> for Tablets {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Tablets::from_f64(value)
            .ok_or_else(|| de::Error::custom(format!("invalid tablet quantity {}", value)))
    }
}

// ============================================================================
// Time of day
// ============================================================================

/// The three dosing slots a pillbox is divided into
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSlot {
    Morning,
    Noon,
    Evening,
}

impl TimeSlot {
    pub const ALL: [TimeSlot; 3] = [TimeSlot::Morning, TimeSlot::Noon, TimeSlot::Evening];

    /// Wall-clock hour the dose is scheduled at
    pub fn hour(self) -> u32 {
        match self {
            TimeSlot::Morning => 8,
            TimeSlot::Noon => 12,
            TimeSlot::Evening => 18,
        }
    }

    /// Calendar colour hint for events in this slot
    pub fn color(self) -> &'static str {
        match self {
            TimeSlot::Morning => "#f6c342",
            TimeSlot::Noon => "#4aa3df",
            TimeSlot::Evening => "#8e6bbf",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeSlot::Morning => "morning",
            TimeSlot::Noon => "noon",
            TimeSlot::Evening => "evening",
        }
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `time_of_day` value of a rule as stored.
///
/// Values outside the three known slots are kept verbatim so that they
/// survive a store round-trip. The schedule and table builders skip them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TimeOfDay {
    Known(TimeSlot),
    Unrecognized(String),
}

impl TimeOfDay {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "morning" => TimeOfDay::Known(TimeSlot::Morning),
            "noon" => TimeOfDay::Known(TimeSlot::Noon),
            "evening" => TimeOfDay::Known(TimeSlot::Evening),
            _ => TimeOfDay::Unrecognized(raw.to_string()),
        }
    }

    pub fn slot(&self) -> Option<TimeSlot> {
        match self {
            TimeOfDay::Known(slot) => Some(*slot),
            TimeOfDay::Unrecognized(_) => None,
        }
    }
}

impl From<TimeSlot> for TimeOfDay {
    fn from(slot: TimeSlot) -> Self {
        TimeOfDay::Known(slot)
    }
}

impl From<String> for TimeOfDay {
    fn from(raw: String) -> Self {
        TimeOfDay::parse(&raw)
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        match value {
            TimeOfDay::Known(slot) => slot.as_str().to_string(),
            TimeOfDay::Unrecognized(raw) => raw,
        }
    }
}

// ============================================================================
// Rules, boxes and calendars
// ============================================================================

/// One dosing instruction for one medicine box
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MedicationRule {
    pub tablet_count: Tablets,
    pub interval_days: u32,
    #[serde(default, deserialize_with = "deserialize_optional_date")]
    pub start_date: Option<NaiveDate>,
    pub time_of_day: TimeOfDay,
}

/// Accepts `null`, a missing field, `""`, `YYYY-MM-DD` or a full
/// `YYYY-MM-DDTHH:MM:SS` timestamp (the date part is kept).
fn deserialize_optional_date<'de, D>(deserializer: D) -> std::result::Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let raw = match raw.as_deref().map(str::trim) {
        None | Some("") => return Ok(None),
        Some(s) => s,
    };

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S").map(|dt| dt.date()))
        .map(Some)
        .map_err(|e| de::Error::custom(format!("invalid start_date '{}': {}", raw, e)))
}

/// Whether a calendar's boxes are decremented by the pillbox actions
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockDecrementMode {
    Manual,
    #[default]
    Automatic,
}

/// A box of one medication with its stock and dosing rules
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MedicineBox {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub dose: String,
    #[serde(default)]
    pub stock_quantity: Tablets,
    #[serde(default)]
    pub stock_alert_threshold: Tablets,
    #[serde(default)]
    pub box_capacity: u32,
    #[serde(default)]
    pub rules: Vec<MedicationRule>,
}

impl MedicineBox {
    /// The box's rules labelled with its display name and dose
    pub fn prescribed_rules(&self) -> impl Iterator<Item = PrescribedRule> + '_ {
        self.rules.iter().map(move |rule| PrescribedRule {
            title: self.name.clone(),
            dose: self.dose.clone(),
            rule: rule.clone(),
        })
    }
}

/// A shared medication calendar owning a set of boxes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Calendar {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub stock_decrement_mode: StockDecrementMode,
    #[serde(default)]
    pub boxes: Vec<MedicineBox>,
}

impl Calendar {
    pub fn prescribed_rules(&self) -> Vec<PrescribedRule> {
        self.boxes.iter().flat_map(|b| b.prescribed_rules()).collect()
    }

    pub fn find_box(&self, box_id: &str) -> Option<&MedicineBox> {
        self.boxes.iter().find(|b| b.id == box_id)
    }
}

/// A rule together with the medication it belongs to, as the schedule and
/// table builders consume it
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PrescribedRule {
    pub title: String,
    pub dose: String,
    #[serde(flatten)]
    pub rule: MedicationRule,
}

// ============================================================================
// Derived outputs
// ============================================================================

/// One concrete dose occurrence in the weekly schedule
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScheduleEvent {
    pub title: String,
    pub timestamp: NaiveDateTime,
    pub color: &'static str,
    pub tablet_count: Tablets,
    pub dose: String,
}

/// Tablet counts per weekday, Monday first
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WeekCells {
    counts: [Option<Tablets>; 7],
}

impl WeekCells {
    pub fn get(&self, day: Weekday) -> Option<Tablets> {
        self.counts[day.num_days_from_monday() as usize]
    }

    /// Add to the cell for `day`, summing with anything already there
    pub fn add(&mut self, day: Weekday, tablets: Tablets) -> Result<()> {
        let cell = &mut self.counts[day.num_days_from_monday() as usize];
        *cell = Some(cell.unwrap_or_default().checked_add(tablets)?);
        Ok(())
    }

    pub fn merge(&mut self, other: &WeekCells) -> Result<()> {
        for (day, tablets) in other.iter() {
            self.add(day, tablets)?;
        }
        Ok(())
    }

    /// Filled cells in weekday order
    pub fn iter(&self) -> impl Iterator<Item = (Weekday, Tablets)> + '_ {
        self.counts.iter().enumerate().filter_map(|(i, cell)| {
            cell.map(|tablets| (weekday_from_index(i), tablets))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.counts.iter().all(Option::is_none)
    }
}

fn weekday_from_index(index: usize) -> Weekday {
    match index {
        0 => Weekday::Mon,
        1 => Weekday::Tue,
        2 => Weekday::Wed,
        3 => Weekday::Thu,
        4 => Weekday::Fri,
        5 => Weekday::Sat,
        _ => Weekday::Sun,
    }
}

impl Serialize for WeekCells {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let filled: Vec<_> = self.iter().collect();
        let mut map = serializer.serialize_map(Some(filled.len()))?;
        for (day, tablets) in filled {
            map.serialize_entry(&day.to_string(), &tablets)?;
        }
        map.end()
    }
}

/// One medication row of the weekly table
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TableEntry {
    pub title: String,
    pub dose: String,
    pub cells: WeekCells,
}

/// The weekly table, one bucket per time slot
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct WeeklyTable {
    pub morning: Vec<TableEntry>,
    pub noon: Vec<TableEntry>,
    pub evening: Vec<TableEntry>,
}

impl WeeklyTable {
    pub fn bucket(&self, slot: TimeSlot) -> &[TableEntry] {
        match slot {
            TimeSlot::Morning => &self.morning,
            TimeSlot::Noon => &self.noon,
            TimeSlot::Evening => &self.evening,
        }
    }

    pub fn bucket_mut(&mut self, slot: TimeSlot) -> &mut Vec<TableEntry> {
        match slot {
            TimeSlot::Morning => &mut self.morning,
            TimeSlot::Noon => &mut self.noon,
            TimeSlot::Evening => &mut self.evening,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.morning.is_empty() && self.noon.is_empty() && self.evening.is_empty()
    }
}
