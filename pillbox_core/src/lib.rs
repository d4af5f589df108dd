#![forbid(unsafe_code)]

//! Core domain model and business logic for the pillbox system.
//!
//! This crate provides:
//! - Domain types (rules, boxes, calendars, schedule events, weekly table)
//! - Recurrence engine and seven-day windows
//! - Schedule and table builders
//! - Stock decrement calculator, on-demand action and weekly sweep
//! - Persistence (JSON store, decrement journal, sweep ledger)
//! - CSV export

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod window;
pub mod recurrence;
pub mod schedule;
pub mod table;
pub mod stock;
pub mod store;
pub mod journal;
pub mod ledger;
pub mod export;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use recurrence::is_due;
pub use window::{weekly_window_from_date, weekly_window_from_monday};
pub use schedule::generate_schedule;
pub use table::generate_table;
pub use stock::{
    apply_weekly_decrement, decrement_box, mark_pillbox_used, run_weekly_sweep,
    weekly_consumption, DecrementOutcome, SkipReason, StockAlert, SweepProgress, SweepReport,
};
pub use store::{JsonStore, MemoryStore, RuleSource, StockSink, StoreDocument};
pub use journal::{DecrementRecord, DecrementSink, JsonlJournal, Trigger};
pub use ledger::{LedgerProgress, SweepLedger};
