//! Append-only journal of stock decrements.
//!
//! Each applied decrement is appended to a JSONL (JSON Lines) file with file
//! locking so that an on-demand action and the weekly sweep can safely run
//! at the same time.

use crate::{Result, Tablets};
use chrono::{DateTime, NaiveDate, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// What caused a decrement
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// The user marked the pillbox as used
    OnDemand,
    /// The recurring weekly sweep
    WeeklySweep,
}

/// One applied stock change
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecrementRecord {
    pub id: Uuid,
    pub calendar_id: String,
    pub box_id: String,
    pub trigger: Trigger,
    pub reference_date: NaiveDate,
    pub previous_stock: Tablets,
    pub consumed: Tablets,
    pub new_stock: Tablets,
    pub recorded_at: DateTime<Utc>,
}

/// Sink for decrement records
pub trait DecrementSink {
    fn append(&mut self, record: &DecrementRecord) -> Result<()>;
}

/// JSONL-based journal with file locking
pub struct JsonlJournal {
    path: PathBuf,
}

impl JsonlJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl DecrementSink for JsonlJournal {
    fn append(&mut self, record: &DecrementRecord) -> Result<()> {
        self.ensure_parent_dir()?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        file.lock_exclusive()?;

        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(record)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        drop(writer);

        file.unlock()?;

        tracing::debug!("Journaled decrement {} for box {}", record.id, record.box_id);
        Ok(())
    }
}

/// In-memory sink, handy for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryJournal {
    pub records: Vec<DecrementRecord>,
}

impl DecrementSink for MemoryJournal {
    fn append(&mut self, record: &DecrementRecord) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }
}

/// Read all records from a journal file. Malformed lines are skipped.
pub fn read_records(path: &Path) -> Result<Vec<DecrementRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut records = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<DecrementRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!("Skipping journal line {}: {}", line_num + 1, e);
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} decrement records", records.len());
    Ok(records)
}
