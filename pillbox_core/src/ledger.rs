//! Sweep ledger persistence with file locking.
//!
//! The weekly decrement is not idempotent, so the trigger records which ISO
//! week it last swept and refuses to sweep the same week twice. Boxes
//! decremented by a sweep that has not completed yet are recorded one by one,
//! so a failed sweep can be resumed without decrementing them again.
//!
//! A sweep holds [`LedgerLock`] from the ledger check until the week is
//! recorded, so concurrent triggers for the same week run one after another.

use crate::stock::SweepProgress;
use crate::{Error, Result};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// `YYYY-Www` key of the ISO week containing `date`
pub fn iso_week_key(date: NaiveDate) -> String {
    let week = date.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

/// Record of completed weekly sweeps
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepLedger {
    pub last_swept_week: Option<String>,
    pub last_swept_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sweeps_run: u32,
    /// Week of a sweep that started but has not been recorded as complete
    #[serde(default)]
    pub pending_week: Option<String>,
    /// Boxes already decremented during `pending_week`
    #[serde(default)]
    pub pending_boxes: Vec<String>,
}

impl SweepLedger {
    /// Whether the week containing `reference_date` was already swept
    pub fn already_swept(&self, reference_date: NaiveDate) -> bool {
        self.last_swept_week.as_deref() == Some(iso_week_key(reference_date).as_str())
    }

    /// Mark the week as swept and drop any partial progress
    pub fn record(&mut self, reference_date: NaiveDate, at: DateTime<Utc>) {
        self.last_swept_week = Some(iso_week_key(reference_date));
        self.last_swept_at = Some(at);
        self.sweeps_run += 1;
        self.clear_pending();
    }

    /// Boxes a partial sweep of this week already decremented
    pub fn pending_boxes_for(&self, reference_date: NaiveDate) -> &[String] {
        if self.pending_week.as_deref() == Some(iso_week_key(reference_date).as_str()) {
            &self.pending_boxes
        } else {
            &[]
        }
    }

    pub fn mark_box_swept(&mut self, reference_date: NaiveDate, box_id: &str) {
        let week = iso_week_key(reference_date);
        if self.pending_week.as_deref() != Some(week.as_str()) {
            self.pending_week = Some(week);
            self.pending_boxes.clear();
        }
        if !self.pending_boxes.iter().any(|id| id == box_id) {
            self.pending_boxes.push(box_id.to_string());
        }
    }

    pub fn clear_pending(&mut self) {
        self.pending_week = None;
        self.pending_boxes.clear();
    }

    /// Take the exclusive sweep lock on the sidecar `<ledger>.lock` file
    ///
    /// Blocks until any other holder releases it. The lock is released when
    /// the returned guard is dropped.
    pub fn lock(path: &Path) -> Result<LedgerLock> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path(path))?;
        file.lock_exclusive()
            .map_err(|e| Error::Store(format!("unable to lock sweep ledger: {}", e)))?;

        tracing::debug!("Acquired sweep lock for {:?}", path);
        Ok(LedgerLock { file })
    }

    /// Load the ledger with shared locking
    ///
    /// Returns an empty ledger if the file doesn't exist. A file that cannot
    /// be read or parsed is logged and treated as empty.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No sweep ledger found, starting fresh");
            return Ok(Self::default());
        }

        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("Unable to open sweep ledger {:?}: {}. Using empty ledger.", path, e);
                return Ok(Self::default());
            }
        };

        if let Err(e) = file.lock_shared() {
            tracing::warn!("Unable to lock sweep ledger {:?}: {}. Using empty ledger.", path, e);
            return Ok(Self::default());
        }

        let mut contents = String::new();
        let read = std::io::BufReader::new(&file).read_to_string(&mut contents);
        file.unlock()?;
        if let Err(e) = read {
            tracing::warn!("Failed to read sweep ledger {:?}: {}. Using empty ledger.", path, e);
            return Ok(Self::default());
        }

        match serde_json::from_str::<SweepLedger>(&contents) {
            Ok(ledger) => {
                tracing::debug!("Loaded sweep ledger from {:?}", path);
                Ok(ledger)
            }
            Err(e) => {
                tracing::warn!("Failed to parse sweep ledger {:?}: {}. Using empty ledger.", path, e);
                Ok(Self::default())
            }
        }
    }

    /// Save atomically: temp file, fsync, rename
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::Other(format!("ledger path {:?} has no parent", path)))?;
        std::fs::create_dir_all(parent)?;

        let temp = NamedTempFile::new_in(parent)?;
        temp.as_file().lock_exclusive()?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string(self)?;
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;
        temp.persist(path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved sweep ledger to {:?}", path);
        Ok(())
    }

    /// Load, modify and save back
    pub fn update<F>(path: &Path, f: F) -> Result<Self>
    where
        F: FnOnce(&mut SweepLedger) -> Result<()>,
    {
        let mut ledger = Self::load(path)?;
        f(&mut ledger)?;
        ledger.save(path)?;
        Ok(ledger)
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}

/// Held for the duration of a sweep; see [`SweepLedger::lock`]
pub struct LedgerLock {
    file: File,
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!("Failed to release sweep lock: {}", e);
        }
    }
}

/// Sweep progress written through to the ledger file after every box
pub struct LedgerProgress {
    path: PathBuf,
    ledger: SweepLedger,
    reference_date: NaiveDate,
}

impl LedgerProgress {
    pub fn new(path: impl Into<PathBuf>, ledger: SweepLedger, reference_date: NaiveDate) -> Self {
        Self {
            path: path.into(),
            ledger,
            reference_date,
        }
    }

    pub fn into_ledger(self) -> SweepLedger {
        self.ledger
    }
}

impl SweepProgress for LedgerProgress {
    fn already_applied(&self, box_id: &str) -> bool {
        self.ledger
            .pending_boxes_for(self.reference_date)
            .iter()
            .any(|id| id == box_id)
    }

    fn mark_applied(&mut self, box_id: &str) -> Result<()> {
        self.ledger.mark_box_swept(self.reference_date, box_id);
        self.ledger.save(&self.path)
    }
}
