//! File-backed data store for calendars, boxes and rules.
//!
//! The store is a single JSON document. Reads take a shared lock; stock
//! updates run load-modify-save under an exclusive lock on a sidecar lock
//! file and replace the document atomically.

use crate::{Calendar, Error, MedicationRule, MedicineBox, Result, Tablets};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Where medication rules come from
pub trait RuleSource {
    fn calendars(&self) -> Result<Vec<Calendar>>;

    fn calendar(&self, calendar_id: &str) -> Result<Calendar> {
        self.calendars()?
            .into_iter()
            .find(|c| c.id == calendar_id)
            .ok_or_else(|| Error::calendar_not_found(calendar_id))
    }

    /// Rules of one box. A box with no rules yields an empty list.
    fn box_rules(&self, box_id: &str) -> Result<Vec<MedicationRule>> {
        self.calendars()?
            .iter()
            .flat_map(|c| c.boxes.iter())
            .find(|b| b.id == box_id)
            .map(|b| b.rules.clone())
            .ok_or_else(|| Error::box_not_found(box_id))
    }
}

/// Where updated stock quantities go
pub trait StockSink {
    fn update_stock(&mut self, box_id: &str, new_stock: Tablets) -> Result<()>;
}

/// The persisted store document
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreDocument {
    #[serde(default)]
    pub calendars: Vec<Calendar>,
}

impl StoreDocument {
    pub fn find_box_mut(&mut self, box_id: &str) -> Option<&mut MedicineBox> {
        self.calendars
            .iter_mut()
            .flat_map(|c| c.boxes.iter_mut())
            .find(|b| b.id == box_id)
    }

    /// Check the document for problems that would make the engines fail
    ///
    /// Returns a list of human-readable problems, empty when the document is
    /// usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let mut calendar_ids = HashSet::new();
        let mut box_ids = HashSet::new();

        for calendar in &self.calendars {
            if calendar.id.is_empty() {
                errors.push("Calendar has empty ID".to_string());
            } else if !calendar_ids.insert(calendar.id.as_str()) {
                errors.push(format!("Duplicate calendar ID '{}'", calendar.id));
            }

            for medicine_box in &calendar.boxes {
                if medicine_box.id.is_empty() {
                    errors.push(format!("Calendar '{}' has a box with empty ID", calendar.id));
                } else if !box_ids.insert(medicine_box.id.as_str()) {
                    errors.push(format!("Duplicate box ID '{}'", medicine_box.id));
                }
                if medicine_box.name.is_empty() {
                    errors.push(format!("Box '{}' has empty name", medicine_box.id));
                }
                if medicine_box.stock_quantity < Tablets::zero() {
                    errors.push(format!(
                        "Box '{}' has negative stock {}",
                        medicine_box.id, medicine_box.stock_quantity
                    ));
                }

                for (index, rule) in medicine_box.rules.iter().enumerate() {
                    if let Err(e) = rule.validate() {
                        errors.push(format!("Box '{}' rule {}: {}", medicine_box.id, index + 1, e));
                    }
                }
            }
        }

        errors
    }

    /// Load a store document with shared locking
    ///
    /// A missing file is an empty store. A corrupt file is an error: stock
    /// counts must never be silently reset.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No store file at {:?}, starting empty", path);
            return Ok(Self::default());
        }

        let file = File::open(path)?;
        file.lock_shared()?;

        let mut contents = String::new();
        let read = std::io::BufReader::new(&file).read_to_string(&mut contents);
        file.unlock()?;
        read?;

        let document: StoreDocument = serde_json::from_str(&contents)?;
        tracing::debug!(
            "Loaded {} calendars from {:?}",
            document.calendars.len(),
            path
        );
        Ok(document)
    }

    /// Save the document atomically
    ///
    /// Writes to a temp file in the same directory, syncs it, then renames
    /// it over the original.
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::Store(format!("store path {:?} has no parent", path)))?;
        std::fs::create_dir_all(parent)?;

        let temp = NamedTempFile::new_in(parent)?;
        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            serde_json::to_writer_pretty(&mut writer, self)?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved store to {:?}", path);
        Ok(())
    }
}

/// Store backed by a JSON file on disk
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<StoreDocument> {
        StoreDocument::load(&self.path)
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".lock");
        self.path.with_file_name(name)
    }
}

impl RuleSource for JsonStore {
    fn calendars(&self) -> Result<Vec<Calendar>> {
        Ok(self.load()?.calendars)
    }
}

impl StockSink for JsonStore {
    fn update_stock(&mut self, box_id: &str, new_stock: Tablets) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())?;
        lock.lock_exclusive()
            .map_err(|e| Error::Store(format!("unable to lock store: {}", e)))?;

        let result = (|| -> Result<()> {
            let mut document = self.load()?;
            let medicine_box = document
                .find_box_mut(box_id)
                .ok_or_else(|| Error::box_not_found(box_id))?;
            medicine_box.stock_quantity = new_stock;
            document.save(&self.path)
        })();

        lock.unlock()?;
        result?;

        tracing::debug!("Set stock of box {} to {}", box_id, new_stock);
        Ok(())
    }
}

/// Store held entirely in memory
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    pub document: StoreDocument,
}

impl MemoryStore {
    pub fn new(calendars: Vec<Calendar>) -> Self {
        Self {
            document: StoreDocument { calendars },
        }
    }
}

impl RuleSource for MemoryStore {
    fn calendars(&self) -> Result<Vec<Calendar>> {
        Ok(self.document.calendars.clone())
    }
}

impl StockSink for MemoryStore {
    fn update_stock(&mut self, box_id: &str, new_stock: Tablets) -> Result<()> {
        let medicine_box = self
            .document
            .find_box_mut(box_id)
            .ok_or_else(|| Error::box_not_found(box_id))?;
        medicine_box.stock_quantity = new_stock;
        Ok(())
    }
}
