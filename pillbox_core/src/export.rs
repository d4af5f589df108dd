//! CSV export of the weekly table.

use crate::{Result, TimeSlot, WeeklyTable};
use chrono::Weekday;
use std::fs::File;
use std::io::Write;
use std::path::Path;

const DAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Write the table as CSV: one row per entry, slots in morning/noon/evening
/// order, empty cells left blank
pub fn write_table_csv<W: Write>(table: &WeeklyTable, writer: W) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    let mut header = vec!["slot".to_string(), "title".to_string(), "dose".to_string()];
    header.extend(DAYS.iter().map(|d| d.to_string()));
    csv_writer.write_record(&header)?;

    for slot in TimeSlot::ALL {
        for entry in table.bucket(slot) {
            let mut record = vec![
                slot.as_str().to_string(),
                entry.title.clone(),
                entry.dose.clone(),
            ];
            record.extend(
                DAYS.iter()
                    .map(|d| entry.cells.get(*d).map(|t| t.to_string()).unwrap_or_default()),
            );
            csv_writer.write_record(&record)?;
        }
    }

    csv_writer.flush()?;
    Ok(())
}

/// Export the table to a CSV file, creating parent directories
pub fn export_table_csv(table: &WeeklyTable, path: &Path) -> Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = File::create(path)?;
    write_table_csv(table, std::io::BufWriter::new(file))?;

    let rows = TimeSlot::ALL.iter().map(|s| table.bucket(*s).len()).sum();
    tracing::info!("Exported {} table rows to {:?}", rows, path);
    Ok(rows)
}
