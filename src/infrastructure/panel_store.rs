//! Intermediate panel persistence
//!
//! The cache is a flat CSV table, one row per leaf value:
//! `[date, group column(s)..., field, value]`. Dates are ISO strings, values
//! are decimal text and an empty cell means null.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

use crate::domain::category::{Category, PanelSchema};
use crate::domain::errors::{PanelError, PanelResult};
use crate::domain::panel::{IntermediatePanel, PanelRecord};
use crate::domain::services::PanelStore;

/// Reject the record set if any `(date, group, field)` repeats.
pub fn ensure_unique(records: &[PanelRecord]) -> PanelResult<()> {
    let mut seen = HashSet::with_capacity(records.len());
    for r in records {
        if !seen.insert((r.date, r.group_key.as_str(), r.field_key.as_str())) {
            return Err(PanelError::DuplicateRecord {
                date: r.date,
                group: r.group_key.clone(),
                field: r.field_key.clone(),
            });
        }
    }
    Ok(())
}

/// CSV-backed store for one category's intermediate panel.
#[derive(Debug, Clone)]
pub struct CsvPanelStore {
    path: PathBuf,
    category: Category,
}

impl CsvPanelStore {
    pub fn new(path: impl Into<PathBuf>, category: Category) -> Self {
        Self {
            path: path.into(),
            category,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn schema(&self) -> &PanelSchema {
        self.category.schema()
    }

    fn storage_err(&self, e: impl std::fmt::Display) -> PanelError {
        PanelError::storage(&self.path, e.to_string())
    }

    fn ensure_parent(&self) -> PanelResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.storage_err(e))?;
            }
        }
        Ok(())
    }

    fn write_table(&self, path: &Path, records: &[PanelRecord]) -> PanelResult<()> {
        let mut writer = csv::Writer::from_path(path).map_err(|e| self.storage_err(e))?;
        writer
            .write_record(self.schema().header())
            .map_err(|e| self.storage_err(e))?;

        for r in records {
            let group_parts = self.category.unflatten_group(&r.group_key)?;
            let date = r.date.format("%Y-%m-%d").to_string();
            let value = r.value.map(|v| v.to_string()).unwrap_or_default();

            let mut row: Vec<&str> = Vec::with_capacity(group_parts.len() + 3);
            row.push(&date);
            row.extend(group_parts.iter().map(String::as_str));
            row.push(&r.field_key);
            row.push(&value);
            writer.write_record(&row).map_err(|e| self.storage_err(e))?;
        }
        writer.flush().map_err(|e| self.storage_err(e))
    }

    fn parse_row(&self, row: &csv::StringRecord, line: u64) -> PanelResult<PanelRecord> {
        let width = self.schema().group_columns.len();
        let cell = |i: usize| row.get(i).unwrap_or_default();
        let at_line = |what: &str, raw: &str| {
            PanelError::storage(&self.path, format!("line {line}: invalid {what} '{raw}'"))
        };

        let date = NaiveDate::parse_from_str(cell(0), "%Y-%m-%d")
            .map_err(|_| at_line("date", cell(0)))?;
        let parts: Vec<&str> = (1..=width).map(cell).collect();
        let group_key = self
            .category
            .flatten_group(&parts)
            .map_err(|_| at_line("group", &parts.join(",")))?;
        let field_key = cell(width + 1).to_string();
        let raw_value = cell(width + 2);
        let value = if raw_value.is_empty() {
            None
        } else {
            Some(Decimal::from_str(raw_value).map_err(|_| at_line("value", raw_value))?)
        };
        Ok(PanelRecord {
            date,
            group_key,
            field_key,
            value,
        })
    }
}

impl PanelStore for CsvPanelStore {
    fn load(&self) -> PanelResult<Vec<PanelRecord>> {
        let mut reader = match csv::Reader::from_path(&self.path) {
            Ok(reader) => reader,
            Err(e) => match e.kind() {
                csv::ErrorKind::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {
                    info!("📁 No intermediate panel at {:?}, creating an empty one", self.path);
                    self.ensure_parent()?;
                    self.write_table(&self.path, &[])?;
                    return Ok(Vec::new());
                }
                _ => return Err(self.storage_err(&e)),
            },
        };

        let expected = self.schema().header();
        let header = reader.headers().map_err(|e| self.storage_err(e))?.clone();
        if header.iter().ne(expected.iter().copied()) {
            return Err(self.storage_err(format!(
                "unexpected header {:?}, expected {:?}",
                header.iter().collect::<Vec<_>>(),
                expected
            )));
        }

        let mut records = Vec::new();
        for (i, row) in reader.records().enumerate() {
            let row = row.map_err(|e| self.storage_err(e))?;
            records.push(self.parse_row(&row, i as u64 + 2)?);
        }
        debug!("Loaded {} panel records from {:?}", records.len(), self.path);
        Ok(records)
    }

    fn save(&self, records: &[PanelRecord]) -> PanelResult<()> {
        ensure_unique(records)?;
        self.ensure_parent()?;

        let tmp = self.path.with_extension("csv.tmp");
        let written = self
            .write_table(&tmp, records)
            .and_then(|()| fs::rename(&tmp, &self.path).map_err(|e| self.storage_err(e)));
        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                debug!("Could not remove {:?}: {}", tmp, cleanup);
            }
            return Err(e);
        }

        info!("💾 Saved {} panel records to {:?}", records.len(), self.path);
        Ok(())
    }
}

/// Store that keeps the table in memory, for read-only runs and tests.
#[derive(Debug, Default)]
pub struct MemoryPanelStore {
    records: Mutex<Vec<PanelRecord>>,
    saves: Mutex<usize>,
}

impl MemoryPanelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<PanelRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            saves: Mutex::new(0),
        }
    }

    pub fn records(&self) -> Vec<PanelRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PanelStore for MemoryPanelStore {
    fn load(&self) -> PanelResult<Vec<PanelRecord>> {
        Ok(self.records())
    }

    fn save(&self, records: &[PanelRecord]) -> PanelResult<()> {
        ensure_unique(records)?;
        *self.records.lock().unwrap_or_else(PoisonError::into_inner) = records.to_vec();
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}

/// Write the wide output table: one row per date, one column per
/// `(group, field)`, empty cells for null.
pub fn export_wide(path: &Path, category: &Category, panel: &IntermediatePanel) -> PanelResult<()> {
    let err = |e: &dyn std::fmt::Display| PanelError::storage(path, e.to_string());
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| err(&e))?;
        }
    }

    let columns: Vec<(&str, &str)> = category
        .groups()
        .iter()
        .flat_map(|g| g.fields.iter().map(move |f| (g.key.as_str(), f.key.as_str())))
        .collect();

    let mut dates: Vec<NaiveDate> = panel
        .iter()
        .flat_map(|(_, wide)| wide.keys().copied())
        .collect();
    dates.sort_unstable();
    dates.dedup();

    let mut writer = csv::Writer::from_path(path).map_err(|e| err(&e))?;
    let mut header = vec![category.schema().date_column.clone()];
    header.extend(columns.iter().map(|(g, f)| category.wide_column(g, f)));
    writer.write_record(&header).map_err(|e| err(&e))?;

    for date in dates {
        let mut row = vec![date.format("%Y-%m-%d").to_string()];
        row.extend(columns.iter().map(|(g, f)| {
            panel
                .get(g, date)
                .and_then(|day| day.get(f))
                .map(|v| v.to_string())
                .unwrap_or_default()
        }));
        writer.write_record(&row).map_err(|e| err(&e))?;
    }
    writer.flush().map_err(|e| err(&e))?;

    info!("📤 Exported {} columns for category '{}' to {:?}", columns.len(), category.name(), path);
    Ok(())
}
