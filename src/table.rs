//
// table.rs
// Dicom-Deid-rs
//
// In-memory metadata table (one row per study directory) with CSV persistence and collation.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{DeidError, Result};
use crate::models::StudyRow;

/// Rows keyed by `study_dir_name`, kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataTable {
    rows: Vec<StudyRow>,
    names: HashSet<String>,
}

impl MetadataTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: impl IntoIterator<Item = StudyRow>) -> Result<Self> {
        let mut table = Self::new();
        for row in rows {
            table.push(row)?;
        }
        Ok(table)
    }

    /// Append a row, deriving `formatted_study_date`. A second row for the same
    /// study directory is refused.
    pub fn push(&mut self, mut row: StudyRow) -> Result<()> {
        if !self.names.insert(row.study_dir_name.clone()) {
            return Err(DeidError::DuplicateStudy(row.study_dir_name));
        }
        row.derive_columns();
        self.rows.push(row);
        Ok(())
    }

    pub fn rows(&self) -> &[StudyRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, study_dir_name: &str) -> Option<&StudyRow> {
        self.rows.iter().find(|r| r.study_dir_name == study_dir_name)
    }

    /// Rewrite every row through `f` (the anonymous-id join, destination planning).
    /// The result goes through the same uniqueness check as `push`.
    pub fn update_rows(&mut self, f: impl FnOnce(Vec<StudyRow>) -> Vec<StudyRow>) -> Result<()> {
        *self = Self::from_rows(f(self.rows.clone()))?;
        Ok(())
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| DeidError::io(parent, e))?;
        }
        let mut writer = csv::Writer::from_path(path).map_err(|e| DeidError::csv(path, e))?;
        for row in &self.rows {
            writer.serialize(row).map_err(|e| DeidError::csv(path, e))?;
        }
        writer.flush().map_err(|e| DeidError::io(path, e))?;
        info!(path = %path.display(), rows = self.rows.len(), "metadata saved");
        Ok(())
    }

    pub fn read_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| DeidError::csv(path, e))?;
        let rows = reader
            .deserialize::<StudyRow>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| DeidError::csv(path, e))?;
        Self::from_rows(rows)
    }
}

impl<'a> IntoIterator for &'a MetadataTable {
    type Item = &'a StudyRow;
    type IntoIter = std::slice::Iter<'a, StudyRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// Concatenate every metadata CSV in `folder` whose file name contains
/// `name_fragment` (case-insensitive) into `output`. Returns the inputs used.
///
/// Studies from different batches may share a folder name, so rows are
/// appended as-is instead of going through the uniqueness check.
pub fn collate(folder: &Path, name_fragment: &str, output: &Path) -> Result<Vec<PathBuf>> {
    let fragment = name_fragment.to_lowercase();
    let (_, files) = crate::storage::sorted_children(folder)?;
    let inputs: Vec<PathBuf> = files
        .into_iter()
        .filter(|p| p != output)
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| {
                    let n = n.to_lowercase();
                    n.ends_with(".csv") && n.contains(&fragment)
                })
                .unwrap_or(false)
        })
        .collect();

    let mut writer = csv::Writer::from_path(output).map_err(|e| DeidError::csv(output, e))?;
    let mut total = 0;
    for input in &inputs {
        let mut reader = csv::Reader::from_path(input).map_err(|e| DeidError::csv(input, e))?;
        for row in reader.deserialize::<StudyRow>() {
            let row = row.map_err(|e| DeidError::csv(input, e))?;
            writer.serialize(&row).map_err(|e| DeidError::csv(output, e))?;
            total += 1;
        }
    }
    writer.flush().map_err(|e| DeidError::io(output, e))?;
    info!(files = inputs.len(), rows = total, output = %output.display(), "collated metadata");
    Ok(inputs)
}
