//
// models.rs
// Dicom-Deid-rs
//
// Serializable rows and stage reports: one StudyRow per source study, one KeyEntry per approved identifier.
//
// Thales Matheus Mendonça Santos - November 2025

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::dicom_access::format_da;

/// One row of the metadata table, one per source study directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyRow {
    pub study_dir_name: String,
    /// Disambiguated original identifier, or the unknown sentinel.
    pub original_id: String,
    pub date_of_birth: Option<NaiveDate>,
    pub sex: String,
    pub study_date: Option<NaiveDate>,
    pub study_time: String,
    pub height: Option<f64>,
    pub weight: Option<f64>,
    pub scanner_serial: Option<i64>,
    pub study_instance_uid: String,
    pub representative_file_path: String,
    #[serde(default)]
    pub anonymous_id: String,
    #[serde(default)]
    pub formatted_study_date: String,
    /// Final folder name under the destination root, planned once per table.
    #[serde(default)]
    pub dest_dir_name: String,
}

impl StudyRow {
    /// Refresh the derived date column after `study_date` changes.
    pub fn derive_columns(&mut self) {
        self.formatted_study_date = format_da(self.study_date);
    }

    /// Rows without an anonymous id must not be renamed or scrubbed.
    pub fn is_resolved(&self) -> bool {
        !self.anonymous_id.trim().is_empty()
    }

    /// `{anonymous_id}_{formatted_study_date}` before collision handling.
    pub fn base_dir_name(&self) -> String {
        format!("{}_{}", self.anonymous_id, self.formatted_study_date)
    }

    /// Planned destination name, falling back to the base name for tables
    /// written before destinations were assigned. `None` for unresolved rows.
    pub fn destination_name(&self) -> Option<String> {
        if !self.is_resolved() {
            None
        } else if self.dest_dir_name.is_empty() {
            Some(self.base_dir_name())
        } else {
            Some(self.dest_dir_name.clone())
        }
    }
}

/// One approved identifier and its replacement, as stored in the key CSV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEntry {
    #[serde(rename = "mrn", alias = "PatientID", alias = "original_id")]
    pub original_id: String,
    #[serde(rename = "AnonID", alias = "anonymous_id")]
    pub anonymous_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionReport {
    pub studies_seen: usize,
    pub rows: usize,
    pub skipped_empty: usize,
    pub skipped_undecodable: usize,
    pub unknown_identifier: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenameReport {
    pub renamed: usize,
    pub missing: usize,
    pub unresolved: usize,
    pub conflicts: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScrubReport {
    pub studies: usize,
    pub files: usize,
    pub missing: usize,
    pub unresolved: usize,
    /// Studies skipped because the ledger already marks them complete.
    pub resumed: usize,
}
