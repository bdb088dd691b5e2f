use std::path::{Path, PathBuf};

use dicom::core::Tag;
use tracing::{debug, info, warn};

use crate::config::DeidConfig;
use crate::dicom_access::{open_record, ElementAccess};
use crate::error::{DeidError, Result};
use crate::keys::KeyMapping;
use crate::models::{ExtractionReport, StudyRow};
use crate::storage::{is_hidden, sorted_children, subdirectories};
use crate::table::MetadataTable;
use crate::walker::{collect, Record};

const PATIENT_BIRTH_DATE: Tag = Tag(0x0010, 0x0030);
const PATIENT_SEX: Tag = Tag(0x0010, 0x0040);
const PATIENT_SIZE: Tag = Tag(0x0010, 0x1020);
const PATIENT_WEIGHT: Tag = Tag(0x0010, 0x1030);
const STUDY_DATE: Tag = Tag(0x0008, 0x0020);
const STUDY_TIME: Tag = Tag(0x0008, 0x0030);
const DEVICE_SERIAL_NUMBER: Tag = Tag(0x0018, 0x1000);
const STUDY_INSTANCE_UID: Tag = Tag(0x0020, 0x000D);

/// Pick the one file that stands in for a whole study.
///
/// With subdirectories present, the first file of the first subdirectory (by
/// name) is used; otherwise the first file directly inside `study_dir`.
/// Hidden entries are never candidates.
pub fn select_representative_file(study_dir: &Path) -> Result<PathBuf> {
    let not_found = || DeidError::NotFound {
        path: study_dir.to_path_buf(),
    };
    let visible = |paths: Vec<PathBuf>| paths.into_iter().filter(|p| !is_hidden(p));

    let (dirs, files) = sorted_children(study_dir).map_err(|_| not_found())?;
    let mut candidates = match visible(dirs).next() {
        Some(first_dir) => {
            let (_, files) = sorted_children(&first_dir).map_err(|_| not_found())?;
            visible(files)
        }
        None => visible(files),
    };
    candidates.next().ok_or_else(not_found)
}

// Collected values may themselves be multi-valued (backslash separated).
pub fn disambiguate(candidates: &[String], approved: &KeyMapping) -> Option<String> {
    candidates
        .iter()
        .flat_map(|value| value.split('\\'))
        .map(str::trim)
        .find(|candidate| !candidate.is_empty() && approved.contains(candidate))
        .map(str::to_string)
}

/// Builds the metadata table from a tree of study directories.
pub struct MetadataExtractor<'a> {
    config: &'a DeidConfig,
    approved: &'a KeyMapping,
}

impl<'a> MetadataExtractor<'a> {
    pub fn new(config: &'a DeidConfig, approved: &'a KeyMapping) -> Self {
        Self { config, approved }
    }

    pub fn extract_file(&self, file: &Path, study_dir_name: &str) -> Result<StudyRow> {
        let obj = open_record(file)?;
        let record: &Record = &obj;
        let sentinel = self.config.unknown_sentinel.as_str();

        // Only the identifier is searched at every depth; other columns are top level.
        let candidates = collect(record, &self.config.identifier_keyword);
        let original_id = match disambiguate(&candidates, self.approved) {
            Some(id) => id,
            None => {
                warn!(
                    study = %study_dir_name,
                    candidates = candidates.len(),
                    "no approved identifier in representative file"
                );
                sentinel.to_string()
            }
        };

        let mut row = StudyRow {
            study_dir_name: study_dir_name.to_string(),
            original_id,
            date_of_birth: record.date(PATIENT_BIRTH_DATE),
            sex: record.text_or(PATIENT_SEX, sentinel),
            study_date: record.date(STUDY_DATE),
            study_time: record.text_or(STUDY_TIME, sentinel),
            height: record.float(PATIENT_SIZE),
            weight: record.float(PATIENT_WEIGHT),
            scanner_serial: record.integer(DEVICE_SERIAL_NUMBER),
            study_instance_uid: record.text_or(STUDY_INSTANCE_UID, sentinel),
            representative_file_path: file.display().to_string(),
            anonymous_id: String::new(),
            formatted_study_date: String::new(),
            dest_dir_name: String::new(),
        };
        row.derive_columns();
        Ok(row)
    }

    /// One row per immediate subdirectory of `source_root`.
    ///
    /// Empty or undecodable studies are logged and left out; only an unreadable
    /// root fails the whole extraction.
    pub fn extract_tree(&self, source_root: &Path) -> Result<(MetadataTable, ExtractionReport)> {
        let mut table = MetadataTable::new();
        let mut report = ExtractionReport::default();

        for study_path in subdirectories(source_root)? {
            report.studies_seen += 1;
            let study = study_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let file = match select_representative_file(&study_path) {
                Ok(file) => file,
                Err(err) => {
                    warn!(study = %study, error = %err, "skipping study without files");
                    report.skipped_empty += 1;
                    continue;
                }
            };
            debug!(study = %study, file = %file.display(), "representative file");

            let row = match self.extract_file(&file, &study) {
                Ok(row) => row,
                Err(err) => {
                    warn!(study = %study, error = %err, "skipping study with unreadable file");
                    report.skipped_undecodable += 1;
                    continue;
                }
            };
            if row.original_id == self.config.unknown_sentinel {
                report.unknown_identifier += 1;
            }
            table.push(row)?;
        }

        report.rows = table.len();
        info!(
            studies = report.studies_seen,
            rows = report.rows,
            skipped_empty = report.skipped_empty,
            skipped_undecodable = report.skipped_undecodable,
            unknown_identifier = report.unknown_identifier,
            "metadata extraction finished"
        );
        Ok((table, report))
    }
}
