//
// anonymize.rs
// Dicom-Deid-rs
//
// In-place scrubbing of every file under each renamed study folder, stopping the batch at the first file it cannot rewrite.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs;
use std::path::{Path, PathBuf};

use dicom::core::{DataElement, Tag, VR};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::DeidConfig;
use crate::dicom_access::open_record;
use crate::error::{DeidError, Result};
use crate::ledger::Ledger;
use crate::models::ScrubReport;
use crate::storage::{is_hidden, is_safe_component, is_temp_file, write_atomically};
use crate::table::MetadataTable;
use crate::walker::{collect, replace, text_value, Record, Replacements};

/// Identity elements written at the top level when a file lacks them.
const TOP_LEVEL_IDENTITY: &[(&str, Tag, VR)] = &[
    ("PatientName", Tag(0x0010, 0x0010), VR::PN),
    ("PatientID", Tag(0x0010, 0x0020), VR::LO),
];

pub fn scrub_record(record: &mut Record, anonymous_id: &str, config: &DeidConfig) -> Replacements {
    let mapping = config.replacements_for(anonymous_id);
    replace(record, &mapping);

    for (keyword, tag, vr) in TOP_LEVEL_IDENTITY {
        if config.identity_keywords.iter().any(|k| k == keyword) && record.element(*tag).is_err() {
            record.put(DataElement::new(*tag, *vr, text_value(anonymous_id)));
        }
    }
    mapping
}

/// Fail if any mapped keyword still holds a value other than its replacement.
pub fn verify_scrubbed(record: &Record, mapping: &Replacements, path: &Path) -> Result<()> {
    for (keyword, expected) in mapping {
        if let Some(value) = collect(record, keyword).into_iter().find(|v| v != expected) {
            return Err(DeidError::Leak {
                path: path.to_path_buf(),
                keyword: keyword.clone(),
                value,
            });
        }
    }
    Ok(())
}

/// Decode, scrub, verify and atomically rewrite one file.
pub fn scrub_file(path: &Path, anonymous_id: &str, config: &DeidConfig) -> Result<()> {
    let mut obj = open_record(path)?;
    let mapping = scrub_record(&mut obj, anonymous_id, config);
    verify_scrubbed(&obj, &mapping, path)?;

    write_atomically(path, |temp| {
        obj.write_to_file(temp).map_err(|e| DeidError::Encode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    })
}

// Sorted. Temp files left by an interrupted rewrite are deleted on the way.
fn study_files(study_dir: &Path, config: &DeidConfig) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(study_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| study_dir.to_path_buf());
            DeidError::io(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        if is_temp_file(&path) {
            warn!(path = %path.display(), "removing temp file left by an interrupted run");
            fs::remove_file(&path).map_err(|e| DeidError::io(&path, e))?;
            continue;
        }
        if is_hidden(&path) {
            debug!(path = %path.display(), "hidden file left untouched");
        } else if config.accepts_file(&path) {
            files.push(path);
        }
    }
    Ok(files)
}

/// Scrub every file of every resolved study under `dest_root`.
///
/// Unresolved rows and missing folders are skipped with a warning. The first
/// file that cannot be decoded, verified or written stops the whole batch and
/// is returned as the error; studies finished before it stay recorded in `ledger`.
pub fn scrub_batch(
    dest_root: &Path,
    table: &MetadataTable,
    config: &DeidConfig,
    ledger: &mut Ledger,
) -> Result<ScrubReport> {
    let mut report = ScrubReport::default();

    for row in table {
        let study = row.study_dir_name.as_str();
        let Some(dir_name) = row.destination_name() else {
            warn!(study = %study, "no anonymous id, study not scrubbed");
            report.unresolved += 1;
            continue;
        };
        if !is_safe_component(&dir_name) {
            warn!(study = %study, "destination name is not a usable folder name, study not scrubbed");
            report.unresolved += 1;
            continue;
        }
        if ledger.is_complete(row) {
            debug!(study = %study, "already scrubbed in a previous run");
            report.resumed += 1;
            continue;
        }

        let study_dir = dest_root.join(&dir_name);
        if !study_dir.is_dir() {
            warn!(path = %study_dir.display(), "directory not found, study not scrubbed");
            report.missing += 1;
            continue;
        }

        let files = study_files(&study_dir, config)?;
        for file in &files {
            if let Err(err) = scrub_file(file, &row.anonymous_id, config) {
                error!(study = %study, path = %file.display(), error = %err, "scrub stopped");
                return Err(err);
            }
            debug!(path = %file.display(), "anonymized");
            report.files += 1;
        }

        ledger.mark_complete(row)?;
        report.studies += 1;
        info!(study = %study, dest = %dir_name, files = files.len(), "study anonymized");
    }

    info!(
        studies = report.studies,
        files = report.files,
        missing = report.missing,
        unresolved = report.unresolved,
        resumed = report.resumed,
        "anonymization finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::value::{DataSetSequence, Value};
    use dicom::core::{Length, PrimitiveValue};

    fn record_with_nested_reference() -> Record {
        let referenced = Record::from_element_iter([DataElement::new(
            Tag(0x0010, 0x0020),
            VR::LO,
            PrimitiveValue::from("MRN999"),
        )]);
        let mut record = Record::new_empty();
        record.put(DataElement::new(
            Tag(0x0010, 0x0020),
            VR::LO,
            PrimitiveValue::from("MRN123"),
        ));
        record.put(DataElement::new(
            Tag(0x0008, 0x0080),
            VR::LO,
            PrimitiveValue::from("General Hospital"),
        )); // InstitutionName
        record.put(DataElement::new(
            Tag(0x0008, 0x1140),
            VR::SQ,
            Value::Sequence(DataSetSequence::new(vec![referenced], Length::UNDEFINED)),
        )); // ReferencedImageSequence, not in the empty list
        record
    }

    #[test]
    fn scrub_record_inserts_missing_patient_name() {
        let mut record = record_with_nested_reference();
        let config = DeidConfig::default();

        let mapping = scrub_record(&mut record, "A7", &config);

        assert_eq!(collect(&record, "PatientID"), vec!["A7", "A7"]);
        assert_eq!(collect(&record, "PatientName"), vec!["A7"]);
        assert_eq!(collect(&record, "InstitutionName"), vec![""]);
        verify_scrubbed(&record, &mapping, Path::new("mem")).expect("clean");
    }

    #[test]
    fn verification_reports_leftover_values() {
        let record = record_with_nested_reference();
        let mapping = DeidConfig::default().replacements_for("A7");

        let err = verify_scrubbed(&record, &mapping, Path::new("mem")).expect_err("leak");
        assert!(matches!(err, DeidError::Leak { .. }));
    }

    #[test]
    fn identity_insertion_follows_config() {
        let mut record = Record::new_empty();
        let config = DeidConfig {
            identity_keywords: vec!["PatientID".into()],
            ..DeidConfig::default()
        };

        scrub_record(&mut record, "A7", &config);

        assert!(record.element(Tag(0x0010, 0x0020)).is_ok());
        assert!(record.element(Tag(0x0010, 0x0010)).is_err());
    }

    #[test]
    fn study_files_drop_stale_temps_and_hidden_files() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let series = dir.path().join("SERIES1");
        fs::create_dir_all(&series).expect("dir");
        fs::write(series.join("IM0001"), b"x").expect("file");
        fs::write(series.join(".DS_Store"), b"x").expect("file");
        fs::write(series.join(".deid-Ab12Cd.tmp"), b"partial").expect("file");

        let files = study_files(dir.path(), &DeidConfig::default()).expect("list");

        assert_eq!(files, vec![series.join("IM0001")]);
        assert!(!series.join(".deid-Ab12Cd.tmp").exists());
        assert!(series.join(".DS_Store").exists());
    }
}
