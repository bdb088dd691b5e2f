//
// restructure.rs
// Dicom-Deid-rs
//
// Copies the source tree into the destination (merge semantics) and renames study folders to their anonymous names.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::error::{DeidError, Result};
use crate::models::{RenameReport, StudyRow};
use crate::storage::{is_safe_component, subdirectories};
use crate::table::MetadataTable;

/// Copy every subdirectory of `source_root` into `dest_root`, creating it if needed.
///
/// Existing directories are merged and existing files overwritten, so running
/// twice leaves the same tree as running once. A study whose planned
/// destination in `table` already exists was restructured by an earlier run
/// and is not copied back in. Returns the number of files copied.
pub fn mirror(source_root: &Path, dest_root: &Path, table: &MetadataTable) -> Result<usize> {
    fs::create_dir_all(dest_root).map_err(|e| DeidError::io(dest_root, e))?;
    let mut copied = 0;

    for study in subdirectories(source_root)? {
        let name = study
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(done) = already_restructured(dest_root, table, &name) {
            info!(study = %name, dest = %done, "already restructured, not copied again");
            continue;
        }

        for entry in WalkDir::new(&study).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| study.clone());
                DeidError::io(path, e.into())
            })?;
            let Ok(relative) = entry.path().strip_prefix(source_root) else {
                continue;
            };
            let target = dest_root.join(relative);

            if entry.file_type().is_dir() {
                fs::create_dir_all(&target).map_err(|e| DeidError::io(&target, e))?;
            } else if entry.file_type().is_file() {
                fs::copy(entry.path(), &target).map_err(|e| DeidError::io(&target, e))?;
                copied += 1;
            }
        }
        debug!(study = %study.display(), "mirrored");
    }

    info!(
        source = %source_root.display(),
        dest = %dest_root.display(),
        files = copied,
        "source tree mirrored"
    );
    Ok(copied)
}

fn already_restructured(dest_root: &Path, table: &MetadataTable, study: &str) -> Option<String> {
    table
        .get(study)
        .and_then(StudyRow::destination_name)
        .filter(|dest| dest != study && is_safe_component(dest) && dest_root.join(dest).is_dir())
}

// First row (table order) keeps `{anonymous_id}_{date}`; later collisions get `_2`, `_3`, ...
pub fn assign_destination_names(rows: Vec<StudyRow>) -> Vec<StudyRow> {
    let mut used: HashSet<String> = HashSet::new();
    rows.into_iter()
        .map(|mut row| {
            row.dest_dir_name.clear();
            if !row.is_resolved() {
                return row;
            }
            let base = row.base_dir_name();
            if !is_safe_component(&base) {
                warn!(study = %row.study_dir_name, "anonymous id is not a usable folder name");
                return row;
            }
            let mut candidate = base.clone();
            let mut n = 2;
            while !used.insert(candidate.clone()) {
                candidate = format!("{base}_{n}");
                n += 1;
            }
            if candidate != base {
                warn!(
                    study = %row.study_dir_name,
                    dest = %candidate,
                    "destination name collides with another study, suffix added"
                );
            }
            row.dest_dir_name = candidate;
            row
        })
        .collect()
}

/// Rename each resolved study folder under `dest_root` to its destination name.
///
/// Missing folders and unresolved rows are skipped with a warning. A
/// destination that already exists is never merged into: the row is recorded
/// as a conflict and left in place.
pub fn rename_studies(dest_root: &Path, table: &MetadataTable) -> RenameReport {
    let mut report = RenameReport::default();

    for row in table {
        let Some(new_name) = row.destination_name() else {
            warn!(study = %row.study_dir_name, "no anonymous id, folder not renamed");
            report.unresolved += 1;
            continue;
        };
        if !is_safe_component(&new_name) || !is_safe_component(&row.study_dir_name) {
            let err = DeidError::UnsafeName {
                study: row.study_dir_name.clone(),
                value: new_name,
            };
            warn!(error = %err, "folder not renamed");
            report.unresolved += 1;
            continue;
        }

        let from = dest_root.join(&row.study_dir_name);
        let to = dest_root.join(&new_name);
        if from == to {
            continue;
        }
        if !from.is_dir() {
            warn!(path = %from.display(), "directory not found for renaming");
            report.missing += 1;
            continue;
        }
        if to.exists() {
            let err = DeidError::RenameConflict { from, to };
            error!(study = %row.study_dir_name, error = %err, "rename refused");
            report.conflicts.push(err.to_string());
            continue;
        }

        match fs::rename(&from, &to) {
            Ok(()) => {
                debug!(study = %row.study_dir_name, dest = %new_name, "renamed");
                report.renamed += 1;
            }
            Err(e) => {
                let err = DeidError::io(&from, e);
                error!(study = %row.study_dir_name, error = %err, "rename failed");
                report.conflicts.push(err.to_string());
            }
        }
    }

    info!(
        renamed = report.renamed,
        missing = report.missing,
        unresolved = report.unresolved,
        conflicts = report.conflicts.len(),
        "study folders renamed"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn row(dir: &str, anon: &str, date: Option<NaiveDate>) -> StudyRow {
        let mut row = StudyRow {
            study_dir_name: dir.into(),
            original_id: "MRN".into(),
            date_of_birth: None,
            sex: "F".into(),
            study_date: date,
            study_time: "0900".into(),
            height: None,
            weight: None,
            scanner_serial: None,
            study_instance_uid: "1.2".into(),
            representative_file_path: String::new(),
            anonymous_id: anon.into(),
            formatted_study_date: String::new(),
            dest_dir_name: String::new(),
        };
        row.derive_columns();
        row
    }

    fn jan15() -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(2024, 1, 15)
    }

    fn seed_source(root: &Path) {
        fs::create_dir_all(root.join("STUDY01").join("SERIES1")).unwrap();
        fs::write(root.join("STUDY01").join("SERIES1").join("IM1"), b"one").unwrap();
        fs::create_dir_all(root.join("STUDY02")).unwrap();
        fs::write(root.join("STUDY02").join("IM2"), b"two").unwrap();
        fs::write(root.join("loose.zip"), b"zip").unwrap();
    }

    fn snapshot(root: &Path) -> Vec<(String, Vec<u8>)> {
        WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| {
                let rel = e.path().strip_prefix(root).unwrap().display().to_string();
                let bytes = if e.file_type().is_file() {
                    fs::read(e.path()).unwrap()
                } else {
                    Vec::new()
                };
                (rel, bytes)
            })
            .collect()
    }

    #[test]
    fn mirror_is_idempotent() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        seed_source(src.path());
        let dest_root = dst.path().join("anon");

        let table = MetadataTable::new();
        assert_eq!(mirror(src.path(), &dest_root, &table).expect("first"), 2);
        let once = snapshot(&dest_root);
        mirror(src.path(), &dest_root, &table).expect("second");
        assert_eq!(snapshot(&dest_root), once);
        assert!(!dest_root.join("loose.zip").exists());
        assert_eq!(
            fs::read(dest_root.join("STUDY01").join("SERIES1").join("IM1")).unwrap(),
            b"one"
        );
    }

    #[test]
    fn mirror_skips_studies_already_renamed() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        seed_source(src.path());
        let table = MetadataTable::from_rows(assign_destination_names(vec![
            row("STUDY01", "A7", jan15()),
            row("STUDY02", "A8", jan15()),
        ]))
        .unwrap();
        fs::create_dir_all(dst.path().join("A7_20240115")).unwrap();

        assert_eq!(mirror(src.path(), dst.path(), &table).expect("mirror"), 1);
        assert!(!dst.path().join("STUDY01").exists());
        assert!(dst.path().join("STUDY02").join("IM2").exists());
    }

    #[test]
    fn colliding_destinations_get_suffixes() {
        let rows = assign_destination_names(vec![
            row("S1", "A7", jan15()),
            row("S2", "A7", jan15()),
            row("S3", "", jan15()),
            row("S4", "A7", jan15()),
            row("S5", "A8", None),
        ]);
        let names: Vec<_> = rows.iter().map(|r| r.dest_dir_name.as_str()).collect();
        assert_eq!(names, vec!["A7_20240115", "A7_20240115_2", "", "A7_20240115_3", "A8_"]);
    }

    #[test]
    fn unsafe_anonymous_id_gets_no_destination() {
        let rows = assign_destination_names(vec![row("S1", "../A7", jan15())]);
        assert!(rows[0].dest_dir_name.is_empty());

        let dst = tempdir().unwrap();
        fs::create_dir_all(dst.path().join("S1")).unwrap();
        let table = MetadataTable::from_rows(rows).unwrap();
        let report = rename_studies(dst.path(), &table);
        assert_eq!(report.unresolved, 1);
        assert!(dst.path().join("S1").is_dir());
    }

    #[test]
    fn rename_skips_missing_and_unresolved() {
        let dst = tempdir().unwrap();
        fs::create_dir_all(dst.path().join("STUDY01")).unwrap();
        fs::create_dir_all(dst.path().join("STUDY03")).unwrap();
        let table = MetadataTable::from_rows(assign_destination_names(vec![
            row("STUDY01", "A7", jan15()),
            row("STUDY02", "A8", jan15()),
            row("STUDY03", "", jan15()),
        ]))
        .unwrap();

        let report = rename_studies(dst.path(), &table);

        assert_eq!(report.renamed, 1);
        assert_eq!(report.missing, 1);
        assert_eq!(report.unresolved, 1);
        assert!(report.conflicts.is_empty());
        assert!(dst.path().join("A7_20240115").is_dir());
        assert!(dst.path().join("STUDY03").is_dir());
    }

    #[test]
    fn existing_destination_is_a_conflict_not_a_merge() {
        let dst = tempdir().unwrap();
        fs::create_dir_all(dst.path().join("STUDY01")).unwrap();
        fs::write(dst.path().join("STUDY01").join("IM1"), b"new").unwrap();
        fs::create_dir_all(dst.path().join("A7_20240115")).unwrap();
        fs::write(dst.path().join("A7_20240115").join("IM1"), b"old").unwrap();
        let table =
            MetadataTable::from_rows(assign_destination_names(vec![row("STUDY01", "A7", jan15())]))
                .unwrap();

        let report = rename_studies(dst.path(), &table);

        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.renamed, 0);
        assert_eq!(fs::read(dst.path().join("A7_20240115").join("IM1")).unwrap(), b"old");
        assert!(dst.path().join("STUDY01").is_dir());
    }
}
