//
// keys.rs
// Dicom-Deid-rs
//
// Approved identifier mapping: CSV loading, the left join onto the metadata table, and simple key generation.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::archive::{is_zip, unpack_to_temp};
use crate::config::DeidConfig;
use crate::dicom_access::open_record;
use crate::error::{DeidError, Result};
use crate::models::{KeyEntry, StudyRow};
use crate::storage::is_hidden;
use crate::walker::top_level;

/// Original identifier -> anonymous identifier. Read-only once loaded; its key
/// set doubles as the set of approved original identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyMapping {
    entries: BTreeMap<String, String>,
}

impl KeyMapping {
    /// Build a mapping, refusing an original id that maps to two different anonymous ids.
    pub fn from_entries(entries: impl IntoIterator<Item = KeyEntry>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for entry in entries {
            let original = entry.original_id.trim().to_string();
            let anonymous = entry.anonymous_id.trim().to_string();
            if original.is_empty() {
                continue;
            }
            match map.entry(original) {
                Entry::Vacant(slot) => {
                    slot.insert(anonymous);
                }
                Entry::Occupied(slot) => {
                    if *slot.get() != anonymous {
                        return Err(DeidError::ConflictingKey {
                            original_id: slot.key().clone(),
                            first: slot.get().clone(),
                            second: anonymous,
                        });
                    }
                }
            }
        }
        Ok(Self { entries: map })
    }

    pub fn from_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| DeidError::csv(path, e))?;
        let entries = reader
            .deserialize::<KeyEntry>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| DeidError::csv(path, e))?;
        let mapping = Self::from_entries(entries)?;
        info!(path = %path.display(), keys = mapping.len(), "loaded key mapping");
        Ok(mapping)
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path).map_err(|e| DeidError::csv(path, e))?;
        for entry in self.entries() {
            writer.serialize(entry).map_err(|e| DeidError::csv(path, e))?;
        }
        writer.flush().map_err(|e| DeidError::io(path, e))
    }

    pub fn contains(&self, original_id: &str) -> bool {
        self.entries.contains_key(original_id)
    }

    pub fn anonymous_id(&self, original_id: &str) -> Option<&str> {
        self.entries.get(original_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = KeyEntry> + '_ {
        self.entries.iter().map(|(original, anonymous)| KeyEntry {
            original_id: original.clone(),
            anonymous_id: anonymous.clone(),
        })
    }
}

/// Left join on `original_id`. Unmatched rows (including the unknown sentinel)
/// come back with an empty `anonymous_id`, which later stages treat as "do not process".
pub fn resolve(rows: Vec<StudyRow>, keys: &KeyMapping, config: &DeidConfig) -> Vec<StudyRow> {
    rows.into_iter()
        .map(|mut row| {
            row.anonymous_id = if row.original_id == config.unknown_sentinel {
                String::new()
            } else {
                keys.anonymous_id(&row.original_id)
                    .unwrap_or_default()
                    .to_string()
            };
            if !row.is_resolved() {
                warn!(
                    study = %row.study_dir_name,
                    original_id = %row.original_id,
                    "no anonymous id for study"
                );
            }
            row
        })
        .collect()
}

/// Assign `A1`, `A2`, ... to each distinct identifier found under `root`, in
/// sorted walk order. Files that do not decode are skipped.
///
/// A `.zip` archive stands for one patient named by its stem: it is unpacked
/// to a temp directory and its id counts only if some file inside carries
/// exactly that id.
pub fn generate_keys(root: &Path, config: &DeidConfig) -> Result<KeyMapping> {
    let mut seen: Vec<String> = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            DeidError::io(path, e.into())
        })?;
        let path = entry.path();
        if !entry.file_type().is_file() || is_hidden(path) {
            continue;
        }

        let found = if is_zip(path) {
            archive_identifier(path, config)
        } else if config.accepts_file(path) {
            file_identifier(path, config)
        } else {
            continue;
        };
        match found {
            Some(id) if !seen.contains(&id) => seen.push(id),
            Some(_) => {}
            None => debug!(path = %path.display(), "no identifier found"),
        }
    }

    KeyMapping::from_entries(seen.into_iter().enumerate().map(|(idx, id)| KeyEntry {
        original_id: id,
        anonymous_id: format!("A{}", idx + 1),
    }))
}

fn file_identifier(path: &Path, config: &DeidConfig) -> Option<String> {
    match open_record(path) {
        Ok(obj) => top_level(&obj, &config.identifier_keyword).filter(|id| !id.is_empty()),
        Err(err) => {
            debug!(error = %err, "skipping undecodable file");
            None
        }
    }
}

fn archive_identifier(archive: &Path, config: &DeidConfig) -> Option<String> {
    let expected = archive.file_stem()?.to_string_lossy().into_owned();
    let unpacked = match unpack_to_temp(archive) {
        Ok(dir) => dir,
        Err(err) => {
            warn!(error = %err, "skipping unreadable archive");
            return None;
        }
    };

    WalkDir::new(unpacked.path())
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| file_identifier(e.path(), config))
        .find(|id| *id == expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(original: &str, anonymous: &str) -> KeyEntry {
        KeyEntry {
            original_id: original.into(),
            anonymous_id: anonymous.into(),
        }
    }

    fn row(dir: &str, original: &str) -> StudyRow {
        StudyRow {
            study_dir_name: dir.into(),
            original_id: original.into(),
            date_of_birth: None,
            sex: "F".into(),
            study_date: None,
            study_time: "101500".into(),
            height: None,
            weight: None,
            scanner_serial: None,
            study_instance_uid: "1.2.3".into(),
            representative_file_path: format!("{dir}/img.dcm"),
            anonymous_id: String::new(),
            formatted_study_date: String::new(),
            dest_dir_name: String::new(),
        }
    }

    #[test]
    fn conflicting_duplicate_keys_are_rejected() {
        let err = KeyMapping::from_entries(vec![entry("MRN1", "A1"), entry("MRN1", "A2")])
            .expect_err("conflict");
        assert!(matches!(err, DeidError::ConflictingKey { .. }));

        let ok = KeyMapping::from_entries(vec![entry("MRN1", "A1"), entry("MRN1", "A1")])
            .expect("exact duplicate");
        assert_eq!(ok.len(), 1);
    }

    #[test]
    fn resolve_is_a_left_join() {
        let keys = KeyMapping::from_entries(vec![entry("MRN123", "A7")]).expect("keys");
        let config = DeidConfig::default();
        let rows = resolve(
            vec![
                row("STUDY01", "MRN123"),
                row("STUDY02", "MRN404"),
                row("STUDY03", &config.unknown_sentinel),
            ],
            &keys,
            &config,
        );

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].anonymous_id, "A7");
        assert!(rows[1].anonymous_id.is_empty());
        assert!(rows[2].anonymous_id.is_empty());
    }

    #[test]
    fn sentinel_never_joins_even_if_listed() {
        let config = DeidConfig::default();
        let keys = KeyMapping::from_entries(vec![entry(&config.unknown_sentinel, "A1")])
            .expect("keys");
        let rows = resolve(vec![row("S", &config.unknown_sentinel)], &keys, &config);
        assert!(!rows[0].is_resolved());
    }

    #[test]
    fn csv_accepts_both_header_styles() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let mrn_style = dir.path().join("keys.csv");
        std::fs::write(&mrn_style, "mrn,AnonID\nMRN123,A7\n").expect("write");
        let simple_style = dir.path().join("simple.csv");
        std::fs::write(&simple_style, "PatientID,AnonID\nMRN9, A9 \n").expect("write");

        let keys = KeyMapping::from_csv(&mrn_style).expect("load");
        assert_eq!(keys.anonymous_id("MRN123"), Some("A7"));
        let keys = KeyMapping::from_csv(&simple_style).expect("load");
        assert_eq!(keys.anonymous_id("MRN9"), Some("A9"));
    }
}
