//
// config.rs
// Dicom-Deid-rs
//
// Explicit configuration handed to every stage: which keywords are scrubbed, which carry identity, which files are touched.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DeidError, Result};

/// Value written to `original_id` (and text columns) when nothing usable was found.
pub const UNKNOWN: &str = "UNKNOWN";

const DEFAULT_EMPTY_KEYWORDS: &[&str] = &[
    "PatientName",
    "PatientBirthDate",
    "PatientID",
    "PhysicianOfRecord",
    "PhysiciansOfRecord",
    "RequestingPhysician",
    "PerformingPhysicianName",
    "OperatorName",
    "OperatorsName",
    "InstitutionAddress",
    "ReferringPhysicianName",
    "OtherPatientIDs",
    "ReferencedStudySequence",
    "StudyID",
    "PatientTelephoneNumber",
    "InstitutionName",
];

const DEFAULT_IDENTITY_KEYWORDS: &[&str] = &["PatientName", "PatientID"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeidConfig {
    /// Keywords blanked at every depth of every scrubbed file.
    pub empty_keywords: Vec<String>,
    /// Keywords overwritten with the anonymous id. Wins over `empty_keywords`.
    pub identity_keywords: Vec<String>,
    /// Keyword searched recursively to find the original identifier.
    pub identifier_keyword: String,
    /// Lower-case extensions (without dot) eligible for scrubbing; empty means every file.
    pub file_extensions: Vec<String>,
    pub unknown_sentinel: String,
}

impl Default for DeidConfig {
    fn default() -> Self {
        Self {
            empty_keywords: DEFAULT_EMPTY_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            identity_keywords: DEFAULT_IDENTITY_KEYWORDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            identifier_keyword: "PatientID".to_string(),
            file_extensions: Vec::new(),
            unknown_sentinel: UNKNOWN.to_string(),
        }
    }
}

impl DeidConfig {
    /// Load overrides from a JSON file; missing keys keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| DeidError::io(path, e))?;
        let config: DeidConfig =
            serde_json::from_reader(file).map_err(|e| DeidError::Config {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if self.identifier_keyword.trim().is_empty() {
            return Err(DeidError::Config {
                path: path.to_path_buf(),
                reason: "identifier_keyword must not be empty".to_string(),
            });
        }
        if self.identity_keywords.is_empty() {
            return Err(DeidError::Config {
                path: path.to_path_buf(),
                reason: "at least one identity keyword is required".to_string(),
            });
        }
        Ok(())
    }

    /// Keyword -> replacement value used when scrubbing one study.
    pub fn replacements_for(&self, anonymous_id: &str) -> BTreeMap<String, String> {
        let mut mapping: BTreeMap<String, String> = self
            .empty_keywords
            .iter()
            .map(|k| (k.clone(), String::new()))
            .collect();
        for keyword in &self.identity_keywords {
            mapping.insert(keyword.clone(), anonymous_id.to_string());
        }
        mapping
    }

    pub fn accepts_file(&self, path: &Path) -> bool {
        if self.file_extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                self.file_extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }
}
