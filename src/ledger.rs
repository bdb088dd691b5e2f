//
// ledger.rs
// Dicom-Deid-rs
//
// Per-study completion ledger so an interrupted or failed scrub can resume without redoing finished studies.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DeidError, Result};
use crate::models::StudyRow;
use crate::storage::write_atomically;

pub const DEFAULT_LEDGER_NAME: &str = ".deid-ledger.json";

/// Identity of one finished study. A folder name alone is not enough: a later
/// batch can reuse it for a different study written to the same destination.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub study_dir_name: String,
    pub dest_dir_name: String,
    pub study_instance_uid: String,
}

impl LedgerEntry {
    pub fn for_row(row: &StudyRow) -> Self {
        Self {
            study_dir_name: row.study_dir_name.clone(),
            dest_dir_name: row.destination_name().unwrap_or_default(),
            study_instance_uid: row.study_instance_uid.clone(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    completed: BTreeSet<LedgerEntry>,
}

/// Studies whose files are all scrubbed. Persisted after every change, so the
/// file on disk never lags behind a finished study.
#[derive(Debug)]
pub struct Ledger {
    path: Option<PathBuf>,
    state: LedgerFile,
}

impl Ledger {
    /// Open (or start) the ledger stored at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let state = if path.exists() {
            let file = File::open(path).map_err(|e| DeidError::io(path, e))?;
            serde_json::from_reader(file).map_err(|source| DeidError::Ledger {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            LedgerFile::default()
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            state,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: LedgerFile::default(),
        }
    }

    // Source folder, destination folder and study uid must all match.
    pub fn is_complete(&self, row: &StudyRow) -> bool {
        self.state.completed.contains(&LedgerEntry::for_row(row))
    }

    pub fn completed(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.state.completed.iter()
    }

    pub fn mark_complete(&mut self, row: &StudyRow) -> Result<()> {
        if self.state.completed.insert(LedgerEntry::for_row(row)) {
            self.persist()?;
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_vec_pretty(&self.state).map_err(|source| DeidError::Ledger {
            path: path.clone(),
            source,
        })?;
        write_atomically::<DeidError>(path, |temp| {
            fs::write(temp, &json).map_err(|e| DeidError::io(temp, e))
        })
    }
}
