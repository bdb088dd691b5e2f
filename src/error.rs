//
// error.rs
// Dicom-Deid-rs
//
// Error taxonomy shared by the extraction, restructuring and scrubbing stages.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by the de-identification stages.
///
/// Which variants are fatal depends on the stage: `NotFound` and `Decode` only
/// skip a study during extraction, while `Decode`/`Encode` abort a scrub batch.
#[derive(Error, Debug)]
pub enum DeidError {
    #[error("no file found in study directory {path:?}")]
    NotFound { path: PathBuf },

    #[error("failed to decode DICOM file {path:?}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("failed to encode DICOM file {path:?}: {reason}")]
    Encode { path: PathBuf, reason: String },

    #[error("identifying value left in {path:?}: {keyword} = {value:?}")]
    Leak {
        path: PathBuf,
        keyword: String,
        value: String,
    },

    #[error("cannot rename {from:?}: destination {to:?} already exists")]
    RenameConflict { from: PathBuf, to: PathBuf },

    #[error("{value:?} is not usable as a directory name (study {study})")]
    UnsafeName { study: String, value: String },

    #[error("study directory {0:?} appears more than once in the metadata table")]
    DuplicateStudy(String),

    #[error("original id {original_id:?} maps to both {first:?} and {second:?}")]
    ConflictingKey {
        original_id: String,
        first: String,
        second: String,
    },

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("ledger error in {path:?}: {source}")]
    Ledger {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("archive error in {path:?}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("invalid configuration {path:?}: {reason}")]
    Config { path: PathBuf, reason: String },
}

impl DeidError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DeidError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        DeidError::Csv {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, DeidError>;
