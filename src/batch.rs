//
// batch.rs
// Dicom-Deid-rs
//
// Runs the stages in order: extract every study, join anonymous ids, mirror, rename, then scrub.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::anonymize::scrub_batch;
use crate::config::DeidConfig;
use crate::error::DeidError;
use crate::keys::{resolve, KeyMapping};
use crate::ledger::{Ledger, DEFAULT_LEDGER_NAME};
use crate::metadata::MetadataExtractor;
use crate::models::{ExtractionReport, RenameReport, ScrubReport};
use crate::restructure::{assign_destination_names, mirror, rename_studies};
use crate::table::MetadataTable;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub source_root: PathBuf,
    pub dest_root: PathBuf,
    pub keys_path: PathBuf,
    /// Where the metadata table is saved before anything is renamed.
    pub metadata_path: Option<PathBuf>,
    /// Copy the source tree first. Off when the destination was filled some other way (e.g. unzip).
    pub mirror: bool,
    pub ledger: LedgerChoice,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerChoice {
    /// `<dest>/.deid-ledger.json`
    Default,
    At(PathBuf),
    Disabled,
}

impl LedgerChoice {
    pub fn open(&self, dest_root: &Path) -> Result<Ledger> {
        let ledger = match self {
            LedgerChoice::Default => Ledger::open(&dest_root.join(DEFAULT_LEDGER_NAME))?,
            LedgerChoice::At(path) => Ledger::open(path)?,
            LedgerChoice::Disabled => Ledger::in_memory(),
        };
        Ok(ledger)
    }
}

#[derive(Debug)]
pub struct PipelineOutcome {
    pub table: MetadataTable,
    pub extraction: Option<ExtractionReport>,
    pub rename: RenameReport,
    pub scrub: std::result::Result<ScrubReport, DeidError>,
}

impl PipelineOutcome {
    /// Scrub finished and no study folder was left un-renamed because of a conflict.
    pub fn success(&self) -> bool {
        self.scrub.is_ok() && self.rename.conflicts.is_empty()
    }
}

/// Full run from a raw source tree.
pub fn run_pipeline(options: &PipelineOptions, config: &DeidConfig) -> Result<PipelineOutcome> {
    let keys = KeyMapping::from_csv(&options.keys_path)
        .with_context(|| format!("Failed to load keys from {:?}", options.keys_path))?;

    let (mut table, extraction) = MetadataExtractor::new(config, &keys)
        .extract_tree(&options.source_root)
        .with_context(|| format!("Failed to read source tree {:?}", options.source_root))?;

    table.update_rows(|rows| assign_destination_names(resolve(rows, &keys, config)))?;

    if let Some(path) = &options.metadata_path {
        table
            .write_csv(path)
            .with_context(|| format!("Failed to save metadata to {:?}", path))?;
    }

    if options.mirror {
        mirror(&options.source_root, &options.dest_root, &table)
            .context("Failed to copy source tree")?;
    }

    let mut outcome = restructure_and_scrub(table, &options.dest_root, &options.ledger, config)?;
    outcome.extraction = Some(extraction);
    Ok(outcome)
}

/// Rename and scrub from an existing metadata table (e.g. to resume a failed run).
pub fn run_from_table(
    metadata_path: &Path,
    dest_root: &Path,
    ledger: &LedgerChoice,
    config: &DeidConfig,
) -> Result<PipelineOutcome> {
    let mut table = MetadataTable::read_csv(metadata_path)
        .with_context(|| format!("Failed to read metadata from {:?}", metadata_path))?;
    if table.rows().iter().any(|r| r.is_resolved() && r.dest_dir_name.is_empty()) {
        table.update_rows(assign_destination_names)?;
    }
    restructure_and_scrub(table, dest_root, ledger, config)
}

fn restructure_and_scrub(
    table: MetadataTable,
    dest_root: &Path,
    ledger: &LedgerChoice,
    config: &DeidConfig,
) -> Result<PipelineOutcome> {
    let rename = rename_studies(dest_root, &table);

    let mut ledger = ledger.open(dest_root).context("Failed to open completion ledger")?;
    let scrub = scrub_batch(dest_root, &table, config, &mut ledger);

    info!(
        rows = table.len(),
        conflicts = rename.conflicts.len(),
        scrub_ok = scrub.is_ok(),
        "batch finished"
    );
    Ok(PipelineOutcome {
        table,
        extraction: None,
        rename,
        scrub,
    })
}
