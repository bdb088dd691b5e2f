//
// cli.rs
// Dicom-Deid-rs
//
// Defines the CLI surface with Clap and dispatches user-selected commands to the corresponding modules.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::batch::{self, LedgerChoice, PipelineOptions, PipelineOutcome};
use crate::config::DeidConfig;
use crate::keys::{self, KeyMapping};
use crate::metadata::MetadataExtractor;
use crate::restructure::assign_destination_names;
use crate::{archive, dicom_access, table, walker};

#[derive(Parser)]
#[command(name = "dicom-deid")]
#[command(about = "De-identify DICOM study folders against an approved key list", long_about = None)]
pub struct Cli {
    /// JSON file overriding the scrub keyword lists and file filter
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Only touch files with these extensions (repeatable, e.g. --ext dcm --ext ima)
    #[arg(long = "ext", global = true)]
    pub extensions: Vec<String>,
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract metadata, rename study folders and scrub every file
    Run {
        source: PathBuf,
        dest: PathBuf,
        /// CSV with columns mrn,AnonID
        keys: PathBuf,
        /// Where to save the metadata table
        #[arg(short, long)]
        metadata: Option<PathBuf>,
        /// Destination is already populated (e.g. by `unzip`); do not copy the source
        #[arg(long)]
        no_mirror: bool,
        #[command(flatten)]
        ledger_args: LedgerArgs,
    },
    /// Only build the metadata table
    Extract {
        source: PathBuf,
        keys: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Rename and scrub using a previously saved metadata table
    Anonymize {
        metadata: PathBuf,
        dest: PathBuf,
        #[command(flatten)]
        ledger_args: LedgerArgs,
    },
    /// Extract every zip archive of a folder into its own subdirectory
    Unzip { source: PathBuf, dest: PathBuf },
    /// Pack every subdirectory of a folder into a sibling zip archive
    Rezip { folder: PathBuf },
    /// Assign A1, A2, ... to every patient id found under a folder (zip archives included)
    Keys {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Concatenate metadata CSVs whose name contains a fragment
    Collate {
        folder: PathBuf,
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print every occurrence of a keyword, at any depth, in one file
    Find {
        file: PathBuf,
        #[arg(short, long, default_value = "PatientID")]
        keyword: String,
    },
}

#[derive(Args, Debug, Clone)]
pub struct LedgerArgs {
    /// Completion ledger location (default: <dest>/.deid-ledger.json)
    #[arg(long, conflicts_with = "no_ledger")]
    pub ledger: Option<PathBuf>,
    /// Do not record or honour completed studies
    #[arg(long)]
    pub no_ledger: bool,
}

impl From<LedgerArgs> for LedgerChoice {
    fn from(args: LedgerArgs) -> Self {
        match (args.ledger, args.no_ledger) {
            (_, true) => LedgerChoice::Disabled,
            (Some(path), false) => LedgerChoice::At(path),
            (None, false) => LedgerChoice::Default,
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn load_config(cli: &Cli) -> anyhow::Result<DeidConfig> {
    let mut config = match &cli.config {
        Some(path) => DeidConfig::from_json_file(path)?,
        None => DeidConfig::default(),
    };
    if !cli.extensions.is_empty() {
        config.file_extensions = cli
            .extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .collect();
    }
    Ok(config)
}

pub fn run() -> anyhow::Result<ExitCode> {
    // Parse the raw CLI arguments once and dispatch to a subcommand handler.
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Run {
            source,
            dest,
            keys,
            metadata,
            no_mirror,
            ledger_args,
        } => {
            let options = PipelineOptions {
                source_root: source,
                dest_root: dest,
                keys_path: keys,
                metadata_path: metadata,
                mirror: !no_mirror,
                ledger: ledger_args.into(),
            };
            let outcome = batch::run_pipeline(&options, &config)?;
            Ok(report(&outcome))
        }
        Commands::Extract {
            source,
            keys,
            output,
        } => {
            let keys = KeyMapping::from_csv(&keys)?;
            let (mut table, extraction) =
                MetadataExtractor::new(&config, &keys).extract_tree(&source)?;
            table.update_rows(|rows| {
                assign_destination_names(keys::resolve(rows, &keys, &config))
            })?;
            table.write_csv(&output)?;
            println!(
                "Metadata saved to {:?} ({} rows, {} with unknown identifier)",
                output, extraction.rows, extraction.unknown_identifier
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Anonymize {
            metadata,
            dest,
            ledger_args,
        } => {
            let ledger = LedgerChoice::from(ledger_args);
            let outcome = batch::run_from_table(&metadata, &dest, &ledger, &config)?;
            Ok(report(&outcome))
        }
        Commands::Unzip { source, dest } => {
            let written = archive::extract_all(&source, &dest)?;
            println!("Extracted {} archive(s) into {:?}", written.len(), dest);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Rezip { folder } => {
            let written = archive::rezip_folders(&folder)?;
            println!("Wrote {} archive(s) in {:?}", written.len(), folder);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Keys { input, output } => {
            let mapping = keys::generate_keys(&input, &config)?;
            mapping.write_csv(&output)?;
            println!("Wrote {} key(s) to {:?}", mapping.len(), output);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Collate {
            folder,
            name,
            output,
        } => {
            let used = table::collate(&folder, &name, &output)?;
            println!("Collated {} file(s) into {:?}", used.len(), output);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Find { file, keyword } => {
            let obj = dicom_access::open_record(&file)
                .with_context(|| format!("Failed to open {:?}", file))?;
            let values = walker::collect(&obj, &keyword);
            println!("{} occurrence(s) of {} in {:?}", values.len(), keyword, file);
            for value in values {
                println!("  {}", value);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn report(outcome: &PipelineOutcome) -> ExitCode {
    if let Some(extraction) = &outcome.extraction {
        println!(
            "Extracted {} of {} studies ({} empty, {} unreadable, {} unknown identifier)",
            extraction.rows,
            extraction.studies_seen,
            extraction.skipped_empty,
            extraction.skipped_undecodable,
            extraction.unknown_identifier
        );
    }
    println!(
        "Renamed {} folder(s), {} missing, {} without anonymous id",
        outcome.rename.renamed, outcome.rename.missing, outcome.rename.unresolved
    );
    for conflict in &outcome.rename.conflicts {
        eprintln!("Rename conflict: {}", conflict);
    }

    match &outcome.scrub {
        Ok(scrub) => println!(
            "Anonymized {} file(s) in {} studies ({} already done)",
            scrub.files, scrub.studies, scrub.resumed
        ),
        Err(err) => eprintln!("Anonymization stopped: {}", err),
    }

    if outcome.success() {
        println!("Anonymization completed successfully.");
        ExitCode::SUCCESS
    } else {
        eprintln!("An error occurred during anonymization.");
        ExitCode::FAILURE
    }
}
