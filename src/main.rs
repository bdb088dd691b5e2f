//
// main.rs
// Dicom-Deid-rs
//
// Binary entry point that hands off execution to the CLI layer.
//
// Thales Matheus Mendonça Santos - November 2025

use std::process::ExitCode;

use dicom_deid::cli;

fn main() -> anyhow::Result<ExitCode> {
    // Argument parsing, logging setup and dispatch all live in the CLI module.
    cli::run()
}
