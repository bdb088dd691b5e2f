//
// lib.rs
// Dicom-Deid-rs
//
// Exposes the crate's modules and re-exports the CLI entry point for both binary and library consumers.
//
// Thales Matheus Mendonça Santos - November 2025

// Stages, leaves first: walker -> metadata/table -> keys -> restructure -> anonymize, tied together by batch.
pub mod anonymize;
pub mod archive;
pub mod batch;
pub mod cli;
pub mod config;
pub mod dicom_access;
pub mod error;
pub mod keys;
pub mod ledger;
pub mod metadata;
pub mod models;
pub mod restructure;
pub mod storage;
pub mod table;
pub mod walker;

pub use cli::{run as run_cli, Cli, Commands};
pub use error::DeidError;
