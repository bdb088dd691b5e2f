//
// storage.rs
// Dicom-Deid-rs
//
// Filesystem helpers with deterministic ordering, crash-safe rewrites and path-component checks.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::Builder;

use crate::error::{DeidError, Result};

/// Prefix and suffix of the temp file an atomic rewrite encodes into.
pub const TEMP_PREFIX: &str = ".deid-";
pub const TEMP_SUFFIX: &str = ".tmp";

/// Immediate children of `dir`, split into (directories, files), each sorted by name.
///
/// The platform gives no ordering guarantee, so "first file" policies rely on this sort.
pub fn sorted_children(dir: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| DeidError::io(dir, e))? {
        let entry = entry.map_err(|e| DeidError::io(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| DeidError::io(&path, e))?;
        if file_type.is_dir() {
            dirs.push(path);
        } else if file_type.is_file() {
            files.push(path);
        }
    }
    dirs.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok((dirs, files))
}

pub fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>> {
    sorted_children(dir).map(|(dirs, _)| dirs)
}

/// Replace `target` with whatever `write` produces, never exposing a half-written file.
///
/// `write` receives the path of a temp file in the same directory. It is
/// persisted over `target` only after `write` succeeds and dropped otherwise.
pub fn write_atomically<E>(
    target: &Path,
    write: impl FnOnce(&Path) -> std::result::Result<(), E>,
) -> std::result::Result<(), E>
where
    E: From<DeidError>,
{
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let temp = Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(dir)
        .map_err(|e| E::from(DeidError::io(dir, e)))?;

    write(temp.path())?;
    temp.persist(target)
        .map_err(|e| E::from(DeidError::io(target, e.error)))?;
    Ok(())
}

pub fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |n| n.starts_with(TEMP_PREFIX) && n.ends_with(TEMP_SUFFIX))
}

// Dot-files (.DS_Store, ._IM0001) are platform clutter, never study data.
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |n| n.starts_with('.'))
}

/// True if `name` can be joined onto a directory without escaping it.
pub fn is_safe_component(name: &str) -> bool {
    !name.trim().is_empty()
        && name != "."
        && name != ".."
        && !name
            .chars()
            .any(|c| c == '/' || c == '\\' || c == '\0' || c == ':')
}
