//
// archive.rs
// Dicom-Deid-rs
//
// Unpacks a flat folder of zip archives (one destination subdirectory per archive) and packs processed folders back.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{DeidError, Result};
use crate::storage::{is_hidden, is_temp_file, sorted_children, subdirectories, write_atomically};

pub fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("zip"))
}

fn archive_error(path: &Path) -> impl FnOnce(zip::result::ZipError) -> DeidError + '_ {
    move |source| DeidError::Archive {
        path: path.to_path_buf(),
        source,
    }
}

/// Unpack one archive into a fresh temp directory, deleted when the handle drops.
pub fn unpack_to_temp(archive_path: &Path) -> Result<TempDir> {
    let handle = File::open(archive_path).map_err(|e| DeidError::io(archive_path, e))?;
    let mut archive = ZipArchive::new(handle).map_err(archive_error(archive_path))?;
    let dir = tempfile::tempdir().map_err(|e| DeidError::io(archive_path, e))?;
    archive
        .extract(dir.path())
        .map_err(archive_error(archive_path))?;
    debug!(archive = %archive_path.display(), temp = %dir.path().display(), "unpacked");
    Ok(dir)
}

/// Extract every zip archive directly inside `source_dir` into
/// `dest_dir/<archive stem>/`. Files that are not zip archives are ignored.
/// Returns the folders written.
pub fn extract_all(source_dir: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>> {
    let (_, files) = sorted_children(source_dir)?;
    let mut extracted = Vec::new();

    for file in files {
        let handle = File::open(&file).map_err(|e| DeidError::io(&file, e))?;
        let mut archive = match ZipArchive::new(handle) {
            Ok(archive) => archive,
            Err(_) => {
                debug!(path = %file.display(), "not a zip archive");
                continue;
            }
        };

        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let target = dest_dir.join(&stem);
        fs::create_dir_all(&target).map_err(|e| DeidError::io(&target, e))?;
        archive.extract(&target).map_err(archive_error(&file))?;

        info!(archive = %file.display(), dest = %target.display(), "extracted");
        extracted.push(target);
    }
    Ok(extracted)
}

/// Pack every visible subdirectory of `dir` into a sibling `<name>.zip`
/// (deflated, paths relative to the folder). Existing archives are replaced.
pub fn rezip_folders(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for folder in subdirectories(dir)? {
        if is_hidden(&folder) {
            continue;
        }
        let name = folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let target = folder.with_file_name(format!("{name}.zip"));
        write_atomically::<DeidError>(&target, |temp| pack_folder(&folder, temp))?;
        info!(folder = %folder.display(), archive = %target.display(), "re-zipped");
        written.push(target);
    }
    Ok(written)
}

fn pack_folder(folder: &Path, archive_path: &Path) -> Result<()> {
    let file = File::create(archive_path).map_err(|e| DeidError::io(archive_path, e))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(folder).sort_by_file_name() {
        let entry = entry.map_err(|e| DeidError::io(folder, e.into()))?;
        if !entry.file_type().is_file() || is_temp_file(entry.path()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(folder) else {
            continue;
        };
        // Zip entry names always use forward slashes.
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        writer
            .start_file(name, options)
            .map_err(archive_error(archive_path))?;
        let mut source = File::open(entry.path()).map_err(|e| DeidError::io(entry.path(), e))?;
        io::copy(&mut source, &mut writer).map_err(|e| DeidError::io(entry.path(), e))?;
    }
    writer.finish().map_err(archive_error(archive_path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn each_archive_gets_its_own_folder() {
        let src = tempdir().expect("tmpdir");
        let dst = tempdir().expect("tmpdir");

        let zip_path = src.path().join("STUDY01.zip");
        let mut writer = ZipWriter::new(File::create(&zip_path).expect("create zip"));
        writer
            .start_file("SERIES1/IM0001", SimpleFileOptions::default())
            .expect("start file");
        writer.write_all(b"dicom bytes").expect("write entry");
        writer.finish().expect("finish zip");
        fs::write(src.path().join("notes.txt"), b"not an archive").expect("write txt");

        let written = extract_all(src.path(), dst.path()).expect("extract");

        assert_eq!(written, vec![dst.path().join("STUDY01")]);
        assert_eq!(
            fs::read(dst.path().join("STUDY01").join("SERIES1").join("IM0001")).expect("read"),
            b"dicom bytes"
        );
        assert!(!dst.path().join("notes").exists());
    }

    #[test]
    fn rezip_packs_each_folder_next_to_it() {
        let root = tempdir().expect("tmpdir");
        let study = root.path().join("A7_20240115");
        fs::create_dir_all(study.join("SERIES1")).expect("dir");
        fs::write(study.join("SERIES1").join("IM0001"), b"scrubbed").expect("file");
        fs::write(study.join("IM0002"), b"second").expect("file");
        fs::create_dir_all(root.path().join(".cache")).expect("hidden dir");

        let written = rezip_folders(root.path()).expect("rezip");
        assert_eq!(written, vec![root.path().join("A7_20240115.zip")]);

        let mut archive =
            ZipArchive::new(File::open(&written[0]).expect("open zip")).expect("read zip");
        let mut names: Vec<_> = archive.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(names, vec!["IM0002", "SERIES1/IM0001"]);
        let mut content = Vec::new();
        io::Read::read_to_end(
            &mut archive.by_name("SERIES1/IM0001").expect("entry"),
            &mut content,
        )
        .expect("read entry");
        assert_eq!(content, b"scrubbed");
    }

    #[test]
    fn unpacked_temp_dir_is_removed_on_drop() {
        let src = tempdir().expect("tmpdir");
        let zip_path = src.path().join("MRN1.ZIP");
        let mut writer = ZipWriter::new(File::create(&zip_path).expect("create zip"));
        writer
            .start_file("IM0001", SimpleFileOptions::default())
            .expect("start file");
        writer.write_all(b"x").expect("write entry");
        writer.finish().expect("finish zip");
        assert!(is_zip(&zip_path));

        let dir = unpack_to_temp(&zip_path).expect("unpack");
        let unpacked = dir.path().to_path_buf();
        assert!(unpacked.join("IM0001").exists());
        drop(dir);
        assert!(!unpacked.exists());
    }
}
