//! Flat zip bundles holding a building directory's small files.
//!
//! Bundles are always a single level deep: entry names are the bare file
//! names from the building directory, with no interior paths.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("entry {entry:?} not found in {archive:?}")]
    EntryNotFound { archive: PathBuf, entry: String },

    #[error("file {0:?} has no usable file name")]
    BadFileName(PathBuf),

    #[error("zip error: {0}")]
    Zip(#[from] ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn options() -> FileOptions {
    FileOptions::default().compression_method(CompressionMethod::Deflated)
}

/// Create `archive` from the given files, each stored under its bare name.
///
/// An existing archive at the same path is replaced.
pub fn create_bundle(archive: &Path, files: &[PathBuf]) -> Result<(), BundleError> {
    if let Some(parent) = archive.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = ZipWriter::new(File::create(archive)?);
    for path in files {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| BundleError::BadFileName(path.clone()))?;
        writer.start_file(name, options())?;
        let mut input = File::open(path)?;
        io::copy(&mut input, &mut writer)?;
    }
    writer.finish()?.sync_all()?;
    debug!(archive = %archive.display(), entries = files.len(), "wrote bundle");
    Ok(())
}

/// Extract a single entry into `dest_dir`, returning the extracted path.
pub fn extract_entry(archive: &Path, entry: &str, dest_dir: &Path) -> Result<PathBuf, BundleError> {
    let mut reader = ZipArchive::new(File::open(archive)?)?;
    let mut file = match reader.by_name(entry) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => {
            return Err(BundleError::EntryNotFound {
                archive: archive.to_path_buf(),
                entry: entry.to_string(),
            })
        }
        Err(e) => return Err(e.into()),
    };
    fs::create_dir_all(dest_dir)?;
    let dest = dest_dir.join(entry);
    write_entry(&mut file, &dest)?;
    Ok(dest)
}

/// Extract every entry of `archive` into `dest_dir`.
pub fn extract_all(archive: &Path, dest_dir: &Path) -> Result<(), BundleError> {
    let mut reader = ZipArchive::new(File::open(archive)?)?;
    fs::create_dir_all(dest_dir)?;
    for index in 0..reader.len() {
        let mut file = reader.by_index(index)?;
        let Some(name) = file.enclosed_name().map(Path::to_path_buf) else {
            continue;
        };
        write_entry(&mut file, &dest_dir.join(name))?;
    }
    Ok(())
}

fn write_entry(file: &mut impl Read, dest: &Path) -> Result<(), BundleError> {
    let mut output = File::create(dest)?;
    io::copy(file, &mut output)?;
    output.flush()?;
    Ok(())
}
