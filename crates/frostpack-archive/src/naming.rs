//! Naming conventions for building directories, archives and small-file keys.
//!
//! These are pure string transforms with no I/O; every component (store,
//! submit, retrieve, clean) derives paths through them so the layout never
//! drifts. The conventions are preserved bit-for-bit for interoperability
//! with companion tooling.

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;

/// Build workspace directory under the engine workspace root.
pub const ZIP_DIR: &str = "zip";
/// Restore cache directory under the engine workspace root.
pub const TMP_DIR: &str = "tmp";
/// Prefix of every building directory.
pub const BUILDING_DIRECTORY_PREFIX: &str = "rs_zip_";
/// Suffix of the one open (still accepting writes) directory of a node.
pub const CURRENT_ARCHIVE_SUFFIX: &str = "_current";
/// Extension of the final archive produced from a closed directory.
pub const ARCHIVE_EXTENSION: &str = ".zip";
/// Timestamp format embedded in building-directory names (yyyyMMddHHmmssSSS).
pub const ARCHIVE_DATE_FORMAT: &str = "%Y%m%d%H%M%S%3f";
/// Query parameter carrying the in-archive file name in small-file keys.
pub const SMALL_FILE_PARAMETER: &str = "fileName";

#[derive(Error, Debug)]
pub enum NamingError {
    #[error("building directory name {name:?} does not embed a valid timestamp")]
    BadTimestamp {
        name: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// True if the directory name denotes the open, still-accepting-writes state.
pub fn is_current(dir_name: &str) -> bool {
    dir_name.ends_with(CURRENT_ARCHIVE_SUFFIX)
}

/// Strip the `_current` suffix if present.
pub fn strip_current_suffix(dir_name: &str) -> &str {
    dir_name.strip_suffix(CURRENT_ARCHIVE_SUFFIX).unwrap_or(dir_name)
}

/// Strip the `rs_zip_` prefix if present.
pub fn strip_building_prefix(dir_name: &str) -> &str {
    dir_name.strip_prefix(BUILDING_DIRECTORY_PREFIX).unwrap_or(dir_name)
}

/// The embedded timestamp string: name minus prefix and suffix.
pub fn base_name(dir_name: &str) -> &str {
    strip_building_prefix(strip_current_suffix(dir_name))
}

/// Name for a freshly opened building directory, stamped with `now`.
pub fn new_building_dir_name(now: DateTime<Utc>) -> String {
    format!(
        "{}{}{}",
        BUILDING_DIRECTORY_PREFIX,
        now.format(ARCHIVE_DATE_FORMAT),
        CURRENT_ARCHIVE_SUFFIX
    )
}

/// Archive file name produced from a building directory name.
///
/// `rs_zip_<stamp>[_current]` maps to `<stamp>.zip`.
pub fn archive_name_from_building_dir(dir_name: &str) -> String {
    format!("{}{}", base_name(dir_name), ARCHIVE_EXTENSION)
}

/// Building directory name (closed form) for an archive file name.
///
/// `<stamp>.zip` maps to `rs_zip_<stamp>`; the reverse of
/// [`archive_name_from_building_dir`].
pub fn building_dir_from_archive_name(archive_name: &str) -> String {
    let stem = archive_name
        .strip_suffix(ARCHIVE_EXTENSION)
        .unwrap_or(archive_name);
    format!("{BUILDING_DIRECTORY_PREFIX}{stem}")
}

/// Parse the creation timestamp embedded in a building directory name.
pub fn parse_building_dir_timestamp(dir_name: &str) -> Result<DateTime<Utc>, NamingError> {
    let stamp = base_name(dir_name);
    NaiveDateTime::parse_from_str(stamp, ARCHIVE_DATE_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|source| NamingError::BadTimestamp {
            name: dir_name.to_string(),
            source,
        })
}

/// Key addressing one small file packed inside a stored archive.
///
/// A single flat remote key addresses both the archive and the file within
/// it: `<archive-path>?fileName=<name>`.
pub fn small_file_key(archive_path: &str, file_name: &str) -> String {
    format!("{archive_path}?{SMALL_FILE_PARAMETER}={file_name}")
}

/// Split a key into its archive path and, if present, the in-archive name.
pub fn split_small_file_key(key: &str) -> (&str, Option<&str>) {
    let delimiter = format!("?{SMALL_FILE_PARAMETER}=");
    match key.split_once(&delimiter) {
        Some((archive, name)) if !name.is_empty() => (archive, Some(name)),
        Some((archive, _)) => (archive, None),
        None => (key, None),
    }
}

/// True if the key carries a `fileName` parameter.
pub fn is_small_file_key(key: &str) -> bool {
    split_small_file_key(key).1.is_some()
}

/// Append a collision counter before the file extension.
///
/// `data.bin` with count 2 becomes `data_2.bin`; extension-less names get a
/// plain `_2` suffix.
pub fn add_count_before_extension(file_name: &str, count: u32) -> String {
    match file_name.rfind('.') {
        Some(index) if index > 0 => {
            format!("{}_{}{}", &file_name[..index], count, &file_name[index..])
        }
        _ => format!("{file_name}_{count}"),
    }
}
