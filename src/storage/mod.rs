//! File output for recorded frames.
//!
//! Output files are named `<date>_<suffix><ext>` inside the configured
//! directory. If that name is taken, `_1`, `_2`, ... is appended before the
//! extension. Files are created with create-new semantics so two recorders can
//! never end up sharing one file.

#[cfg(feature = "storage_csv")]
pub mod csv_recorder;

#[cfg(feature = "storage_csv")]
pub use csv_recorder::CsvRecorder;

use crate::config::StorageConfig;
use chrono::Local;
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::PathBuf;

/// Gives up after this many taken names.
const MAX_NAME_ATTEMPTS: usize = 10_000;

/// Create a new, uniquely named output file.
///
/// An empty `suffix` falls back to `config.default_suffix`. A suffix holding a
/// path separator is rejected with `InvalidInput`, so files always land
/// directly in `config.directory`.
pub fn create_unique_file(config: &StorageConfig, suffix: &str) -> io::Result<(PathBuf, File)> {
    let suffix = if suffix.trim().is_empty() {
        config.default_suffix.as_str()
    } else {
        suffix.trim()
    };
    if suffix.chars().any(std::path::is_separator) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("file name suffix '{suffix}' must not contain a path separator"),
        ));
    }
    fs::create_dir_all(&config.directory)?;

    let mut stem = String::new();
    write!(stem, "{}_{}", Local::now().format(&config.date_format), suffix).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid date format '{}'", config.date_format),
        )
    })?;

    for attempt in 0..MAX_NAME_ATTEMPTS {
        let name = if attempt == 0 {
            format!("{stem}{}", config.extension)
        } else {
            format!("{stem}_{attempt}{}", config.extension)
        };
        let path = config.directory.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free file name for '{stem}' in {}", config.directory.display()),
    ))
}
