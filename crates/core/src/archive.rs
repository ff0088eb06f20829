//! Zip extraction for uploaded modules.
//!
//! Archives are untrusted input. Entry names that would escape the
//! destination directory are rejected, and the number of entries and the
//! total number of bytes written are bounded.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::Serialize;
use zip::ZipArchive;

/// Default cap on the number of entries in one archive.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Default cap on the total uncompressed size (256 MiB).
pub const DEFAULT_MAX_TOTAL_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Archive entry '{0}' escapes the extraction directory")]
    UnsafeEntry(String),

    #[error("Archive has {count} entries (limit {limit})")]
    TooManyEntries { count: usize, limit: usize },

    #[error("Archive expands beyond {limit} bytes")]
    TooLarge { limit: u64 },
}

/// Bounds applied while extracting.
#[derive(Debug, Clone, Copy)]
pub struct ExtractLimits {
    pub max_entries: usize,
    pub max_total_bytes: u64,
}

impl Default for ExtractLimits {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_total_bytes: DEFAULT_MAX_TOTAL_BYTES,
        }
    }
}

/// What an extraction produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractSummary {
    pub files: usize,
    pub directories: usize,
    pub total_bytes: u64,
}

/// Extract `archive_path` into `dest`, creating it if needed.
///
/// This is blocking I/O; async callers should run it on
/// `tokio::task::spawn_blocking`. A failure partway leaves whatever was
/// already written in place.
pub fn extract_archive(
    archive_path: &Path,
    dest: &Path,
    limits: &ExtractLimits,
) -> Result<ExtractSummary, ArchiveError> {
    let file = File::open(archive_path).map_err(io_at(archive_path))?;
    let mut archive = ZipArchive::new(file)?;

    if archive.len() > limits.max_entries {
        return Err(ArchiveError::TooManyEntries {
            count: archive.len(),
            limit: limits.max_entries,
        });
    }

    fs::create_dir_all(dest).map_err(io_at(dest))?;

    let mut summary = ExtractSummary::default();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| ArchiveError::UnsafeEntry(entry.name().to_string()))?;
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(io_at(&out_path))?;
            summary.directories += 1;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(io_at(parent))?;
        }

        let remaining = limits.max_total_bytes - summary.total_bytes;
        let mut out_file = File::create(&out_path).map_err(io_at(&out_path))?;
        // Read one byte past the budget so an overflow is detectable.
        let written = io::copy(&mut (&mut entry).take(remaining + 1), &mut out_file)
            .map_err(io_at(&out_path))?;
        if written > remaining {
            return Err(ArchiveError::TooLarge {
                limit: limits.max_total_bytes,
            });
        }

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&out_path, fs::Permissions::from_mode((mode & 0o755) | 0o600))
                .map_err(io_at(&out_path))?;
        }

        summary.total_bytes += written;
        summary.files += 1;
    }

    Ok(summary)
}

fn io_at(path: &Path) -> impl Fn(io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Write a zip archive with the given `(name, contents)` entries.
///
/// Names ending in `/` become directory entries. Used by tests across the
/// workspace to build fixture archives.
pub fn write_archive(path: &Path, entries: &[(&str, &[u8])]) -> Result<(), ArchiveError> {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let file = File::create(path).map_err(io_at(path))?;
    let mut writer = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default();

    for (name, contents) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, options)?;
        } else {
            writer.start_file(*name, options)?;
            writer.write_all(contents).map_err(io_at(path))?;
        }
    }
    writer.finish()?;
    Ok(())
}
