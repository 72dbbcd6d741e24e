//! Gzip-compressed tar archives with rewritten entry paths.
//!
//! A single file lands at exactly `dest`; a directory lands under `dest`
//! with every descendant at `dest/<path relative to the source root>`,
//! directories included as their own entries. Entry paths are stored
//! relative to `/` (archives cannot hold absolute paths), so the archive is
//! meant to be extracted with `tar zxf - -C /`.

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::error::{AppError, Result};

/// Builds the archive for `src` in memory.
pub fn compress(src: &Path, dest: &Path) -> Result<Vec<u8>> {
    let metadata = std::fs::metadata(src).map_err(|e| {
        AppError::ArchiveError(format!("Cannot read {}: {}", src.display(), e))
    })?;
    let entry_root = archive_path(dest)?;

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    if metadata.is_dir() {
        debug!(src = %src.display(), dest = %dest.display(), "Archiving directory");
        builder
            .append_dir_all(&entry_root, src)
            .map_err(|e| archive_error(src, e))?;
    } else {
        debug!(src = %src.display(), dest = %dest.display(), "Archiving file");
        builder
            .append_path_with_name(src, &entry_root)
            .map_err(|e| archive_error(src, e))?;
    }

    let encoder = builder.into_inner().map_err(|e| archive_error(src, e))?;
    encoder.finish().map_err(|e| archive_error(src, e))
}

/// One entry read back from an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: String,
    pub is_dir: bool,
    pub mode: u32,
    pub contents: Vec<u8>,
}

/// Reads every entry of an archive produced by [`compress`].
pub fn read_entries(archive: &[u8]) -> Result<Vec<ArchiveEntry>> {
    let mut archive = tar::Archive::new(GzDecoder::new(archive));
    let mut entries = Vec::new();

    let iter = archive
        .entries()
        .map_err(|e| AppError::ArchiveError(e.to_string()))?;
    for entry in iter {
        let mut entry = entry.map_err(|e| AppError::ArchiveError(e.to_string()))?;
        let path = entry
            .path()
            .map_err(|e| AppError::ArchiveError(e.to_string()))?
            .to_string_lossy()
            .trim_end_matches('/')
            .to_string();
        let header = entry.header();
        let is_dir = header.entry_type().is_dir();
        let mode = header.mode().unwrap_or(0);

        let mut contents = Vec::new();
        entry
            .read_to_end(&mut contents)
            .map_err(|e| AppError::ArchiveError(e.to_string()))?;

        entries.push(ArchiveEntry {
            path,
            is_dir,
            mode,
            contents,
        });
    }

    Ok(entries)
}

/// `/a/./b/` becomes `a/b`; `..` is refused.
fn archive_path(dest: &Path) -> Result<PathBuf> {
    let mut path = PathBuf::new();
    for component in dest.components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                return Err(AppError::ArchiveError(format!(
                    "destination {} must not contain '..'",
                    dest.display()
                )))
            }
        }
    }
    if path.as_os_str().is_empty() {
        return Err(AppError::ArchiveError(format!(
            "destination {} does not name a path",
            dest.display()
        )));
    }
    Ok(path)
}

fn archive_error(src: &Path, err: std::io::Error) -> AppError {
    AppError::ArchiveError(format!("Failed to archive {}: {}", src.display(), err))
}
