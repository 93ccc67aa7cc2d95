//! Archive unpacking for the transfer engine.
//!
//! Archives are fully buffered before extraction. Entries are flattened to
//! their base names and directory entries are dropped, so a destination
//! receives a flat set of files regardless of the archive's internal layout.

use std::io::{Cursor, Read};

use flate2::read::GzDecoder;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Failed to read zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Failed to read tar archive: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveKind {
    /// Recognizes an archive by file-name suffix (case-insensitive).
    pub fn detect(filename: &str) -> Option<Self> {
        let lower = filename.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else if lower.ends_with(".tar") {
            Some(ArchiveKind::Tar)
        } else {
            None
        }
    }
}

pub fn is_archive(filename: &str) -> bool {
    ArchiveKind::detect(filename).is_some()
}

/// A single extracted file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub data: Vec<u8>,
}

impl ArchiveEntry {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Extracts `bytes` according to the archive type implied by `filename`.
///
/// Returns `Ok(None)` when the name is not a recognized archive.
pub fn extract(filename: &str, bytes: &[u8]) -> Result<Option<Vec<ArchiveEntry>>, ArchiveError> {
    let entries = match ArchiveKind::detect(filename) {
        None => return Ok(None),
        Some(ArchiveKind::Zip) => extract_zip(bytes)?,
        Some(ArchiveKind::Tar) => extract_tar(Cursor::new(bytes), bytes.len())?,
        Some(ArchiveKind::TarGz) => extract_tar(GzDecoder::new(Cursor::new(bytes)), bytes.len())?,
    };
    Ok(Some(entries))
}

fn extract_zip(bytes: &[u8]) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut entries = Vec::with_capacity(archive.len());

    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        if file.is_dir() {
            continue;
        }
        let Some(name) = base_name(file.name()) else {
            continue;
        };
        let mut data = Vec::with_capacity(capacity_hint(file.size(), bytes.len()));
        file.read_to_end(&mut data)?;
        entries.push(ArchiveEntry { name, data });
    }

    Ok(entries)
}

fn extract_tar<R: Read>(reader: R, input_len: usize) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    let mut archive = tar::Archive::new(reader);
    let mut entries = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path()?.to_string_lossy().into_owned();
        let Some(name) = base_name(&path) else {
            continue;
        };
        let mut data = Vec::with_capacity(capacity_hint(entry.size(), input_len));
        entry.read_to_end(&mut data)?;
        entries.push(ArchiveEntry { name, data });
    }

    Ok(entries)
}

/// Header sizes are untrusted; never reserve more than the archive itself.
fn capacity_hint(claimed: u64, input_len: usize) -> usize {
    claimed.min(input_len as u64) as usize
}

fn base_name(path: &str) -> Option<String> {
    path.rsplit(['/', '\\'])
        .find(|part| !part.is_empty() && *part != "." && *part != "..")
        .map(str::to_string)
}
