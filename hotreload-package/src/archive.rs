//! Structural decode of a deployment package, entirely in memory.
//!
//! Every entry is read to the end so the archive's CRC checks run; a
//! truncated or bit-flipped package fails here rather than halfway through
//! materialization.

use std::io::{Cursor, Read};

use zip::ZipArchive;

use hotreload_core::PackageEntry;

use crate::error::PackageError;

/// A fully decoded package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentPackage {
    entries: Vec<PackageEntry>,
}

impl DeploymentPackage {
    pub fn entries(&self) -> &[PackageEntry] {
        &self.entries
    }

    pub fn file_count(&self) -> usize {
        self.entries.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.entries.iter().map(PackageEntry::len).sum()
    }

    pub fn get(&self, relative_path: &str) -> Option<&PackageEntry> {
        self.entries
            .iter()
            .find(|entry| entry.relative_path == relative_path)
    }
}

/// Uncompressed budget used by [`decode`].
pub const DEFAULT_MAX_UNCOMPRESSED_BYTES: u64 = 1 << 30;

/// Decode `bytes` into a [`DeploymentPackage`] with the default
/// uncompressed budget.
pub fn decode(bytes: &[u8]) -> Result<DeploymentPackage, PackageError> {
    decode_bounded(bytes, DEFAULT_MAX_UNCOMPRESSED_BYTES)
}

/// Decode `bytes` into a [`DeploymentPackage`].
///
/// Returns [`PackageError::Corrupt`] for anything that is not a readable zip
/// archive with at least one file, or whose entries expand past
/// `max_uncompressed` bytes in total, and [`PackageError::UnsafePath`] for
/// entries that would escape the target tree.
///
/// Sizes declared in the archive headers are never used to allocate.
pub fn decode_bounded(bytes: &[u8], max_uncompressed: u64) -> Result<DeploymentPackage, PackageError> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|e| PackageError::Corrupt(e.to_string()))?;

    let mut entries = Vec::new();
    let mut remaining = max_uncompressed;
    for index in 0..archive.len() {
        let file = archive
            .by_index(index)
            .map_err(|e| PackageError::Corrupt(format!("entry #{index}: {e}")))?;
        if file.is_dir() {
            continue;
        }

        let name = file.name().to_string();
        check_relative(&name)?;
        if file.size() > remaining {
            return Err(over_budget(&name, max_uncompressed));
        }

        let mut contents = Vec::new();
        file.take(remaining.saturating_add(1))
            .read_to_end(&mut contents)
            .map_err(|e| PackageError::Corrupt(format!("{name}: {e}")))?;
        let read = contents.len() as u64;
        if read > remaining {
            return Err(over_budget(&name, max_uncompressed));
        }
        remaining -= read;
        entries.push(PackageEntry::new(name, contents));
    }

    if entries.is_empty() {
        return Err(PackageError::Corrupt("package contains no files".to_string()));
    }

    Ok(DeploymentPackage { entries })
}

fn over_budget(name: &str, max_uncompressed: u64) -> PackageError {
    PackageError::Corrupt(format!(
        "{name}: package expands past {max_uncompressed} bytes"
    ))
}

fn check_relative(name: &str) -> Result<(), PackageError> {
    let safe = !name.starts_with('/')
        && !name.contains('\\')
        && name
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    if safe {
        Ok(())
    } else {
        Err(PackageError::UnsafePath(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn archive_of(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, bytes) in files {
            zip.start_file(*name, options).unwrap();
            zip.write_all(bytes).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn decodes_every_entry() {
        let bytes = archive_of(&[
            ("Cargo.toml", &b"[package]"[..]),
            ("src/main.rs", &b"fn main(){}"[..]),
        ]);
        let package = decode(&bytes).unwrap();
        assert_eq!(package.file_count(), 2);
        assert_eq!(package.get("src/main.rs").unwrap().bytes, b"fn main(){}");
        assert_eq!(package.total_bytes(), 9 + 11);
    }

    #[test]
    fn garbage_is_corrupt() {
        let err = decode(b"definitely not a zip archive").unwrap_err();
        assert!(matches!(err, PackageError::Corrupt(_)), "got: {err}");
    }

    #[test]
    fn truncated_archive_is_corrupt() {
        let bytes = archive_of(&[("src/main.rs", &[7u8; 4096][..])]);
        let truncated = &bytes[..bytes.len() / 2];
        let err = decode(truncated).unwrap_err();
        assert!(matches!(err, PackageError::Corrupt(_)), "got: {err}");
    }

    #[test]
    fn empty_archive_is_corrupt() {
        let bytes = archive_of(&[]);
        let err = decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("no files"), "got: {err}");
    }

    #[test]
    fn entries_past_the_budget_are_corrupt() {
        let bytes = archive_of(&[
            ("src/a.rs", &[1u8; 600][..]),
            ("src/b.rs", &[2u8; 600][..]),
        ]);
        assert_eq!(decode_bounded(&bytes, 1200).unwrap().total_bytes(), 1200);
        let err = decode_bounded(&bytes, 1000).unwrap_err();
        assert!(matches!(err, PackageError::Corrupt(_)), "got: {err}");
        assert!(err.to_string().contains("src/b.rs"), "got: {err}");
    }

    #[test]
    fn forged_uncompressed_size_is_corrupt_not_an_allocation() {
        let mut bytes = archive_of(&[("src/main.rs", &b"fn main(){}"[..])]);
        // Central directory header: uncompressed size lives at offset 24.
        let central = bytes
            .windows(4)
            .position(|w| w == [0x50, 0x4b, 0x01, 0x02])
            .unwrap();
        bytes[central + 24..central + 28].copy_from_slice(&0xFFFF_FFFEu32.to_le_bytes());

        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, PackageError::Corrupt(_)), "got: {err}");
    }

    #[test]
    fn parent_components_are_rejected() {
        assert!(matches!(
            check_relative("../etc/passwd"),
            Err(PackageError::UnsafePath(_))
        ));
        assert!(matches!(
            check_relative("/etc/passwd"),
            Err(PackageError::UnsafePath(_))
        ));
        assert!(matches!(
            check_relative("src/./main.rs"),
            Err(PackageError::UnsafePath(_))
        ));
        assert!(check_relative("src/main.rs").is_ok());
    }
}
