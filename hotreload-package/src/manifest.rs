//! Dependency-manifest comparison for the diff check.
//!
//! Pure read: compares the manifest carried by the package with the one on
//! disk and decides whether the dependency-install step must run.

use std::io::ErrorKind;
use std::path::Path;

use similar::TextDiff;

use crate::archive::DeploymentPackage;
use crate::error::{io_err, PackageError};

/// Result of comparing the incoming manifest with the installed one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestChange {
    /// The package does not carry the manifest; nothing to install.
    NotInPackage,
    /// Byte-identical to the file on disk.
    Unchanged,
    /// No manifest on disk yet.
    Added,
    /// Contents differ; `unified_diff` is suitable for logging.
    Changed { unified_diff: String },
}

impl ManifestChange {
    pub fn requires_install(&self) -> bool {
        matches!(self, ManifestChange::Added | ManifestChange::Changed { .. })
    }
}

/// Compare `manifest_name` in `package` against `<root>/<manifest_name>`.
pub fn check_manifest(
    root: &Path,
    package: &DeploymentPackage,
    manifest_name: &str,
) -> Result<ManifestChange, PackageError> {
    let Some(incoming) = package.get(manifest_name) else {
        return Ok(ManifestChange::NotInPackage);
    };

    let path = root.join(manifest_name);
    let existing = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(ManifestChange::Added),
        Err(err) => return Err(io_err(&path, err)),
    };

    if existing == incoming.bytes {
        return Ok(ManifestChange::Unchanged);
    }

    let old = String::from_utf8_lossy(&existing);
    let new = String::from_utf8_lossy(&incoming.bytes);
    let old_header = format!("a/{manifest_name}");
    let new_header = format!("b/{manifest_name}");
    let unified_diff = TextDiff::from_lines(old.as_ref(), new.as_ref())
        .unified_diff()
        .header(&old_header, &new_header)
        .context_radius(1)
        .to_string();

    Ok(ManifestChange::Changed { unified_diff })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::{Cursor, Write};
    use tempfile::TempDir;

    fn package_with(files: &[(&str, &str)]) -> DeploymentPackage {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        for (name, body) in files {
            zip.start_file(*name, options).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        let bytes = zip.finish().unwrap().into_inner();
        crate::archive::decode(&bytes).unwrap()
    }

    #[test]
    fn manifest_absent_from_package() {
        let tmp = TempDir::new().unwrap();
        let package = package_with(&[("src/main.rs", "fn main() {}")]);
        let change = check_manifest(tmp.path(), &package, "Cargo.lock").unwrap();
        assert_eq!(change, ManifestChange::NotInPackage);
        assert!(!change.requires_install());
    }

    #[test]
    fn identical_manifest_is_unchanged() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("Cargo.lock"), "version = 3\n").unwrap();
        let package = package_with(&[("Cargo.lock", "version = 3\n")]);
        let change = check_manifest(tmp.path(), &package, "Cargo.lock").unwrap();
        assert_eq!(change, ManifestChange::Unchanged);
    }

    #[test]
    fn new_manifest_requires_install() {
        let tmp = TempDir::new().unwrap();
        let package = package_with(&[("Cargo.lock", "version = 3\n")]);
        let change = check_manifest(tmp.path(), &package, "Cargo.lock").unwrap();
        assert_eq!(change, ManifestChange::Added);
        assert!(change.requires_install());
    }

    #[test]
    fn changed_manifest_carries_diff() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("Cargo.lock"), "serde = 1.0.100\ntokio = 1.0\n").unwrap();
        let package = package_with(&[("Cargo.lock", "serde = 1.0.200\ntokio = 1.0\n")]);

        let change = check_manifest(tmp.path(), &package, "Cargo.lock").unwrap();
        assert!(change.requires_install());
        let ManifestChange::Changed { unified_diff } = change else {
            panic!("expected a changed manifest");
        };
        assert!(unified_diff.contains("-serde = 1.0.100"));
        assert!(unified_diff.contains("+serde = 1.0.200"));
        assert!(unified_diff.contains("a/Cargo.lock"));
    }

    #[test]
    fn check_does_not_modify_disk() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("Cargo.lock"), "old\n").unwrap();
        let package = package_with(&[("Cargo.lock", "new\n")]);
        check_manifest(tmp.path(), &package, "Cargo.lock").unwrap();
        assert_eq!(fs::read_to_string(tmp.path().join("Cargo.lock")).unwrap(), "old\n");
    }
}
