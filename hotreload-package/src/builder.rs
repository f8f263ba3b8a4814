//! Package builder: deterministic zip of the deployable source files.
//!
//! ## Inclusion policy
//!
//! 1. Any path with a segment starting with the isolation prefix is excluded,
//!    whatever its extension (keeps ephemeral test trees out of deployments).
//! 2. Every listed required top-level file is included; a missing one aborts.
//! 3. Files under a source subtree are included when their extension is on the
//!    allow-list.
//!
//! ## Determinism
//!
//! Entries are sorted by relative path, compressed with the same method, and
//! stamped with a fixed timestamp and mode, so an unchanged tree always yields
//! byte-identical archives and therefore identical digests.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Component, Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use hotreload_core::{PackageDigest, PackagePolicy};

use crate::digest;
use crate::error::{io_err, PackageError};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Compiled form of [`PackagePolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InclusionPolicy {
    source_dirs: Vec<PathBuf>,
    extensions: Vec<String>,
    required_files: Vec<String>,
    isolation_prefix: String,
}

impl InclusionPolicy {
    pub fn from_settings(policy: &PackagePolicy) -> Self {
        Self {
            source_dirs: policy.source_dirs.iter().map(PathBuf::from).collect(),
            extensions: policy
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            required_files: policy.required_files.clone(),
            isolation_prefix: policy.isolation_prefix.clone(),
        }
    }

    /// Whether `relative` (relative to the source root) belongs in a package.
    pub fn includes(&self, relative: &Path) -> bool {
        if self.is_isolated(relative) {
            return false;
        }
        let key = slash_path(relative);
        if self.required_files.iter().any(|required| *required == key) {
            return true;
        }
        let in_source_dir = self.source_dirs.iter().any(|dir| relative.starts_with(dir));
        in_source_dir && self.has_allowed_extension(relative)
    }

    fn is_isolated(&self, relative: &Path) -> bool {
        if self.isolation_prefix.is_empty() {
            return false;
        }
        relative.components().any(|component| match component {
            Component::Normal(segment) => segment
                .to_str()
                .map(|s| s.starts_with(&self.isolation_prefix))
                .unwrap_or(false),
            _ => false,
        })
    }

    fn has_allowed_extension(&self, relative: &Path) -> bool {
        relative
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|allowed| *allowed == ext)
            })
            .unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

/// A built, not yet transferred, package.
#[derive(Debug, Clone)]
pub struct BuiltPackage {
    pub bytes: Vec<u8>,
    pub digest: PackageDigest,
    /// Relative paths in archive order.
    pub entries: Vec<String>,
}

impl BuiltPackage {
    pub fn file_count(&self) -> usize {
        self.entries.len()
    }
}

/// Build a package from `source_root` without touching the staging slot.
pub fn build(source_root: &Path, policy: &InclusionPolicy) -> Result<BuiltPackage, PackageError> {
    let files = collect_files(source_root, policy)?;

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);

    let mut entries = Vec::with_capacity(files.len());
    for (name, path) in &files {
        let bytes = fs::read(path).map_err(|e| io_err(path, e))?;
        zip.start_file(name.as_str(), options)?;
        zip.write_all(&bytes).map_err(|e| io_err(path, e))?;
        entries.push(name.clone());
    }

    let bytes = zip.finish()?.into_inner();
    let digest = digest::compute(&bytes);
    tracing::info!(
        "built package from {}: {} files, {} bytes, digest {}",
        source_root.display(),
        entries.len(),
        bytes.len(),
        digest
    );

    Ok(BuiltPackage {
        bytes,
        digest,
        entries,
    })
}

/// Build a package and write it to `staging_path`, replacing any prior
/// staged package.
///
/// Writes to `<path>.tmp` then renames, so a reader never sees a half-written
/// slot.
pub fn build_and_stage(
    source_root: &Path,
    policy: &InclusionPolicy,
    staging_path: &Path,
) -> Result<BuiltPackage, PackageError> {
    let built = build(source_root, policy)?;
    stage_bytes(staging_path, &built.bytes)?;
    Ok(built)
}

/// Atomically replace the staging slot with `bytes`.
pub fn stage_bytes(staging_path: &Path, bytes: &[u8]) -> Result<(), PackageError> {
    if let Some(dir) = staging_path.parent() {
        fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let tmp = staging_path.with_extension("zip.tmp");
    fs::write(&tmp, bytes).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = fs::rename(&tmp, staging_path) {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(staging_path, e));
    }
    Ok(())
}

/// Walk the source subtrees and resolve required files.
///
/// Keys are `/`-separated relative paths; the map keeps them sorted.
fn collect_files(
    source_root: &Path,
    policy: &InclusionPolicy,
) -> Result<BTreeMap<String, PathBuf>, PackageError> {
    let mut files = BTreeMap::new();

    for required in &policy.required_files {
        let path = source_root.join(required);
        if !path.is_file() {
            return Err(PackageError::MissingRequired { path });
        }
        files.insert(required.clone(), path);
    }

    for dir in &policy.source_dirs {
        let root = source_root.join(dir);
        if !root.is_dir() {
            return Err(PackageError::MissingRequired { path: root });
        }

        let mut pending = vec![root];
        while let Some(current) = pending.pop() {
            let entries = fs::read_dir(&current).map_err(|e| io_err(&current, e))?;
            for entry in entries {
                let entry = entry.map_err(|e| io_err(&current, e))?;
                let path = entry.path();
                let Ok(relative) = path.strip_prefix(source_root) else {
                    continue;
                };
                if policy.is_isolated(relative) {
                    tracing::debug!("skipping isolated path: {}", relative.display());
                    continue;
                }

                let ty = entry.file_type().map_err(|e| io_err(&path, e))?;
                if ty.is_dir() {
                    pending.push(path);
                } else if (ty.is_file() || (ty.is_symlink() && path.is_file()))
                    && policy.includes(relative)
                {
                    files.insert(slash_path(relative), path);
                }
            }
        }
    }

    Ok(files)
}

fn slash_path(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(segment) => Some(segment.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn policy() -> InclusionPolicy {
        InclusionPolicy::from_settings(&PackagePolicy::default())
    }

    fn seed_tree(root: &Path) {
        fs::create_dir_all(root.join("src/routes")).unwrap();
        fs::create_dir_all(root.join("src/.isolated-run42")).unwrap();
        fs::write(root.join("Cargo.toml"), "[package]\nname = \"app\"\n").unwrap();
        fs::write(root.join("Cargo.lock"), "# lock\n").unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}\n").unwrap();
        fs::write(root.join("src/routes/api.rs"), "pub fn api() {}\n").unwrap();
        fs::write(root.join("src/routes/logo.png"), [0u8, 1, 2]).unwrap();
        fs::write(root.join("src/.isolated-run42/main.rs"), "junk").unwrap();
        fs::write(root.join("README.md"), "not required, not under src").unwrap();
    }

    #[rstest]
    #[case("src/main.rs", true)]
    #[case("src/deep/nested/mod.rs", true)]
    #[case("src/templates/page.HTML", true)]
    #[case("src/logo.png", false)]
    #[case("src/.isolated-abc/main.rs", false)]
    #[case(".isolated-abc/src/main.rs", false)]
    #[case("Cargo.toml", true)]
    #[case("Cargo.lock", true)]
    #[case("README.md", false)]
    #[case("tests/it.rs", false)]
    #[case("src", false)]
    fn inclusion_predicate(#[case] path: &str, #[case] expected: bool) {
        assert_eq!(policy().includes(Path::new(path)), expected, "path: {path}");
    }

    #[test]
    fn build_collects_sorted_entries_and_skips_isolated_trees() {
        let tmp = TempDir::new().unwrap();
        seed_tree(tmp.path());

        let built = build(tmp.path(), &policy()).unwrap();
        assert_eq!(
            built.entries,
            vec!["Cargo.lock", "Cargo.toml", "src/main.rs", "src/routes/api.rs"]
        );
        assert_eq!(built.file_count(), 4);
        assert_eq!(built.digest, digest::compute(&built.bytes));
    }

    #[test]
    fn building_twice_yields_identical_digests() {
        let tmp = TempDir::new().unwrap();
        seed_tree(tmp.path());

        let first = build(tmp.path(), &policy()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let second = build(tmp.path(), &policy()).unwrap();

        assert_eq!(first.digest, second.digest);
        assert_eq!(first.bytes, second.bytes);
    }

    #[test]
    fn content_change_changes_digest() {
        let tmp = TempDir::new().unwrap();
        seed_tree(tmp.path());
        let before = build(tmp.path(), &policy()).unwrap();
        fs::write(tmp.path().join("src/main.rs"), "fn main() { println!(); }\n").unwrap();
        let after = build(tmp.path(), &policy()).unwrap();
        assert_ne!(before.digest, after.digest);
    }

    #[test]
    fn missing_required_file_aborts() {
        let tmp = TempDir::new().unwrap();
        seed_tree(tmp.path());
        fs::remove_file(tmp.path().join("Cargo.lock")).unwrap();

        let err = build(tmp.path(), &policy()).unwrap_err();
        match err {
            PackageError::MissingRequired { path } => assert!(path.ends_with("Cargo.lock")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_source_dir_aborts() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("Cargo.toml"), "").unwrap();
        fs::write(tmp.path().join("Cargo.lock"), "").unwrap();
        let err = build(tmp.path(), &policy()).unwrap_err();
        assert!(matches!(err, PackageError::MissingRequired { .. }), "got: {err}");
    }

    #[test]
    fn staging_overwrites_previous_package() {
        let tmp = TempDir::new().unwrap();
        seed_tree(tmp.path());
        let staging = tmp.path().join("state/staging/package.zip");
        fs::create_dir_all(staging.parent().unwrap()).unwrap();
        fs::write(&staging, b"stale bytes from an older admission").unwrap();

        let built = build_and_stage(tmp.path(), &policy(), &staging).unwrap();
        assert_eq!(fs::read(&staging).unwrap(), built.bytes);
        assert!(!staging.with_extension("zip.tmp").exists());
    }
}
