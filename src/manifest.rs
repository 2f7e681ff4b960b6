//! File-identity manifests for index freshness checks.
//!
//! A [`Manifest`] records `(name, size, mtime)` for every source file that
//! produced an index. It is persisted as `manifest.json` next to the vector
//! store files and compared against a fresh [`snapshot`] to decide whether
//! the index can be reused.
//!
//! The side-car is written only after the index is fully persisted, so a
//! directory without a readable manifest is never trusted.

use std::io::ErrorKind;
use std::path::Path;
use std::time::UNIX_EPOCH;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Side-car file name inside every index directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Identity of one source file at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFile {
    /// Path relative to the documents root, `/`-separated.
    pub name: String,
    pub size: u64,
    /// Modification time in whole seconds since the Unix epoch.
    pub mtime: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    pub files: Vec<DocumentFile>,
}

impl Manifest {
    pub fn new(files: Vec<DocumentFile>) -> Self {
        Self { files }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Entries ordered by name.
    pub fn sorted(&self) -> Vec<&DocumentFile> {
        let mut files: Vec<&DocumentFile> = self.files.iter().collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        files
    }
}

/// Outcome of reading a persisted manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestStatus {
    Valid(Manifest),
    /// No side-car in the directory (never built, or a build died midway).
    Missing,
    /// The side-car exists but cannot be read or parsed.
    Corrupt(String),
}

impl ManifestStatus {
    /// Whether the persisted manifest matches `current`. `Missing` and
    /// `Corrupt` never match, which forces a rebuild.
    pub fn matches(&self, current: &Manifest) -> bool {
        match self {
            ManifestStatus::Valid(stored) => manifests_equal(stored, current),
            ManifestStatus::Missing | ManifestStatus::Corrupt(_) => false,
        }
    }
}

/// Stat every name under `docs_root`.
///
/// Files that vanished between listing and stat are left out; any other
/// I/O error is returned.
pub fn snapshot<S: AsRef<str>>(docs_root: &Path, names: &[S]) -> std::io::Result<Manifest> {
    let mut files = Vec::with_capacity(names.len());
    for name in names {
        let name = name.as_ref();
        let path = docs_root.join(name);
        let metadata = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(file = name, "file vanished before stat, omitted from manifest");
                continue;
            }
            Err(e) => return Err(e),
        };
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        files.push(DocumentFile {
            name: name.to_string(),
            size: metadata.len(),
            mtime,
        });
    }
    Ok(Manifest::new(files))
}

/// Order-independent, exact comparison of `(name, size, mtime)` triples.
pub fn manifests_equal(a: &Manifest, b: &Manifest) -> bool {
    a.len() == b.len() && a.sorted() == b.sorted()
}

/// Read `manifest.json` from an index directory.
pub fn read_manifest(index_dir: &Path) -> ManifestStatus {
    let path = index_dir.join(MANIFEST_FILE);
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return ManifestStatus::Missing,
        Err(e) => return ManifestStatus::Corrupt(e.to_string()),
    };
    match serde_json::from_str::<Manifest>(&content) {
        Ok(m) => ManifestStatus::Valid(m),
        Err(e) => ManifestStatus::Corrupt(e.to_string()),
    }
}

/// Write `manifest.json` into an index directory.
pub fn write_manifest(index_dir: &Path, manifest: &Manifest) -> anyhow::Result<()> {
    let path = index_dir.join(MANIFEST_FILE);
    let json = serde_json::to_string_pretty(manifest)?;
    std::fs::write(&path, json)
        .with_context(|| format!("Failed to write manifest: {}", path.display()))?;
    Ok(())
}
