//! Document catalog: which files under the documents root are indexable.
//!
//! Files are listed recursively and keyed by their `/`-separated path
//! relative to the root. Only `.txt`, `.pdf` and `.md` (any case) are
//! supported. Download side-car artifacts (names containing `:` or ending
//! in `Zone.Identifier`) are never treated as documents.
//!
//! A category is the first path segment of a listed file, so
//! `manuals/pump.pdf` belongs to the `manuals` category.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use serde::Serialize;
use walkdir::WalkDir;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "pdf", "md"];

/// Kind of document, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Text,
    Pdf,
    Markdown,
}

impl DocumentKind {
    pub fn from_name(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" => Some(DocumentKind::Text),
            "pdf" => Some(DocumentKind::Pdf),
            "md" => Some(DocumentKind::Markdown),
            _ => None,
        }
    }
}

/// Platform download metadata that must never be indexed.
pub fn is_artifact(name: &str) -> bool {
    name.contains(':') || name.ends_with("Zone.Identifier")
}

pub fn is_supported(name: &str) -> bool {
    !is_artifact(name) && DocumentKind::from_name(name).is_some()
}

/// Sorted list of supported documents under `docs_root`.
///
/// A missing root yields an empty list. Entries that cannot be read (a
/// permission error, a symlink loop) are skipped with a warning.
pub fn supported_files(docs_root: &Path, follow_symlinks: bool) -> Result<Vec<String>> {
    if !docs_root.exists() {
        tracing::warn!(root = %docs_root.display(), "documents root does not exist");
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(docs_root).follow_links(follow_symlinks) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(root = %docs_root.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(docs_root)
            .unwrap_or(entry.path());
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if is_artifact(&name) {
            tracing::debug!(file = %name, "skipping download artifact");
            continue;
        }
        if DocumentKind::from_name(&name).is_none() {
            tracing::warn!(file = %name, "unsupported file format");
            continue;
        }
        files.push(name);
    }

    files.sort();
    Ok(files)
}

/// Normalize a caller-supplied document key: `\` becomes `/`, surrounding
/// whitespace is trimmed.
pub fn normalize_file_key(key: &str) -> String {
    key.replace('\\', "/").trim().to_string()
}

/// Normalize a caller-supplied category key: `\` becomes `/`, surrounding
/// `/` and whitespace are trimmed.
pub fn normalize_category_key(key: &str) -> String {
    key.replace('\\', "/").trim().trim_matches('/').to_string()
}

/// Category of a document, if it lives in a subdirectory.
pub fn category_of(name: &str) -> Option<&str> {
    name.split_once('/').map(|(head, _)| head)
}

/// A category with its display label and document count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Category {
    pub key: String,
    pub label: String,
    pub total: usize,
}

pub fn category_label(key: &str) -> String {
    key.replace(['_', '-'], " ")
}

/// Categories present in `files`, sorted by key.
pub fn categories(files: &[String]) -> Vec<Category> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for name in files {
        if let Some(cat) = category_of(name) {
            *counts.entry(cat).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .map(|(key, total)| Category {
            key: key.to_string(),
            label: category_label(key),
            total,
        })
        .collect()
}

/// Files under `category/`, in listing order.
pub fn files_in_category(files: &[String], category: &str) -> Vec<String> {
    let prefix = format!("{}/", normalize_category_key(category));
    files
        .iter()
        .filter(|f| f.starts_with(&prefix))
        .cloned()
        .collect()
}
