//! Document loaders.
//!
//! A [`DocumentLoader`] turns one source file into text [`Section`]s. The
//! default [`FileLoader`] reads `.txt` and `.md` as UTF-8 and extracts
//! `.pdf` text with `pdf-extract`, producing one section per page.

use std::path::Path;

use anyhow::Result;
use thiserror::Error;

use crate::catalog::DocumentKind;

/// A span of extracted text with its location in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub text: String,
    /// 1-based page number for paginated formats.
    pub page: Option<u32>,
}

/// Extraction error. Loading never panics; the caller skips or fails the build.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("read failed: {0}")]
    Io(#[source] std::io::Error),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
}

/// Pluggable loader; tests substitute counting stubs.
pub trait DocumentLoader: Send + Sync {
    fn load(&self, path: &Path, kind: DocumentKind) -> Result<Vec<Section>>;
}

/// Loader backed by the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileLoader;

impl DocumentLoader for FileLoader {
    fn load(&self, path: &Path, kind: DocumentKind) -> Result<Vec<Section>> {
        let sections = match kind {
            DocumentKind::Text => vec![Section {
                text: read_utf8(path)?,
                page: None,
            }],
            DocumentKind::Markdown => vec![Section {
                text: markdown_to_text(&read_utf8(path)?),
                page: None,
            }],
            DocumentKind::Pdf => {
                let bytes = std::fs::read(path).map_err(ExtractError::Io)?;
                pdf_pages(&extract_pdf(&bytes)?)
            }
        };
        Ok(sections)
    }
}

fn read_utf8(path: &Path) -> Result<String, ExtractError> {
    std::fs::read_to_string(path).map_err(ExtractError::Io)
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

/// Split extracted PDF text on form feeds into numbered pages, dropping blank ones.
fn pdf_pages(text: &str) -> Vec<Section> {
    text.split('\u{c}')
        .enumerate()
        .filter(|(_, page)| !page.trim().is_empty())
        .map(|(i, page)| Section {
            text: page.to_string(),
            page: Some(i as u32 + 1),
        })
        .collect()
}

/// Reduce Markdown to readable text: heading markers and code fences go,
/// everything else is kept verbatim.
fn markdown_to_text(source: &str) -> String {
    source
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .map(|line| {
            let trimmed = line.trim_start();
            if trimmed.starts_with('#') {
                trimmed.trim_start_matches('#').trim_start()
            } else {
                line
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
