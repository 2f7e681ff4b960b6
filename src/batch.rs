//! Sharded pre-indexing.
//!
//! [`plan`] picks a deterministic slice of the sorted file list, either an
//! offset/limit window or one of `ceil(total / batch_size)` fixed batches.
//! Independent workers given different shard parameters cover the corpus
//! without coordinating. [`run_preindex`] then ensures the index of every
//! selected file, carrying on past individual failures.

use crate::catalog::DocumentKind;
use crate::error::{RagError, Result};
use crate::indexer::IndexManager;

/// Shard parameters as supplied by the caller. Offset/limit wins when
/// either of its fields is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchRequest {
    pub offset: Option<i64>,
    pub limit: Option<i64>,
    pub batch_size: Option<i64>,
    /// 1-based.
    pub batch_index: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub files: Vec<String>,
    /// Human-readable summary of the window, e.g. `batch 2/5 (files 10..19)`.
    pub description: String,
}

/// Select the files for one pre-index run.
pub fn plan(files: &[String], req: &BatchRequest) -> Result<Selection> {
    let total = files.len();

    if req.offset.is_some() || req.limit.is_some() {
        let offset = req.offset.unwrap_or(0).max(0) as usize;
        let start = offset.min(total);
        let (end, limit_label) = match req.limit {
            None => (total, "all".to_string()),
            Some(limit) if limit < 0 => {
                return Err(RagError::validation("limit must be a non-negative integer"))
            }
            Some(limit) => (start.saturating_add(limit as usize).min(total), limit.to_string()),
        };
        return Ok(Selection {
            files: files[start..end].to_vec(),
            description: format!("offset={}, limit={}", offset, limit_label),
        });
    }

    if req.batch_size.is_some() || req.batch_index.is_some() {
        let (size, index) = match (req.batch_size, req.batch_index) {
            (Some(size), Some(index)) => (size, index),
            _ => {
                return Err(RagError::validation(
                    "batch size and batch index must be given together",
                ))
            }
        };
        if size <= 0 || index <= 0 {
            return Err(RagError::validation(
                "batch size and batch index must be positive integers",
            ));
        }

        let size = size as usize;
        let index = index as usize;
        let batches = total.div_ceil(size);
        if index > batches {
            return Err(RagError::validation(format!(
                "batch index out of range: {} batches, got {}",
                batches, index
            )));
        }

        let start = (index - 1) * size;
        let end = total.min(start + size);
        return Ok(Selection {
            files: files[start..end].to_vec(),
            description: format!("batch {}/{} (files {}..{})", index, batches, start, end - 1),
        });
    }

    Ok(Selection {
        files: files.to_vec(),
        description: "all files".to_string(),
    })
}

/// Outcome of a pre-index run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreindexReport {
    pub selected: Vec<String>,
    pub description: String,
    pub succeeded: Vec<String>,
    /// `(file, error message)` for every file whose build failed.
    pub failed: Vec<(String, String)>,
}

impl PreindexReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Ensure the index of every selected file.
///
/// `pdf_only` restricts the candidate list to PDFs before planning, so shard
/// parameters address positions in that filtered list. Parameter errors are
/// returned before any work starts; build failures are collected.
pub async fn run_preindex(
    manager: &IndexManager,
    pdf_only: bool,
    force: bool,
    req: &BatchRequest,
) -> Result<PreindexReport> {
    let mut files = manager.list_files()?;
    if pdf_only {
        files.retain(|f| DocumentKind::from_name(f) == Some(DocumentKind::Pdf));
    }
    if files.is_empty() {
        tracing::info!(pdf_only, "no documents to index");
        return Ok(PreindexReport {
            description: "no matching files".to_string(),
            ..PreindexReport::default()
        });
    }

    let selection = plan(&files, req)?;
    let mut report = PreindexReport {
        selected: selection.files.clone(),
        description: selection.description,
        ..PreindexReport::default()
    };

    let total = selection.files.len();
    for (i, file) in selection.files.into_iter().enumerate() {
        tracing::info!(file = %file, "[{}/{}] indexing", i + 1, total);
        match manager.ensure_file_index(&file, force).await {
            Ok(_) => report.succeeded.push(file),
            Err(e) => {
                tracing::warn!(file = %file, error = %e, "pre-index failed");
                report.failed.push((file, e.to_string()));
            }
        }
    }

    Ok(report)
}
