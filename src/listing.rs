//! Document listing and type filtering for a located case.
//!
//! A "document" is any file below the case folder whose name ends in `.pdf`
//! (exact, case-sensitive suffix). Listings are sorted by file name and
//! paginated with `limit`/`offset`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::locator::{locate_case, LookupError};

/// Extension that marks a file as a document.
pub const DOCUMENT_SUFFIX: &str = ".pdf";

/// Request for one page of a case's documents.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListRequest {
    /// Case identifier in any accepted shape.
    pub id: String,
    /// Maximum number of names to return.
    pub limit: usize,
    /// Number of names to skip.
    #[serde(default)]
    pub offset: usize,
}

impl ListRequest {
    pub fn new(id: impl Into<String>, limit: usize, offset: usize) -> Self {
        Self {
            id: id.into(),
            limit,
            offset,
        }
    }
}

/// One page of a case's documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentPage {
    pub documents: Vec<String>,
    #[serde(rename = "total_number_of_documents")]
    pub total: usize,
}

/// Request for the documents of a case whose name contains a type token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TypeFilterRequest {
    pub id: String,
    pub document_type: String,
}

/// Documents matching a type token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeMatches {
    pub documents: Vec<String>,
    pub number_of_documents: usize,
}

/// Result of a type filter: matches, or a message when there are none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TypeFilterOutcome {
    Found(TypeMatches),
    NoneOfType { message: String },
}

/// All document names below `folder`, sorted ascending.
pub fn collect_documents(folder: &Path) -> Result<Vec<String>, LookupError> {
    let mut documents = Vec::new();
    for entry in WalkDir::new(folder) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(folder).to_path_buf();
            let source = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("filesystem loop detected"));
            LookupError::Io { path, source }
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.ends_with(DOCUMENT_SUFFIX) {
            documents.push(name.into_owned());
        }
    }
    documents.sort();
    Ok(documents)
}

/// Slice `[offset, offset + limit)` of `documents`, clipped to its length.
fn page_of(documents: &[String], limit: usize, offset: usize) -> Vec<String> {
    let start = offset.min(documents.len());
    let end = start.saturating_add(limit).min(documents.len());
    documents[start..end].to_vec()
}

/// List one page of documents of the case named in `request`.
pub fn list_documents(root: &Path, request: &ListRequest) -> Result<DocumentPage, LookupError> {
    let case = locate_case(root, &request.id)?;
    let all = collect_documents(&case.path)?;
    debug!(
        folder = %case.folder,
        total = all.len(),
        limit = request.limit,
        offset = request.offset,
        "listed documents"
    );
    Ok(DocumentPage {
        documents: page_of(&all, request.limit, request.offset),
        total: all.len(),
    })
}

/// Documents of a case whose name contains `document_type`, ignoring case.
pub fn filter_by_type(
    root: &Path,
    request: &TypeFilterRequest,
) -> Result<TypeFilterOutcome, LookupError> {
    let token = request.document_type.trim();
    if token.is_empty() {
        return Err(LookupError::InvalidInput(
            "document_type must not be empty".to_string(),
        ));
    }

    // Probe for the total first, then fetch everything in one page.
    let probe = list_documents(root, &ListRequest::new(request.id.clone(), 0, 0))?;
    let all = list_documents(root, &ListRequest::new(request.id.clone(), probe.total, 0))?;

    let needle = token.to_lowercase();
    let documents: Vec<String> = all
        .documents
        .into_iter()
        .filter(|name| name.to_lowercase().contains(&needle))
        .collect();

    if documents.is_empty() {
        return Ok(TypeFilterOutcome::NoneOfType {
            message: format!(
                "Documents of type {} not found in process {}",
                token,
                request.id.trim()
            ),
        });
    }

    Ok(TypeFilterOutcome::Found(TypeMatches {
        number_of_documents: documents.len(),
        documents,
    }))
}
