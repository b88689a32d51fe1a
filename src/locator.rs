//! Process locator: resolves a case identifier to its folder in the archive.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::case_id::{CaseId, CaseIdError};

/// Failure of a case lookup, listing, or type filter.
///
/// The three kinds are kept apart so callers (the agent layer included) can
/// tell an absent case from a malformed request or a broken disk.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("Process not found: {case}")]
    NotFound { case: String },

    #[error("Invalid parameters: {0}")]
    InvalidInput(String),

    #[error("Process folder could not be read ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LookupError {
    /// Machine-readable kind used in tool results.
    pub fn kind(&self) -> &'static str {
        match self {
            LookupError::NotFound { .. } => "not_found",
            LookupError::InvalidInput(_) => "invalid_input",
            LookupError::Io { .. } => "io",
        }
    }
}

impl From<CaseIdError> for LookupError {
    fn from(err: CaseIdError) -> Self {
        LookupError::InvalidInput(err.to_string())
    }
}

/// A case folder that exists in the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseFolder {
    #[serde(skip)]
    pub case: CaseId,
    /// Folder name, e.g. `SEI_123_2024`.
    pub folder: String,
    #[serde(skip)]
    pub path: PathBuf,
}

/// Normalize `raw` and check that `<root>/<SEI_NNN_YYYY>` is a directory.
///
/// A missing archive root is reported as [`LookupError::NotFound`]: the
/// archive may simply not have been downloaded yet.
pub fn locate_case(root: &Path, raw: &str) -> Result<CaseFolder, LookupError> {
    let case: CaseId = raw.parse()?;
    let folder = case.folder_name();
    let path = root.join(&folder);

    match std::fs::metadata(&path) {
        Ok(meta) if meta.is_dir() => {
            debug!(case = %case, folder, "process found");
            Ok(CaseFolder { case, folder, path })
        }
        Ok(_) => Err(LookupError::NotFound {
            case: case.to_string(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(case = %case, folder, "process not found");
            Err(LookupError::NotFound {
                case: case.to_string(),
            })
        }
        Err(source) => Err(LookupError::Io { path, source }),
    }
}
