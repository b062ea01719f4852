//! Plain-text extraction from downloaded PDFs.
//!
//! Extraction is CPU-bound and synchronous; async callers run it on the
//! blocking pool.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Errors produced while extracting text from a PDF.
#[derive(Debug, Error)]
pub enum PdfTextError {
    /// The PDF could not be parsed.
    #[error("failed to extract text from {path}: {message}")]
    Extract { path: PathBuf, message: String },

    /// The parser aborted on a malformed document.
    #[error("PDF parser aborted on {path}")]
    Aborted { path: PathBuf },
}

/// Extracts the text layer of the PDF at `path`.
///
/// # Errors
///
/// Returns [`PdfTextError`] if the file is unreadable or malformed.
pub fn extract_text(path: &Path) -> Result<String, PdfTextError> {
    // The parser panics on some malformed inputs instead of returning errors.
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text(path)));
    match outcome {
        Ok(Ok(text)) => {
            debug!(path = %path.display(), chars = text.len(), "extracted PDF text");
            Ok(text)
        }
        Ok(Err(e)) => Err(PdfTextError::Extract {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
        Err(_) => Err(PdfTextError::Aborted {
            path: path.to_path_buf(),
        }),
    }
}
