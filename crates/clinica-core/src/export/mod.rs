//! Lot artifact and summary exports.

mod summary;
mod tiss_xml;

pub use summary::*;
pub use tiss_xml::*;

use thiserror::Error;

/// Export errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExportError {
    #[error("Lote {0} has no guides")]
    EmptyLote(u64),

    #[error("Guides do not match lote {0} membership")]
    Membership(u64),

    #[error("Operator mismatch: lote is for {expected}, got {actual}")]
    OperatorMismatch { expected: String, actual: String },
}

pub type ExportResult<T> = Result<T, ExportError>;

/// Escape a string for CSV output.
pub(crate) fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
