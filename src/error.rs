//! Error types for the quote2csv library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`QuoteError`] is **fatal**: a stage cannot proceed at all (input
//!   directory missing, store file unreadable, the atomic store replace
//!   failed). Returned as `Err(QuoteError)` from the top-level `run_*`
//!   functions.
//!
//! * [`ExtractionError`] is **non-fatal**: a single document could not be
//!   turned into text (corrupt file, wrong password, timeout) but every other
//!   document in the batch is fine. Stored inside
//!   [`crate::output::DocumentOutcome`] so the run summary can report it
//!   while the batch carries on.
//!
//! Parse ambiguity and duplicate keys are deliberately *not* errors: they
//! degrade to partial or dropped records and surface only as counts in the
//! run summary.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the quote2csv library.
///
/// Document-level failures use [`ExtractionError`] and are recorded in the
/// run output rather than propagated here.
#[derive(Debug, Error)]
pub enum QuoteError {
    // ── Intake errors ─────────────────────────────────────────────────────
    /// The configured input directory does not exist.
    #[error("Input directory not found: '{path}'\nSet --input-dir or QUOTE2CSV_INPUT_DIR.")]
    InputDirNotFound { path: PathBuf },

    /// Listing or relocating documents failed.
    #[error("Intake I/O failed for '{path}': {source}")]
    IntakeIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Archive / manifest errors ─────────────────────────────────────────
    /// The run archive could not be written.
    #[error("Failed to write run archive '{path}': {source}")]
    ArchiveWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An archive artifact could not be read back.
    #[error("Failed to read run archive '{path}': {detail}")]
    ArchiveReadFailed { path: PathBuf, detail: String },

    /// A run manifest could not be written, read, or moved.
    #[error("Run manifest '{path}' failed: {detail}")]
    ManifestFailed { path: PathBuf, detail: String },

    // ── Store errors ──────────────────────────────────────────────────────
    /// The existing store is not a valid quotation CSV.
    #[error("Store '{path}' is not a valid quotation CSV: {detail}")]
    StoreFormat { path: PathBuf, detail: String },

    /// The atomic replace of the store failed; the prior store is untouched.
    #[error(
        "Failed to write store '{path}': {source}\n\
The previous store is unchanged. Records from run(s) {} were not merged; \
re-run `quote2csv consolidate` to retry.",
        .runs.join(", ")
    )]
    StoreWriteFailure {
        path: PathBuf,
        runs: Vec<String>,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single source document.
///
/// The document is reported and skipped; it never advances to `processed`.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ExtractionError {
    /// The document vanished between scanning and extraction.
    #[error("{document}: file not found")]
    NotFound { document: String },

    /// The file is readable but is not a PDF.
    #[error("{document}: not a PDF (first bytes {magic:?})")]
    NotAPdf { document: String, magic: [u8; 4] },

    /// pdfium could not parse the document.
    #[error("{document}: corrupt PDF: {detail}")]
    CorruptPdf { document: String, detail: String },

    /// The document is encrypted and no (or a wrong) password was supplied.
    #[error("{document}: PDF is encrypted; supply --pdf-password")]
    PasswordRequired { document: String },

    /// Extraction exceeded the per-document timeout.
    #[error("{document}: extraction timed out after {secs}s")]
    Timeout { document: String, secs: u64 },

    /// No pdfium library could be bound.
    #[error("pdfium library unavailable: {detail}\nSet PDFIUM_LIB_PATH=/path/to/libpdfium.")]
    PdfiumUnavailable { detail: String },

    /// Any other I/O failure while reading the document.
    #[error("{document}: I/O error: {detail}")]
    Io { document: String, detail: String },
}

impl ExtractionError {
    /// Short machine-friendly label, used in the run manifest and CLI summary.
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractionError::NotFound { .. } => "not_found",
            ExtractionError::NotAPdf { .. } => "not_a_pdf",
            ExtractionError::CorruptPdf { .. } => "corrupt_pdf",
            ExtractionError::PasswordRequired { .. } => "password_required",
            ExtractionError::Timeout { .. } => "timeout",
            ExtractionError::PdfiumUnavailable { .. } => "pdfium_unavailable",
            ExtractionError::Io { .. } => "io",
        }
    }
}
