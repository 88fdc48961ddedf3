//! # quote2csv
//!
//! Batch-extract line items from vendor quotation PDFs and consolidate them
//! into one canonical CSV store.
//!
//! ## Why this crate?
//!
//! Quotations arrive as PDFs in every layout a vendor's ERP can print. This
//! crate reads their text layer with pdfium, recognises line items with a
//! small set of prioritised layout templates (no model calls, no network),
//! normalises locale-specific numbers and currency symbols, and merges the
//! result into a de-duplicated CSV that downstream tools can trust: it is
//! only ever replaced atomically.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input dir (*.pdf)
//!  │
//!  ├─ 1. Intake       explicit IntakeState: pending → extracting → processed / failed
//!  ├─ 2. Extract      pdfium text per page (spawn_blocking + per-document timeout)
//!  ├─ 3. Parse        segments → layout templates → normalised QuotationRecords
//!  ├─ 4. Archive      raw text of the run → output/archive/run_<id>.txt
//!  ├─ 5. Manifest     run records → output/runs/pending/run_<id>.json
//!  └─ 6. Consolidate  manifests → output/quotation_records.csv (dedup, atomic)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quote2csv::{
//!     run_consolidation, run_extraction, IntakeState, PdfiumExtractor, PipelineConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .input_dir("quotations")
//!         .output_dir("output")
//!         .build()?;
//!     let state = IntakeState::scan(&config)?;
//!     let extractor = Arc::new(PdfiumExtractor::new(None, None));
//!
//!     let extraction = run_extraction(&config, extractor, state).await?;
//!     let merged = run_consolidation(&config)?;
//!     eprintln!(
//!         "{} documents, {} skipped, {} rows added",
//!         extraction.stats.documents_processed,
//!         extraction.stats.documents_skipped,
//!         merged.records_added
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `quote2csv` binary (clap + anyhow + tracing-subscriber + indicatif + dotenvy) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! quote2csv = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod archive;
pub mod config;
pub mod error;
pub mod intake;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod record;
pub mod run;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{FailurePolicy, NumberFormat, PipelineConfig, PipelineConfigBuilder};
pub use error::{ExtractionError, QuoteError};
pub use intake::{DocumentState, IntakeState};
pub use output::{
    ConsolidationStats, DocumentOutcome, ExtractionOutput, ExtractionStats, ProcessingRun,
};
pub use pipeline::extract::{PdfiumExtractor, TextExtractor};
pub use pipeline::parse::FieldParser;
pub use progress::{NoopProgressCallback, ProgressCallback, RunProgressCallback};
pub use record::{ParseConfidence, QuotationRecord};
pub use run::{consolidate_archive, run_consolidation, run_extraction, run_pipeline};
pub use store::ConsolidatedStore;
