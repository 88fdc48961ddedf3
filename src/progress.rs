//! Progress-callback trait for per-document extraction events.
//!
//! Inject an [`Arc<dyn RunProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the extraction stage works through the pending documents. The
//! CLI uses it to drive an `indicatif` progress bar; library callers can
//! forward events anywhere without the pipeline knowing how.
//!
//! # Example
//!
//! ```rust
//! use quote2csv::{PipelineConfig, RunProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     records: AtomicUsize,
//! }
//!
//! impl RunProgressCallback for CountingCallback {
//!     fn on_document_complete(&self, _document: &str, records: usize, _dropped: usize) {
//!         self.records.fetch_add(records, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { records: AtomicUsize::new(0) });
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn RunProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the extraction stage as it processes each document.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Implementations must be `Send + Sync` because the
/// config holding them is shared with blocking extraction tasks.
pub trait RunProgressCallback: Send + Sync {
    /// Called once before the first document, with the number of pending
    /// documents in this run.
    fn on_run_start(&self, run_id: &str, total_documents: usize) {
        let _ = (run_id, total_documents);
    }

    /// Called just before a document's text is extracted.
    fn on_document_start(&self, document: &str, index: usize, total_documents: usize) {
        let _ = (document, index, total_documents);
    }

    /// Called when a document has been extracted and parsed.
    ///
    /// # Arguments
    /// * `records`: records emitted (zero is a valid, processed outcome)
    /// * `dropped`: segments that matched no layout template
    fn on_document_complete(&self, document: &str, records: usize, dropped: usize) {
        let _ = (document, records, dropped);
    }

    /// Called when a document is skipped because extraction failed.
    fn on_document_error(&self, document: &str, error: &str) {
        let _ = (document, error);
    }

    /// Called once after all documents have been attempted (or the run was
    /// interrupted).
    fn on_run_complete(&self, processed: usize, failed: usize) {
        let _ = (processed, failed);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn RunProgressCallback>;
