//! Result types for the extraction and consolidation stages.

use crate::error::ExtractionError;
use crate::intake::IntakeState;
use crate::record::QuotationRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Format used for run ids; filesystem-safe on every platform.
pub const RUN_ID_FORMAT: &str = "%Y-%m-%dT%H-%M-%SZ";

/// Derive the run id (`2026-10-17T09-30-00Z`) from a run timestamp.
pub fn run_id_for(started_at: &DateTime<Utc>) -> String {
    started_at.format(RUN_ID_FORMAT).to_string()
}

/// One execution of the extraction stage, persisted as a JSON run manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingRun {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    /// Documents that reached `processed`, in processing order.
    pub documents: Vec<String>,
    /// Documents that were skipped, with the reason.
    pub failures: Vec<FailedDocument>,
    /// Raw-text artifact written for this run.
    pub archive: Option<PathBuf>,
    pub dropped_segments: usize,
    /// Every record parsed in this run, in arrival order.
    pub records: Vec<QuotationRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedDocument {
    pub document: String,
    pub error: ExtractionError,
}

/// What happened to a single document during a run.
#[derive(Debug, Clone)]
pub enum DocumentOutcome {
    /// Extracted and parsed; zero records is still a success.
    Parsed {
        document: String,
        records: usize,
        partial: usize,
        dropped_segments: usize,
    },
    /// Text extraction failed; the document was skipped.
    Skipped {
        document: String,
        error: ExtractionError,
    },
}

/// Counters reported at the end of the extraction stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub documents_processed: usize,
    pub documents_skipped: usize,
    /// Pending documents left untouched because the run was interrupted.
    pub documents_not_attempted: usize,
    pub records_parsed: usize,
    pub partial_records: usize,
    pub segments_dropped: usize,
    pub duration_ms: u64,
}

/// Everything the extraction stage produced.
#[derive(Debug)]
pub struct ExtractionOutput {
    pub run: ProcessingRun,
    /// Intake state after the run's transitions.
    pub state: IntakeState,
    pub outcomes: Vec<DocumentOutcome>,
    pub stats: ExtractionStats,
    /// Where the run manifest was written (None when nothing was pending).
    pub manifest: Option<PathBuf>,
}

impl ExtractionOutput {
    /// True when at least one document failed extraction.
    pub fn has_failures(&self) -> bool {
        self.stats.documents_skipped > 0
    }
}

/// Counters reported at the end of the consolidation stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationStats {
    /// Run ids whose records were merged.
    pub runs: Vec<String>,
    pub records_added: usize,
    pub records_deduplicated: usize,
    /// Deduplicated records that were partial or had no description.
    pub partial_deduplicated: usize,
    /// Row count of the store after the merge.
    pub store_rows: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn run_id_is_filesystem_safe() {
        let ts = Utc.with_ymd_and_hms(2026, 10, 17, 9, 30, 5).unwrap();
        let id = run_id_for(&ts);
        assert_eq!(id, "2026-10-17T09-30-05Z");
        assert!(!id.contains(':'));
    }

    #[test]
    fn run_ids_sort_chronologically() {
        let a = run_id_for(&Utc.with_ymd_and_hms(2026, 1, 2, 23, 0, 0).unwrap());
        let b = run_id_for(&Utc.with_ymd_and_hms(2026, 10, 1, 1, 0, 0).unwrap());
        assert!(a < b);
    }
}
