//! Record Consolidator: the canonical CSV store.
//!
//! The store is read fully into memory, merged, and written back with an
//! atomic replace (temp file in the same directory, then rename). Readers
//! therefore see either the old store or the new one, never a torn file.
//!
//! De-duplication uses [`RecordKey`]. Keys of freshly appended records join
//! the key set, so duplicates *within* one batch collapse too, and merging
//! the same batch twice adds nothing the second time.

use crate::error::QuoteError;
use crate::record::{QuotationRecord, RecordKey, STORE_COLUMNS};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Counts from one [`ConsolidatedStore::merge`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub added: usize,
    pub duplicates: usize,
    /// Duplicates that were partial or had no description. Their keys are
    /// weak, so these may be distinct items lost to the merge.
    pub partial_duplicates: usize,
}

/// In-memory view of the store file.
#[derive(Debug)]
pub struct ConsolidatedStore {
    path: PathBuf,
    records: Vec<QuotationRecord>,
    keys: HashSet<RecordKey>,
    existed: bool,
    added: usize,
}

impl ConsolidatedStore {
    /// Load the store at `path`. A missing (or zero-length) file is an empty
    /// store; a header other than the expected columns is fatal.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, QuoteError> {
        let path = path.into();
        let format_error = |detail: String| QuoteError::StoreFormat {
            path: path.clone(),
            detail,
        };

        let existed = path.exists();
        let empty = !existed
            || std::fs::metadata(&path)
                .map(|m| m.len() == 0)
                .map_err(|e| format_error(e.to_string()))?;

        let mut records = Vec::new();
        if !empty {
            let mut reader = csv::Reader::from_path(&path).map_err(|e| format_error(e.to_string()))?;
            let headers = reader
                .headers()
                .map_err(|e| format_error(e.to_string()))?
                .clone();
            if !headers.iter().eq(STORE_COLUMNS.iter().copied()) {
                return Err(format_error(format!(
                    "unexpected header [{}], expected [{}]",
                    headers.iter().collect::<Vec<_>>().join(", "),
                    STORE_COLUMNS.join(", ")
                )));
            }
            for row in reader.deserialize::<QuotationRecord>() {
                records.push(row.map_err(|e| format_error(e.to_string()))?);
            }
        }

        let keys = records.iter().map(QuotationRecord::key).collect();
        debug!("Loaded store {} ({} rows)", path.display(), records.len());

        Ok(Self {
            path,
            records,
            keys,
            existed,
            added: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[QuotationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.keys.contains(key)
    }

    /// Append unseen records in arrival order; count the rest as duplicates.
    pub fn merge(&mut self, incoming: impl IntoIterator<Item = QuotationRecord>) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        for record in incoming {
            if self.keys.insert(record.key()) {
                self.records.push(record);
                outcome.added += 1;
            } else {
                outcome.duplicates += 1;
                if !record.is_complete() || record.description.is_none() {
                    outcome.partial_duplicates += 1;
                    warn!(
                        document = %record.source_document,
                        quotation = record.quotation_number.as_deref().unwrap_or("-"),
                        item = record.item_no,
                        review_text = record.review_text.as_deref().unwrap_or(""),
                        "Partial record collapsed into an existing row; review text not stored"
                    );
                }
            }
        }
        self.added += outcome.added;
        outcome
    }

    /// Persist the store. `runs` names the runs whose records are being
    /// merged, for the error report if the replace fails.
    ///
    /// Returns `false` when nothing changed and the file already exists (the
    /// file is left untouched).
    pub fn save(&self, runs: &[String]) -> Result<bool, QuoteError> {
        if self.added == 0 && self.existed {
            debug!("Store unchanged; skipping write");
            return Ok(false);
        }

        self.write_atomic().map_err(|source| QuoteError::StoreWriteFailure {
            path: self.path.clone(),
            runs: runs.to_vec(),
            source,
        })?;

        info!(
            "Wrote store {} ({} rows, {} new)",
            self.path.display(),
            self.records.len(),
            self.added
        );
        Ok(true)
    }

    fn write_atomic(&self) -> std::io::Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(&mut tmp);
            writer.write_record(STORE_COLUMNS)?;
            for record in &self.records {
                writer.serialize(record)?;
            }
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ParseConfidence;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn record(doc: &str, description: &str) -> QuotationRecord {
        QuotationRecord {
            source_document: doc.into(),
            supplier: Some("Acme, Inc.".into()),
            quotation_number: Some("Q-1".into()),
            description: Some(description.into()),
            quantity: Some(2.0),
            unit_price: Some(1.25),
            currency: Some("USD".into()),
            line_total: Some(2.5),
            extracted_at: Utc.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap(),
            confidence: ParseConfidence::Complete,
            item_no: 1,
            part_number: None,
            discount: None,
            delivery_time: None,
            quotation_date: Some("12.10.2026".into()),
            customer_code: Some("K-2231".into()),
            enquiry: None,
            reference: None,
            review_text: None,
        }
    }

    #[test]
    fn missing_store_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = ConsolidatedStore::load(dir.path().join("s.csv")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn in_batch_duplicates_collapse() {
        let dir = TempDir::new().unwrap();
        let mut store = ConsolidatedStore::load(dir.path().join("s.csv")).unwrap();
        let outcome = store.merge(vec![record("a.pdf", "Bolt"), record("a.pdf", "Bolt")]);
        assert_eq!(
            outcome,
            MergeOutcome {
                added: 1,
                duplicates: 1,
                partial_duplicates: 0
            }
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn description_less_partials_are_counted_when_collapsed() {
        let dir = TempDir::new().unwrap();
        let mut store = ConsolidatedStore::load(dir.path().join("s.csv")).unwrap();
        let partial = |item_no: u32, raw: &str| QuotationRecord {
            description: None,
            confidence: ParseConfidence::Partial,
            item_no,
            review_text: Some(raw.into()),
            ..record("a.pdf", "")
        };
        let outcome = store.merge(vec![
            partial(1, "1,250 pcs $3.40"),
            partial(2, "40 pcs $0.05"),
        ]);
        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.partial_duplicates, 1);
        assert_eq!(store.records()[0].review_text.as_deref(), Some("1,250 pcs $3.40"));
    }

    #[test]
    fn save_then_load_preserves_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("s.csv");
        let mut rec = record("a.pdf", "Bolt, \"hex\"\nzinc plated");
        rec.review_text = Some("10 Bolt\n  \"raw\", text".into());
        rec.confidence = ParseConfidence::Partial;
        rec.quantity = None;

        let mut store = ConsolidatedStore::load(&path).unwrap();
        store.merge(vec![rec.clone()]);
        assert!(store.save(&["r1".into()]).unwrap());

        let reloaded = ConsolidatedStore::load(&path).unwrap();
        assert_eq!(reloaded.records(), &[rec]);
    }

    #[test]
    fn header_matches_columns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.csv");
        let mut store = ConsolidatedStore::load(&path).unwrap();
        store.merge(vec![record("a.pdf", "Bolt")]);
        store.save(&[]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().next().unwrap(), STORE_COLUMNS.join(","));
    }

    #[test]
    fn unchanged_store_is_not_rewritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.csv");
        let mut store = ConsolidatedStore::load(&path).unwrap();
        store.merge(vec![record("a.pdf", "Bolt")]);
        store.save(&[]).unwrap();

        let mut again = ConsolidatedStore::load(&path).unwrap();
        let outcome = again.merge(vec![record("a.pdf", "Bolt")]);
        assert_eq!(outcome.added, 0);
        assert!(!again.save(&[]).unwrap());
    }

    #[test]
    fn empty_store_file_gets_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.csv");
        let store = ConsolidatedStore::load(&path).unwrap();
        assert!(store.save(&[]).unwrap());
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim_end(), STORE_COLUMNS.join(","));
    }

    #[test]
    fn foreign_csv_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.csv");
        std::fs::write(&path, "name,price\nbolt,1.00\n").unwrap();
        let err = ConsolidatedStore::load(&path).unwrap_err();
        assert!(matches!(err, QuoteError::StoreFormat { .. }));
    }

    #[test]
    fn failed_replace_names_runs() {
        let dir = TempDir::new().unwrap();
        // The store path is a directory, so the rename cannot succeed.
        let path = dir.path().join("s.csv");
        std::fs::create_dir(&path).unwrap();
        let store = ConsolidatedStore {
            path: path.clone(),
            records: vec![record("a.pdf", "Bolt")],
            keys: HashSet::new(),
            existed: false,
            added: 1,
        };
        let err = store.save(&["2026-10-17T09-00-00Z".into()]).unwrap_err();
        match err {
            QuoteError::StoreWriteFailure { runs, .. } => {
                assert_eq!(runs, vec!["2026-10-17T09-00-00Z".to_string()])
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(path.is_dir());
    }
}
