//! Stage entry points: extraction, consolidation, and both in sequence.
//!
//! ## Why two stages?
//!
//! Extraction (slow, native code, per-document failures) and consolidation
//! (fast, all-or-nothing store replace) fail in different ways. They hand
//! off through *run manifests*: JSON files in `output/runs/pending/`, one
//! per extraction run, holding that run's records. Consolidation merges every
//! pending manifest into the store and only then moves them to
//! `output/runs/merged/`. A failed store write therefore loses nothing; the
//! next `consolidate` picks the same manifests up again.
//!
//! Ordering inside one extraction run:
//!
//! 1. extract + parse each pending document (failures are skipped)
//! 2. write the raw-text archive for the processed documents
//! 3. write the run manifest
//! 4. mark documents processed in the [`IntakeState`]
//! 5. relocate files (processed location; failed location if quarantining)

use crate::archive::{self, ArchivedDocument};
use crate::config::PipelineConfig;
use crate::error::QuoteError;
use crate::intake::{self, IntakeState};
use crate::output::{
    run_id_for, ConsolidationStats, DocumentOutcome, ExtractionOutput, ExtractionStats,
    FailedDocument, ProcessingRun,
};
use crate::pipeline::extract::{extract_with_timeout, TextExtractor};
use crate::pipeline::parse::FieldParser;
use crate::store::ConsolidatedStore;
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::NamedTempFile;
use tracing::{info, warn};

/// Run the extraction stage over every pending document in `state`.
///
/// # Returns
/// `Ok(ExtractionOutput)` even when some documents failed (check
/// [`ExtractionOutput::has_failures`]); the returned state reflects every
/// transition made.
///
/// # Errors
/// Only fatal conditions: the archive or manifest could not be written, or a
/// document could not be relocated.
pub async fn run_extraction(
    config: &PipelineConfig,
    extractor: Arc<dyn TextExtractor>,
    mut state: IntakeState,
) -> Result<ExtractionOutput, QuoteError> {
    let started = Instant::now();
    let started_at = Utc::now().trunc_subsecs(0);
    let run_id = unique_run_id(config, &started_at);
    let progress = config.progress();
    let parser = FieldParser::from_config(config);

    let pending = state.pending();
    let total = pending.len();
    info!("Run {run_id}: {total} pending document(s)");
    progress.on_run_start(&run_id, total);

    let mut run = ProcessingRun {
        run_id: run_id.clone(),
        started_at,
        documents: Vec::new(),
        failures: Vec::new(),
        archive: None,
        dropped_segments: 0,
        records: Vec::new(),
    };
    let mut outcomes = Vec::with_capacity(total);
    let mut archived = Vec::new();
    let mut stats = ExtractionStats::default();

    // ── Step 1: extract and parse ────────────────────────────────────────
    for (index, document) in pending.iter().enumerate() {
        if config.shutdown_requested() {
            stats.documents_not_attempted = total - index;
            warn!(
                "Interrupted; {} document(s) left pending",
                stats.documents_not_attempted
            );
            break;
        }

        state.begin(document)?;
        progress.on_document_start(document, index + 1, total);
        let path = config.input_dir.join(document);

        match extract_with_timeout(
            Arc::clone(&extractor),
            &path,
            config.extraction_timeout_secs,
        )
        .await
        {
            Ok(pages) => {
                let mut parsed = parser.parse(document, &pages, started_at);
                let records: Vec<_> = parsed.by_ref().collect();
                let dropped = parsed.dropped_segments();
                let partial = parsed.partial_records();

                info!(
                    "{document}: {} record(s), {partial} partial, {dropped} segment(s) dropped",
                    records.len()
                );
                progress.on_document_complete(document, records.len(), dropped);

                stats.records_parsed += records.len();
                stats.partial_records += partial;
                stats.segments_dropped += dropped;
                run.dropped_segments += dropped;
                outcomes.push(DocumentOutcome::Parsed {
                    document: document.clone(),
                    records: records.len(),
                    partial,
                    dropped_segments: dropped,
                });
                run.records.extend(records);
                run.documents.push(document.clone());
                archived.push(ArchivedDocument {
                    document: document.clone(),
                    pages,
                });
            }
            Err(error) => {
                warn!("Skipping {document}: {error}");
                progress.on_document_error(document, &error.to_string());
                state.mark_failed(document)?;
                stats.documents_skipped += 1;
                run.failures.push(FailedDocument {
                    document: document.clone(),
                    error: error.clone(),
                });
                outcomes.push(DocumentOutcome::Skipped {
                    document: document.clone(),
                    error,
                });
            }
        }
    }

    let attempted = run.documents.len() + run.failures.len();
    let mut manifest = None;

    if attempted > 0 {
        // ── Step 2: archive ──────────────────────────────────────────────
        if !archived.is_empty() {
            run.archive = Some(archive::write_archive(
                &config.archive_dir(),
                &run_id,
                &archived,
            )?);
        }

        // ── Step 3: manifest ─────────────────────────────────────────────
        manifest = Some(write_manifest(&config.pending_runs_dir(), &run)?);

        // ── Step 4: transitions ──────────────────────────────────────────
        for document in &run.documents {
            state.mark_processed(document)?;
        }

        // ── Step 5: relocation ───────────────────────────────────────────
        let failed: Vec<String> = run.failures.iter().map(|f| f.document.clone()).collect();
        intake::relocate(config, &run_id, &state, &run.documents, &failed)?;
    } else {
        info!("Nothing to extract");
    }

    stats.documents_processed = run.documents.len();
    stats.duration_ms = started.elapsed().as_millis() as u64;
    progress.on_run_complete(stats.documents_processed, stats.documents_skipped);

    info!(
        "Run {run_id} complete: {} processed, {} skipped, {} records ({} partial), {} segments dropped, {}ms",
        stats.documents_processed,
        stats.documents_skipped,
        stats.records_parsed,
        stats.partial_records,
        stats.segments_dropped,
        stats.duration_ms
    );

    Ok(ExtractionOutput {
        run,
        state,
        outcomes,
        stats,
        manifest,
    })
}

/// Merge every pending run manifest into the store, oldest first.
///
/// Manifests move to `runs/merged/` only after the store write succeeded.
/// Running it again with nothing pending changes nothing.
pub fn run_consolidation(config: &PipelineConfig) -> Result<ConsolidationStats, QuoteError> {
    let manifests = pending_manifests(config)?;
    let mut store = ConsolidatedStore::load(config.store_path())?;
    let mut stats = ConsolidationStats::default();

    if manifests.is_empty() {
        info!("No pending run manifests");
        stats.store_rows = store.len();
        return Ok(stats);
    }

    for path in &manifests {
        let run = read_manifest(path)?;
        let outcome = store.merge(run.records);
        info!(
            "Run {}: {} added, {} duplicate(s)",
            run.run_id, outcome.added, outcome.duplicates
        );
        stats.records_added += outcome.added;
        stats.records_deduplicated += outcome.duplicates;
        stats.partial_deduplicated += outcome.partial_duplicates;
        stats.runs.push(run.run_id);
    }

    store.save(&stats.runs)?;
    stats.store_rows = store.len();

    let merged_dir = config.merged_runs_dir();
    std::fs::create_dir_all(&merged_dir).map_err(|e| QuoteError::ManifestFailed {
        path: merged_dir.clone(),
        detail: e.to_string(),
    })?;
    for path in &manifests {
        let Some(name) = path.file_name() else {
            continue;
        };
        std::fs::rename(path, merged_dir.join(name)).map_err(|e| QuoteError::ManifestFailed {
            path: path.clone(),
            detail: format!("store updated but manifest not moved: {e}"),
        })?;
    }

    info!(
        "Consolidated {} run(s): {} added, {} deduplicated, {} rows",
        stats.runs.len(),
        stats.records_added,
        stats.records_deduplicated,
        stats.store_rows
    );
    Ok(stats)
}

/// Re-parse a run archive and merge its records (recovery path).
///
/// Archive documents are parsed with the current configuration; records
/// whose keys are already in the store are counted as duplicates.
pub fn consolidate_archive(
    config: &PipelineConfig,
    archive_path: &Path,
) -> Result<ConsolidationStats, QuoteError> {
    let documents = archive::read_archive(archive_path)?;
    let run_id = archive_run_id(archive_path);
    let extracted_at = run_id
        .get(..20)
        .and_then(|id| NaiveDateTime::parse_from_str(id, crate::output::RUN_ID_FORMAT).ok())
        .map(|naive| naive.and_utc())
        .unwrap_or_else(|| Utc::now().trunc_subsecs(0));

    let parser = FieldParser::from_config(config);
    let records: Vec<_> = documents
        .iter()
        .flat_map(|doc| parser.parse(&doc.document, &doc.pages, extracted_at))
        .collect();

    let mut store = ConsolidatedStore::load(config.store_path())?;
    let outcome = store.merge(records);
    let runs = vec![run_id];
    store.save(&runs)?;

    info!(
        "Re-parsed {} document(s) from {}: {} added, {} duplicate(s)",
        documents.len(),
        archive_path.display(),
        outcome.added,
        outcome.duplicates
    );

    Ok(ConsolidationStats {
        runs,
        records_added: outcome.added,
        records_deduplicated: outcome.duplicates,
        partial_deduplicated: outcome.partial_duplicates,
        store_rows: store.len(),
    })
}

/// Extraction followed by consolidation. Consolidation runs even when some
/// documents failed; their records simply are not there.
pub async fn run_pipeline(
    config: &PipelineConfig,
    extractor: Arc<dyn TextExtractor>,
    state: IntakeState,
) -> Result<(ExtractionOutput, ConsolidationStats), QuoteError> {
    let extraction = run_extraction(config, extractor, state).await?;
    let consolidation = run_consolidation(config)?;
    Ok((extraction, consolidation))
}

/// Pending manifests, oldest run first.
pub fn pending_manifests(config: &PipelineConfig) -> Result<Vec<PathBuf>, QuoteError> {
    let dir = config.pending_runs_dir();
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(&dir).map_err(|e| QuoteError::ManifestFailed {
        path: dir.clone(),
        detail: e.to_string(),
    })?;

    let mut manifests: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    manifests.sort_by_cached_key(|p| manifest_order(p));
    Ok(manifests)
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Run id from the run timestamp, suffixed (`…Z-2`) if an earlier run in the
/// same second already left an archive or manifest behind.
fn unique_run_id(config: &PipelineConfig, started_at: &DateTime<Utc>) -> String {
    let base = run_id_for(started_at);
    let taken = |id: &str| {
        archive::archive_path(&config.archive_dir(), id).exists()
            || config.pending_runs_dir().join(manifest_name(id)).exists()
            || config.merged_runs_dir().join(manifest_name(id)).exists()
    };
    if !taken(&base) {
        return base;
    }
    let mut n = 2u32;
    loop {
        let candidate = format!("{base}-{n}");
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn manifest_name(run_id: &str) -> String {
    format!("run_{run_id}.json")
}

/// `(timestamp, same-second sequence)`; `…Z` sorts before `…Z-2`.
fn manifest_order(path: &Path) -> (String, u32) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let id = stem.strip_prefix("run_").unwrap_or(&stem);
    match id.rsplit_once("Z-").map(|(base, n)| (base, n.parse::<u32>())) {
        Some((base, Ok(n))) => (format!("{base}Z"), n),
        _ => (id.to_string(), 1),
    }
}

fn archive_run_id(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.strip_suffix(".txt").unwrap_or(&name);
    stem.strip_prefix("run_").unwrap_or(stem).to_string()
}

fn write_manifest(dir: &Path, run: &ProcessingRun) -> Result<PathBuf, QuoteError> {
    let path = dir.join(manifest_name(&run.run_id));
    let fail = |detail: String| QuoteError::ManifestFailed {
        path: path.clone(),
        detail,
    };

    std::fs::create_dir_all(dir).map_err(|e| fail(e.to_string()))?;
    let json = serde_json::to_vec_pretty(run).map_err(|e| fail(e.to_string()))?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| fail(e.to_string()))?;
    tmp.write_all(&json).map_err(|e| fail(e.to_string()))?;
    tmp.as_file().sync_all().map_err(|e| fail(e.to_string()))?;
    tmp.persist_noclobber(&path)
        .map_err(|e| fail(e.error.to_string()))?;

    info!("Wrote run manifest {}", path.display());
    Ok(path)
}

fn read_manifest(path: &Path) -> Result<ProcessingRun, QuoteError> {
    let fail = |detail: String| QuoteError::ManifestFailed {
        path: path.to_path_buf(),
        detail,
    };
    let bytes = std::fs::read(path).map_err(|e| fail(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| fail(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_run_id_from_file_name() {
        assert_eq!(
            archive_run_id(Path::new("out/archive/run_2026-10-17T09-00-00Z.txt")),
            "2026-10-17T09-00-00Z"
        );
        assert_eq!(
            archive_run_id(Path::new("run_2026-10-17T09-00-00Z.1.txt")),
            "2026-10-17T09-00-00Z.1"
        );
        assert_eq!(archive_run_id(Path::new("manual.txt")), "manual");
    }

    #[test]
    fn run_id_suffix_when_taken() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = PipelineConfig::builder()
            .output_dir(dir.path())
            .build()
            .unwrap();
        let ts = Utc::now().trunc_subsecs(0);
        let first = unique_run_id(&config, &ts);
        std::fs::create_dir_all(config.pending_runs_dir()).unwrap();
        std::fs::write(config.pending_runs_dir().join(manifest_name(&first)), b"{}").unwrap();
        let second = unique_run_id(&config, &ts);
        assert_eq!(second, format!("{first}-2"));
    }

    #[test]
    fn same_second_manifests_merge_in_run_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = PipelineConfig::builder()
            .output_dir(dir.path())
            .build()
            .unwrap();
        let pending = config.pending_runs_dir();
        std::fs::create_dir_all(&pending).unwrap();
        for id in [
            "2026-10-17T09-00-00Z-10",
            "2026-10-17T09-00-00Z-2",
            "2026-10-17T09-00-00Z",
            "2026-10-17T08-59-59Z",
        ] {
            std::fs::write(pending.join(manifest_name(id)), b"{}").unwrap();
        }
        let names: Vec<_> = pending_manifests(&config)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            [
                "run_2026-10-17T08-59-59Z.json",
                "run_2026-10-17T09-00-00Z.json",
                "run_2026-10-17T09-00-00Z-2.json",
                "run_2026-10-17T09-00-00Z-10.json",
            ]
        );
    }
}
