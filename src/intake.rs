//! Intake Manager: which documents still need work.
//!
//! [`IntakeState`] is a plain value mapping document ids to
//! [`DocumentState`]. A run receives it, applies transitions in memory, and
//! hands it back; nothing is inferred from the filesystem mid-run. Moving
//! files is a separate step ([`relocate`]) that reads the final state, which
//! keeps the state machine testable without any directories.
//!
//! ```text
//! pending ──▶ extracting ──▶ processed
//!                  │
//!                  └──────▶ failed-skipped
//! ```

use crate::config::{FailurePolicy, PipelineConfig};
use crate::error::QuoteError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Lifecycle of one source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    Pending,
    Extracting,
    Processed,
    FailedSkipped,
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DocumentState::Pending => "pending",
            DocumentState::Extracting => "extracting",
            DocumentState::Processed => "processed",
            DocumentState::FailedSkipped => "failed-skipped",
        })
    }
}

/// Per-state document counts, for `status` and summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IntakeCounts {
    pub pending: usize,
    pub extracting: usize,
    pub processed: usize,
    pub failed: usize,
}

/// Document id → state, ordered by file name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntakeState {
    documents: BTreeMap<String, DocumentState>,
}

impl IntakeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// A state where every given document is pending.
    pub fn with_pending<I, S>(documents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            documents: documents
                .into_iter()
                .map(|d| (d.into(), DocumentState::Pending))
                .collect(),
        }
    }

    /// Build the state from the configured locations.
    ///
    /// PDFs in the input directory are pending; PDFs in the processed (and,
    /// if present, failed) directory are processed (failed-skipped). A file
    /// in the input directory is pending even if a namesake was processed
    /// earlier.
    pub fn scan(config: &PipelineConfig) -> Result<Self, QuoteError> {
        if !config.input_dir.is_dir() {
            return Err(QuoteError::InputDirNotFound {
                path: config.input_dir.clone(),
            });
        }

        let mut documents = BTreeMap::new();
        for name in list_pdfs(&config.processed_dir)? {
            documents.insert(name, DocumentState::Processed);
        }
        for name in list_pdfs(&config.failed_dir)? {
            documents.insert(name, DocumentState::FailedSkipped);
        }
        for name in list_pdfs(&config.input_dir)? {
            documents.insert(name, DocumentState::Pending);
        }

        let state = Self { documents };
        let counts = state.counts();
        debug!(
            pending = counts.pending,
            processed = counts.processed,
            failed = counts.failed,
            "Scanned intake"
        );
        Ok(state)
    }

    pub fn state(&self, document: &str) -> Option<DocumentState> {
        self.documents.get(document).copied()
    }

    /// Pending documents in file name order.
    pub fn pending(&self) -> Vec<String> {
        self.in_state(DocumentState::Pending)
    }

    pub fn in_state(&self, wanted: DocumentState) -> Vec<String> {
        self.documents
            .iter()
            .filter(|(_, s)| **s == wanted)
            .map(|(d, _)| d.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, DocumentState)> {
        self.documents.iter().map(|(d, s)| (d.as_str(), *s))
    }

    pub fn counts(&self) -> IntakeCounts {
        let mut counts = IntakeCounts::default();
        for state in self.documents.values() {
            match state {
                DocumentState::Pending => counts.pending += 1,
                DocumentState::Extracting => counts.extracting += 1,
                DocumentState::Processed => counts.processed += 1,
                DocumentState::FailedSkipped => counts.failed += 1,
            }
        }
        counts
    }

    /// `pending → extracting`
    pub fn begin(&mut self, document: &str) -> Result<(), QuoteError> {
        self.transition(document, DocumentState::Pending, DocumentState::Extracting)
    }

    /// `extracting → processed`; only after the document's records are in a
    /// run manifest.
    pub fn mark_processed(&mut self, document: &str) -> Result<(), QuoteError> {
        self.transition(document, DocumentState::Extracting, DocumentState::Processed)
    }

    /// `extracting → failed-skipped`
    pub fn mark_failed(&mut self, document: &str) -> Result<(), QuoteError> {
        self.transition(document, DocumentState::Extracting, DocumentState::FailedSkipped)
    }

    fn transition(
        &mut self,
        document: &str,
        from: DocumentState,
        to: DocumentState,
    ) -> Result<(), QuoteError> {
        match self.documents.get_mut(document) {
            Some(state) if *state == from => {
                *state = to;
                Ok(())
            }
            Some(state) => Err(QuoteError::Internal(format!(
                "{document}: cannot go from {state} to {to}"
            ))),
            None => Err(QuoteError::Internal(format!(
                "{document}: not known to the intake state"
            ))),
        }
    }
}

/// `*.pdf` file names (case-insensitive) in `dir`; a missing dir is empty.
pub fn list_pdfs(dir: &Path) -> Result<Vec<String>, QuoteError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let io_err = |source: std::io::Error| QuoteError::IntakeIo {
        path: dir.to_path_buf(),
        source,
    };

    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        if !entry.file_type().map_err(io_err)?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_pdf = Path::new(&name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
        if is_pdf {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

// ── Relocation ───────────────────────────────────────────────────────────────

/// One file move performed by [`relocate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    pub document: String,
    pub from: PathBuf,
    pub to: PathBuf,
}

/// Apply the filesystem side of a run's transitions.
///
/// Every document in `processed` moves to the processed location. Documents
/// in `failed` move to the failed location under
/// [`FailurePolicy::Quarantine`] and stay put under [`FailurePolicy::Retry`].
/// Existing files are never overwritten: a colliding name gets the run id
/// appended to its stem (`quote.2026-10-17T09-00-00Z.pdf`).
pub fn relocate(
    config: &PipelineConfig,
    run_id: &str,
    state: &IntakeState,
    processed: &[String],
    failed: &[String],
) -> Result<Vec<Relocation>, QuoteError> {
    let mut moves = Vec::new();

    for document in processed {
        if state.state(document) != Some(DocumentState::Processed) {
            warn!("{document}: not processed; left in place");
            continue;
        }
        moves.push(move_document(config, document, &config.processed_dir, run_id)?);
    }

    if config.failure_policy == FailurePolicy::Quarantine {
        for document in failed {
            if state.state(document) != Some(DocumentState::FailedSkipped) {
                continue;
            }
            moves.push(move_document(config, document, &config.failed_dir, run_id)?);
        }
    }

    if !moves.is_empty() {
        info!("Relocated {} document(s)", moves.len());
    }
    Ok(moves)
}

fn move_document(
    config: &PipelineConfig,
    document: &str,
    target_dir: &Path,
    run_id: &str,
) -> Result<Relocation, QuoteError> {
    let from = config.input_dir.join(document);
    std::fs::create_dir_all(target_dir).map_err(|source| QuoteError::IntakeIo {
        path: target_dir.to_path_buf(),
        source,
    })?;

    let to = free_target(target_dir, document, run_id);
    move_file(&from, &to).map_err(|source| QuoteError::IntakeIo {
        path: from.clone(),
        source,
    })?;

    debug!("Moved {} → {}", from.display(), to.display());
    Ok(Relocation {
        document: document.to_string(),
        from,
        to,
    })
}

/// `dir/name`, or `dir/stem.<run_id>.ext` (then `…<run_id>-2.ext`, …) if taken.
fn free_target(dir: &Path, document: &str, run_id: &str) -> PathBuf {
    let plain = dir.join(document);
    if !plain.exists() {
        return plain;
    }
    let name = Path::new(document);
    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| document.to_string());
    let ext = name
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut attempt = 1u32;
    loop {
        let tag = if attempt == 1 {
            run_id.to_string()
        } else {
            format!("{run_id}-{attempt}")
        };
        let candidate = dir.join(format!("{stem}.{tag}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        attempt += 1;
    }
}

/// Rename, falling back to copy + remove across filesystems.
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) if from.is_file() => {
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        }
        Err(e) => Err(e),
    }
}
