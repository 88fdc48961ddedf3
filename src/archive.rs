//! Batch Archiver: one raw-text artifact per extraction run.
//!
//! The artifact is the concatenation of per-document sections:
//!
//! ```text
//! ================================================================================
//! DOCUMENT: acme-q-118.pdf
//! ================================================================================
//! --- PAGE 1 ---
//! <page text>
//! --- PAGE 2 ---
//! <page text>
//! ```
//!
//! It is written before any document is marked processed, so the raw text of
//! every processed document survives even if consolidation never happens.
//! [`read_archive`] turns an artifact back into page texts for re-parsing.

use crate::error::QuoteError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::info;

const RULE_WIDTH: usize = 80;
const DOCUMENT_PREFIX: &str = "DOCUMENT: ";

/// The raw text of one document as stored in an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedDocument {
    pub document: String,
    pub pages: Vec<String>,
}

fn rule() -> String {
    "=".repeat(RULE_WIDTH)
}

fn page_marker(number: usize) -> String {
    format!("--- PAGE {number} ---")
}

fn parse_page_marker(line: &str) -> Option<usize> {
    line.strip_prefix("--- PAGE ")?
        .strip_suffix(" ---")?
        .parse()
        .ok()
}

/// Canonical artifact path for a run.
pub fn archive_path(archive_dir: &Path, run_id: &str) -> PathBuf {
    archive_dir.join(format!("run_{run_id}.txt"))
}

/// Render the artifact body.
pub fn render_archive(documents: &[ArchivedDocument]) -> String {
    let rule = rule();
    let mut out = String::new();
    for doc in documents {
        out.push_str(&rule);
        out.push('\n');
        out.push_str(DOCUMENT_PREFIX);
        out.push_str(&doc.document);
        out.push('\n');
        out.push_str(&rule);
        out.push('\n');
        for (i, page) in doc.pages.iter().enumerate() {
            out.push_str(&page_marker(i + 1));
            out.push('\n');
            out.push_str(page);
            out.push('\n');
        }
    }
    out
}

/// Split an artifact body back into documents.
pub fn parse_archive(content: &str) -> Result<Vec<ArchivedDocument>, String> {
    let rule = rule();
    let body = content.strip_suffix('\n').unwrap_or(content);
    if body.is_empty() {
        return Ok(Vec::new());
    }
    let lines: Vec<&str> = body.split('\n').collect();

    let is_section_start = |i: usize| {
        lines[i] == rule
            && lines.get(i + 1).is_some_and(|l| l.starts_with(DOCUMENT_PREFIX))
            && lines.get(i + 2).is_some_and(|l| *l == rule)
    };

    let mut documents: Vec<ArchivedDocument> = Vec::new();
    let mut page: Option<Vec<&str>> = None;
    let mut i = 0;

    while i < lines.len() {
        if is_section_start(i) {
            flush_page(&mut documents, &mut page);
            let document = lines[i + 1][DOCUMENT_PREFIX.len()..].to_string();
            documents.push(ArchivedDocument {
                document,
                pages: Vec::new(),
            });
            i += 3;
            continue;
        }

        let Some(pages_done) = documents.last().map(|d| d.pages.len()) else {
            return Err(format!("line {}: content before the first document header", i + 1));
        };
        // Only the next page number opens a page; anything else is page text.
        let next_page = pages_done + 1 + usize::from(page.is_some());
        if parse_page_marker(lines[i]) == Some(next_page) {
            flush_page(&mut documents, &mut page);
            page = Some(Vec::new());
        } else if let Some(open) = page.as_mut() {
            open.push(lines[i]);
        } else {
            return Err(format!("line {}: text outside a page", i + 1));
        }
        i += 1;
    }
    flush_page(&mut documents, &mut page);
    Ok(documents)
}

fn flush_page(documents: &mut [ArchivedDocument], page: &mut Option<Vec<&str>>) {
    if let (Some(lines), Some(doc)) = (page.take(), documents.last_mut()) {
        doc.pages.push(lines.join("\n"));
    }
}

/// Write a run's artifact atomically, never replacing an existing file.
///
/// If `run_<id>.txt` already exists, `run_<id>.1.txt`, `run_<id>.2.txt`, …
/// are tried in turn. Returns the path actually written.
pub fn write_archive(
    archive_dir: &Path,
    run_id: &str,
    documents: &[ArchivedDocument],
) -> Result<PathBuf, QuoteError> {
    let target = archive_path(archive_dir, run_id);
    let fail = |source: std::io::Error| QuoteError::ArchiveWriteFailed {
        path: target.clone(),
        source,
    };

    std::fs::create_dir_all(archive_dir).map_err(fail)?;
    let mut tmp = NamedTempFile::new_in(archive_dir).map_err(fail)?;
    tmp.write_all(render_archive(documents).as_bytes())
        .map_err(fail)?;
    tmp.as_file().sync_all().map_err(fail)?;

    let mut candidate = target.clone();
    let mut suffix = 0u32;
    loop {
        match tmp.persist_noclobber(&candidate) {
            Ok(_) => break,
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                tmp = e.file;
                suffix += 1;
                candidate = archive_dir.join(format!("run_{run_id}.{suffix}.txt"));
            }
            Err(e) => return Err(fail(e.error)),
        }
    }

    info!(
        "Archived {} document(s) to {}",
        documents.len(),
        candidate.display()
    );
    Ok(candidate)
}

/// Read an artifact back into documents (recovery path).
pub fn read_archive(path: &Path) -> Result<Vec<ArchivedDocument>, QuoteError> {
    let content = std::fs::read_to_string(path).map_err(|e| QuoteError::ArchiveReadFailed {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    parse_archive(&content).map_err(|detail| QuoteError::ArchiveReadFailed {
        path: path.to_path_buf(),
        detail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn doc(name: &str, pages: &[&str]) -> ArchivedDocument {
        ArchivedDocument {
            document: name.into(),
            pages: pages.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn render_layout() {
        let text = render_archive(&[doc("a.pdf", &["line one\nline two"])]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "=".repeat(80));
        assert_eq!(lines[1], "DOCUMENT: a.pdf");
        assert_eq!(lines[2], "=".repeat(80));
        assert_eq!(lines[3], "--- PAGE 1 ---");
        assert_eq!(lines[4], "line one");
    }

    #[test]
    fn parse_recovers_pages_exactly() {
        let docs = vec![
            doc("a.pdf", &["first\n\npage", "", "trailing newline\n"]),
            doc("b.pdf", &[]),
            doc("c.pdf", &["10 Bolt 5 pcs $1.00"]),
        ];
        let parsed = parse_archive(&render_archive(&docs)).unwrap();
        assert_eq!(parsed, docs);
    }

    #[test]
    fn page_text_mentioning_a_later_page_is_kept() {
        let docs = vec![doc("a.pdf", &["see\n--- PAGE 7 ---\nabove", "two"])];
        let parsed = parse_archive(&render_archive(&docs)).unwrap();
        assert_eq!(parsed, docs);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_archive("hello\n").is_err());
        assert_eq!(parse_archive("").unwrap(), vec![]);
    }

    #[test]
    fn existing_artifact_is_never_overwritten() {
        let dir = TempDir::new().unwrap();
        let first = write_archive(dir.path(), "2026-10-17T09-00-00Z", &[doc("a.pdf", &["x"])]).unwrap();
        let second = write_archive(dir.path(), "2026-10-17T09-00-00Z", &[doc("b.pdf", &["y"])]).unwrap();

        assert_ne!(first, second);
        assert_eq!(
            second.file_name().unwrap(),
            "run_2026-10-17T09-00-00Z.1.txt"
        );
        assert_eq!(read_archive(&first).unwrap()[0].document, "a.pdf");
        assert_eq!(read_archive(&second).unwrap()[0].document, "b.pdf");
    }
}
