//! Text extraction: turn one PDF into page-ordered text.
//!
//! ## Why a trait?
//!
//! Extraction is the only stage that touches native code (pdfium). The
//! [`TextExtractor`] trait is the seam where tests substitute an in-memory
//! fake so the rest of the pipeline runs without a pdfium library.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is synchronous and CPU-bound. [`extract_with_timeout`] moves the
//! call onto tokio's blocking pool and bounds it with the per-document
//! timeout, so one pathological file cannot stall the batch.

use crate::error::ExtractionError;
use pdfium_render::prelude::*;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Converts one source document into page-ordered text.
pub trait TextExtractor: Send + Sync {
    /// One string per page, in page order. Pages without a text layer are
    /// empty strings so page numbers stay stable.
    fn extract(&self, path: &Path) -> Result<Vec<String>, ExtractionError>;
}

/// pdfium-backed extractor.
#[derive(Debug, Clone, Default)]
pub struct PdfiumExtractor {
    library: Option<PathBuf>,
    password: Option<String>,
}

impl PdfiumExtractor {
    pub fn new(library: Option<PathBuf>, password: Option<String>) -> Self {
        Self { library, password }
    }

    /// Bind pdfium: configured path, `PDFIUM_LIB_PATH`, the working
    /// directory, then the system library.
    fn bind(&self) -> Result<Pdfium, ExtractionError> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(lib) = &self.library {
            candidates.push(lib.clone());
        }
        if let Ok(env_path) = std::env::var("PDFIUM_LIB_PATH") {
            candidates.push(PathBuf::from(env_path));
        }
        candidates.push(PathBuf::from("."));

        let mut last_error = String::from("no candidate library paths");
        for candidate in &candidates {
            // A directory means "the platform library inside it".
            let path = if candidate.is_dir() {
                candidate.join(Pdfium::pdfium_platform_library_name())
            } else {
                candidate.clone()
            };
            if !path.exists() {
                continue;
            }
            match Pdfium::bind_to_library(&path) {
                Ok(bindings) => {
                    debug!("Bound pdfium from {}", path.display());
                    return Ok(Pdfium::new(bindings));
                }
                Err(e) => last_error = format!("{}: {:?}", path.display(), e),
            }
        }

        Pdfium::bind_to_system_library()
            .map(Pdfium::new)
            .map_err(|e| ExtractionError::PdfiumUnavailable {
                detail: format!("{last_error}; system library: {e:?}"),
            })
    }
}

impl TextExtractor for PdfiumExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<String>, ExtractionError> {
        let document_id = document_id(path);
        check_magic(path, &document_id)?;

        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_file(path, self.password.as_deref())
            .map_err(|e| {
                let detail = format!("{:?}", e);
                if detail.to_ascii_lowercase().contains("password") {
                    ExtractionError::PasswordRequired {
                        document: document_id.clone(),
                    }
                } else {
                    ExtractionError::CorruptPdf {
                        document: document_id.clone(),
                        detail,
                    }
                }
            })?;

        let mut pages = Vec::new();
        for page in document.pages().iter() {
            // A page whose text layer cannot be read counts as empty.
            let text = page.text().map(|t| t.all()).unwrap_or_default();
            pages.push(text);
        }

        info!("{}: extracted {} page(s)", document_id, pages.len());
        Ok(pages)
    }
}

/// Reject non-PDF files before pdfium sees them.
fn check_magic(path: &Path, document: &str) -> Result<(), ExtractionError> {
    let mut file = std::fs::File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ExtractionError::NotFound {
            document: document.to_string(),
        },
        _ => ExtractionError::Io {
            document: document.to_string(),
            detail: e.to_string(),
        },
    })?;

    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic) {
        Ok(()) if &magic == b"%PDF" => Ok(()),
        Ok(()) => Err(ExtractionError::NotAPdf {
            document: document.to_string(),
            magic,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ExtractionError::CorruptPdf {
                document: document.to_string(),
                detail: "file is shorter than a PDF header".into(),
            })
        }
        Err(e) => Err(ExtractionError::Io {
            document: document.to_string(),
            detail: e.to_string(),
        }),
    }
}

/// Document id: the file name.
pub fn document_id(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Run `extractor` on the blocking pool, bounded by `timeout_secs`.
///
/// A timed-out extraction keeps running on its blocking thread until pdfium
/// returns, but its result is discarded and the batch moves on.
pub async fn extract_with_timeout(
    extractor: Arc<dyn TextExtractor>,
    path: &Path,
    timeout_secs: u64,
) -> Result<Vec<String>, ExtractionError> {
    let document = document_id(path);
    let owned = path.to_path_buf();
    let task = tokio::task::spawn_blocking(move || extractor.extract(&owned));

    match tokio::time::timeout(Duration::from_secs(timeout_secs), task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(ExtractionError::Io {
            document,
            detail: format!("extraction task panicked: {join}"),
        }),
        Err(_) => Err(ExtractionError::Timeout {
            document,
            secs: timeout_secs,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    struct SlowExtractor;

    impl TextExtractor for SlowExtractor {
        fn extract(&self, _path: &Path) -> Result<Vec<String>, ExtractionError> {
            std::thread::sleep(Duration::from_millis(1500));
            Ok(vec![])
        }
    }

    struct EchoExtractor;

    impl TextExtractor for EchoExtractor {
        fn extract(&self, path: &Path) -> Result<Vec<String>, ExtractionError> {
            Ok(vec![document_id(path)])
        }
    }

    #[test]
    fn document_id_is_file_name() {
        assert_eq!(document_id(Path::new("/in/q-17.pdf")), "q-17.pdf");
    }

    #[test]
    fn non_pdf_rejected_before_pdfium() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fake.pdf");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"PK\x03\x04zip")
            .unwrap();
        let err = PdfiumExtractor::default().extract(&path).unwrap_err();
        assert_eq!(err.kind(), "not_a_pdf");
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = PdfiumExtractor::default()
            .extract(Path::new("/definitely/not/here.pdf"))
            .unwrap_err();
        assert!(matches!(err, ExtractionError::NotFound { .. }));
    }

    #[test]
    fn truncated_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.pdf");
        std::fs::write(&path, b"%P").unwrap();
        let err = PdfiumExtractor::default().extract(&path).unwrap_err();
        assert_eq!(err.kind(), "corrupt_pdf");
    }

    #[tokio::test]
    async fn timeout_is_reported_per_document() {
        let err = extract_with_timeout(Arc::new(SlowExtractor), Path::new("slow.pdf"), 1)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ExtractionError::Timeout {
                document: "slow.pdf".into(),
                secs: 1
            }
        );
    }

    #[tokio::test]
    async fn result_passes_through() {
        let pages = extract_with_timeout(Arc::new(EchoExtractor), Path::new("a.pdf"), 5)
            .await
            .unwrap();
        assert_eq!(pages, vec!["a.pdf".to_string()]);
    }
}
