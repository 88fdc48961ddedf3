//! Configuration types for the extraction and consolidation stages.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. Directory layout, the per-document timeout,
//! the failure policy and the numeric/currency normalisation table all live
//! in one struct so both stages (and the tests) see the same values.

use crate::error::QuoteError;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// File name of the consolidated store inside the output directory.
pub const STORE_FILE_NAME: &str = "quotation_records.csv";

/// Configuration shared by both pipeline stages.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use quote2csv::{FailurePolicy, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .input_dir("inbox")
///     .output_dir("out")
///     .extraction_timeout_secs(30)
///     .failure_policy(FailurePolicy::Quarantine)
///     .build()
///     .unwrap();
/// assert_eq!(config.store_path(), std::path::Path::new("out/quotation_records.csv"));
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Directory scanned for pending PDF quotations. Default: `quotations`.
    pub input_dir: PathBuf,

    /// Documents are moved here once their records are safely recorded.
    /// Default: `processed`.
    pub processed_dir: PathBuf,

    /// Destination for failed documents under [`FailurePolicy::Quarantine`].
    /// Default: `failed`.
    pub failed_dir: PathBuf,

    /// Root for the archive, the run manifests and the store. Default: `output`.
    pub output_dir: PathBuf,

    /// Per-document extraction timeout in seconds. Default: 60.
    ///
    /// pdfium is the only potentially slow step; a document exceeding this is
    /// treated as failed-skipped and the batch moves on.
    pub extraction_timeout_secs: u64,

    /// What happens to documents whose extraction fails. Default: retry.
    pub failure_policy: FailurePolicy,

    /// Number parsing and currency symbol mapping.
    pub numbers: NumberFormat,

    /// Optional marker line opening the line-item table.
    ///
    /// When both markers are found in a document only the text between them
    /// is segmented; otherwise the whole document is.
    pub table_start: Option<String>,

    /// Optional marker line closing the line-item table.
    pub table_end: Option<String>,

    /// Explicit pdfium library file. If None, `PDFIUM_LIB_PATH`, the working
    /// directory and the system library are tried in that order.
    pub pdfium_library: Option<PathBuf>,

    /// PDF user password for encrypted quotations.
    pub pdf_password: Option<String>,

    /// Progress events for the extraction stage. Default: no-op.
    pub progress_callback: Option<ProgressCallback>,

    /// Set to `true` to stop before the next document (e.g. on Ctrl-C).
    pub shutdown: Option<Arc<AtomicBool>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("quotations"),
            processed_dir: PathBuf::from("processed"),
            failed_dir: PathBuf::from("failed"),
            output_dir: PathBuf::from("output"),
            extraction_timeout_secs: 60,
            failure_policy: FailurePolicy::default(),
            numbers: NumberFormat::default(),
            table_start: None,
            table_end: None,
            pdfium_library: None,
            pdf_password: None,
            progress_callback: None,
            shutdown: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("input_dir", &self.input_dir)
            .field("processed_dir", &self.processed_dir)
            .field("failed_dir", &self.failed_dir)
            .field("output_dir", &self.output_dir)
            .field("extraction_timeout_secs", &self.extraction_timeout_secs)
            .field("failure_policy", &self.failure_policy)
            .field("numbers", &self.numbers)
            .field("table_start", &self.table_start)
            .field("table_end", &self.table_end)
            .field("pdfium_library", &self.pdfium_library)
            .field("pdf_password", &self.pdf_password.as_ref().map(|_| "<redacted>"))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn RunProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Directory holding one raw-text artifact per run.
    pub fn archive_dir(&self) -> PathBuf {
        self.output_dir.join("archive")
    }

    /// Run manifests written by extraction and not yet consolidated.
    pub fn pending_runs_dir(&self) -> PathBuf {
        self.output_dir.join("runs").join("pending")
    }

    /// Run manifests already merged into the store.
    pub fn merged_runs_dir(&self) -> PathBuf {
        self.output_dir.join("runs").join("merged")
    }

    /// Path of the consolidated CSV store.
    pub fn store_path(&self) -> PathBuf {
        self.output_dir.join(STORE_FILE_NAME)
    }

    /// The configured progress callback, or a no-op.
    pub fn progress(&self) -> ProgressCallback {
        self.progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgressCallback))
    }

    /// Whether an interrupt has been requested.
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.input_dir = dir.into();
        self
    }

    pub fn processed_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.processed_dir = dir.into();
        self
    }

    pub fn failed_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.failed_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn extraction_timeout_secs(mut self, secs: u64) -> Self {
        self.config.extraction_timeout_secs = secs;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    pub fn decimal_separator(mut self, sep: char) -> Self {
        self.config.numbers.decimal_separator = sep;
        self
    }

    pub fn default_currency(mut self, code: impl Into<String>) -> Self {
        self.config.numbers.default_currency = Some(code.into().to_ascii_uppercase());
        self
    }

    /// Map an extra currency symbol or alias (e.g. `Rs`) to an ISO code.
    pub fn currency_symbol(mut self, symbol: impl Into<String>, code: impl Into<String>) -> Self {
        self.config
            .numbers
            .currency_symbols
            .insert(symbol.into(), code.into().to_ascii_uppercase());
        self
    }

    pub fn table_markers(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.config.table_start = Some(start.into());
        self.config.table_end = Some(end.into());
        self
    }

    pub fn pdfium_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library = Some(path.into());
        self
    }

    pub fn pdf_password(mut self, pwd: impl Into<String>) -> Self {
        self.config.pdf_password = Some(pwd.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.config.shutdown = Some(flag);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, QuoteError> {
        let c = &self.config;
        if c.extraction_timeout_secs == 0 {
            return Err(QuoteError::InvalidConfig(
                "Extraction timeout must be ≥ 1 second".into(),
            ));
        }
        if c.numbers.decimal_separator != '.' && c.numbers.decimal_separator != ',' {
            return Err(QuoteError::InvalidConfig(format!(
                "Decimal separator must be '.' or ',', got '{}'",
                c.numbers.decimal_separator
            )));
        }
        if let Some(code) = &c.numbers.default_currency {
            if !is_iso_code(code) {
                return Err(QuoteError::InvalidConfig(format!(
                    "Default currency must be a 3-letter ISO code, got '{code}'"
                )));
            }
        }
        for (symbol, code) in &c.numbers.currency_symbols {
            if symbol.trim().is_empty() || !is_iso_code(code) {
                return Err(QuoteError::InvalidConfig(format!(
                    "Invalid currency mapping '{symbol}={code}'"
                )));
            }
        }
        if same_dir(&c.input_dir, &c.processed_dir) {
            return Err(QuoteError::InvalidConfig(
                "Input and processed directories must differ".into(),
            ));
        }
        if c.failure_policy == FailurePolicy::Quarantine && same_dir(&c.input_dir, &c.failed_dir) {
            return Err(QuoteError::InvalidConfig(
                "Input and failed directories must differ under the quarantine policy".into(),
            ));
        }
        Ok(self.config)
    }
}

fn is_iso_code(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase())
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// What the Intake Manager does with a document whose extraction failed.
///
/// | Policy | Failed document | Next run |
/// |--------|-----------------|----------|
/// | `Retry` | stays in the input directory | retried automatically |
/// | `Quarantine` | moved to the failed directory | skipped until moved back |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Leave the document pending (default).
    #[default]
    Retry,
    /// Move the document aside for manual intervention.
    Quarantine,
}

/// Numeric-locale and currency table used by the Field Parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumberFormat {
    /// Decimal separator assumed for ambiguous amounts such as `1.250`.
    /// Default: `.`
    pub decimal_separator: char,

    /// Currency for amounts that carry no symbol or code and whose document
    /// states none. Default: None (such records are partial).
    pub default_currency: Option<String>,

    /// Symbol or alias → ISO 4217 code.
    pub currency_symbols: BTreeMap<String, String>,
}

impl Default for NumberFormat {
    fn default() -> Self {
        let currency_symbols = [
            ("$", "USD"),
            ("US$", "USD"),
            ("€", "EUR"),
            ("£", "GBP"),
            ("¥", "JPY"),
            ("₹", "INR"),
            ("Rs", "INR"),
            ("Rs.", "INR"),
            ("CHF", "CHF"),
            ("Fr.", "CHF"),
        ]
        .into_iter()
        .map(|(s, c)| (s.to_string(), c.to_string()))
        .collect();

        Self {
            decimal_separator: '.',
            default_currency: None,
            currency_symbols,
        }
    }
}

impl NumberFormat {
    /// Resolve a symbol, alias or ISO code to an ISO code.
    ///
    /// Unknown three-letter uppercase codes are accepted as-is.
    pub fn currency_code(&self, token: &str) -> Option<String> {
        let token = token.trim();
        if let Some(code) = self.currency_symbols.get(token) {
            return Some(code.clone());
        }
        let upper = token.to_ascii_uppercase();
        if is_iso_code(&upper) && KNOWN_ISO_CODES.contains(&upper.as_str()) {
            return Some(upper);
        }
        None
    }
}

/// ISO codes recognised when they appear as plain words in a document.
///
/// Restricting plain-word matches to a known list keeps unit tokens such as
/// `PCS` or `SET` from being read as currencies.
pub const KNOWN_ISO_CODES: &[&str] = &[
    "USD", "EUR", "GBP", "JPY", "INR", "CHF", "CNY", "SEK", "NOK", "DKK", "PLN", "CZK", "CAD",
    "AUD", "SGD", "AED", "SAR", "ZAR", "BRL", "MXN", "KRW", "HKD", "TRY",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout() {
        let c = PipelineConfig::default();
        assert_eq!(c.store_path(), PathBuf::from("output/quotation_records.csv"));
        assert_eq!(c.archive_dir(), PathBuf::from("output/archive"));
        assert_eq!(c.pending_runs_dir(), PathBuf::from("output/runs/pending"));
        assert_eq!(c.failure_policy, FailurePolicy::Retry);
        assert!(!c.shutdown_requested());
    }

    #[test]
    fn zero_timeout_rejected() {
        let err = PipelineConfig::builder()
            .extraction_timeout_secs(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn bad_decimal_separator_rejected() {
        assert!(PipelineConfig::builder().decimal_separator(';').build().is_err());
        assert!(PipelineConfig::builder().decimal_separator(',').build().is_ok());
    }

    #[test]
    fn same_input_and_processed_rejected() {
        let err = PipelineConfig::builder()
            .input_dir("inbox")
            .processed_dir("inbox")
            .build()
            .unwrap_err();
        assert!(matches!(err, QuoteError::InvalidConfig(_)));
    }

    #[test]
    fn currency_lookup() {
        let n = NumberFormat::default();
        assert_eq!(n.currency_code("$").as_deref(), Some("USD"));
        assert_eq!(n.currency_code("€").as_deref(), Some("EUR"));
        assert_eq!(n.currency_code("eur").as_deref(), Some("EUR"));
        assert_eq!(n.currency_code("PCS"), None);
    }

    #[test]
    fn extra_currency_symbol() {
        let c = PipelineConfig::builder()
            .currency_symbol("zł", "pln")
            .build()
            .unwrap();
        assert_eq!(c.numbers.currency_code("zł").as_deref(), Some("PLN"));
    }

    #[test]
    fn shutdown_flag_observed() {
        let flag = Arc::new(AtomicBool::new(false));
        let c = PipelineConfig::builder()
            .shutdown_flag(Arc::clone(&flag))
            .build()
            .unwrap();
        assert!(!c.shutdown_requested());
        flag.store(true, Ordering::SeqCst);
        assert!(c.shutdown_requested());
    }
}
