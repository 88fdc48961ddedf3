//! CLI binary for quote2csv.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, drives the stages, and prints summaries.
//!
//! Exit codes: 0 on success, 1 on a fatal error (including a failed store
//! write), 2 when at least one document failed extraction.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use quote2csv::run::pending_manifests;
use quote2csv::{
    consolidate_archive, run_consolidation, run_extraction, ConsolidationStats, ExtractionOutput,
    ExtractionStats,
    FailurePolicy, IntakeState, PdfiumExtractor, PipelineConfig, ProgressCallback,
    RunProgressCallback,
};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per document.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(spinner_style);
        bar.set_prefix("Scanning");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }
}

impl RunProgressCallback for CliProgressCallback {
    fn on_run_start(&self, run_id: &str, total_documents: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total_documents as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Extracting");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Run {run_id}: {total_documents} pending document(s)"))
        ));
    }

    fn on_document_start(&self, document: &str, _index: usize, _total: usize) {
        self.bar.set_message(document.to_string());
    }

    fn on_document_complete(&self, document: &str, records: usize, dropped: usize) {
        let dropped = if dropped > 0 {
            format!("  {dropped} dropped")
        } else {
            String::new()
        };
        self.bar.println(format!(
            "  {} {:<40} {}{}",
            green("✓"),
            document,
            dim(&format!("{records:>4} records")),
            dim(&dropped),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, document: &str, error: &str) {
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} {:<40} {}", red("✗"), document, red(&msg)));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, processed: usize, failed: usize) {
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!(
                "{} {} document(s) processed",
                green("✔"),
                bold(&processed.to_string())
            );
        } else {
            eprintln!(
                "{} {} processed, {} failed",
                if processed == 0 { red("✘") } else { cyan("⚠") },
                bold(&processed.to_string()),
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract every pending PDF in ./quotations, then merge into the store
  quote2csv run

  # Two-step: extract now, consolidate later
  quote2csv extract
  quote2csv consolidate

  # Re-parse a run archive into the store (recovery)
  quote2csv consolidate --archive output/archive/run_2026-10-17T09-30-00Z.txt

  # European number format, euros by default, quarantine failures
  quote2csv run --decimal-separator , --default-currency EUR --failure-policy quarantine

  # Restrict parsing to the item table
  quote2csv run --table-start "Pos Description" --table-end "Total net"

  # What is pending?
  quote2csv status

OUTPUT LAYOUT:
  output/quotation_records.csv     consolidated store (replaced atomically)
  output/archive/run_<id>.txt      raw text of every processed document, per run
  output/runs/pending/run_<id>.json  records awaiting consolidation
  output/runs/merged/run_<id>.json   records already in the store

EXIT CODES:
  0  success
  1  fatal error (e.g. the store could not be written; nothing was lost)
  2  one or more documents failed extraction (the rest were processed)

ENVIRONMENT VARIABLES:
  QUOTE2CSV_*       every flag has an env fallback (see --help)
  PDFIUM_LIB_PATH   path to libpdfium (file or directory)
  RUST_LOG          tracing filter, overrides -v / -q

  A `.env` file in the working directory is loaded first.
"#;

/// Extract line items from PDF quotations into a consolidated CSV store.
#[derive(Parser, Debug)]
#[command(
    name = "quote2csv",
    version,
    about = "Extract line items from PDF quotations into a consolidated CSV store",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding incoming quotation PDFs.
    #[arg(long, global = true, env = "QUOTE2CSV_INPUT_DIR", default_value = "quotations")]
    input_dir: PathBuf,

    /// Where processed PDFs are moved.
    #[arg(long, global = true, env = "QUOTE2CSV_PROCESSED_DIR", default_value = "processed")]
    processed_dir: PathBuf,

    /// Where failed PDFs are moved under `--failure-policy quarantine`.
    #[arg(long, global = true, env = "QUOTE2CSV_FAILED_DIR", default_value = "failed")]
    failed_dir: PathBuf,

    /// Output root: store, archives, run manifests.
    #[arg(long, global = true, env = "QUOTE2CSV_OUTPUT_DIR", default_value = "output")]
    output_dir: PathBuf,

    /// Per-document extraction timeout in seconds.
    #[arg(long, global = true, env = "QUOTE2CSV_TIMEOUT", default_value_t = 60)]
    timeout: u64,

    /// What happens to documents that fail extraction.
    #[arg(long, global = true, env = "QUOTE2CSV_FAILURE_POLICY", value_enum, default_value = "retry")]
    failure_policy: PolicyArg,

    /// Decimal separator for ambiguous amounts such as `1.250`.
    #[arg(long, global = true, env = "QUOTE2CSV_DECIMAL_SEPARATOR", default_value_t = '.')]
    decimal_separator: char,

    /// ISO code for amounts with no currency marker anywhere in the document.
    #[arg(long, global = true, env = "QUOTE2CSV_DEFAULT_CURRENCY")]
    default_currency: Option<String>,

    /// Extra currency symbols, `SYMBOL=CODE` (repeatable or comma-separated).
    #[arg(long = "currency-symbol", global = true, env = "QUOTE2CSV_CURRENCY_SYMBOLS", value_delimiter = ',')]
    currency_symbols: Vec<String>,

    /// Line marking the start of the item table.
    #[arg(long, global = true, env = "QUOTE2CSV_TABLE_START", requires = "table_end")]
    table_start: Option<String>,

    /// Line marking the end of the item table.
    #[arg(long, global = true, env = "QUOTE2CSV_TABLE_END", requires = "table_start")]
    table_end: Option<String>,

    /// Path to libpdfium (file or directory).
    #[arg(long, global = true, env = "QUOTE2CSV_PDFIUM_LIB")]
    pdfium_lib: Option<PathBuf>,

    /// Password for encrypted PDFs.
    #[arg(long, global = true, env = "QUOTE2CSV_PDF_PASSWORD", hide_env_values = true)]
    pdf_password: Option<String>,

    /// Print summaries as JSON on stdout.
    #[arg(long, global = true, env = "QUOTE2CSV_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "QUOTE2CSV_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "QUOTE2CSV_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "QUOTE2CSV_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract pending PDFs into a run manifest and archive.
    Extract,
    /// Merge pending run manifests (or one archive) into the store.
    Consolidate {
        /// Re-parse this run archive instead of merging manifests.
        #[arg(long)]
        archive: Option<PathBuf>,
    },
    /// Extract, then consolidate.
    Run,
    /// Show pending / processed / failed documents and pending manifests.
    Status,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PolicyArg {
    Retry,
    Quarantine,
}

impl From<PolicyArg> for FailurePolicy {
    fn from(v: PolicyArg) -> Self {
        match v {
            PolicyArg::Retry => FailurePolicy::Retry,
            PolicyArg::Quarantine => FailurePolicy::Quarantine,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // `.env` first so clap's env fallbacks see it.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs while it is shown.
    let extracting = matches!(cli.command, Command::Extract | Command::Run);
    let show_progress = extracting && !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Ctrl-C: finish the current document, then stop ───────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                flag.store(true, Ordering::SeqCst);
                eprintln!("{} interrupt: finishing the current document…", cyan("⚠"));
            }
        });
    }

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn RunProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb, shutdown)?;

    match &cli.command {
        Command::Extract => {
            let output = extract(&config).await?;
            report_extraction(&cli, &output)?;
            Ok(exit_for(&output))
        }
        Command::Consolidate { archive } => {
            let stats = match archive {
                Some(path) => consolidate_archive(&config, path)
                    .with_context(|| format!("Failed to consolidate {}", path.display()))?,
                None => run_consolidation(&config).context("Consolidation failed")?,
            };
            report_consolidation(&cli, &config, &stats)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run => {
            let output = extract(&config).await?;
            if !cli.json {
                report_extraction(&cli, &output)?;
            }
            let stats = run_consolidation(&config).context("Consolidation failed")?;
            if cli.json {
                print_json(&run_summary(&output.stats, &stats))?;
            } else {
                report_consolidation(&cli, &config, &stats)?;
            }
            Ok(exit_for(&output))
        }
        Command::Status => {
            status(&cli, &config)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn extract(config: &PipelineConfig) -> Result<ExtractionOutput> {
    let state = IntakeState::scan(config).context("Failed to scan input directory")?;
    let extractor = Arc::new(PdfiumExtractor::new(
        config.pdfium_library.clone(),
        config.pdf_password.clone(),
    ));
    run_extraction(config, extractor, state)
        .await
        .context("Extraction failed")
}

fn exit_for(output: &ExtractionOutput) -> ExitCode {
    if output.has_failures() {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    }
}

/// `run --json` output: one document, so stdout stays a single JSON value.
fn run_summary(extraction: &ExtractionStats, consolidation: &ConsolidationStats) -> serde_json::Value {
    serde_json::json!({
        "extraction": extraction,
        "consolidation": consolidation,
    })
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialise JSON output")?
    );
    Ok(())
}

fn report_extraction(cli: &Cli, output: &ExtractionOutput) -> Result<()> {
    let stats = &output.stats;
    if cli.json {
        return print_json(stats);
    }
    if cli.quiet {
        return Ok(());
    }

    eprintln!(
        "{}  {} processed  {} skipped  {} records ({} partial)  {} segments dropped  {}ms",
        if stats.documents_skipped == 0 {
            green("✔")
        } else {
            cyan("⚠")
        },
        stats.documents_processed,
        stats.documents_skipped,
        stats.records_parsed,
        stats.partial_records,
        stats.segments_dropped,
        stats.duration_ms,
    );
    for failure in &output.run.failures {
        eprintln!(
            "   {} {}  {}",
            red("✗"),
            failure.document,
            dim(failure.error.kind())
        );
    }
    if stats.documents_not_attempted > 0 {
        eprintln!(
            "   {} document(s) left pending (interrupted)",
            stats.documents_not_attempted
        );
    }
    if let Some(path) = &output.manifest {
        eprintln!("   manifest  {}", dim(&path.display().to_string()));
    }
    if let Some(path) = &output.run.archive {
        eprintln!("   archive   {}", dim(&path.display().to_string()));
    }
    Ok(())
}

fn report_consolidation(cli: &Cli, config: &PipelineConfig, stats: &ConsolidationStats) -> Result<()> {
    if cli.json {
        return print_json(stats);
    }
    if cli.quiet {
        return Ok(());
    }
    eprintln!(
        "{}  {} run(s)  {} added  {} deduplicated  {} rows  →  {}",
        green("✔"),
        stats.runs.len(),
        stats.records_added,
        stats.records_deduplicated,
        stats.store_rows,
        bold(&config.store_path().display().to_string()),
    );
    if stats.partial_deduplicated > 0 {
        eprintln!(
            "{}  {} partial record(s) collapsed into existing rows; see the log for their text",
            yellow("⚠"),
            stats.partial_deduplicated
        );
    }
    Ok(())
}

fn status(cli: &Cli, config: &PipelineConfig) -> Result<()> {
    let state = IntakeState::scan(config).context("Failed to scan input directory")?;
    let counts = state.counts();
    let manifests = pending_manifests(config)?;

    if cli.json {
        let body = serde_json::json!({
            "documents": counts,
            "pending_manifests": manifests,
        });
        return print_json(&body);
    }

    println!("Input:              {}", config.input_dir.display());
    println!("Pending documents:  {}", counts.pending);
    println!("Processed:          {}", counts.processed);
    println!("Failed (set aside): {}", counts.failed);
    println!("Pending manifests:  {}", manifests.len());
    for path in &manifests {
        println!("  {}", path.display());
    }
    if !cli.quiet {
        for document in state.pending() {
            println!("  {} {}", dim("pending"), document);
        }
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(
    cli: &Cli,
    progress: Option<ProgressCallback>,
    shutdown: Arc<AtomicBool>,
) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .input_dir(&cli.input_dir)
        .processed_dir(&cli.processed_dir)
        .failed_dir(&cli.failed_dir)
        .output_dir(&cli.output_dir)
        .extraction_timeout_secs(cli.timeout)
        .failure_policy(cli.failure_policy.into())
        .decimal_separator(cli.decimal_separator)
        .shutdown_flag(shutdown);

    if let Some(code) = &cli.default_currency {
        builder = builder.default_currency(code);
    }
    for entry in &cli.currency_symbols {
        let (symbol, code) = parse_symbol(entry)?;
        builder = builder.currency_symbol(symbol, code);
    }
    if let (Some(start), Some(end)) = (&cli.table_start, &cli.table_end) {
        builder = builder.table_markers(start, end);
    }
    if let Some(lib) = &cli.pdfium_lib {
        builder = builder.pdfium_library(lib);
    }
    if let Some(pwd) = &cli.pdf_password {
        builder = builder.pdf_password(pwd);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `SYMBOL=CODE` (e.g. `kr=SEK`).
fn parse_symbol(entry: &str) -> Result<(String, String)> {
    let Some((symbol, code)) = entry.split_once('=') else {
        bail!("Invalid --currency-symbol '{entry}': expected SYMBOL=CODE");
    };
    let (symbol, code) = (symbol.trim(), code.trim());
    if symbol.is_empty() || code.is_empty() {
        bail!("Invalid --currency-symbol '{entry}': expected SYMBOL=CODE");
    }
    Ok((symbol.to_string(), code.to_ascii_uppercase()))
}
