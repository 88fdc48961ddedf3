//! Pipeline stages for turning quotation PDFs into records.
//!
//! Each submodule implements exactly one transformation step and is
//! testable on its own; only [`extract`] touches native code.
//!
//! ## Data Flow
//!
//! ```text
//! extract ──▶ segment ──▶ templates ──▶ normalize ──▶ parse
//! (pdfium)    (layout     (field        (numbers,      (records +
//!              cues)       locations)    currencies)    counters)
//! ```
//!
//! 1. [`extract`]: page-ordered text via the [`extract::TextExtractor`]
//!    trait; pdfium runs in `spawn_blocking` under a per-document timeout
//! 2. [`segment`]: table region, noise filtering, candidate line items
//! 3. [`templates`]: prioritised layout templates, first match wins
//! 4. [`normalize`]: locale-aware amounts and ISO currency codes
//! 5. [`parse`]: the Field Parser, a header scan plus a lazy iterator of
//!    [`crate::record::QuotationRecord`]s

pub mod extract;
pub mod normalize;
pub mod parse;
pub mod segment;
pub mod templates;
