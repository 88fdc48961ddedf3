//! Field Parser: page text in, [`QuotationRecord`]s out.
//!
//! [`FieldParser::parse`] returns [`ParsedRecords`], a single-pass iterator.
//! Segmenting and the header scan happen up front; template matching and
//! normalisation happen lazily as records are pulled. The dropped-segment and
//! partial-record counters are final once the iterator is exhausted.
//!
//! Nothing in here fails. A segment no template understands is dropped and
//! counted; a number that will not normalise leaves its field empty and marks
//! the record [`ParseConfidence::Partial`] with the raw segment attached.

use super::normalize::{clean_text, is_price_token, parse_amount, parse_money, round2};
use super::segment::{segment_pages, BoundaryStrategy, Segment};
use super::templates::{first_match, LayoutTemplate, LineFields};
use crate::config::{NumberFormat, PipelineConfig};
use crate::record::{ParseConfidence, QuotationRecord};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

// ── Header scan ──────────────────────────────────────────────────────────────

static RE_SUPPLIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:supplier|vendor|from|seller|lieferant)\s*:\s*(?P<value>\S.*?)\s*$")
        .unwrap()
});

static RE_QUOTATION_NO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:quotation|quote|offer|angebot|proposal)\s*(?:no\.?|number|nr\.?|#|ref\.?)?\s*[:.]?\s*#?\s*(?P<value>[A-Za-z0-9][A-Za-z0-9\-/._]*)",
    )
    .unwrap()
});

static RE_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(?:quotation|quote|offer|angebot|proposal)\b").unwrap());

static RE_DOC_CURRENCY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:^\s*(?:currency|währung)\s*:?\s*|\bprices?\s+(?:are\s+)?in\s+)(?P<value>[A-Za-z]{3}\b|US\$|[$€£¥₹])",
    )
    .unwrap()
});

static RE_QUOTATION_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:date|datum)\b\s*[:.]?\s*(?P<value>\d{4}-\d{2}-\d{2}|\d{1,2}[./-]\d{1,2}[./-]\d{2,4}|\d{1,2}\.?\s+\p{L}+\.?,?\s+\d{4}|\p{L}+\.?\s+\d{1,2},?\s+\d{4})",
    )
    .unwrap()
});

static RE_CUSTOMER_CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:customer\s*(?:code|no\.?|number|id)|cust\.\s*no\.?|kunden-?\s*nr\.?|kundennummer)\s*[:.]?\s*#?\s*(?P<value>[A-Za-z0-9][A-Za-z0-9\-/._]*)",
    )
    .unwrap()
});

static RE_ENQUIRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:enquiry|inquiry|rfq|anfrage)\s*(?:no\.?|number|nr\.?|#|ref\.?)?\s*[:.]?\s*#?\s*(?P<value>[A-Za-z0-9][A-Za-z0-9\-/._]*)",
    )
    .unwrap()
});

/// Needs a colon: "reference" also occurs in running text.
static RE_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:your\s+ref(?:erence)?\.?|reference|ihr\s+zeichen)\s*:\s*(?P<value>\S+(?: \S+)*)",
    )
    .unwrap()
});

/// Document-level facts shared by every record of one quotation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentHeader {
    pub supplier: Option<String>,
    pub quotation_number: Option<String>,
    /// Currency stated once for the whole document (`Currency: EUR`).
    pub currency: Option<String>,
    /// Quotation date as printed.
    pub quotation_date: Option<String>,
    pub customer_code: Option<String>,
    pub enquiry: Option<String>,
    pub reference: Option<String>,
}

/// First value of `re` on any line that contains a digit (`Quotation No.`,
/// `Customer code`, `Your enquiry`).
fn first_code(lines: &[&str], re: &Regex) -> Option<String> {
    lines.iter().find_map(|l| {
        re.captures_iter(l)
            .map(|c| c["value"].trim_end_matches(['.', '/', '-']).to_string())
            .find(|v| v.chars().any(|c| c.is_ascii_digit()))
    })
}

/// Scan a document's text for supplier, quotation number, currency and the
/// reference fields (date, customer code, enquiry, reference).
pub fn scan_header(pages: &[String], numbers: &NumberFormat) -> DocumentHeader {
    let lines: Vec<&str> = pages.iter().flat_map(|p| p.lines()).collect();

    let labelled_supplier = lines
        .iter()
        .find_map(|l| RE_SUPPLIER.captures(l))
        .and_then(|c| clean_text(&c["value"]));
    let supplier = labelled_supplier.or_else(|| {
        lines
            .iter()
            .find(|l| {
                l.chars().any(char::is_alphabetic)
                    && !RE_TITLE.is_match(l)
                    && !l.split_whitespace().any(is_price_token)
            })
            .and_then(|l| clean_text(l))
    });

    let quotation_number = first_code(&lines, &RE_QUOTATION_NO);
    let customer_code = first_code(&lines, &RE_CUSTOMER_CODE);
    let enquiry = first_code(&lines, &RE_ENQUIRY);

    let currency = lines.iter().find_map(|l| {
        RE_DOC_CURRENCY
            .captures(l)
            .and_then(|c| numbers.currency_code(&c["value"]))
    });

    // Delivery dates are per item, not the quotation's date.
    let quotation_date = lines
        .iter()
        .filter(|l| !l.to_lowercase().contains("deliver"))
        .find_map(|l| RE_QUOTATION_DATE.captures(l))
        .map(|c| c["value"].to_string());

    let reference = lines
        .iter()
        .find_map(|l| RE_REFERENCE.captures(l))
        .and_then(|c| clean_text(&c["value"]));

    DocumentHeader {
        supplier,
        quotation_number,
        currency,
        quotation_date,
        customer_code,
        enquiry,
        reference,
    }
}

// ── Parser ───────────────────────────────────────────────────────────────────

/// Stateless parser configuration; one instance serves a whole run.
#[derive(Debug, Clone, Default)]
pub struct FieldParser {
    numbers: NumberFormat,
    table_markers: Option<(String, String)>,
}

impl FieldParser {
    pub fn new(numbers: NumberFormat) -> Self {
        Self {
            numbers,
            table_markers: None,
        }
    }

    /// Restrict segmenting to the region between two marker lines.
    pub fn with_table_markers(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.table_markers = Some((start.into(), end.into()));
        self
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        let parser = Self::new(config.numbers.clone());
        match (&config.table_start, &config.table_end) {
            (Some(start), Some(end)) => parser.with_table_markers(start, end),
            _ => parser,
        }
    }

    /// Parse one document's page texts.
    ///
    /// `extracted_at` is stamped on every record (the run timestamp).
    pub fn parse(
        &self,
        document: &str,
        pages: &[String],
        extracted_at: DateTime<Utc>,
    ) -> ParsedRecords {
        let header = scan_header(pages, &self.numbers);
        let markers = self
            .table_markers
            .as_ref()
            .map(|(s, e)| (s.as_str(), e.as_str()));
        let segmentation = segment_pages(pages, markers);

        debug!(
            document,
            strategy = segmentation.strategy.map(|s| s.name()).unwrap_or("none"),
            segments = segmentation.segments.len(),
            "Segmented document"
        );

        ParsedRecords {
            document: document.to_string(),
            header,
            numbers: self.numbers.clone(),
            extracted_at,
            strategy: segmentation.strategy,
            segments: segmentation.segments.into_iter(),
            item_no: 0,
            dropped: 0,
            partial: 0,
        }
    }
}

/// Lazy, single-pass sequence of one document's records.
#[derive(Debug)]
pub struct ParsedRecords {
    document: String,
    header: DocumentHeader,
    numbers: NumberFormat,
    extracted_at: DateTime<Utc>,
    strategy: Option<BoundaryStrategy>,
    segments: std::vec::IntoIter<Segment>,
    item_no: u32,
    dropped: usize,
    partial: usize,
}

impl ParsedRecords {
    pub fn header(&self) -> &DocumentHeader {
        &self.header
    }

    pub fn strategy(&self) -> Option<BoundaryStrategy> {
        self.strategy
    }

    /// Segments that matched no template so far.
    pub fn dropped_segments(&self) -> usize {
        self.dropped
    }

    /// Partial records emitted so far.
    pub fn partial_records(&self) -> usize {
        self.partial
    }

    fn build(&mut self, template: LayoutTemplate, fields: LineFields, segment: &Segment) -> QuotationRecord {
        let quantity = parse_amount(&fields.quantity, self.numbers.decimal_separator);
        let price = parse_money(&fields.unit_price, &self.numbers);
        let total = fields
            .line_total
            .as_deref()
            .map(|t| parse_money(t, &self.numbers));

        let currency = price
            .currency
            .clone()
            .or_else(|| total.as_ref().and_then(|t| t.currency.clone()))
            .or_else(|| self.header.currency.clone())
            .or_else(|| self.numbers.default_currency.clone());

        let line_total = total.and_then(|t| t.amount).or_else(|| match (quantity, price.amount) {
            (Some(q), Some(p)) => Some(round2(q * p)),
            _ => None,
        });

        let complete = fields.description.is_some()
            && quantity.is_some()
            && price.amount.is_some()
            && currency.is_some();

        let confidence = if complete {
            ParseConfidence::Complete
        } else {
            self.partial += 1;
            ParseConfidence::Partial
        };

        self.item_no += 1;
        debug!(
            document = %self.document,
            item = self.item_no,
            template = template.name(),
            ?confidence,
            "Matched line item"
        );

        QuotationRecord {
            source_document: self.document.clone(),
            supplier: self.header.supplier.clone(),
            quotation_number: self.header.quotation_number.clone(),
            description: fields.description,
            quantity,
            unit_price: price.amount,
            currency,
            line_total,
            extracted_at: self.extracted_at,
            confidence,
            item_no: self.item_no,
            part_number: fields.part_number,
            discount: fields.discount,
            delivery_time: fields.delivery_time,
            quotation_date: self.header.quotation_date.clone(),
            customer_code: self.header.customer_code.clone(),
            enquiry: self.header.enquiry.clone(),
            reference: self.header.reference.clone(),
            review_text: (!complete).then(|| segment.raw()),
        }
    }
}

impl Iterator for ParsedRecords {
    type Item = QuotationRecord;

    fn next(&mut self) -> Option<QuotationRecord> {
        loop {
            let segment = self.segments.next()?;
            match first_match(&segment) {
                Some((template, fields)) => return Some(self.build(template, fields, &segment)),
                None => {
                    self.dropped += 1;
                    warn!(
                        document = %self.document,
                        segment = %segment.head(),
                        "No layout template matched; segment dropped"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap()
    }

    fn pages(text: &str) -> Vec<String> {
        vec![text.to_string()]
    }

    #[test]
    fn thousands_quantity_and_dollar_price() {
        let parser = FieldParser::default();
        let records: Vec<_> = parser
            .parse("q.pdf", &pages("Hex bolt M8x50, zinc plated 1,250 pcs $3.40"), ts())
            .collect();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.quantity, Some(1250.0));
        assert_eq!(r.unit_price, Some(3.4));
        assert_eq!(r.currency.as_deref(), Some("USD"));
        assert_eq!(r.line_total, Some(4250.0));
        assert_eq!(r.description.as_deref(), Some("Hex bolt M8x50, zinc plated"));
        assert!(r.is_complete());
        assert_eq!(r.review_text, None);
    }

    #[test]
    fn full_quotation_with_header() {
        let text = "\
Supplier: Acme Industrial GmbH
Quotation No. Q-2026-118
Currency: EUR

Pos Description Qty Price Total
10 HB-M8-50 Hex bolt M8x50 1.250 Stk 3,40 4.250,00
zinc plated
Country of origin: DE
20 Washer M8 DIN 125 500 pcs 0,05 25,00
Total net 4.275,00";
        let parser = FieldParser::new(NumberFormat {
            decimal_separator: ',',
            ..NumberFormat::default()
        });
        let mut parsed = parser.parse("acme.pdf", &pages(text), ts());
        let records: Vec<_> = parsed.by_ref().collect();

        assert_eq!(parsed.header().supplier.as_deref(), Some("Acme Industrial GmbH"));
        assert_eq!(records.len(), 2);
        // "Total net" is its own segment and matches no template.
        assert_eq!(parsed.dropped_segments(), 1);

        let bolt = &records[0];
        assert_eq!(bolt.quotation_number.as_deref(), Some("Q-2026-118"));
        assert_eq!(bolt.part_number.as_deref(), Some("HB-M8-50"));
        assert_eq!(bolt.description.as_deref(), Some("Hex bolt M8x50 zinc plated"));
        assert_eq!(bolt.quantity, Some(1250.0));
        assert_eq!(bolt.unit_price, Some(3.4));
        assert_eq!(bolt.line_total, Some(4250.0));
        assert_eq!(bolt.currency.as_deref(), Some("EUR"));
        assert_eq!(bolt.item_no, 1);

        assert_eq!(records[1].item_no, 2);
        assert_eq!(records[1].quantity, Some(500.0));
        assert_eq!(records[1].unit_price, Some(0.05));
    }

    #[test]
    fn numeric_part_code_before_bare_quantity() {
        let parser = FieldParser::default();
        let records: Vec<_> = parser
            .parse("q.pdf", &pages("10 Ball bearing 6204 50 $3.40"), ts())
            .collect();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.description.as_deref(), Some("Ball bearing 6204"));
        assert_eq!(r.quantity, Some(50.0));
        assert_eq!(r.unit_price, Some(3.4));
        assert_eq!(r.line_total, Some(170.0));
        assert!(r.is_complete());
    }

    #[test]
    fn description_lines_above_amount_lines() {
        let text = "Hex bolt M8x50\n100 pcs $0.50\nWasher M8\n200 pcs $0.05";
        let parser = FieldParser::default();
        let mut parsed = parser.parse("q.pdf", &pages(text), ts());
        let items: Vec<_> = parsed
            .by_ref()
            .map(|r| (r.description, r.quantity, r.unit_price))
            .collect();
        assert_eq!(
            items,
            vec![
                (Some("Hex bolt M8x50".to_string()), Some(100.0), Some(0.5)),
                (Some("Washer M8".to_string()), Some(200.0), Some(0.05)),
            ]
        );
        assert_eq!(parsed.dropped_segments(), 0);
    }

    #[test]
    fn header_fields_reach_every_record() {
        let text = "\
Supplier: Acme Industrial GmbH
Quotation No. Q-2026-118    Date: 12.10.2026
Customer code: K-2231
Your enquiry: RFQ-0415 of 01.10.2026
Your reference: J. Miller
10 Bolt M8 5 pcs $1.00
Delivery time: 2 weeks
20 Nut M8 5 pcs $0.20";
        let parser = FieldParser::default();
        let records: Vec<_> = parser.parse("acme.pdf", &pages(text), ts()).collect();
        assert_eq!(records.len(), 2);
        for r in &records {
            assert_eq!(r.quotation_date.as_deref(), Some("12.10.2026"));
            assert_eq!(r.customer_code.as_deref(), Some("K-2231"));
            assert_eq!(r.enquiry.as_deref(), Some("RFQ-0415"));
            assert_eq!(r.reference.as_deref(), Some("J. Miller"));
        }
        assert_eq!(records[0].delivery_time.as_deref(), Some("2 weeks"));
        assert_eq!(records[0].description.as_deref(), Some("Bolt M8"));
        assert_eq!(records[1].delivery_time, None);
    }

    #[test]
    fn missing_currency_is_partial_with_review_text() {
        let parser = FieldParser::default();
        let records: Vec<_> = parser
            .parse("q.pdf", &pages("10 Gasket set 4 pcs 12.50"), ts())
            .collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].confidence, ParseConfidence::Partial);
        assert_eq!(records[0].currency, None);
        assert_eq!(records[0].line_total, Some(50.0));
        assert_eq!(records[0].review_text.as_deref(), Some("10 Gasket set 4 pcs 12.50"));
    }

    #[test]
    fn default_currency_completes_record() {
        let parser = FieldParser::new(NumberFormat {
            default_currency: Some("GBP".into()),
            ..NumberFormat::default()
        });
        let r = parser
            .parse("q.pdf", &pages("10 Gasket set 4 pcs 12.50"), ts())
            .next()
            .unwrap();
        assert_eq!(r.currency.as_deref(), Some("GBP"));
        assert!(r.is_complete());
    }

    #[test]
    fn missing_description_is_partial() {
        let parser = FieldParser::default();
        let r = parser
            .parse("q.pdf", &pages("1,250 pcs $3.40"), ts())
            .next()
            .unwrap();
        assert_eq!(r.description, None);
        assert_eq!(r.confidence, ParseConfidence::Partial);
        assert_eq!(r.quantity, Some(1250.0));
    }

    #[test]
    fn unparseable_price_keeps_raw_text() {
        let text = "Description: Pump\nQty: 2\nUnit price: on request";
        let parser = FieldParser::default();
        let r = parser.parse("q.pdf", &pages(text), ts()).next().unwrap();
        assert_eq!(r.unit_price, None);
        assert_eq!(r.line_total, None);
        assert_eq!(r.confidence, ParseConfidence::Partial);
        assert!(r.review_text.unwrap().contains("on request"));
    }

    #[test]
    fn unmatched_segments_are_counted() {
        let text = "10 Bolt 5 pcs $1.00\n20 Freight flat 25.00\nTotal 30.00";
        let parser = FieldParser::default();
        let mut parsed = parser.parse("q.pdf", &pages(text), ts());
        let records: Vec<_> = parsed.by_ref().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(parsed.dropped_segments(), 2);
    }

    #[test]
    fn empty_document_yields_nothing() {
        let parser = FieldParser::default();
        let mut parsed = parser.parse("blank.pdf", &[String::new()], ts());
        assert!(parsed.next().is_none());
        assert_eq!(parsed.dropped_segments(), 0);
    }

    #[test]
    fn header_fallbacks() {
        let n = NumberFormat::default();
        let h = scan_header(
            &pages("QUOTATION\nNordic Valves AB\nOffer #7781\nAll prices in SEK"),
            &n,
        );
        assert_eq!(h.supplier.as_deref(), Some("Nordic Valves AB"));
        assert_eq!(h.quotation_number.as_deref(), Some("7781"));
        assert_eq!(h.currency.as_deref(), Some("SEK"));
    }

    #[test]
    fn header_reference_fields() {
        let n = NumberFormat::default();
        let h = scan_header(
            &pages(
                "Angebot Nr. 4711\nDatum: 3. März 2026\nKunden-Nr.: 10442\n\
                 Ihre Anfrage Nr. 88-12 vom 01.03.2026\nIhr Zeichen: Hr. Weber\n\
                 Delivery date: 01.05.2026",
            ),
            &n,
        );
        assert_eq!(h.quotation_number.as_deref(), Some("4711"));
        assert_eq!(h.quotation_date.as_deref(), Some("3. März 2026"));
        assert_eq!(h.customer_code.as_deref(), Some("10442"));
        assert_eq!(h.enquiry.as_deref(), Some("88-12"));
        assert_eq!(h.reference.as_deref(), Some("Hr. Weber"));
    }

    #[test]
    fn delivery_date_is_not_the_quotation_date() {
        let n = NumberFormat::default();
        let h = scan_header(&pages("Delivery date: 01.05.2026\nOffer date 2026-04-02"), &n);
        assert_eq!(h.quotation_date.as_deref(), Some("2026-04-02"));
        assert_eq!(h.reference, None);
    }

    #[test]
    fn quotation_word_without_number_is_ignored() {
        let n = NumberFormat::default();
        let h = scan_header(&pages("Our quotation for hex bolts\nAngebot Nr. 4711"), &n);
        assert_eq!(h.quotation_number.as_deref(), Some("4711"));
    }
}
