//! The `QuotationRecord` row type and its de-duplication key.
//!
//! Field order here *is* the column order of the consolidated CSV store: the
//! `csv` crate derives the header from the struct, so reordering fields is a
//! breaking change to the on-disk format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Header of the consolidated store, in column order.
pub const STORE_COLUMNS: [&str; 19] = [
    "source_document",
    "supplier",
    "quotation_number",
    "description",
    "quantity",
    "unit_price",
    "currency",
    "line_total",
    "extracted_at",
    "confidence",
    "item_no",
    "part_number",
    "discount",
    "delivery_time",
    "quotation_date",
    "customer_code",
    "enquiry",
    "reference",
    "review_text",
];

/// Whether every line-level field was recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseConfidence {
    /// Description, quantity, unit price and currency all present.
    Complete,
    /// At least one of them is missing or failed to normalise.
    Partial,
}

/// One parsed line item of a quotation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotationRecord {
    /// File name of the source PDF.
    pub source_document: String,
    pub supplier: Option<String>,
    pub quotation_number: Option<String>,
    pub description: Option<String>,
    pub quantity: Option<f64>,
    pub unit_price: Option<f64>,
    /// ISO 4217 code.
    pub currency: Option<String>,
    /// Extracted from the row when present, otherwise quantity × unit price.
    pub line_total: Option<f64>,
    pub extracted_at: DateTime<Utc>,
    pub confidence: ParseConfidence,
    /// 1-based position of the item within its document.
    pub item_no: u32,
    pub part_number: Option<String>,
    /// Discount as printed on the item (`10%`).
    pub discount: Option<String>,
    pub delivery_time: Option<String>,
    /// Date printed on the quotation, unparsed.
    pub quotation_date: Option<String>,
    /// Our customer number at the supplier.
    pub customer_code: Option<String>,
    /// The buyer's enquiry this quotation answers.
    pub enquiry: Option<String>,
    pub reference: Option<String>,
    /// Raw segment text, kept on partial records for manual review.
    pub review_text: Option<String>,
}

/// `(source document, quotation number, description)`, the uniqueness tuple
/// of the store. Absent values compare as empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub source_document: String,
    pub quotation_number: String,
    pub description: String,
}

impl QuotationRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            source_document: self.source_document.clone(),
            quotation_number: self.quotation_number.clone().unwrap_or_default(),
            description: self.description.clone().unwrap_or_default(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.confidence == ParseConfidence::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(description: Option<&str>) -> QuotationRecord {
        QuotationRecord {
            source_document: "q1.pdf".into(),
            supplier: Some("Acme".into()),
            quotation_number: None,
            description: description.map(String::from),
            quantity: Some(2.0),
            unit_price: Some(1.5),
            currency: Some("USD".into()),
            line_total: Some(3.0),
            extracted_at: Utc.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap(),
            confidence: ParseConfidence::Complete,
            item_no: 1,
            part_number: None,
            discount: None,
            delivery_time: None,
            quotation_date: None,
            customer_code: None,
            enquiry: None,
            reference: None,
            review_text: None,
        }
    }

    #[test]
    fn key_treats_absent_as_empty() {
        let key = record(None).key();
        assert_eq!(key.quotation_number, "");
        assert_eq!(key.description, "");
    }

    #[test]
    fn key_ignores_non_key_fields() {
        let a = record(Some("Hex bolt"));
        let mut b = a.clone();
        b.quantity = Some(99.0);
        b.item_no = 7;
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn serialised_header_matches_store_columns() {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.serialize(record(Some("Bolt"))).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(text.lines().next().unwrap(), STORE_COLUMNS.join(","));
    }

    #[test]
    fn confidence_serialises_lowercase() {
        assert_eq!(
            serde_json::to_string(&ParseConfidence::Partial).unwrap(),
            "\"partial\""
        );
    }
}
