//! Numeric and currency normalisation for extracted amounts.
//!
//! Quotations arrive in every number style the vendor's locale produces:
//! `1,250.00`, `1.250,00`, `1'250.00`, `3,40 €`, `EUR 1.234,56`. Every rule
//! here is a pure function from raw token text to a normalised value, and a
//! failure is `None`, never an error: the caller marks the record partial and
//! keeps the raw text for review.
//!
//! The regex fragments are shared with [`super::templates`] so a token the
//! layout templates capture as a price is always one this module can parse.

use crate::config::{NumberFormat, KNOWN_ISO_CODES};
use once_cell::sync::Lazy;
use regex::Regex;

/// A number with optional thousands grouping and decimal part.
pub const NUM: &str = r"\d{1,3}(?:[.,']\d{3})+(?:[.,]\d+)?|\d+(?:[.,]\d+)?";

/// A currency marker: symbol, alias, or a known ISO code.
pub static CUR: Lazy<String> = Lazy::new(|| {
    format!(
        r"(?:US\$|Rs\.?|[$€£¥₹]|(?:{})\b)",
        KNOWN_ISO_CODES.join("|")
    )
});

/// Quantity units recognised after a quantity (case-insensitive).
pub const UNIT: &str =
    r"(?i:pcs\.?|pc\.?|pieces?|stk\.?|stck\.?|st\.?|ea\.?|each|units?|nos\.?|no\.?|sets?|pairs?|pair|kg|m|lot)";

/// An amount with an optional leading or trailing currency marker.
pub static MONEY: Lazy<String> = Lazy::new(|| {
    let cur = CUR.as_str();
    format!(r"(?:{cur}\s?)?(?:{NUM})(?:\s?{cur})?")
});

/// A token that is unambiguously a price: currency-marked, or carrying
/// exactly two decimals.
static RE_PRICE_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^(?:(?:US\$|[$€£¥₹])(?:{NUM})|(?:{NUM})[$€£¥₹]|\d{{1,3}}(?:[.,']\d{{3}})*[.,]\d{{2}}|\d+[.,]\d{{2}})$"
    ))
    .unwrap()
});

/// Free-standing strict price match inside running text.
pub static RE_PRICE_IN_TEXT: Lazy<Regex> = Lazy::new(|| {
    let cur = CUR.as_str();
    Regex::new(&format!(
        r"(?:^|\s)(?P<price>(?:{cur}\s?(?:{NUM})|(?:{NUM})\s?{cur}|\d{{1,3}}(?:[.,']\d{{3}})*[.,]\d{{2}}|\d+[.,]\d{{2}}))(?:\s|$|[;,)])"
    ))
    .unwrap()
});

static RE_THOUSANDS_GROUPS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,3}(?:[.,']\d{3})+$").unwrap());

/// An amount split into its currency marker and numeric part.
#[derive(Debug, Clone, PartialEq)]
pub struct Money {
    /// Parsed value; None when the numeric part failed to normalise.
    pub amount: Option<f64>,
    /// ISO code resolved from the marker, if any.
    pub currency: Option<String>,
}

/// Whether a single whitespace-free token looks like a price.
pub fn is_price_token(token: &str) -> bool {
    RE_PRICE_TOKEN.is_match(token.trim_end_matches([',', ';']))
}

/// Parse a raw amount such as `1,250`, `1.234,56` or `3.40`.
///
/// Separator rules:
/// - both `.` and `,` present: the rightmost one is the decimal separator;
/// - one separator repeated: it groups thousands;
/// - one separator once, followed by exactly three digits: ambiguous, so the
///   configured `decimal_separator` decides (`1,250` → 1250 under `.`);
/// - one separator once, any other digit count: decimal.
///
/// Negative, non-finite, or otherwise malformed values yield `None`.
pub fn parse_amount(raw: &str, decimal_separator: char) -> Option<f64> {
    let s: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\'' && *c != '\u{a0}' && *c != '\u{202f}')
        .collect();

    if s.is_empty()
        || !s.starts_with(|c: char| c.is_ascii_digit())
        || !s.ends_with(|c: char| c.is_ascii_digit())
        || !s.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',')
    {
        return None;
    }

    let dots = s.matches('.').count();
    let commas = s.matches(',').count();

    let normalised = match (dots, commas) {
        (0, 0) => s,
        (d, c) if d > 0 && c > 0 => {
            let last_dot = s.rfind('.')?;
            let last_comma = s.rfind(',')?;
            let (decimal, group) = if last_dot > last_comma {
                ('.', ',')
            } else {
                (',', '.')
            };
            if s.matches(decimal).count() > 1 {
                return None;
            }
            let (int_part, frac) = s.split_once(decimal)?;
            if !RE_THOUSANDS_GROUPS.is_match(int_part) {
                return None;
            }
            format!("{}.{}", int_part.replace(group, ""), frac)
        }
        _ => {
            let sep = if dots > 0 { '.' } else { ',' };
            if dots + commas > 1 {
                if !RE_THOUSANDS_GROUPS.is_match(&s) {
                    return None;
                }
                s.replace(sep, "")
            } else {
                let (int_part, frac) = s.split_once(sep)?;
                if frac.len() == 3 && sep != decimal_separator {
                    format!("{int_part}{frac}")
                } else {
                    format!("{int_part}.{frac}")
                }
            }
        }
    };

    normalised
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

/// Split a money token into currency marker and amount, then normalise both.
///
/// An unrecognised marker leaves `currency` empty without failing the amount;
/// a leading minus sign fails the amount (prices are never negative).
pub fn parse_money(raw: &str, numbers: &NumberFormat) -> Money {
    let raw = raw.trim();
    let start = raw.find(|c: char| c.is_ascii_digit()).unwrap_or(raw.len());
    let end = raw
        .rfind(|c: char| c.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(start);

    let prefix = raw[..start].trim();
    let suffix = if end > start { raw[end..].trim() } else { "" };
    let number = if end > start { &raw[start..end] } else { "" };

    let currency = [prefix, suffix]
        .into_iter()
        .filter(|marker| !marker.is_empty())
        .find_map(|marker| numbers.currency_code(marker));

    let amount = if prefix.ends_with('-') || prefix.starts_with('-') {
        None
    } else {
        parse_amount(number, numbers.decimal_separator)
    };

    Money { amount, currency }
}

/// Collapse internal whitespace and trim filler punctuation; empty → None.
pub fn clean_text(input: &str) -> Option<String> {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '@' | '-' | ':' | '|'))
        .trim_end_matches(" at")
        .trim_end_matches(" à")
        .trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Round to two decimal places (derived line totals).
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
