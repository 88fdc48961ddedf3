//! Layout templates: turn one candidate segment into raw line-item fields.
//!
//! Each vendor layout the parser understands is one variant of
//! [`LayoutTemplate`]. Templates are tried in the fixed order of
//! [`LayoutTemplate::PRIORITY`] and [`first_match`] returns the first one that
//! recovers both required fields (quantity and unit price). Adding a layout
//! means adding a variant and slotting it into `PRIORITY`; existing templates
//! are never touched.
//!
//! Templates only *locate* text. Turning `1,250` or `€3,40` into numbers is
//! [`super::normalize`]'s job, so a template match with an unparseable number
//! still produces a (partial) record instead of being dropped.

use super::normalize::{clean_text, parse_amount, round2, MONEY, NUM, RE_PRICE_IN_TEXT, UNIT};
use super::segment::{Segment, RE_QUANTITY_LEAD};
use once_cell::sync::Lazy;
use regex::Regex;

/// Raw field text recovered from one segment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LineFields {
    pub description: Option<String>,
    pub part_number: Option<String>,
    pub quantity: String,
    pub unit_price: String,
    pub line_total: Option<String>,
    /// Discount as printed (`10%`, `5,00 EUR`).
    pub discount: Option<String>,
    /// Delivery time as printed (`4 weeks`, `ex stock`).
    pub delivery_time: Option<String>,
}

/// The known quotation layouts, as a tagged rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutTemplate {
    /// `Description: …` / `Qty: …` / `Unit price: …` blocks.
    LabeledFields,
    /// `pos [part] description qty [unit] price [total]` on one row.
    PositionRow,
    /// `qty unit description [@|at] price [total]`.
    QuantityFirst,
    /// Any `qty unit` followed somewhere by a price; the rest is description.
    LooseAmounts,
}

impl LayoutTemplate {
    /// Resolution order: most specific layout first.
    pub const PRIORITY: [LayoutTemplate; 4] = [
        LayoutTemplate::LabeledFields,
        LayoutTemplate::PositionRow,
        LayoutTemplate::QuantityFirst,
        LayoutTemplate::LooseAmounts,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LayoutTemplate::LabeledFields => "labeled_fields",
            LayoutTemplate::PositionRow => "position_row",
            LayoutTemplate::QuantityFirst => "quantity_first",
            LayoutTemplate::LooseAmounts => "loose_amounts",
        }
    }

    /// Apply this template; `None` unless quantity and unit price were found.
    pub fn apply(&self, segment: &Segment) -> Option<LineFields> {
        match self {
            LayoutTemplate::LabeledFields => labeled_fields(segment),
            LayoutTemplate::PositionRow => position_row(segment),
            LayoutTemplate::QuantityFirst => quantity_first(segment),
            LayoutTemplate::LooseAmounts => loose_amounts(segment),
        }
    }
}

/// First template in priority order that matches, with its fields.
pub fn first_match(segment: &Segment) -> Option<(LayoutTemplate, LineFields)> {
    LayoutTemplate::PRIORITY
        .iter()
        .find_map(|t| t.apply(segment).map(|fields| (*t, fields)))
}

// ── Field labels ─────────────────────────────────────────────────────────────

/// Field named by a `label: value` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldLabel {
    Description,
    PartNumber,
    Quantity,
    UnitPrice,
    Total,
    Discount,
    DeliveryTime,
}

static RE_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?P<key>[A-Za-z][A-Za-z _./\-]{0,30}?)\s*:\s*(?P<value>.*)$").unwrap());

/// Recognise a `label: value` line with a known label.
pub fn parse_label(line: &str) -> Option<(FieldLabel, &str)> {
    let caps = RE_LABEL.captures(line)?;
    let key = caps.name("key")?.as_str();
    let value = caps.name("value")?.as_str().trim();
    let normalised: String = key
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphabetic() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let label = match normalised.as_str() {
        "description" | "part description" | "item description" | "item" | "article"
        | "bezeichnung" => FieldLabel::Description,
        "part number" | "part no" | "part" | "article no" | "art nr" | "item code"
        | "material" => FieldLabel::PartNumber,
        "qty" | "quantity" | "part quantity" | "menge" => FieldLabel::Quantity,
        "unit price" | "price" | "rate" | "price per unit" | "einzelpreis" => {
            FieldLabel::UnitPrice
        }
        "total" | "total price" | "line total" | "amount" | "gesamtpreis" => FieldLabel::Total,
        "discount" | "disc" | "rabatt" => FieldLabel::Discount,
        "delivery time" | "delivery" | "lead time" | "delivery period" | "lieferzeit" => {
            FieldLabel::DeliveryTime
        }
        _ => return None,
    };
    Some((label, value))
}

/// Strip a trailing unit word from a labelled quantity (`5 pcs` → `5`).
static RE_QTY_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"^(?P<qty>{NUM})\s*(?:{UNIT})?\.?$")).unwrap());

fn labeled_fields(segment: &Segment) -> Option<LineFields> {
    let mut fields = LineFields::default();
    let mut description: Vec<&str> = Vec::new();
    let mut last = None;

    for line in segment.lines() {
        match parse_label(line) {
            Some((label, value)) => {
                last = Some(label);
                let value = value.trim();
                if value.is_empty() || value == "-" {
                    continue;
                }
                match label {
                    FieldLabel::Description => description.push(value),
                    FieldLabel::PartNumber => fields.part_number = Some(value.to_string()),
                    FieldLabel::Quantity => {
                        fields.quantity = RE_QTY_VALUE
                            .captures(value)
                            .and_then(|c| c.name("qty"))
                            .map(|m| m.as_str().to_string())
                            .unwrap_or_else(|| value.to_string());
                    }
                    FieldLabel::UnitPrice => fields.unit_price = value.to_string(),
                    FieldLabel::Total => fields.line_total = Some(value.to_string()),
                    FieldLabel::Discount => fields.discount = Some(value.to_string()),
                    FieldLabel::DeliveryTime => fields.delivery_time = Some(value.to_string()),
                }
            }
            // Unlabelled lines continue a multi-line description.
            None if last == Some(FieldLabel::Description) => description.push(line.trim()),
            None => {}
        }
    }

    if fields.quantity.is_empty() || fields.unit_price.is_empty() {
        return None;
    }
    fields.description = clean_text(&description.join(" "));
    Some(fields)
}

// ── Row templates ────────────────────────────────────────────────────────────

static RE_POSITION_ROW: Lazy<Regex> = Lazy::new(|| {
    let money = MONEY.as_str();
    Regex::new(&format!(
        r"^\s*(?P<pos>\d{{1,3}}(?:[.,]\d{{1,2}})?)\s+(?P<body>.+?)\s+(?P<qty>{NUM})\s*(?:{UNIT})?\.?\s+(?P<price>{money})(?:\s+(?P<total>{money}))?\s*$"
    ))
    .unwrap()
});

/// The same row read from the right: the last amount is the price.
static RE_POSITION_ROW_PRICE_LAST: Lazy<Regex> = Lazy::new(|| {
    let money = MONEY.as_str();
    Regex::new(&format!(
        r"^\s*(?P<pos>\d{{1,3}}(?:[.,]\d{{1,2}})?)\s+(?P<body>.+)\s+(?P<qty>{NUM})\s*(?:{UNIT})?\.?\s+(?P<price>{money})\s*$"
    ))
    .unwrap()
});

static RE_QUANTITY_FIRST: Lazy<Regex> = Lazy::new(|| {
    let money = MONEY.as_str();
    Regex::new(&format!(
        r"^\s*(?P<qty>{NUM})\s*(?:{UNIT}|x|×)\.?\s+(?P<body>.+?)\s+(?:(?:@|at|à)\s*)?(?P<price>{money})(?:\s+(?P<total>{money}))?\s*$"
    ))
    .unwrap()
});

static RE_QUANTITY_FIRST_PRICE_LAST: Lazy<Regex> = Lazy::new(|| {
    let money = MONEY.as_str();
    Regex::new(&format!(
        r"^\s*(?P<qty>{NUM})\s*(?:{UNIT}|x|×)\.?\s+(?P<body>.+)\s+(?:(?:@|at|à)\s*)?(?P<price>{money})\s*$"
    ))
    .unwrap()
});

/// A leading uppercase code such as `HB-M8-50` or `4711.0815`.
static RE_PART_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9][A-Z0-9\-/._]{2,}$").unwrap());

fn position_row(segment: &Segment) -> Option<LineFields> {
    // `5 pcs …` opens a quantity-first row, not position 5.
    if RE_QUANTITY_LEAD.is_match(segment.head()) {
        return None;
    }
    row_match(segment, &RE_POSITION_ROW, &RE_POSITION_ROW_PRICE_LAST, true)
}

fn quantity_first(segment: &Segment) -> Option<LineFields> {
    row_match(segment, &RE_QUANTITY_FIRST, &RE_QUANTITY_FIRST_PRICE_LAST, false)
}

/// Match `row` against the head line. A doubtful split (see
/// [`split_is_doubtful`]) is re-read with `price_last`, which keeps trailing
/// numbers in the description and takes the last amount as the price.
fn row_match(segment: &Segment, row: &Regex, price_last: &Regex, split_part: bool) -> Option<LineFields> {
    let head = segment.head();
    let caps = row.captures(head)?;
    if split_is_doubtful(&caps) {
        if let Some(reread) = price_last.captures(head) {
            return Some(row_fields(&reread, segment, split_part));
        }
    }
    Some(row_fields(&caps, segment, split_part))
}

/// A bare-number price followed by a total that is not quantity × price
/// means a number from the description was read as the quantity
/// (`Ball bearing 6204 50 $3.40`). A currency-marked or two-decimal price
/// pins the columns, so a disagreeing total there is taken as printed.
fn split_is_doubtful(caps: &regex::Captures<'_>) -> bool {
    let Some(total) = caps.name("total") else {
        return false;
    };
    let price = &caps["price"];
    !RE_PRICE_IN_TEXT.is_match(price.trim()) && !amounts_agree(&caps["qty"], price, total.as_str())
}

/// Whether `qty × price` equals `total` to the cent under either reading of
/// an ambiguous separator. Amounts that do not parse at all agree.
fn amounts_agree(qty: &str, price: &str, total: &str) -> bool {
    let amount = |raw: &str, sep: char| {
        parse_amount(raw.trim_matches(|c: char| !c.is_ascii_digit()), sep)
    };
    let readings: Vec<(f64, f64, f64)> = ['.', ',']
        .into_iter()
        .filter_map(|sep| Some((amount(qty, sep)?, amount(price, sep)?, amount(total, sep)?)))
        .collect();
    readings.is_empty()
        || readings
            .iter()
            .any(|(q, p, t)| (round2(q * p) - t).abs() < 0.011)
}

fn row_fields(caps: &regex::Captures<'_>, segment: &Segment, split_part: bool) -> LineFields {
    let body = caps.name("body").map(|m| m.as_str()).unwrap_or("");
    let (part_number, body) = if split_part {
        split_part_code(body)
    } else {
        (None, body)
    };

    let mut fields = LineFields {
        part_number,
        quantity: caps["qty"].to_string(),
        unit_price: caps["price"].to_string(),
        line_total: caps.name("total").map(|m| m.as_str().to_string()),
        ..LineFields::default()
    };
    let mut description = vec![body];
    description.extend(take_item_labels(segment.continuation(), &mut fields));
    fields.description = clean_text(&description.join(" "));
    fields
}

/// Move `Discount:` and `Delivery time:` lines into `fields`; the remaining
/// lines are returned for the description.
fn take_item_labels<'a>(lines: &'a [String], fields: &mut LineFields) -> Vec<&'a str> {
    let mut rest = Vec::new();
    for line in lines {
        match parse_label(line) {
            Some((FieldLabel::Discount, value)) if !value.is_empty() => {
                fields.discount = Some(value.to_string());
            }
            Some((FieldLabel::DeliveryTime, value)) if !value.is_empty() => {
                fields.delivery_time = Some(value.to_string());
            }
            _ => rest.push(line.as_str()),
        }
    }
    rest
}

fn split_part_code(body: &str) -> (Option<String>, &str) {
    let mut parts = body.trim_start().splitn(2, char::is_whitespace);
    match (parts.next(), parts.next()) {
        (Some(first), Some(rest))
            if RE_PART_CODE.is_match(first) && first.chars().any(|c| c.is_ascii_digit()) =>
        {
            (Some(first.to_string()), rest)
        }
        _ => (None, body),
    }
}

// ── Loose amounts ────────────────────────────────────────────────────────────

static RE_QTY_UNIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?:^|\s)(?P<qty>{NUM})\s*(?:{UNIT})\.?(?:\s|$|[,;])"
    ))
    .unwrap()
});

static RE_LEADING_POSITION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d{1,3}(?:[.,]\d{1,2})?\s+").unwrap());

fn loose_amounts(segment: &Segment) -> Option<LineFields> {
    let mut fields = LineFields::default();
    let text = take_item_labels(segment.lines(), &mut fields)
        .iter()
        .map(|l| l.trim())
        .collect::<Vec<_>>()
        .join(" ");

    let price_caps = RE_PRICE_IN_TEXT.captures(&text)?;
    let price = price_caps.name("price")?;

    // The quantity closest before the price wins; earlier `2 m` style
    // mentions belong to the description.
    let before = &text[..price.start()];
    let qty = RE_QTY_UNIT
        .captures_iter(before)
        .last()
        .and_then(|c| c.name("qty").map(|m| (c.get(0).map(|all| all.start()), m)))?;
    let (qty_span_start, qty_match) = qty;
    let qty_span_start = qty_span_start.unwrap_or(qty_match.start());

    let after = &text[price.end()..];
    let total = RE_PRICE_IN_TEXT
        .captures(after)
        .and_then(|c| c.name("price"))
        .filter(|m| after[..m.start()].trim().is_empty());

    let tail_start = price.end() + total.map(|m| m.end()).unwrap_or(0);
    let head = RE_LEADING_POSITION.replace(&text[..qty_span_start], "");
    let between = &text[qty_match.end()..price.start()];
    let between = strip_leading_unit(between);
    let tail = &text[tail_start..];

    Some(LineFields {
        description: clean_text(&format!("{head} {between} {tail}")),
        quantity: qty_match.as_str().to_string(),
        unit_price: price.as_str().to_string(),
        line_total: total.map(|m| m.as_str().to_string()),
        ..fields
    })
}

static RE_UNIT_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"^\s*(?:{UNIT})\.?(?:\s|$)")).unwrap());

fn strip_leading_unit(s: &str) -> &str {
    match RE_UNIT_PREFIX.find(s) {
        Some(m) => &s[m.end()..],
        None => s,
    }
}
