//! Split a document's text into candidate line-item segments.
//!
//! Segmenting is layout-driven, not linguistic. The boundary cue is chosen
//! once per document, in this order:
//!
//! | Strategy          | Cue                                                   |
//! |-------------------|-------------------------------------------------------|
//! | `ItemMarkers`     | explicit `BEGIN_ITEM` … `END_ITEM` blocks              |
//! | `LabelRepeat`     | `Qty:`/`Unit price:` blocks; a repeated label opens a new item |
//! | `PositionNumbers` | rows opening with a position number (`10`, `1.0`, `10,0`) |
//! | `PricedLines`     | every line carrying a price token                     |
//!
//! Lines after a boundary belong to the segment it opened (continuation
//! lines). Lines before the first boundary are header text and are not
//! segments at all, so they never count as dropped.
//!
//! One exception under `PricedLines`: a priced line that is nothing but
//! amounts (`100 pcs $0.50`) takes its description from the unpriced lines
//! above it. Before the first item only the nearest such line is taken, so
//! the document header stays out.

use super::normalize::{is_price_token, MONEY, NUM, UNIT};
use super::templates::{parse_label, FieldLabel};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

const BEGIN_ITEM: &str = "BEGIN_ITEM";
const END_ITEM: &str = "END_ITEM";

static RE_NOISE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:com\.?\s*-?\s*code|commodity\s+code|country\s+of\s+origin|page\s+\d+\s*(?:of|/)\s*\d+\s*$)",
    )
    .unwrap()
});

/// `10 `, `1.0 `, `10,0 ` at line start.
static RE_POSITION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?P<pos>\d{1,3}(?P<frac>[.,]\d{1,2})?)\s+\S").unwrap());

/// `500 pcs …`: a quantity, not a position.
pub(super) static RE_QUANTITY_LEAD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^\s*(?:{NUM})\s*(?:{UNIT}|x|×)\.?(?:\s|$)")).unwrap()
});

/// `100 pcs $0.50`, `2 x 12,00 24,00`: amounts only, no description.
static RE_BARE_AMOUNTS: Lazy<Regex> = Lazy::new(|| {
    let money = MONEY.as_str();
    Regex::new(&format!(
        r"^\s*(?:{NUM})\s*(?:(?:{UNIT}|x|×)\.?)?\s+(?:(?:@|at)\s*)?(?:{money})(?:\s+(?:{money}))?\s*$"
    ))
    .unwrap()
});

/// One candidate line item: a head line plus continuation lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    lines: Vec<String>,
}

impl Segment {
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// The line that opened the segment.
    pub fn head(&self) -> &str {
        self.lines.first().map(String::as_str).unwrap_or("")
    }

    pub fn continuation(&self) -> &[String] {
        self.lines.get(1..).unwrap_or(&[])
    }

    /// Original line structure, for manual review.
    pub fn raw(&self) -> String {
        self.lines.join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryStrategy {
    ItemMarkers,
    LabelRepeat,
    PositionNumbers,
    PricedLines,
}

impl BoundaryStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            BoundaryStrategy::ItemMarkers => "item_markers",
            BoundaryStrategy::LabelRepeat => "label_repeat",
            BoundaryStrategy::PositionNumbers => "position_numbers",
            BoundaryStrategy::PricedLines => "priced_lines",
        }
    }
}

/// Segments of one document and the cue that produced them.
#[derive(Debug, Clone, Default)]
pub struct Segmentation {
    pub strategy: Option<BoundaryStrategy>,
    pub segments: Vec<Segment>,
}

/// Lines of the item table: between the first line containing `start` and
/// the next line containing `end`. Without both markers, or when `start` is
/// not found, the whole text is the table.
pub fn table_region<'a>(lines: &[&'a str], markers: Option<(&str, &str)>) -> Vec<&'a str> {
    let Some((start, end)) = markers else {
        return lines.to_vec();
    };
    let Some(begin) = lines.iter().position(|l| l.contains(start)) else {
        return lines.to_vec();
    };
    let body = &lines[begin + 1..];
    let stop = body
        .iter()
        .position(|l| l.contains(end))
        .unwrap_or(body.len());
    body[..stop].to_vec()
}

/// Whether a line carries no item information (customs codes, page footers).
pub fn is_noise(line: &str) -> bool {
    RE_NOISE.is_match(line)
}

/// Segment page texts into candidate line items.
pub fn segment_pages(pages: &[String], markers: Option<(&str, &str)>) -> Segmentation {
    let all: Vec<&str> = pages.iter().flat_map(|p| p.lines()).collect();
    let lines: Vec<&str> = table_region(&all, markers)
        .into_iter()
        .filter(|l| !l.trim().is_empty() && !is_noise(l))
        .collect();

    let Some(strategy) = choose_strategy(&lines) else {
        return Segmentation::default();
    };

    let segments = match strategy {
        BoundaryStrategy::ItemMarkers => split_item_markers(&lines),
        BoundaryStrategy::LabelRepeat => split_label_repeat(&lines),
        BoundaryStrategy::PositionNumbers => split_positions(&lines),
        BoundaryStrategy::PricedLines => split_priced(&lines),
    };

    Segmentation {
        strategy: Some(strategy),
        segments,
    }
}

fn choose_strategy(lines: &[&str]) -> Option<BoundaryStrategy> {
    if lines.iter().any(|l| l.trim() == BEGIN_ITEM) {
        return Some(BoundaryStrategy::ItemMarkers);
    }

    let labels: HashSet<FieldLabel> = lines
        .iter()
        .filter_map(|l| parse_label(l).map(|(label, _)| label))
        .collect();
    if labels.contains(&FieldLabel::Quantity) && labels.contains(&FieldLabel::UnitPrice) {
        return Some(BoundaryStrategy::LabelRepeat);
    }

    if lines.iter().any(|l| is_position_row(l)) {
        return Some(BoundaryStrategy::PositionNumbers);
    }
    if lines.iter().any(|l| has_price_token(l)) {
        return Some(BoundaryStrategy::PricedLines);
    }
    None
}

fn has_price_token(line: &str) -> bool {
    line.split_whitespace().any(is_price_token)
}

/// A position number alone is too weak (addresses, `2 m hose`); the row must
/// also carry a price, or use the `1,0` style that only positions use.
fn is_position_row(line: &str) -> bool {
    if RE_QUANTITY_LEAD.is_match(line) {
        return false;
    }
    match RE_POSITION.captures(line) {
        Some(caps) => caps.name("frac").is_some() || has_price_token(line),
        None => false,
    }
}

/// Split at priced lines. Unpriced lines are held back until the next priced
/// line shows whether they describe it (a bare-amounts line) or continue the
/// previous item.
fn split_priced(lines: &[&str]) -> Vec<Segment> {
    let mut segments: Vec<Segment> = Vec::new();
    let mut current: Option<Vec<String>> = None;
    let mut pending: Vec<String> = Vec::new();

    for &line in lines {
        if !has_price_token(line) {
            pending.push(line.to_string());
            continue;
        }

        let mut opened = Vec::new();
        match current.take() {
            Some(mut done) => {
                if RE_BARE_AMOUNTS.is_match(line) {
                    opened.append(&mut pending);
                } else {
                    done.append(&mut pending);
                }
                segments.push(Segment::new(done));
            }
            None => {
                if RE_BARE_AMOUNTS.is_match(line) {
                    opened.extend(pending.pop());
                }
                pending.clear();
            }
        }
        opened.push(line.to_string());
        current = Some(opened);
    }
    if let Some(mut open) = current {
        open.append(&mut pending);
        segments.push(Segment::new(open));
    }
    segments
}

/// Split at position rows. A priced line following an already priced segment
/// stands alone (grand totals, freight lines) instead of polluting the
/// previous item's description.
fn split_positions(lines: &[&str]) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut current: Option<(Vec<String>, bool)> = None;

    for &line in lines {
        let priced = has_price_token(line);
        let opens = is_position_row(line)
            || (priced && current.as_ref().is_some_and(|(_, has_price)| *has_price));
        if opens {
            if let Some((done, _)) = current.take() {
                segments.push(Segment::new(done));
            }
            current = Some((vec![line.to_string()], priced));
        } else if let Some((open, has_price)) = current.as_mut() {
            open.push(line.to_string());
            *has_price |= priced;
        }
    }
    segments.extend(current.map(|(lines, _)| Segment::new(lines)));
    segments
}

fn split_item_markers(lines: &[&str]) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut current: Option<Vec<String>> = None;

    for line in lines {
        match line.trim() {
            BEGIN_ITEM => {
                // An unterminated block is closed by the next BEGIN_ITEM.
                if let Some(done) = current.replace(Vec::new()) {
                    segments.push(Segment::new(done));
                }
            }
            END_ITEM => {
                if let Some(done) = current.take() {
                    segments.push(Segment::new(done));
                }
            }
            _ => {
                if let Some(open) = current.as_mut() {
                    open.push(line.to_string());
                }
            }
        }
    }
    segments.extend(current.map(Segment::new));
    segments.retain(|s| !s.lines().is_empty());
    segments
}

fn split_label_repeat(lines: &[&str]) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut current: Option<(Vec<String>, HashSet<FieldLabel>)> = None;

    for line in lines {
        match parse_label(line) {
            Some((label, _)) => {
                let repeated = current
                    .as_ref()
                    .is_some_and(|(_, seen)| seen.contains(&label));
                if repeated || current.is_none() {
                    if let Some((done, _)) = current.take() {
                        segments.push(Segment::new(done));
                    }
                    current = Some((Vec::new(), HashSet::new()));
                }
                if let Some((open, seen)) = current.as_mut() {
                    open.push(line.to_string());
                    seen.insert(label);
                }
            }
            None => {
                if let Some((open, _)) = current.as_mut() {
                    open.push(line.to_string());
                }
            }
        }
    }
    segments.extend(current.map(|(lines, _)| Segment::new(lines)));
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages(text: &str) -> Vec<String> {
        vec![text.to_string()]
    }

    #[test]
    fn segment_accessors() {
        let s = Segment::new(vec!["10 Bolt".into(), "  zinc plated ".into()]);
        assert_eq!(s.head(), "10 Bolt");
        assert_eq!(s.continuation(), ["  zinc plated ".to_string()]);
        assert_eq!(s.raw(), "10 Bolt\n  zinc plated ");
    }

    #[test]
    fn position_rows_with_continuations() {
        let text = "ACME Industrial\nQuotation No. Q-4711\n\n\
                    10 HB-M8 Hex bolt 100 pcs 0.40 40.00\n\
                    zinc plated\n\
                    Com.-Code 73181595\n\
                    Country of origin: DE\n\
                    20 Washer M8 100 pcs 0.05 5.00\n";
        let seg = segment_pages(&pages(text), None);
        assert_eq!(seg.strategy, Some(BoundaryStrategy::PositionNumbers));
        assert_eq!(seg.segments.len(), 2);
        assert_eq!(seg.segments[0].lines().len(), 2);
        assert_eq!(seg.segments[0].continuation(), ["zinc plated".to_string()]);
    }

    #[test]
    fn trailing_total_line_stands_alone() {
        let text = "10 Bolt 5 pcs $1.00\nzinc plated\nTotal net 5.00";
        let seg = segment_pages(&pages(text), None);
        assert_eq!(seg.segments.len(), 2);
        assert_eq!(seg.segments[0].continuation(), ["zinc plated".to_string()]);
        assert_eq!(seg.segments[1].head(), "Total net 5.00");
    }

    #[test]
    fn price_on_continuation_line_stays_with_row() {
        let text = "1,0 Hex bolt M8\n1.250 Stk 3,40 4.250,00\n2,0 Nut M8\n500 Stk 0,05 25,00";
        let seg = segment_pages(&pages(text), None);
        assert_eq!(seg.segments.len(), 2);
        assert_eq!(seg.segments[0].lines().len(), 2);
    }

    #[test]
    fn address_numbers_do_not_open_segments() {
        assert!(!is_position_row("12 Main Street"));
        assert!(is_position_row("1,0 Kugellager 10 Stk"));
        assert!(!is_position_row("1,250 pcs Hex bolt @ $3.40"));
        assert!(!is_position_row("500 pcs Nut M8 @ $0.10"));
    }

    #[test]
    fn priced_lines_fallback() {
        let text = "Offer\n1,250 pcs Hex bolt @ $3.40\n500 pcs Nut M8 @ $0.10\nthank you";
        let seg = segment_pages(&pages(text), None);
        assert_eq!(seg.strategy, Some(BoundaryStrategy::PricedLines));
        assert_eq!(seg.segments.len(), 2);
        assert_eq!(seg.segments[1].continuation(), ["thank you".to_string()]);
    }

    #[test]
    fn description_above_bare_amounts() {
        let text = "Hex bolt M8x50\n100 pcs $0.50\nWasher M8\n200 pcs $0.05";
        let seg = segment_pages(&pages(text), None);
        assert_eq!(seg.strategy, Some(BoundaryStrategy::PricedLines));
        assert_eq!(seg.segments.len(), 2);
        assert_eq!(seg.segments[0].raw(), "Hex bolt M8x50\n100 pcs $0.50");
        assert_eq!(seg.segments[1].raw(), "Washer M8\n200 pcs $0.05");
    }

    #[test]
    fn only_nearest_line_describes_first_bare_item() {
        let text = "Nordic Valves AB\nOffer 7781\nBall valve DN25\n4 pcs $18.00\nfull bore";
        let seg = segment_pages(&pages(text), None);
        assert_eq!(seg.segments.len(), 1);
        assert_eq!(
            seg.segments[0].lines(),
            ["Ball valve DN25", "4 pcs $18.00", "full bore"].map(String::from)
        );
    }

    #[test]
    fn item_marker_blocks() {
        let text = "BEGIN_ITEM\npart_quantity: 2\nunit_price: 1.00\nEND_ITEM\nnoise\nBEGIN_ITEM\npart_quantity: 3\nEND_ITEM";
        let seg = segment_pages(&pages(text), None);
        assert_eq!(seg.strategy, Some(BoundaryStrategy::ItemMarkers));
        assert_eq!(seg.segments.len(), 2);
        assert_eq!(seg.segments[1].lines(), ["part_quantity: 3".to_string()]);
    }

    #[test]
    fn repeated_labels_split_blocks() {
        let text = "Supplier: Acme\n\
                    Description: Pump\nQty: 1\nUnit price: 10.00\n\
                    Description: Hose\nwith fittings\nQty: 2\nUnit price: 3.00";
        let seg = segment_pages(&pages(text), None);
        assert_eq!(seg.strategy, Some(BoundaryStrategy::LabelRepeat));
        // "Supplier:" is not an item label, so the first block starts at Description.
        assert_eq!(seg.segments.len(), 2);
        assert_eq!(seg.segments[1].lines().len(), 4);
    }

    #[test]
    fn table_markers_restrict_region() {
        let text = "Header 10 pcs 1.00\nPOS DESCRIPTION\n10 Bolt 1 pcs 2.00\nTOTAL NET\n20 Other 1 pcs 3.00";
        let seg = segment_pages(&pages(text), Some(("POS DESCRIPTION", "TOTAL NET")));
        assert_eq!(seg.segments.len(), 1);
        assert_eq!(seg.segments[0].head(), "10 Bolt 1 pcs 2.00");
    }

    #[test]
    fn missing_start_marker_uses_whole_text() {
        let lines = ["a", "b"];
        assert_eq!(table_region(&lines, Some(("X", "Y"))), vec!["a", "b"]);
    }

    #[test]
    fn noise_lines() {
        assert!(is_noise("Com.-Code: 8481"));
        assert!(is_noise("country of origin: CN"));
        assert!(is_noise("Page 2 of 3"));
        assert!(!is_noise("Pagewise delivery 10 pcs"));
    }

    #[test]
    fn text_without_cues_has_no_segments() {
        let seg = segment_pages(&pages("Dear customer,\nthank you."), None);
        assert!(seg.strategy.is_none());
        assert!(seg.segments.is_empty());
    }

    #[test]
    fn segments_span_pages() {
        let pages = vec![
            "10 Bolt 1 pcs 2.00".to_string(),
            "continued text\n20 Nut 1 pcs 1.00".to_string(),
        ];
        let seg = segment_pages(&pages, None);
        assert_eq!(seg.segments.len(), 2);
        assert_eq!(seg.segments[0].continuation(), ["continued text".to_string()]);
    }
}
