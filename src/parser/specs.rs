//! The listing's details table and the free-text fallbacks around it.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

static DD_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("dd").unwrap());
static TERM_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"span[data-testid="term"]"#).unwrap());

static ROAD_DATE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{2}/\d{4})").unwrap());
static MILEAGE_TEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\d{1,3}(?:,\d{3})*)\s*ק"מ"#).unwrap());
static OWNER_TEXT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"יד\s*(\d+)").unwrap());
static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(20\d{2})\b").unwrap());

pub const MILEAGE: &str = "קילומטראז׳";
pub const FUEL_TYPE: &str = "סוג מנוע";
pub const DATE_ON_ROAD: &str = "תאריך עליה לכביש";
pub const TRANSMISSION: &str = "תיבת הילוכים";
pub const ENGINE_SIZE: &str = "נפח מנוע";
pub const COLOR: &str = "צבע";
pub const CONDITION: &str = "מצב";
pub const CURRENT_OWNERSHIP: &str = "בעלות נוכחית";
pub const PREVIOUS_OWNERSHIP: &str = "בעלות קודמת";

/// `<dd>label</dd><dt>value</dt>` pairs in document order.
pub fn detail_pairs(doc: &Html) -> Vec<(String, String)> {
    doc.select(&DD_SEL)
        .filter_map(|dd| {
            let label = element_text(dd);
            let value = dd
                .next_siblings()
                .filter_map(ElementRef::wrap)
                .find(|el| el.value().name() == "dt")
                .map(element_text)?;
            (!label.is_empty() && !value.is_empty()).then_some((label, value))
        })
        .collect()
}

/// Value of the first pair whose label contains `label`.
pub fn lookup<'a>(pairs: &'a [(String, String)], label: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(l, _)| l.contains(label))
        .map(|(_, v)| v.as_str())
}

/// Digits of `text` as a non-negative integer, separators ignored.
pub fn parse_count(text: &str) -> Option<i64> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

pub fn road_date(value: &str) -> Option<String> {
    ROAD_DATE_RE.captures(value).map(|c| c[1].to_string())
}

/// Year part of an `MM/YYYY` date.
pub fn road_date_year(date: &str) -> Option<i32> {
    date.split_once('/').and_then(|(_, y)| y.parse().ok())
}

pub fn mileage_from_text(text: &[&str]) -> Option<i64> {
    text.iter()
        .find_map(|t| MILEAGE_TEXT_RE.captures(t))
        .and_then(|c| parse_count(&c[1]))
}

/// Owner count: the value span right after a `יד` term, else `יד N` in the text.
pub fn owner_number(doc: &Html, text: &[&str]) -> Option<i32> {
    let from_term = doc
        .select(&TERM_SEL)
        .filter(|term| element_text(*term) == "יד")
        .find_map(|term| {
            term.next_siblings()
                .filter_map(ElementRef::wrap)
                .find(|el| el.value().name() == "span")
                .and_then(|v| element_text(v).parse::<i32>().ok())
        });
    from_term.or_else(|| {
        text.iter()
            .find_map(|t| OWNER_TEXT_RE.captures(t))
            .and_then(|c| c[1].parse().ok())
    })
}

pub fn year_from_text(text: &[&str]) -> Option<i32> {
    text.iter()
        .find_map(|t| YEAR_RE.captures(t))
        .and_then(|c| c[1].parse().ok())
}

pub fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
