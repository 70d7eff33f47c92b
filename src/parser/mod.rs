pub mod next_data;
pub mod price;
pub mod specs;

use std::sync::LazyLock;

use chrono::{Datelike, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};

use crate::error::ParseError;
use specs::element_text;

static H1_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").unwrap());
static H2_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h2").unwrap());
static BODY_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").unwrap());
static TESTID_PRICE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"[data-testid="price"]"#).unwrap());
static PRICE_CLASS_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"[class*="price"]"#).unwrap());
static HEADING_PRICE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"h1[class*="price"], h2[class*="price"]"#).unwrap());

static MAIN_PRICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"main.*price|price.*main|price.*large|large.*price").unwrap());

/// Raw fields of one listing page. Anything not found stays `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingFields {
    pub listing_title: Option<String>,
    pub model: Option<String>,
    pub sub_model: Option<String>,
    pub price: Option<i64>,
    pub year: Option<i32>,
    pub date_on_road: Option<String>,
    pub mileage: Option<i64>,
    pub fuel_type: Option<String>,
    pub transmission: Option<String>,
    pub engine_size: Option<String>,
    pub color: Option<String>,
    pub condition: Option<String>,
    pub location: Option<String>,
    pub current_ownership_type: Option<String>,
    pub previous_ownership_type: Option<String>,
    pub current_owner_number: Option<i32>,
    pub description: Option<String>,
}

impl ListingFields {
    /// How many fields were found.
    pub fn populated(&self) -> usize {
        let text = [
            &self.listing_title,
            &self.model,
            &self.sub_model,
            &self.date_on_road,
            &self.fuel_type,
            &self.transmission,
            &self.engine_size,
            &self.color,
            &self.condition,
            &self.location,
            &self.current_ownership_type,
            &self.previous_ownership_type,
            &self.description,
        ];
        text.iter().filter(|f| f.is_some()).count()
            + [self.price.is_some(), self.year.is_some(), self.mileage.is_some()]
                .iter()
                .filter(|b| **b)
                .count()
            + usize::from(self.current_owner_number.is_some())
    }
}

/// Extract a listing page, judging prices against the current year.
pub fn extract_listing(html: &str, url: &str) -> ListingFields {
    extract_listing_at(html, url, Utc::now().year())
}

pub fn extract_listing_at(html: &str, url: &str, current_year: i32) -> ListingFields {
    let doc = Html::parse_document(html);
    let text = visible_text(&doc);
    let pairs = specs::detail_pairs(&doc);
    let detail = |label: &str| specs::lookup(&pairs, label).map(String::from);

    let mut fields = ListingFields {
        listing_title: title(&doc),
        date_on_road: specs::lookup(&pairs, specs::DATE_ON_ROAD).and_then(specs::road_date),
        fuel_type: detail(specs::FUEL_TYPE),
        transmission: detail(specs::TRANSMISSION),
        engine_size: specs::lookup(&pairs, specs::ENGINE_SIZE).map(|v| {
            specs::parse_count(v)
                .map(|n| n.to_string())
                .unwrap_or_else(|| v.to_string())
        }),
        color: detail(specs::COLOR),
        condition: detail(specs::CONDITION),
        current_ownership_type: detail(specs::CURRENT_OWNERSHIP),
        previous_ownership_type: detail(specs::PREVIOUS_OWNERSHIP),
        current_owner_number: specs::owner_number(&doc, &text),
        ..Default::default()
    };

    fields.mileage = specs::lookup(&pairs, specs::MILEAGE)
        .and_then(specs::parse_count)
        .or_else(|| specs::mileage_from_text(&text));

    fields.year = fields
        .date_on_road
        .as_deref()
        .and_then(specs::road_date_year)
        .or_else(|| specs::year_from_text(&text));

    if let Some(t) = &fields.listing_title {
        let (model, sub_model) = split_title(t);
        fields.model = model;
        fields.sub_model = sub_model;
    }

    let age = fields.year.map(|y| (current_year - y).max(0));
    let price_text = price_element(&doc).map(element_text);
    fields.price = price::extract_price(price_text.as_deref(), html, age);

    let next = next_data::extract(&doc);
    fields.description = next.description;
    fields.location = next.location;

    tracing::debug!(url, found = fields.populated(), "extracted listing");
    fields
}

/// A listing must carry a price and a year to be stored.
pub fn validate(fields: &ListingFields) -> Result<(), ParseError> {
    let price = fields.price.ok_or(ParseError::MissingField("price"))?;
    let year = fields.year.ok_or(ParseError::MissingField("year"))?;
    if price < 0 {
        return Err(ParseError::Invalid {
            field: "price",
            value: price.to_string(),
        });
    }
    if !(1900..=2100).contains(&year) {
        return Err(ParseError::Invalid {
            field: "year",
            value: year.to_string(),
        });
    }
    Ok(())
}

fn title(doc: &Html) -> Option<String> {
    let first = |sel: &Selector| {
        doc.select(sel)
            .map(element_text)
            .find(|t| !t.is_empty())
    };
    first(&H1_SEL).or_else(|| first(&H2_SEL))
}

/// First word is the model, the rest the trim level.
pub fn split_title(title: &str) -> (Option<String>, Option<String>) {
    let mut words = title.split_whitespace();
    let model = words.next().map(String::from);
    let rest = words.collect::<Vec<_>>().join(" ");
    (model, (!rest.is_empty()).then_some(rest))
}

fn price_element(doc: &Html) -> Option<ElementRef<'_>> {
    doc.select(&TESTID_PRICE_SEL)
        .next()
        .or_else(|| {
            doc.select(&PRICE_CLASS_SEL).find(|el| {
                el.value()
                    .attr("class")
                    .is_some_and(|c| MAIN_PRICE_RE.is_match(c))
            })
        })
        .or_else(|| doc.select(&HEADING_PRICE_SEL).next())
        .or_else(|| doc.select(&PRICE_CLASS_SEL).next())
}

/// Trimmed text nodes of the body, scripts and styles excluded.
fn visible_text(doc: &Html) -> Vec<&str> {
    let Some(body) = doc.select(&BODY_SEL).next() else {
        return Vec::new();
    };
    body.descendants()
        .filter_map(|node| {
            let Node::Text(text) = node.value() else {
                return None;
            };
            let parent = node.parent()?;
            let hidden = parent
                .value()
                .as_element()
                .is_some_and(|e| matches!(e.name(), "script" | "style" | "noscript"));
            let t = text.trim();
            (!hidden && !t.is_empty()).then_some(t)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}", name)).unwrap()
    }

    #[test]
    fn full_listing() {
        let f = extract_listing_at(
            &fixture("listing_full.html"),
            "https://www.yad2.co.il/item/k3xq9pz1",
            2024,
        );
        assert_eq!(f.listing_title.as_deref(), Some("אימפרזה 1.6 Classic אוט׳"));
        assert_eq!(f.model.as_deref(), Some("אימפרזה"));
        assert_eq!(f.sub_model.as_deref(), Some("1.6 Classic אוט׳"));
        assert_eq!(f.price, Some(62_000));
        assert_eq!(f.date_on_road.as_deref(), Some("03/2018"));
        assert_eq!(f.year, Some(2018));
        assert_eq!(f.mileage, Some(90_000));
        assert_eq!(f.fuel_type.as_deref(), Some("בנזין"));
        assert_eq!(f.transmission.as_deref(), Some("אוטומטית"));
        assert_eq!(f.engine_size.as_deref(), Some("1600"));
        assert_eq!(f.color.as_deref(), Some("כסוף"));
        assert_eq!(f.condition.as_deref(), Some("שמור"));
        assert_eq!(f.current_ownership_type.as_deref(), Some("פרטית"));
        assert_eq!(f.previous_ownership_type.as_deref(), Some("ליסינג"));
        assert_eq!(f.current_owner_number, Some(2));
        assert_eq!(f.location.as_deref(), Some("רמת גן"));
        assert_eq!(f.description.as_deref(), Some("רכב שמור, טיפולים במוסך מורשה"));
        assert!(validate(&f).is_ok());
    }

    #[test]
    fn listing_without_price() {
        let f = extract_listing_at(
            &fixture("listing_no_price.html"),
            "https://www.yad2.co.il/item/zz9noprc",
            2024,
        );
        assert_eq!(f.price, None);
        assert_eq!(f.year, Some(2016));
        assert_eq!(f.mileage, Some(142_000));
        assert!(matches!(validate(&f), Err(ParseError::MissingField("price"))));
    }

    #[test]
    fn empty_page_yields_nothing() {
        let f = extract_listing_at("<html><body></body></html>", "https://www.yad2.co.il/item/x", 2024);
        assert_eq!(f, ListingFields::default());
        assert_eq!(f.populated(), 0);
        assert!(matches!(validate(&f), Err(ParseError::MissingField("price"))));
    }

    #[test]
    fn title_split() {
        assert_eq!(
            split_title("פורסטר  2.5 XS"),
            (Some("פורסטר".into()), Some("2.5 XS".into()))
        );
        assert_eq!(split_title("CX-5"), (Some("CX-5".into()), None));
    }

    #[test]
    fn year_required() {
        let f = ListingFields {
            price: Some(50_000),
            ..Default::default()
        };
        assert!(matches!(validate(&f), Err(ParseError::MissingField("year"))));
    }
}
