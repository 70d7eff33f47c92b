use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

static ANCHOR_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static SCRIPT_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("script").unwrap());
static FEED_LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[data-nagish="feed-item-base-link"]"#).unwrap());
static TESTID_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("[data-testid]").unwrap());

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""?token"?\s*:\s*"([a-zA-Z0-9]{4,10})""#).unwrap());

/// Listing URLs found on one search results page, normalized and deduplicated
/// in discovery order.
pub fn extract_listing_urls(html: &str, base_url: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let mut urls: Vec<String> = Vec::new();
    let mut push = |url: Option<String>| {
        if let Some(url) = url {
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
    };

    for a in doc.select(&ANCHOR_SEL) {
        if let Some(href) = a.value().attr("href").filter(|h| h.contains("/item/")) {
            push(normalize_listing_url(href, base_url));
        }
    }

    // The feed payload is embedded in scripts as `"token":"<id>"`.
    for script in doc.select(&SCRIPT_SEL) {
        let text: String = script.text().collect();
        if !text.contains("token") {
            continue;
        }
        for cap in TOKEN_RE.captures_iter(&text) {
            let token = &cap[1];
            if !token.chars().all(|c| c.is_ascii_digit()) {
                push(Some(item_url(base_url, token)));
            }
        }
    }

    for a in doc.select(&FEED_LINK_SEL) {
        if let Some(href) = a.value().attr("href").filter(|h| h.contains("item/")) {
            push(normalize_listing_url(href, base_url));
        }
    }

    for el in doc.select(&TESTID_SEL) {
        let Some(testid) = el.value().attr("data-testid") else {
            continue;
        };
        if testid.len() <= 5 || !testid.chars().all(|c| c.is_ascii_alphanumeric()) {
            continue;
        }
        let href = el
            .select(&ANCHOR_SEL)
            .filter_map(|a| a.value().attr("href"))
            .find(|h| h.contains("item/"));
        if let Some(href) = href {
            push(normalize_listing_url(href, base_url));
        }
    }

    urls
}

/// `{base}/item/{id}` for any href that points at an item, query and fragment dropped.
/// Relative hrefs resolve against `base_url`.
pub fn normalize_listing_url(href: &str, base_url: &str) -> Option<String> {
    let resolved = Url::parse(base_url).ok()?.join(href).ok()?;
    let mut segments = resolved.path_segments()?;
    segments.find(|s| *s == "item")?;
    let id = segments.next().filter(|id| !id.is_empty())?;
    Some(item_url(base_url, id))
}

fn item_url(base_url: &str, id: &str) -> String {
    format!("{}/item/{}", base_url.trim_end_matches('/'), id)
}

/// Item id of a normalized listing URL.
pub fn listing_id(url: &str) -> Option<&str> {
    url.split_once("/item/").map(|(_, id)| id)
}

/// Current listings use short alphanumeric tokens; long numeric ids are legacy links.
pub fn is_likely_listing_url(url: &str) -> bool {
    let Some(id) = listing_id(url) else {
        return false;
    };
    (4..=10).contains(&id.len())
        && id.chars().all(|c| c.is_ascii_alphanumeric())
        && id.chars().any(|c| c.is_ascii_alphabetic())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://www.yad2.co.il";

    #[test]
    fn normalizes_relative_and_absolute() {
        assert_eq!(
            normalize_listing_url("/item/7liq5ya4?opened-from=feed&spot=platinum", BASE).as_deref(),
            Some("https://www.yad2.co.il/item/7liq5ya4")
        );
        assert_eq!(
            normalize_listing_url("https://www.yad2.co.il/vehicles/item/nipalgim#gallery", BASE).as_deref(),
            Some("https://www.yad2.co.il/item/nipalgim")
        );
        assert_eq!(
            normalize_listing_url("item/kii3ai7e", BASE).as_deref(),
            Some("https://www.yad2.co.il/item/kii3ai7e")
        );
        assert_eq!(normalize_listing_url("/item/", BASE), None);
        assert_eq!(normalize_listing_url("/vehicles/cars", BASE), None);
    }

    #[test]
    fn likely_listing_ids() {
        assert!(is_likely_listing_url("https://www.yad2.co.il/item/7liq5ya4"));
        assert!(is_likely_listing_url("https://www.yad2.co.il/item/nipalgim"));
        assert!(!is_likely_listing_url("https://www.yad2.co.il/item/8648660090940"));
        assert!(!is_likely_listing_url("https://www.yad2.co.il/item/123456"));
        assert!(!is_likely_listing_url("https://www.yad2.co.il/item/abc"));
        assert!(!is_likely_listing_url("https://www.yad2.co.il/vehicles/cars"));
    }

    #[test]
    fn search_page_fixture() {
        let html = std::fs::read_to_string("tests/fixtures/search_page.html").unwrap();
        let urls = extract_listing_urls(&html, BASE);
        assert_eq!(
            urls,
            vec![
                "https://www.yad2.co.il/item/7liq5ya4",
                "https://www.yad2.co.il/item/6f8xhc0x",
                "https://www.yad2.co.il/item/8648660090940",
                "https://www.yad2.co.il/item/lnlj3vvb",
                "https://www.yad2.co.il/item/kii3ai7e",
            ]
        );
    }

    #[test]
    fn numeric_tokens_ignored() {
        let html = r#"<script>window.__feed = [{"token":"12345678"},{"token":"ab12cd34"}]</script>"#;
        let urls = extract_listing_urls(html, BASE);
        assert_eq!(urls, vec!["https://www.yad2.co.il/item/ab12cd34"]);
    }

    #[test]
    fn empty_page() {
        let html = std::fs::read_to_string("tests/fixtures/search_empty.html").unwrap();
        assert!(extract_listing_urls(&html, BASE).is_empty());
    }
}
