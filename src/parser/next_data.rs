use std::sync::LazyLock;

use scraper::{Html, Selector};
use serde_json::Value;

static NEXT_DATA_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("script#__NEXT_DATA__").unwrap());
static SCRIPT_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("script").unwrap());

/// Fields the listing page only exposes through its Next.js payload.
#[derive(Debug, Default, PartialEq)]
pub struct NextData {
    pub description: Option<String>,
    pub location: Option<String>,
}

pub fn extract(doc: &Html) -> NextData {
    let Some(payload) = payload(doc) else {
        return NextData::default();
    };
    let queries = payload
        .pointer("/props/pageProps/dehydratedState/queries")
        .and_then(Value::as_array);
    let Some(queries) = queries else {
        return NextData::default();
    };

    let first_text = |path: &str| {
        queries
            .iter()
            .filter_map(|q| q.pointer(path).and_then(Value::as_str))
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(String::from)
    };

    NextData {
        description: first_text("/state/data/metaData/description"),
        location: first_text("/state/data/address/city/text"),
    }
}

fn payload(doc: &Html) -> Option<Value> {
    if let Some(script) = doc.select(&NEXT_DATA_SEL).next() {
        let text: String = script.text().collect();
        if let Ok(v) = serde_json::from_str(&text) {
            return Some(v);
        }
    }
    doc.select(&SCRIPT_SEL)
        .map(|s| s.text().collect::<String>())
        .filter(|t| t.contains("dehydratedState"))
        .find_map(|t| serde_json::from_str(t.trim()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_and_city() {
        let doc = Html::parse_document(
            r#"<script id="__NEXT_DATA__" type="application/json">
            {"props":{"pageProps":{"dehydratedState":{"queries":[
                {"state":{"data":{"user":{}}}},
                {"state":{"data":{"metaData":{"description":" שמורה מאוד "},"address":{"city":{"text":"חיפה"}}}}}
            ]}}}}</script>"#,
        );
        assert_eq!(
            extract(&doc),
            NextData {
                description: Some("שמורה מאוד".into()),
                location: Some("חיפה".into()),
            }
        );
    }

    #[test]
    fn broken_payload_is_empty() {
        let doc = Html::parse_document(r#"<script id="__NEXT_DATA__">{not json</script>"#);
        assert_eq!(extract(&doc), NextData::default());
    }
}
