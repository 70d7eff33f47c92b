use std::time::Instant;

use async_trait::async_trait;
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};

use super::{FetchMethod, FetchedPage, PageSource};
use crate::error::FetchError;

/// Pages fetched through the spider.cloud API, returned as raw HTML.
pub struct SpiderSource {
    spider: Spider,
}

impl SpiderSource {
    pub fn from_env() -> Result<Self, FetchError> {
        let api_key =
            std::env::var("SPIDER_API_KEY").map_err(|_| FetchError::Spider {
                url: String::new(),
                message: "SPIDER_API_KEY environment variable must be set".into(),
            })?;
        let spider = Spider::new(Some(api_key)).map_err(|e| FetchError::Spider {
            url: String::new(),
            message: format!("Failed to create Spider client: {}", e),
        })?;
        Ok(Self { spider })
    }
}

#[async_trait]
impl PageSource for SpiderSource {
    fn method(&self) -> FetchMethod {
        FetchMethod::Spider
    }

    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let params = RequestParams {
            return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Raw)),
            ..Default::default()
        };

        let start = Instant::now();
        let response = self
            .spider
            .scrape_url(url, Some(params), "application/json")
            .await
            .map_err(|e| FetchError::Spider {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        let elapsed = start.elapsed();

        let (body, status) = parse_response(response).ok_or_else(|| FetchError::Spider {
            url: url.to_string(),
            message: "No content in spider response".into(),
        })?;
        if let Some(code) = status.filter(|c| !(200..300).contains(c)) {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: code,
            });
        }

        Ok(FetchedPage {
            url: url.to_string(),
            body,
            status,
            elapsed,
            method: FetchMethod::Spider,
        })
    }
}

/// Content and upstream status of the first result. The API sometimes wraps
/// the JSON array in a string.
fn parse_response(value: serde_json::Value) -> Option<(String, Option<u16>)> {
    let parsed: serde_json::Value = match value.as_str() {
        Some(s) => serde_json::from_str(s).unwrap_or(value.clone()),
        None => value,
    };
    let first = parsed.as_array().and_then(|arr| arr.first())?;
    let content = first.get("content").and_then(|c| c.as_str())?.to_string();
    let status = first
        .get("status")
        .and_then(|s| s.as_u64())
        .and_then(|s| u16::try_from(s).ok());
    Some((content, status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_result_content() {
        let v = json!([{"content": "<html>ok</html>", "status": 200, "url": "https://www.yad2.co.il/item/a1b2c3"}]);
        let (body, status) = parse_response(v).unwrap();
        assert_eq!(body, "<html>ok</html>");
        assert_eq!(status, Some(200));
    }

    #[test]
    fn stringified_payload() {
        let v = json!(r#"[{"content":"<p>x</p>","status":403}]"#);
        let (body, status) = parse_response(v).unwrap();
        assert_eq!(body, "<p>x</p>");
        assert_eq!(status, Some(403));
    }

    #[test]
    fn missing_content() {
        assert!(parse_response(json!([{"status": 500}])).is_none());
        assert!(parse_response(json!({})).is_none());
    }
}
