use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL};
use tracing::debug;

use super::{FetchMethod, FetchedPage, PageSource};
use crate::config::Settings;
use crate::error::FetchError;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Plain GET with browser-like headers.
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(settings: &Settings) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("he-IL,he;q=0.9,en-US;q=0.8,en;q=0.7"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .gzip(true)
            .build()
            .map_err(|source| FetchError::Http {
                url: settings.base_url.clone(),
                source,
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageSource for HttpSource {
    fn method(&self) -> FetchMethod {
        FetchMethod::Http
    }

    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let http_err = |source| FetchError::Http {
            url: url.to_string(),
            source,
        };

        let start = Instant::now();
        let response = self.client.get(url).send().await.map_err(http_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.text().await.map_err(http_err)?;
        let elapsed = start.elapsed();
        debug!(url, status = status.as_u16(), bytes = body.len(), ms = elapsed.as_millis() as u64, "fetched");

        Ok(FetchedPage {
            url: url.to_string(),
            body,
            status: Some(status.as_u16()),
            elapsed,
            method: FetchMethod::Http,
        })
    }
}
