pub mod links;

use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::{Settings, Target};
use crate::error::FetchError;
use crate::fetch::{FetchedPage, Fetcher};

/// A listing URL and the results page it was found on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingUrl {
    pub url: String,
    pub page_number: u32,
}

/// One fetched results page.
#[derive(Debug)]
pub struct SearchPage {
    pub page_number: u32,
    pub page: FetchedPage,
    pub found: usize,
}

/// What pagination produced. `error` is the fetch failure that stopped it, if any.
#[derive(Debug, Default)]
pub struct Collected {
    pub urls: Vec<ListingUrl>,
    pub pages: Vec<SearchPage>,
    pub error: Option<FetchError>,
}

pub fn search_url(base_url: &str, target: &Target, page: u32) -> String {
    let mut url = format!(
        "{}/vehicles/cars?manufacturer={}",
        base_url.trim_end_matches('/'),
        target.manufacturer_id
    );
    if let Some(model) = &target.model {
        url.push_str(&format!("&model={}", model.model_id));
    }
    if page > 1 {
        url.push_str(&format!("&page={page}"));
    }
    url
}

/// Sleep a random interval between the configured bounds.
pub async fn polite_delay(settings: &Settings) {
    if settings.max_delay_ms == 0 {
        return;
    }
    let ms = rand::rng().random_range(settings.min_delay_ms..=settings.max_delay_ms);
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Walk the results pages for `target` until `limit` listing URLs are known.
///
/// Stops early on an empty page, a page with nothing new, or a fetch failure.
/// The result is cut to `limit`, current-format listing ids first.
pub async fn collect_listing_urls(
    fetcher: &Fetcher,
    settings: &Settings,
    target: &Target,
    limit: usize,
) -> Collected {
    let mut collected = Collected::default();

    for page_number in 1..=settings.max_pages {
        if collected.urls.len() >= limit {
            break;
        }
        if page_number > 1 {
            polite_delay(settings).await;
        }

        let url = search_url(&settings.base_url, target, page_number);
        debug!(page = page_number, %url, "scanning results page");
        let mut page = match fetcher.fetch(&url).await {
            Ok(page) => page,
            Err(e) => {
                warn!(page = page_number, "results page failed: {}", e);
                collected.error = Some(e);
                break;
            }
        };
        let mut found = links::extract_listing_urls(&page.body, &settings.base_url);

        if let Some(fallback) = fetcher.fallback_for(found.len()) {
            info!(page = page_number, found = found.len(), "few links, retrying with {}", fallback.method());
            match fallback.fetch(&url).await {
                Ok(richer) => {
                    let more = links::extract_listing_urls(&richer.body, &settings.base_url);
                    if more.len() > found.len() {
                        info!(page = page_number, "{} found {} links", richer.method, more.len());
                        found = more;
                        page = richer;
                    }
                }
                Err(e) => warn!(page = page_number, "fallback fetch failed: {}", e),
            }
        }

        collected.pages.push(SearchPage {
            page_number,
            page,
            found: found.len(),
        });

        if found.is_empty() {
            info!(page = page_number, "no listings on page, stopping");
            break;
        }

        let before = collected.urls.len();
        for url in found {
            if !collected.urls.iter().any(|l| l.url == url) {
                collected.urls.push(ListingUrl { url, page_number });
            }
        }
        let new = collected.urls.len() - before;
        info!(page = page_number, new, total = collected.urls.len(), "collected listing urls");
        if new == 0 {
            break;
        }
    }

    collected.urls.truncate(limit);
    collected
        .urls
        .sort_by_key(|l| !links::is_likely_listing_url(&l.url));
    collected
}
