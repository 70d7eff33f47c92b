use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{Settings, Target};
use crate::db::{DataType, ListingRow, RawDataRow, ScrapingLogRow, SessionStatus, Store};
use crate::enrich::{self, EnrichInput};
use crate::error::PersistError;
use crate::fetch::{FetchedPage, Fetcher};
use crate::parser;
use crate::search::{self, polite_delay};

/// Outcome of one manufacturer/model session, as written to `scraping_logs`.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub target: String,
    pub status: SessionStatus,
    pub urls: usize,
    pub stored: usize,
    pub skipped: usize,
    pub duration: Duration,
    pub error: Option<String>,
}

/// Everything a session needs that outlives it.
pub struct Pipeline<'a> {
    pub store: &'a dyn Store,
    pub fetcher: &'a Fetcher,
    pub settings: &'a Settings,
    pub run_number: i32,
}

impl Pipeline<'_> {
    /// Scrape up to `limit` listings for `target`, store them and log the session.
    ///
    /// Per-listing failures are logged and skipped. Exactly one scraping log
    /// row is written, whatever happens.
    pub async fn run_session(&self, target: &Target, limit: usize) -> SessionReport {
        let t0 = Instant::now();
        info!(target = %target.describe(), limit, run = self.run_number, "session started");

        let mut report = SessionReport {
            target: target.describe(),
            status: SessionStatus::Success,
            urls: 0,
            stored: 0,
            skipped: 0,
            duration: Duration::ZERO,
            error: None,
        };

        match self.store.upsert_manufacturer(&target.manufacturer_name).await {
            Ok(manufacturer_id) => self.scrape(target, &manufacturer_id, limit, &mut report).await,
            Err(e) => {
                error!(manufacturer = %target.manufacturer_name, "cannot store manufacturer: {}", e);
                report.status = SessionStatus::Failed;
                report.error = Some(e.to_string());
            }
        }

        report.duration = t0.elapsed();
        let log = ScrapingLogRow {
            id: Uuid::new_v4().to_string(),
            manufacturer_name: target.manufacturer_name.clone(),
            model_name: target.model.as_ref().map(|m| m.name.clone()),
            cars_found: i32::try_from(report.stored).unwrap_or(i32::MAX),
            scraping_duration: report.duration.as_secs_f64(),
            status: report.status,
            error_message: report.error.clone(),
        };
        if let Err(e) = self.store.insert_scraping_log(&log).await {
            error!(target = %report.target, "failed to write scraping log: {}", e);
        }

        info!(
            target = %report.target,
            status = report.status.as_str(),
            stored = report.stored,
            skipped = report.skipped,
            "session finished in {:.1}s",
            report.duration.as_secs_f64()
        );
        report
    }

    async fn scrape(
        &self,
        target: &Target,
        manufacturer_id: &str,
        limit: usize,
        report: &mut SessionReport,
    ) {
        let collected = search::collect_listing_urls(self.fetcher, self.settings, target, limit).await;
        report.urls = collected.urls.len();

        for page in &collected.pages {
            self.save_raw(target, &page.page, page.page_number, DataType::SearchHtml, page.found)
                .await;
        }

        if let Some(e) = &collected.error {
            report.error = Some(e.to_string());
            report.status = if collected.urls.is_empty() {
                SessionStatus::Failed
            } else {
                SessionStatus::Partial
            };
        }
        if collected.urls.is_empty() {
            info!(target = %report.target, "no listings found");
            return;
        }

        let pb = progress_bar(collected.urls.len());
        let today = Utc::now().date_naive();

        for listing in &collected.urls {
            polite_delay(self.settings).await;
            pb.set_message(listing.url.clone());

            match self.process_listing(target, manufacturer_id, &listing.url, listing.page_number, today).await {
                Ok(()) => report.stored += 1,
                Err(reason) => {
                    warn!(url = %listing.url, "skipped: {}", reason);
                    report.skipped += 1;
                    report.status = SessionStatus::Partial;
                    report.error.get_or_insert(reason);
                }
            }
            pb.inc(1);
        }
        pb.finish_and_clear();
    }

    /// Fetch, extract, enrich and store one listing. `Err` carries why it was skipped.
    async fn process_listing(
        &self,
        target: &Target,
        manufacturer_id: &str,
        url: &str,
        page_number: u32,
        today: NaiveDate,
    ) -> Result<(), String> {
        let page = self.fetcher.fetch(url).await.map_err(|e| e.to_string())?;
        let fields = parser::extract_listing(&page.body, url);
        self.save_raw(target, &page, page_number, DataType::ListingHtml, fields.populated())
            .await;

        parser::validate(&fields).map_err(|e| format!("{url}: {e}"))?;

        let derived = enrich::enrich(
            EnrichInput {
                year: fields.year,
                mileage: fields.mileage,
                date_on_road: fields.date_on_road.as_deref(),
            },
            today,
            self.settings.annual_km,
        );
        let row = ListingRow::new(manufacturer_id, &target.manufacturer_name, url, fields, derived);
        self.store
            .insert_listing(&row)
            .await
            .map_err(|e| format!("{url}: {e}"))
    }

    async fn save_raw(
        &self,
        target: &Target,
        page: &FetchedPage,
        page_number: u32,
        data_type: DataType,
        element_count: usize,
    ) {
        let row = RawDataRow {
            id: Uuid::new_v4().to_string(),
            manufacturer_name: target.manufacturer_name.clone(),
            url: page.url.clone(),
            run_number: self.run_number,
            page_number: i32::try_from(page_number).unwrap_or(i32::MAX),
            data_type,
            raw_data: page.body.clone(),
            element_count: i32::try_from(element_count).unwrap_or(i32::MAX),
            extraction_method: page.method,
            response_status: page.status.map(i32::from),
            response_time: Some(page.elapsed.as_secs_f64()),
        };
        if let Err(e) = self.store.insert_raw_data(&row).await {
            warn!(url = %page.url, "failed to save raw {}: {}", data_type.as_str(), e);
        }
    }
}

/// Recompute derived metrics of every stored listing as of `today`.
/// Returns how many rows were updated.
pub async fn reenrich(
    store: &dyn Store,
    today: NaiveDate,
    annual_km: f64,
) -> Result<usize, PersistError> {
    let listings = store.enrichment_inputs().await?;
    let pb = progress_bar(listings.len());
    let mut updated = 0;

    for listing in &listings {
        let derived = enrich::enrich(
            EnrichInput {
                year: listing.year,
                mileage: listing.mileage,
                date_on_road: listing.date_on_road.as_deref(),
            },
            today,
            annual_km,
        );
        match store.update_derived(&listing.id, &derived).await {
            Ok(()) => updated += 1,
            Err(e) => warn!(id = %listing.id, "failed to update derived fields: {}", e),
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!(updated, total = listings.len(), "re-enrichment done");
    Ok(updated)
}

fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    match ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {wide_msg}")
    {
        Ok(style) => pb.set_style(style.progress_chars("#>-")),
        Err(e) => warn!("progress bar template rejected: {}", e),
    }
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::enrich::Derived;
    use crate::fetch::testing::FixtureSource;
    use crate::search::search_url;

    const BASE: &str = "https://www.yad2.co.il";

    fn subaru() -> Target {
        Target {
            manufacturer_id: 35,
            manufacturer_name: "סובארו".into(),
            manufacturer_label: "Subaru".into(),
            model: None,
        }
    }

    fn quiet() -> Settings {
        Settings {
            min_delay_ms: 0,
            max_delay_ms: 0,
            max_pages: 3,
            ..Settings::default()
        }
    }

    async fn store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.init_schema().await.unwrap();
        store
    }

    fn item(id: &str) -> String {
        format!("{BASE}/item/{id}")
    }

    #[tokio::test]
    async fn empty_search_logs_success() {
        let target = subaru();
        let store = store().await;
        let settings = quiet();
        let source = FixtureSource::new().fixture(&search_url(BASE, &target, 1), "search_empty.html");
        let fetcher = Fetcher::new(Box::new(source));
        let pipeline = Pipeline {
            store: &store,
            fetcher: &fetcher,
            settings: &settings,
            run_number: 1,
        };

        let report = pipeline.run_session(&target, 10).await;
        assert_eq!(report.status, SessionStatus::Success);
        assert_eq!(report.stored, 0);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.scraping_logs, 1);
        assert_eq!(stats.listings, 0);
        assert_eq!(stats.raw_data, 1);
        let session = &stats.recent_sessions[0];
        assert_eq!(session.cars_found, 0);
        assert_eq!(session.status, "success");
        assert_eq!(session.manufacturer_name, "סובארו");
    }

    #[tokio::test]
    async fn listing_without_price_is_skipped() {
        let target = subaru();
        let store = store().await;
        let settings = quiet();
        let search = r#"<a href="/item/aaaa1111">a</a><a href="/item/bbbb2222">b</a><a href="/item/cccc3333">c</a>"#;
        let source = FixtureSource::new()
            .page(&search_url(BASE, &target, 1), search)
            .fixture(&item("aaaa1111"), "listing_no_price.html")
            .fixture(&item("bbbb2222"), "listing_full.html")
            .fixture(&item("cccc3333"), "listing_full.html");
        let fetcher = Fetcher::new(Box::new(source));
        let pipeline = Pipeline {
            store: &store,
            fetcher: &fetcher,
            settings: &settings,
            run_number: 7,
        };

        let report = pipeline.run_session(&target, 3).await;
        assert_eq!(report.urls, 3);
        assert_eq!(report.stored, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.status, SessionStatus::Partial);
        assert!(report.error.unwrap().contains("price"));

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.listings, 2);
        assert_eq!(stats.raw_data, 4);
        assert_eq!(stats.recent_sessions[0].cars_found, 2);
        assert_eq!(stats.recent_sessions[0].status, "partial");
        assert_eq!(store.next_run_number().await.unwrap(), 8);

        let stored = store.enrichment_inputs().await.unwrap();
        assert!(stored.iter().all(|l| l.year == Some(2018) && l.mileage == Some(90_000)));
    }

    #[tokio::test]
    async fn unreachable_search_fails_session() {
        let target = subaru();
        let store = store().await;
        let settings = quiet();
        let source = FixtureSource::new().failing(&search_url(BASE, &target, 1));
        let fetcher = Fetcher::new(Box::new(source));
        let pipeline = Pipeline {
            store: &store,
            fetcher: &fetcher,
            settings: &settings,
            run_number: 1,
        };

        let report = pipeline.run_session(&target, 5).await;
        assert_eq!(report.status, SessionStatus::Failed);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.scraping_logs, 1);
        assert_eq!(stats.recent_sessions[0].status, "failed");
        assert!(stats.recent_sessions[0]
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("503")));
    }

    #[tokio::test]
    async fn reenrich_updates_stored_rows() {
        let store = store().await;
        let id = store.upsert_manufacturer("סובארו").await.unwrap();
        let fields = parser::ListingFields {
            price: Some(62_000),
            year: Some(2018),
            mileage: Some(90_000),
            date_on_road: Some("2018-03-01".into()),
            ..Default::default()
        };
        let row = ListingRow::new(&id, "סובארו", &item("k3xq9pz1"), fields, Default::default());
        store.insert_listing(&row).await.unwrap();

        assert_eq!(store.derived(&row.id).unwrap(), Derived::default());

        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(reenrich(&store, today, 15_000.0).await.unwrap(), 1);
        assert_eq!(
            store.derived(&row.id).unwrap(),
            Derived {
                age: Some(6),
                age_in_months: Some(72),
                mechanical_age: Some(6.0),
                mechanical_age_real_age_ratio: Some(1.0),
            }
        );
    }
}
