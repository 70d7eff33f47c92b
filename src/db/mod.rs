pub mod postgres;
pub mod schema;
pub mod sqlite;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::ValueEnum;
use tracing::info;
use uuid::Uuid;

use crate::config::{HostedCredentials, Settings};
use crate::enrich::Derived;
use crate::error::PersistError;
use crate::fetch::FetchMethod;
use crate::parser::ListingFields;
use schema::{SqlValue, Table};

pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// SQLite file on disk
    #[value(alias = "sqlite")]
    Local,
    /// Hosted PostgreSQL (Supabase)
    #[value(alias = "supabase")]
    Hosted,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Backend::Local => "local",
            Backend::Hosted => "hosted",
        })
    }
}

/// Persistence contract shared by both backends.
#[async_trait]
pub trait Store: Send + Sync {
    fn backend(&self) -> Backend;

    async fn init_schema(&self) -> Result<(), PersistError>;
    /// Drop and recreate every table.
    async fn reset(&self) -> Result<(), PersistError>;

    /// Id of the manufacturer with this name, creating it on first sight.
    async fn upsert_manufacturer(&self, name: &str) -> Result<String, PersistError>;
    async fn insert_listing(&self, row: &ListingRow) -> Result<(), PersistError>;
    async fn insert_scraping_log(&self, row: &ScrapingLogRow) -> Result<(), PersistError>;
    async fn insert_raw_data(&self, row: &RawDataRow) -> Result<(), PersistError>;

    async fn next_run_number(&self) -> Result<i32, PersistError>;
    async fn stats(&self) -> Result<StoreStats, PersistError>;

    async fn enrichment_inputs(&self) -> Result<Vec<StoredListing>, PersistError>;
    async fn update_derived(&self, id: &str, derived: &Derived) -> Result<(), PersistError>;
}

/// Open the selected backend and make sure its tables exist.
pub async fn open(backend: Backend, settings: &Settings) -> Result<Box<dyn Store>> {
    let store: Box<dyn Store> = match backend {
        Backend::Local => {
            let store = SqliteStore::open(&settings.sqlite_path)
                .with_context(|| format!("opening {}", settings.sqlite_path))?;
            Box::new(store)
        }
        Backend::Hosted => {
            let creds = HostedCredentials::from_env()?;
            let store = PostgresStore::connect(&creds, &settings.hosted_schema, settings.hosted_tls)
                .await
                .with_context(|| format!("connecting to {}:{}", creds.host, creds.port))?;
            Box::new(store)
        }
    };
    store.init_schema().await.context("creating tables")?;
    info!(backend = %backend, "store ready");
    Ok(store)
}

/// A row type bound to one table; values follow the table's insert columns.
pub trait Record {
    const TABLE: Table;
    fn values(&self) -> Vec<SqlValue>;
}

// ── Rows ──

#[derive(Debug, Clone, PartialEq)]
pub struct ListingRow {
    pub id: String,
    pub manufacturer_id: String,
    pub manufacturer: String,
    pub model: Option<String>,
    pub sub_model: Option<String>,
    pub price: Option<i64>,
    pub year: Option<i32>,
    pub age: Option<i32>,
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
    pub listing_url: String,
    pub listing_title: Option<String>,
    pub description: Option<String>,
    pub mechanical_age: Option<f64>,
    pub mechanical_age_real_age_ratio: Option<f64>,
    pub age_in_months: Option<i32>,
}

impl ListingRow {
    pub fn new(
        manufacturer_id: &str,
        manufacturer: &str,
        listing_url: &str,
        fields: ListingFields,
        derived: Derived,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            manufacturer_id: manufacturer_id.to_string(),
            manufacturer: manufacturer.to_string(),
            model: fields.model,
            sub_model: fields.sub_model,
            price: fields.price,
            year: fields.year,
            age: derived.age,
            date_on_road: fields.date_on_road,
            mileage: fields.mileage,
            fuel_type: fields.fuel_type,
            transmission: fields.transmission,
            engine_size: fields.engine_size,
            color: fields.color,
            condition: fields.condition,
            location: fields.location,
            current_ownership_type: fields.current_ownership_type,
            previous_ownership_type: fields.previous_ownership_type,
            current_owner_number: fields.current_owner_number,
            listing_url: listing_url.to_string(),
            listing_title: fields.listing_title,
            description: fields.description,
            mechanical_age: derived.mechanical_age,
            mechanical_age_real_age_ratio: derived.mechanical_age_real_age_ratio,
            age_in_months: derived.age_in_months,
        }
    }
}

impl Record for ListingRow {
    const TABLE: Table = schema::CAR_LISTINGS;

    fn values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::text(&self.id),
            SqlValue::text(&self.manufacturer_id),
            SqlValue::text(&self.manufacturer),
            SqlValue::Text(self.model.clone()),
            SqlValue::Text(self.sub_model.clone()),
            SqlValue::BigInt(self.price),
            SqlValue::Int(self.year),
            SqlValue::Int(self.age),
            SqlValue::Text(self.date_on_road.clone()),
            SqlValue::BigInt(self.mileage),
            SqlValue::Text(self.fuel_type.clone()),
            SqlValue::Text(self.transmission.clone()),
            SqlValue::Text(self.engine_size.clone()),
            SqlValue::Text(self.color.clone()),
            SqlValue::Text(self.condition.clone()),
            SqlValue::Text(self.location.clone()),
            SqlValue::Text(self.current_ownership_type.clone()),
            SqlValue::Text(self.previous_ownership_type.clone()),
            SqlValue::Int(self.current_owner_number),
            SqlValue::text(&self.listing_url),
            SqlValue::Text(self.listing_title.clone()),
            SqlValue::Text(self.description.clone()),
            SqlValue::Real(self.mechanical_age),
            SqlValue::Real(self.mechanical_age_real_age_ratio),
            SqlValue::Int(self.age_in_months),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Success,
    Partial,
    Failed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Success => "success",
            SessionStatus::Partial => "partial",
            SessionStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScrapingLogRow {
    pub id: String,
    pub manufacturer_name: String,
    pub model_name: Option<String>,
    pub cars_found: i32,
    /// Seconds.
    pub scraping_duration: f64,
    pub status: SessionStatus,
    pub error_message: Option<String>,
}

impl Record for ScrapingLogRow {
    const TABLE: Table = schema::SCRAPING_LOGS;

    fn values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::text(&self.id),
            SqlValue::text(&self.manufacturer_name),
            SqlValue::Text(self.model_name.clone()),
            SqlValue::Int(Some(self.cars_found)),
            SqlValue::Real(Some(self.scraping_duration)),
            SqlValue::text(self.status.as_str()),
            SqlValue::Text(self.error_message.clone()),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    SearchHtml,
    ListingHtml,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::SearchHtml => "search_html",
            DataType::ListingHtml => "listing_html",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawDataRow {
    pub id: String,
    pub manufacturer_name: String,
    pub url: String,
    pub run_number: i32,
    pub page_number: i32,
    pub data_type: DataType,
    pub raw_data: String,
    pub element_count: i32,
    pub extraction_method: FetchMethod,
    pub response_status: Option<i32>,
    /// Seconds.
    pub response_time: Option<f64>,
}

impl Record for RawDataRow {
    const TABLE: Table = schema::RAW_DATA;

    fn values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::text(&self.id),
            SqlValue::text(&self.manufacturer_name),
            SqlValue::text(&self.url),
            SqlValue::Int(Some(self.run_number)),
            SqlValue::Int(Some(self.page_number)),
            SqlValue::text(self.data_type.as_str()),
            SqlValue::text(&self.raw_data),
            SqlValue::Int(Some(self.element_count)),
            SqlValue::text(self.extraction_method.as_str()),
            SqlValue::Int(self.response_status),
            SqlValue::Real(self.response_time),
        ]
    }
}

// ── Reads ──

/// Stored fields needed to recompute derived metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredListing {
    pub id: String,
    pub year: Option<i32>,
    pub mileage: Option<i64>,
    pub date_on_road: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub manufacturers: i64,
    pub listings: i64,
    pub scraping_logs: i64,
    pub raw_data: i64,
    pub per_manufacturer: Vec<ManufacturerSummary>,
    pub recent_sessions: Vec<SessionSummary>,
}

#[derive(Debug, Clone)]
pub struct ManufacturerSummary {
    pub name: String,
    pub listings: i64,
    pub avg_price: Option<f64>,
    pub min_year: Option<i32>,
    pub max_year: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub manufacturer_name: String,
    pub model_name: Option<String>,
    pub cars_found: i32,
    pub scraping_duration: f64,
    pub status: String,
    pub error_message: Option<String>,
    pub inserted_at: String,
}

pub(crate) const STATS_PER_MANUFACTURER: &str = "
    SELECT manufacturer, COUNT(*), CAST(AVG(price) AS DOUBLE PRECISION), MIN(year), MAX(year)
    FROM {listings}
    GROUP BY manufacturer
    ORDER BY COUNT(*) DESC, manufacturer";

pub(crate) const STATS_RECENT_SESSIONS: &str = "
    SELECT manufacturer_name, model_name, cars_found, scraping_duration, status,
           error_message, CAST(insert_time_utc AS TEXT)
    FROM {logs}
    ORDER BY insert_time_utc DESC
    LIMIT 10";

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_row_matches_table<R: Record>(row: &R) {
        let columns: Vec<_> = R::TABLE
            .columns
            .iter()
            .filter(|c| c.kind != schema::Kind::Timestamp)
            .collect();
        let values = row.values();
        assert_eq!(columns.len(), values.len(), "{}", R::TABLE.name);
        for (c, v) in columns.iter().zip(&values) {
            assert!(v.fits(c.kind), "{}.{} got {:?}", R::TABLE.name, c.name, v);
        }
    }

    #[test]
    fn rows_line_up_with_columns() {
        let listing = ListingRow::new(
            "m-id",
            "סובארו",
            "https://www.yad2.co.il/item/abc123",
            ListingFields::default(),
            Derived::default(),
        );
        assert_row_matches_table(&listing);

        assert_row_matches_table(&ScrapingLogRow {
            id: "l".into(),
            manufacturer_name: "סובארו".into(),
            model_name: None,
            cars_found: 0,
            scraping_duration: 1.5,
            status: SessionStatus::Success,
            error_message: None,
        });

        assert_row_matches_table(&RawDataRow {
            id: "r".into(),
            manufacturer_name: "סובארו".into(),
            url: "https://www.yad2.co.il/item/abc123".into(),
            run_number: 1,
            page_number: 1,
            data_type: DataType::ListingHtml,
            raw_data: "<html></html>".into(),
            element_count: 13,
            extraction_method: FetchMethod::Http,
            response_status: Some(200),
            response_time: Some(0.4),
        });
    }
}
