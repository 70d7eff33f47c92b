//! Hosted PostgreSQL store over tokio-postgres, TLS via rustls.

use std::sync::Arc;

use async_trait::async_trait;
use rustls::ClientConfig;
use tokio_postgres::types::ToSql;
use tokio_postgres::Client;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{error, warn};
use uuid::Uuid;

use super::schema::{self, Dialect, SqlValue};
use super::{
    Backend, ListingRow, ManufacturerSummary, RawDataRow, Record, ScrapingLogRow, SessionSummary,
    Store, StoreStats, StoredListing, STATS_PER_MANUFACTURER, STATS_RECENT_SESSIONS,
};
use crate::config::HostedCredentials;
use crate::enrich::Derived;
use crate::error::PersistError;

pub struct PostgresStore {
    client: Client,
    schema: String,
}

fn build_rustls_config() -> Result<ClientConfig, PersistError> {
    let result = rustls_native_certs::load_native_certs();
    for e in &result.errors {
        warn!("Error loading system certificates: {}", e);
    }

    let mut root_store = rustls::RootCertStore::empty();
    let mut loaded = 0u32;
    for cert in result.certs {
        match root_store.add(cert) {
            Ok(()) => loaded += 1,
            Err(e) => warn!("Skipping invalid system certificate: {}", e),
        }
    }
    if loaded == 0 {
        return Err(PersistError::Tls("no valid system certificates found".into()));
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    Ok(ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| PersistError::Tls(e.to_string()))?
        .with_root_certificates(root_store)
        .with_no_client_auth())
}

impl PostgresStore {
    /// Connect and spawn the connection driver task.
    pub async fn connect(
        creds: &HostedCredentials,
        schema: &str,
        tls: bool,
    ) -> Result<Self, PersistError> {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&creds.host)
            .port(creds.port)
            .user(&creds.user)
            .password(&creds.password)
            .dbname(&creds.dbname)
            .application_name("yad2_scraper");

        let client = if tls {
            let connector = MakeRustlsConnect::new(build_rustls_config()?);
            let (client, connection) = config.connect(connector).await?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    error!("PostgreSQL connection error: {}", e);
                }
            });
            client
        } else {
            let (client, connection) = config.connect(tokio_postgres::NoTls).await?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    error!("PostgreSQL connection error: {}", e);
                }
            });
            client
        };

        Ok(Self {
            client,
            schema: schema.to_string(),
        })
    }

    fn table(&self, name: &str) -> String {
        schema::qualified(name, Some(&self.schema))
    }

    async fn insert_record<R: Record + Sync>(&self, record: &R) -> Result<(), PersistError> {
        let sql = schema::insert(&R::TABLE, Dialect::Postgres, Some(&self.schema));
        let values = record.values();
        let params: Vec<&(dyn ToSql + Sync)> = values.iter().map(param).collect();
        self.client.execute(&sql, &params).await?;
        Ok(())
    }

    async fn create_all(&self) -> Result<(), PersistError> {
        self.client
            .batch_execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema))
            .await?;
        for table in schema::TABLES {
            let ddl = schema::create_table(&table, Dialect::Postgres, Some(&self.schema));
            self.client.batch_execute(&ddl).await?;
        }
        for index in schema::INDEXES {
            self.client
                .batch_execute(&schema::create_index(&index, Some(&self.schema)))
                .await?;
        }
        Ok(())
    }

    async fn count(&self, table: &str) -> Result<i64, PersistError> {
        let row = self
            .client
            .query_one(&format!("SELECT COUNT(*) FROM {}", self.table(table)), &[])
            .await?;
        Ok(row.get(0))
    }
}

fn param(value: &SqlValue) -> &(dyn ToSql + Sync) {
    match value {
        SqlValue::Text(v) => v,
        SqlValue::Int(v) => v,
        SqlValue::BigInt(v) => v,
        SqlValue::Real(v) => v,
    }
}

#[async_trait]
impl Store for PostgresStore {
    fn backend(&self) -> Backend {
        Backend::Hosted
    }

    async fn init_schema(&self) -> Result<(), PersistError> {
        self.create_all().await
    }

    async fn reset(&self) -> Result<(), PersistError> {
        for table in schema::TABLES.iter().rev() {
            let sql = schema::drop_table(table, Dialect::Postgres, Some(&self.schema));
            self.client.batch_execute(&sql).await?;
        }
        self.create_all().await
    }

    async fn upsert_manufacturer(&self, name: &str) -> Result<String, PersistError> {
        let table = self.table("manufacturers");
        let id = Uuid::new_v4().to_string();
        self.client
            .execute(
                &format!("INSERT INTO {table} (id, name) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING"),
                &[&id, &name],
            )
            .await?;
        let row = self
            .client
            .query_one(&format!("SELECT id FROM {table} WHERE name = $1"), &[&name])
            .await?;
        Ok(row.get(0))
    }

    async fn insert_listing(&self, row: &ListingRow) -> Result<(), PersistError> {
        self.insert_record(row).await
    }

    async fn insert_scraping_log(&self, row: &ScrapingLogRow) -> Result<(), PersistError> {
        self.insert_record(row).await
    }

    async fn insert_raw_data(&self, row: &RawDataRow) -> Result<(), PersistError> {
        self.insert_record(row).await
    }

    async fn next_run_number(&self) -> Result<i32, PersistError> {
        let row = self
            .client
            .query_one(
                &format!("SELECT MAX(run_number) FROM {}", self.table("raw_data")),
                &[],
            )
            .await?;
        let max: Option<i32> = row.get(0);
        Ok(max.unwrap_or(0) + 1)
    }

    async fn stats(&self) -> Result<StoreStats, PersistError> {
        let per_manufacturer = self
            .client
            .query(
                &STATS_PER_MANUFACTURER.replace("{listings}", &self.table("car_listings")),
                &[],
            )
            .await?
            .iter()
            .map(|r| ManufacturerSummary {
                name: r.get(0),
                listings: r.get(1),
                avg_price: r.get(2),
                min_year: r.get(3),
                max_year: r.get(4),
            })
            .collect();

        let recent_sessions = self
            .client
            .query(
                &STATS_RECENT_SESSIONS.replace("{logs}", &self.table("scraping_logs")),
                &[],
            )
            .await?
            .iter()
            .map(|r| SessionSummary {
                manufacturer_name: r.get(0),
                model_name: r.get(1),
                cars_found: r.get(2),
                scraping_duration: r.get(3),
                status: r.get(4),
                error_message: r.get(5),
                inserted_at: r.get(6),
            })
            .collect();

        Ok(StoreStats {
            manufacturers: self.count("manufacturers").await?,
            listings: self.count("car_listings").await?,
            scraping_logs: self.count("scraping_logs").await?,
            raw_data: self.count("raw_data").await?,
            per_manufacturer,
            recent_sessions,
        })
    }

    async fn enrichment_inputs(&self) -> Result<Vec<StoredListing>, PersistError> {
        let rows = self
            .client
            .query(
                &format!(
                    "SELECT id, year, mileage, date_on_road FROM {} ORDER BY insert_time_utc",
                    self.table("car_listings")
                ),
                &[],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|r| StoredListing {
                id: r.get(0),
                year: r.get(1),
                mileage: r.get(2),
                date_on_road: r.get(3),
            })
            .collect())
    }

    async fn update_derived(&self, id: &str, derived: &Derived) -> Result<(), PersistError> {
        self.client
            .execute(
                &format!(
                    "UPDATE {} SET age = $1, age_in_months = $2, mechanical_age = $3, \
                     mechanical_age_real_age_ratio = $4 WHERE id = $5",
                    self.table("car_listings")
                ),
                &[
                    &derived.age,
                    &derived.age_in_months,
                    &derived.mechanical_age,
                    &derived.mechanical_age_real_age_ratio,
                    &id,
                ],
            )
            .await?;
        Ok(())
    }
}
