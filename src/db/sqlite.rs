use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::schema::{self, Dialect, SqlValue};
use super::{
    Backend, ListingRow, ManufacturerSummary, RawDataRow, Record, ScrapingLogRow, SessionSummary,
    Store, StoreStats, StoredListing, STATS_PER_MANUFACTURER, STATS_RECENT_SESSIONS,
};
use crate::enrich::Derived;
use crate::error::PersistError;

/// Local single-file store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, PersistError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, PersistError> {
        self.conn.lock().map_err(|_| PersistError::Poisoned)
    }

    fn insert_record<R: Record>(&self, record: &R) -> Result<(), PersistError> {
        let sql = schema::insert(&R::TABLE, Dialect::Sqlite, None);
        let values = record.values();
        let params: Vec<&dyn ToSql> = values.iter().map(param).collect();
        self.conn()?.execute(&sql, params.as_slice())?;
        Ok(())
    }

    fn create_all(conn: &Connection) -> Result<(), PersistError> {
        for table in schema::TABLES {
            conn.execute_batch(&schema::create_table(&table, Dialect::Sqlite, None))?;
        }
        for index in schema::INDEXES {
            conn.execute_batch(&schema::create_index(&index, None))?;
        }
        Ok(())
    }

    /// Derived columns of one stored listing.
    #[cfg(test)]
    pub(crate) fn derived(&self, id: &str) -> Result<Derived, PersistError> {
        Ok(self.conn()?.query_row(
            "SELECT age, age_in_months, mechanical_age, mechanical_age_real_age_ratio
             FROM car_listings WHERE id = ?1",
            [id],
            |r| {
                Ok(Derived {
                    age: r.get(0)?,
                    age_in_months: r.get(1)?,
                    mechanical_age: r.get(2)?,
                    mechanical_age_real_age_ratio: r.get(3)?,
                })
            },
        )?)
    }

    fn count(conn: &Connection, table: &str) -> Result<i64, PersistError> {
        Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?)
    }
}

fn param(value: &SqlValue) -> &dyn ToSql {
    match value {
        SqlValue::Text(v) => v,
        SqlValue::Int(v) => v,
        SqlValue::BigInt(v) => v,
        SqlValue::Real(v) => v,
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn backend(&self) -> Backend {
        Backend::Local
    }

    async fn init_schema(&self) -> Result<(), PersistError> {
        let conn = self.conn()?;
        Self::create_all(&conn)
    }

    async fn reset(&self) -> Result<(), PersistError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        for table in schema::TABLES.iter().rev() {
            tx.execute_batch(&schema::drop_table(table, Dialect::Sqlite, None))?;
        }
        Self::create_all(&tx)?;
        tx.commit()?;
        Ok(())
    }

    async fn upsert_manufacturer(&self, name: &str) -> Result<String, PersistError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO manufacturers (id, name) VALUES (?1, ?2)",
            params![Uuid::new_v4().to_string(), name],
        )?;
        let id = conn.query_row(
            "SELECT id FROM manufacturers WHERE name = ?1",
            [name],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    async fn insert_listing(&self, row: &ListingRow) -> Result<(), PersistError> {
        self.insert_record(row)
    }

    async fn insert_scraping_log(&self, row: &ScrapingLogRow) -> Result<(), PersistError> {
        self.insert_record(row)
    }

    async fn insert_raw_data(&self, row: &RawDataRow) -> Result<(), PersistError> {
        self.insert_record(row)
    }

    async fn next_run_number(&self) -> Result<i32, PersistError> {
        let max: Option<i32> = self
            .conn()?
            .query_row("SELECT MAX(run_number) FROM raw_data", [], |r| r.get(0))
            .optional()?
            .flatten();
        Ok(max.unwrap_or(0) + 1)
    }

    async fn stats(&self) -> Result<StoreStats, PersistError> {
        let conn = self.conn()?;

        let mut stmt =
            conn.prepare(&STATS_PER_MANUFACTURER.replace("{listings}", "car_listings"))?;
        let per_manufacturer = stmt
            .query_map([], |r| {
                Ok(ManufacturerSummary {
                    name: r.get(0)?,
                    listings: r.get(1)?,
                    avg_price: r.get(2)?,
                    min_year: r.get(3)?,
                    max_year: r.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(&STATS_RECENT_SESSIONS.replace("{logs}", "scraping_logs"))?;
        let recent_sessions = stmt
            .query_map([], |r| {
                Ok(SessionSummary {
                    manufacturer_name: r.get(0)?,
                    model_name: r.get(1)?,
                    cars_found: r.get(2)?,
                    scraping_duration: r.get(3)?,
                    status: r.get(4)?,
                    error_message: r.get(5)?,
                    inserted_at: r.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(StoreStats {
            manufacturers: Self::count(&conn, "manufacturers")?,
            listings: Self::count(&conn, "car_listings")?,
            scraping_logs: Self::count(&conn, "scraping_logs")?,
            raw_data: Self::count(&conn, "raw_data")?,
            per_manufacturer,
            recent_sessions,
        })
    }

    async fn enrichment_inputs(&self) -> Result<Vec<StoredListing>, PersistError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, year, mileage, date_on_road FROM car_listings ORDER BY rowid")?;
        let rows = stmt
            .query_map([], |r| {
                Ok(StoredListing {
                    id: r.get(0)?,
                    year: r.get(1)?,
                    mileage: r.get(2)?,
                    date_on_road: r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn update_derived(&self, id: &str, derived: &Derived) -> Result<(), PersistError> {
        self.conn()?.execute(
            "UPDATE car_listings
             SET age = ?1, age_in_months = ?2, mechanical_age = ?3, mechanical_age_real_age_ratio = ?4
             WHERE id = ?5",
            params![
                derived.age,
                derived.age_in_months,
                derived.mechanical_age,
                derived.mechanical_age_real_age_ratio,
                id,
            ],
        )?;
        Ok(())
    }
}
