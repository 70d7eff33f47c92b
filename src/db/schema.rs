//! One table definition, rendered per SQL dialect.
//!
//! Both backends build their DDL and INSERT statements from the tables below,
//! so column names, order and types line up across SQLite and PostgreSQL.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// UUID v4 rendered as text.
    Id,
    Text,
    /// 32-bit integer.
    Int,
    /// 64-bit integer (prices, kilometres).
    BigInt,
    Real,
    /// Filled by the database on insert.
    Timestamp,
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub kind: Kind,
    pub not_null: bool,
    pub unique: bool,
    pub references: Option<&'static str>,
}

#[derive(Debug, Clone, Copy)]
pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column],
}

#[derive(Debug, Clone, Copy)]
pub struct Index {
    pub name: &'static str,
    pub table: &'static str,
    pub column: &'static str,
}

const fn col(name: &'static str, kind: Kind) -> Column {
    Column {
        name,
        kind,
        not_null: false,
        unique: false,
        references: None,
    }
}

const fn required(name: &'static str, kind: Kind) -> Column {
    Column {
        name,
        kind,
        not_null: true,
        unique: false,
        references: None,
    }
}

const ID: Column = required("id", Kind::Id);
const INSERTED: Column = required("insert_time_utc", Kind::Timestamp);

pub const MANUFACTURERS: Table = Table {
    name: "manufacturers",
    columns: &[
        ID,
        Column {
            unique: true,
            ..required("name", Kind::Text)
        },
        INSERTED,
    ],
};

pub const CAR_LISTINGS: Table = Table {
    name: "car_listings",
    columns: &[
        ID,
        Column {
            references: Some("manufacturers"),
            ..required("manufacturer_id", Kind::Id)
        },
        required("manufacturer", Kind::Text),
        col("model", Kind::Text),
        col("sub_model", Kind::Text),
        col("price", Kind::BigInt),
        col("year", Kind::Int),
        col("age", Kind::Int),
        col("date_on_road", Kind::Text),
        col("mileage", Kind::BigInt),
        col("fuel_type", Kind::Text),
        col("transmission", Kind::Text),
        col("engine_size", Kind::Text),
        col("color", Kind::Text),
        col("condition", Kind::Text),
        col("location", Kind::Text),
        col("current_ownership_type", Kind::Text),
        col("previous_ownership_type", Kind::Text),
        col("current_owner_number", Kind::Int),
        required("listing_url", Kind::Text),
        col("listing_title", Kind::Text),
        col("description", Kind::Text),
        col("mechanical_age", Kind::Real),
        col("mechanical_age_real_age_ratio", Kind::Real),
        col("age_in_months", Kind::Int),
        INSERTED,
    ],
};

pub const SCRAPING_LOGS: Table = Table {
    name: "scraping_logs",
    columns: &[
        ID,
        required("manufacturer_name", Kind::Text),
        col("model_name", Kind::Text),
        required("cars_found", Kind::Int),
        required("scraping_duration", Kind::Real),
        required("status", Kind::Text),
        col("error_message", Kind::Text),
        INSERTED,
    ],
};

pub const RAW_DATA: Table = Table {
    name: "raw_data",
    columns: &[
        ID,
        required("manufacturer_name", Kind::Text),
        required("url", Kind::Text),
        required("run_number", Kind::Int),
        required("page_number", Kind::Int),
        required("data_type", Kind::Text),
        required("raw_data", Kind::Text),
        required("element_count", Kind::Int),
        required("extraction_method", Kind::Text),
        col("response_status", Kind::Int),
        col("response_time", Kind::Real),
        INSERTED,
    ],
};

/// Creation order; drop in reverse.
pub const TABLES: [Table; 4] = [MANUFACTURERS, CAR_LISTINGS, SCRAPING_LOGS, RAW_DATA];

pub const INDEXES: [Index; 5] = [
    Index {
        name: "idx_car_listings_manufacturer",
        table: "car_listings",
        column: "manufacturer_id",
    },
    Index {
        name: "idx_car_listings_year",
        table: "car_listings",
        column: "year",
    },
    Index {
        name: "idx_car_listings_price",
        table: "car_listings",
        column: "price",
    },
    Index {
        name: "idx_raw_data_manufacturer",
        table: "raw_data",
        column: "manufacturer_name",
    },
    Index {
        name: "idx_raw_data_url",
        table: "raw_data",
        column: "url",
    },
];

/// A bound parameter, typed after the column it fills.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(Option<String>),
    Int(Option<i32>),
    BigInt(Option<i64>),
    Real(Option<f64>),
}

impl SqlValue {
    pub fn text(v: impl Into<String>) -> Self {
        SqlValue::Text(Some(v.into()))
    }

    #[cfg(test)]
    pub fn fits(&self, kind: Kind) -> bool {
        matches!(
            (self, kind),
            (SqlValue::Text(_), Kind::Id | Kind::Text)
                | (SqlValue::Int(_), Kind::Int)
                | (SqlValue::BigInt(_), Kind::BigInt)
                | (SqlValue::Real(_), Kind::Real)
        )
    }
}

/// Table name, schema-qualified when a schema is given.
pub fn qualified(table: &str, schema: Option<&str>) -> String {
    match schema {
        Some(s) => format!("{s}.{table}"),
        None => table.to_string(),
    }
}

fn column_type(kind: Kind, dialect: Dialect) -> &'static str {
    match (kind, dialect) {
        (Kind::Id | Kind::Text, _) => "TEXT",
        (Kind::Int, _) => "INTEGER",
        (Kind::BigInt, Dialect::Sqlite) => "INTEGER",
        (Kind::BigInt, Dialect::Postgres) => "BIGINT",
        (Kind::Real, Dialect::Sqlite) => "REAL",
        (Kind::Real, Dialect::Postgres) => "DOUBLE PRECISION",
        (Kind::Timestamp, Dialect::Sqlite) => {
            "TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))"
        }
        (Kind::Timestamp, Dialect::Postgres) => "TIMESTAMPTZ NOT NULL DEFAULT now()",
    }
}

pub fn create_table(table: &Table, dialect: Dialect, schema: Option<&str>) -> String {
    let columns: Vec<String> = table
        .columns
        .iter()
        .map(|c| {
            let mut def = format!("{} {}", c.name, column_type(c.kind, dialect));
            if c.name == "id" {
                def.push_str(" PRIMARY KEY");
            } else if c.not_null && c.kind != Kind::Timestamp {
                def.push_str(" NOT NULL");
            }
            if c.unique {
                def.push_str(" UNIQUE");
            }
            if let Some(target) = c.references {
                def.push_str(&format!(" REFERENCES {}(id)", qualified(target, schema)));
            }
            def
        })
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        qualified(table.name, schema),
        columns.join(",\n    ")
    )
}

pub fn create_index(index: &Index, schema: Option<&str>) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {}({})",
        index.name,
        qualified(index.table, schema),
        index.column
    )
}

pub fn drop_table(table: &Table, dialect: Dialect, schema: Option<&str>) -> String {
    let cascade = match dialect {
        Dialect::Sqlite => "",
        Dialect::Postgres => " CASCADE",
    };
    format!("DROP TABLE IF EXISTS {}{}", qualified(table.name, schema), cascade)
}

/// Columns an INSERT supplies; database-filled timestamps are left out.
pub fn insert_columns(table: &Table) -> Vec<&'static str> {
    table
        .columns
        .iter()
        .filter(|c| c.kind != Kind::Timestamp)
        .map(|c| c.name)
        .collect()
}

pub fn insert(table: &Table, dialect: Dialect, schema: Option<&str>) -> String {
    let columns = insert_columns(table);
    let placeholders: Vec<String> = (1..=columns.len())
        .map(|i| match dialect {
            Dialect::Sqlite => format!("?{i}"),
            Dialect::Postgres => format!("${i}"),
        })
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        qualified(table.name, schema),
        columns.join(", "),
        placeholders.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_skips_timestamp() {
        let sql = insert(&SCRAPING_LOGS, Dialect::Sqlite, None);
        assert!(!sql.contains("insert_time_utc"));
        assert!(sql.ends_with("VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"));
    }

    #[test]
    fn postgres_is_schema_qualified() {
        let sql = insert(&RAW_DATA, Dialect::Postgres, Some("prod"));
        assert!(sql.starts_with("INSERT INTO prod.raw_data ("));
        assert!(sql.contains("$11"));
        let ddl = create_table(&CAR_LISTINGS, Dialect::Postgres, Some("prod"));
        assert!(ddl.contains("REFERENCES prod.manufacturers(id)"));
        assert!(ddl.contains("price BIGINT"));
        assert!(ddl.contains("mechanical_age DOUBLE PRECISION"));
    }

    #[test]
    fn dialects_share_column_order() {
        for table in TABLES {
            let sqlite = create_table(&table, Dialect::Sqlite, None);
            let pg = create_table(&table, Dialect::Postgres, None);
            let names = |ddl: &str| -> Vec<String> {
                ddl.lines()
                    .skip(1)
                    .filter_map(|l| l.split_whitespace().next())
                    .filter(|w| *w != ")")
                    .map(String::from)
                    .collect()
            };
            assert_eq!(names(&sqlite), names(&pg), "{}", table.name);
        }
    }

    #[test]
    fn manufacturer_name_unique() {
        let ddl = create_table(&MANUFACTURERS, Dialect::Sqlite, None);
        assert!(ddl.contains("name TEXT NOT NULL UNIQUE"));
        assert!(ddl.contains("id TEXT PRIMARY KEY"));
    }
}
