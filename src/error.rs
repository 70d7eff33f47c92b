use thiserror::Error;

/// A page could not be retrieved.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("browser fetch of {url} failed: {message}")]
    Browser { url: String, message: String },
    #[error("spider fetch of {url} failed: {message}")]
    Spider { url: String, message: String },
    #[error("{0} source is not available in this build")]
    Unavailable(&'static str),
}

/// A listing page was fetched but lacks something the pipeline requires.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("required field `{0}` not found")]
    MissingField(&'static str),
    #[error("field `{field}` has unusable value {value:?}")]
    Invalid { field: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("postgres: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[error("TLS setup failed: {0}")]
    Tls(String),
    #[error("sqlite connection lock poisoned")]
    Poisoned,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable is not set (check your .env file)")]
    MissingEnv(&'static str),
    #[error("{name} has invalid value {value:?}")]
    InvalidEnv { name: &'static str, value: String },
    #[error("cannot read catalog {path}: {source}")]
    CatalogIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse catalog {path}: {source}")]
    CatalogYaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("catalog is invalid: {0}")]
    CatalogInvalid(String),
    #[error("manufacturer '{key}' not found (available: {available})")]
    UnknownManufacturer { key: String, available: String },
    #[error("model '{model}' not found for manufacturer '{manufacturer}' (available: {available})")]
    UnknownModel {
        manufacturer: String,
        model: String,
        available: String,
    },
    #[error("settings: {0}")]
    Settings(#[from] config::ConfigError),
}
