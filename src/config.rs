use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;

/// Runtime knobs. Defaults below, overridable through `YAD2_*` env vars
/// (e.g. `YAD2_SQLITE_PATH`, `YAD2_ANNUAL_KM`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    pub catalog_path: String,
    pub sqlite_path: String,
    pub hosted_schema: String,
    pub hosted_tls: bool,
    /// Assumed yearly mileage used to turn kilometres into "mechanical years".
    pub annual_km: f64,
    pub max_pages: u32,
    pub request_timeout_secs: u64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub browser_fallback_threshold: usize,
    pub browser_headless: bool,
    pub browser_scroll_steps: u32,
    pub browser_scroll_pause_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "https://www.yad2.co.il".into(),
            catalog_path: "config/manufacturers.yml".into(),
            sqlite_path: "data/cars.db".into(),
            hosted_schema: "prod".into(),
            hosted_tls: true,
            annual_km: 15_000.0,
            max_pages: 50,
            request_timeout_secs: 15,
            min_delay_ms: 500,
            max_delay_ms: 1500,
            browser_fallback_threshold: 10,
            browser_headless: true,
            browser_scroll_steps: 10,
            browser_scroll_pause_ms: 2000,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let settings: Settings = config::Config::builder()
            .add_source(config::Environment::with_prefix("YAD2").try_parsing(true))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        debug!(?settings, "settings loaded");
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.annual_km > 0.0) {
            return Err(ConfigError::InvalidEnv {
                name: "YAD2_ANNUAL_KM",
                value: self.annual_km.to_string(),
            });
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(ConfigError::InvalidEnv {
                name: "YAD2_MIN_DELAY_MS",
                value: self.min_delay_ms.to_string(),
            });
        }
        Ok(())
    }
}

// ── Catalog ──

#[derive(Debug, Clone, Deserialize)]
pub struct Catalog {
    pub manufacturers: BTreeMap<String, ManufacturerEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManufacturerEntry {
    pub manufacturer_id: u32,
    pub hebrew: String,
    pub english: String,
    #[serde(default)]
    pub models: BTreeMap<String, ModelEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelEntry {
    pub model_id: u32,
    pub hebrew: String,
    pub english: String,
}

/// One manufacturer/model pair to scrape.
#[derive(Debug, Clone)]
pub struct Target {
    pub manufacturer_id: u32,
    /// Name as the site shows it; this is what gets persisted.
    pub manufacturer_name: String,
    pub manufacturer_label: String,
    pub model: Option<TargetModel>,
}

#[derive(Debug, Clone)]
pub struct TargetModel {
    pub model_id: u32,
    pub name: String,
    pub label: String,
}

impl Target {
    pub fn describe(&self) -> String {
        match &self.model {
            Some(m) => format!("{} {}", self.manufacturer_label, m.label),
            None => self.manufacturer_label.clone(),
        }
    }
}

impl Catalog {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::CatalogIo {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&text).map_err(|e| match e {
            ConfigError::CatalogYaml { source, .. } => ConfigError::CatalogYaml {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let catalog: Catalog =
            serde_yaml::from_str(text).map_err(|source| ConfigError::CatalogYaml {
                path: "<inline>".into(),
                source,
            })?;
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.manufacturers.is_empty() {
            return Err(ConfigError::CatalogInvalid("no manufacturers defined".into()));
        }
        for (key, m) in &self.manufacturers {
            if m.hebrew.trim().is_empty() {
                return Err(ConfigError::CatalogInvalid(format!("{key}: empty name")));
            }
            if m.manufacturer_id == 0 {
                return Err(ConfigError::CatalogInvalid(format!("{key}: manufacturer_id is 0")));
            }
            for (model_key, model) in &m.models {
                if model.model_id == 0 {
                    return Err(ConfigError::CatalogInvalid(format!(
                        "{key}.{model_key}: model_id is 0"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Resolve CLI selections into concrete targets.
    ///
    /// No manufacturer means every manufacturer; no model means every model of
    /// each selected manufacturer (or the whole manufacturer when it lists none).
    /// Keys match either the catalog key or the English name, case-insensitively.
    pub fn targets(
        &self,
        manufacturer: Option<&str>,
        model: Option<&str>,
    ) -> Result<Vec<Target>, ConfigError> {
        let selected: Vec<(&String, &ManufacturerEntry)> = match manufacturer {
            Some(wanted) => {
                let found = self
                    .manufacturers
                    .iter()
                    .find(|(k, m)| matches_key(wanted, k, &m.english))
                    .ok_or_else(|| ConfigError::UnknownManufacturer {
                        key: wanted.to_string(),
                        available: join_keys(self.manufacturers.keys()),
                    })?;
                vec![found]
            }
            None => self.manufacturers.iter().collect(),
        };

        let mut targets = Vec::new();
        for (key, entry) in &selected {
            match model {
                Some(wanted) => {
                    let found = entry
                        .models
                        .iter()
                        .find(|(k, m)| matches_key(wanted, k, &m.english));
                    match found {
                        Some((_, m)) => targets.push(target(entry, Some(m))),
                        // Only an explicitly chosen manufacturer must carry the model.
                        None if manufacturer.is_some() => {
                            return Err(ConfigError::UnknownModel {
                                manufacturer: key.to_string(),
                                model: wanted.to_string(),
                                available: join_keys(entry.models.keys()),
                            })
                        }
                        None => {}
                    }
                }
                None if entry.models.is_empty() => targets.push(target(entry, None)),
                None => {
                    for m in entry.models.values() {
                        targets.push(target(entry, Some(m)));
                    }
                }
            }
        }

        if targets.is_empty() {
            if let Some(wanted) = model {
                return Err(ConfigError::UnknownModel {
                    manufacturer: "*".into(),
                    model: wanted.to_string(),
                    available: String::new(),
                });
            }
        }
        Ok(targets)
    }
}

fn target(entry: &ManufacturerEntry, model: Option<&ModelEntry>) -> Target {
    Target {
        manufacturer_id: entry.manufacturer_id,
        manufacturer_name: entry.hebrew.clone(),
        manufacturer_label: entry.english.clone(),
        model: model.map(|m| TargetModel {
            model_id: m.model_id,
            name: m.hebrew.clone(),
            label: m.english.clone(),
        }),
    }
}

fn matches_key(wanted: &str, key: &str, english: &str) -> bool {
    wanted.eq_ignore_ascii_case(key) || wanted.eq_ignore_ascii_case(english)
}

fn join_keys<'a>(keys: impl Iterator<Item = &'a String>) -> String {
    keys.map(String::as_str).collect::<Vec<_>>().join(", ")
}

// ── Hosted credentials ──

/// Connection details for the hosted PostgreSQL store.
#[derive(Clone)]
pub struct HostedCredentials {
    pub url: String,
    /// Project API key. Required with the rest of the `SUPABASE_*` set; the
    /// store itself authenticates with user and password.
    #[allow(dead_code)]
    pub key: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub dbname: String,
}

impl std::fmt::Debug for HostedCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostedCredentials")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .finish_non_exhaustive()
    }
}

impl HostedCredentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &'static str| -> Result<String, ConfigError> {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::MissingEnv(name))
        };

        let port_raw = get("SUPABASE_PORT")?;
        let port = port_raw
            .trim()
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidEnv {
                name: "SUPABASE_PORT",
                value: port_raw.clone(),
            })?;

        Ok(Self {
            url: get("SUPABASE_URL")?,
            key: get("SUPABASE_KEY")?,
            user: get("SUPABASE_USER")?,
            password: get("SUPABASE_PASSWORD")?,
            host: get("SUPABASE_HOST")?,
            port,
            dbname: get("SUPABASE_DBNAME")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const CATALOG: &str = r#"
manufacturers:
  subaru:
    manufacturer_id: 35
    hebrew: סובארו
    english: Subaru
    models:
      impreza:
        model_id: 10476
        hebrew: אימפרזה
        english: Impreza
      forester:
        model_id: 10473
        hebrew: פורסטר
        english: Forester
  mazda:
    manufacturer_id: 27
    hebrew: מאזדה
    english: Mazda
    models:
      cx5:
        model_id: 10333
        hebrew: CX-5
        english: CX-5
  tesla:
    manufacturer_id: 95
    hebrew: טסלה
    english: Tesla
"#;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn full_env() -> HashMap<String, String> {
        env(&[
            ("SUPABASE_URL", "https://abc.supabase.co"),
            ("SUPABASE_KEY", "anon-key"),
            ("SUPABASE_USER", "postgres"),
            ("SUPABASE_PASSWORD", "secret"),
            ("SUPABASE_HOST", "db.abc.supabase.co"),
            ("SUPABASE_PORT", "5432"),
            ("SUPABASE_DBNAME", "postgres"),
        ])
    }

    #[test]
    fn all_models_of_one_manufacturer() {
        let catalog = Catalog::from_yaml(CATALOG).unwrap();
        let t = catalog.targets(Some("subaru"), None).unwrap();
        assert_eq!(t.len(), 2);
        assert!(t.iter().all(|x| x.manufacturer_id == 35));
        assert_eq!(t[0].manufacturer_name, "סובארו");
    }

    #[test]
    fn english_name_selects_model() {
        let catalog = Catalog::from_yaml(CATALOG).unwrap();
        let t = catalog.targets(Some("Subaru"), Some("impreza")).unwrap();
        assert_eq!(t.len(), 1);
        assert_eq!(t[0].model.as_ref().unwrap().model_id, 10476);
    }

    #[test]
    fn manufacturer_without_models_is_one_target() {
        let catalog = Catalog::from_yaml(CATALOG).unwrap();
        let t = catalog.targets(Some("tesla"), None).unwrap();
        assert_eq!(t.len(), 1);
        assert!(t[0].model.is_none());
    }

    #[test]
    fn unknown_keys_are_errors() {
        let catalog = Catalog::from_yaml(CATALOG).unwrap();
        assert!(matches!(
            catalog.targets(Some("lada"), None),
            Err(ConfigError::UnknownManufacturer { .. })
        ));
        assert!(matches!(
            catalog.targets(Some("mazda"), Some("impreza")),
            Err(ConfigError::UnknownModel { .. })
        ));
    }

    #[test]
    fn model_without_manufacturer_searches_all() {
        let catalog = Catalog::from_yaml(CATALOG).unwrap();
        let t = catalog.targets(None, Some("cx5")).unwrap();
        assert_eq!(t.len(), 1);
        assert_eq!(t[0].manufacturer_label, "Mazda");
    }

    #[test]
    fn empty_catalog_rejected() {
        assert!(Catalog::from_yaml("manufacturers: {}").is_err());
    }

    #[test]
    fn credentials_complete() {
        let vars = full_env();
        let c = HostedCredentials::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(c.port, 5432);
        assert_eq!(c.host, "db.abc.supabase.co");
        assert!(!format!("{:?}", c).contains("secret"));
    }

    #[test]
    fn credentials_missing_password() {
        let mut vars = full_env();
        vars.remove("SUPABASE_PASSWORD");
        let err = HostedCredentials::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv("SUPABASE_PASSWORD")));
    }

    #[test]
    fn credentials_bad_port() {
        let mut vars = full_env();
        vars.insert("SUPABASE_PORT".into(), "fifty".into());
        let err = HostedCredentials::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { name: "SUPABASE_PORT", .. }));
    }

    #[test]
    fn default_settings_are_valid() {
        let s = Settings::default();
        assert!(s.validate().is_ok());
        assert_eq!(s.annual_km, 15_000.0);
    }

    #[test]
    fn shipped_catalog_loads() {
        let catalog = Catalog::load(Settings::default().catalog_path).unwrap();
        assert!(!catalog.targets(None, None).unwrap().is_empty());
    }
}
