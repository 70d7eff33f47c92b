pub mod browser;
pub mod http;
pub mod spider;

use std::time::Duration;

use async_trait::async_trait;
use clap::ValueEnum;
use tracing::info;

use crate::config::Settings;
use crate::error::FetchError;

pub use browser::BrowserSource;
pub use http::HttpSource;
pub use spider::SpiderSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FetchMethod {
    /// Plain HTTP GET
    Http,
    /// Headless Chromium
    Browser,
    /// spider.cloud scraping API
    Spider,
}

impl FetchMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            FetchMethod::Http => "http",
            FetchMethod::Browser => "browser",
            FetchMethod::Spider => "spider",
        }
    }
}

impl std::fmt::Display for FetchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A page as it came off the wire.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub body: String,
    pub status: Option<u16>,
    pub elapsed: Duration,
    pub method: FetchMethod,
}

/// Something that can turn a URL into HTML.
#[async_trait]
pub trait PageSource: Send + Sync {
    fn method(&self) -> FetchMethod;

    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;

    /// False once the source has found it cannot work in this process.
    fn is_available(&self) -> bool {
        true
    }

    /// Release whatever the source holds open.
    async fn close(&self) {}
}

/// Primary page source plus the optional browser used when search pages
/// come back thin.
pub struct Fetcher {
    primary: Box<dyn PageSource>,
    fallback: Option<Box<dyn PageSource>>,
    fallback_threshold: usize,
}

impl Fetcher {
    pub fn new(primary: Box<dyn PageSource>) -> Self {
        Self {
            primary,
            fallback: None,
            fallback_threshold: 0,
        }
    }

    pub fn with_fallback(mut self, fallback: Box<dyn PageSource>, threshold: usize) -> Self {
        self.fallback = Some(fallback);
        self.fallback_threshold = threshold;
        self
    }

    /// Build the fetcher for a CLI `--fetch` choice.
    pub fn from_method(method: FetchMethod, settings: &Settings) -> Result<Self, FetchError> {
        let fetcher = match method {
            FetchMethod::Http => {
                let fetcher = Self::new(Box::new(HttpSource::new(settings)?));
                match BrowserSource::new(settings) {
                    Ok(browser) => fetcher
                        .with_fallback(Box::new(browser), settings.browser_fallback_threshold),
                    Err(e) => {
                        info!("browser fallback disabled: {}", e);
                        fetcher
                    }
                }
            }
            FetchMethod::Browser => Self::new(Box::new(BrowserSource::new(settings)?)),
            FetchMethod::Spider => Self::new(Box::new(SpiderSource::from_env()?)),
        };
        Ok(fetcher)
    }

    pub fn method(&self) -> FetchMethod {
        self.primary.method()
    }

    pub async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        self.primary.fetch(url).await
    }

    /// The fallback source, when `found` listing links is few enough to be worth
    /// a second look.
    pub fn fallback_for(&self, found: usize) -> Option<&dyn PageSource> {
        match &self.fallback {
            Some(source)
                if found > 0 && found < self.fallback_threshold && source.is_available() =>
            {
                Some(source.as_ref())
            }
            _ => None,
        }
    }

    pub async fn close(&self) {
        self.primary.close().await;
        if let Some(source) = &self.fallback {
            source.close().await;
        }
    }
}

#[cfg(test)]
pub mod testing {
    //! Fixture-backed page source for pipeline and search tests.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Default)]
    pub struct FixtureSource {
        pages: HashMap<String, String>,
        failing: Vec<String>,
        pub requested: Mutex<Vec<String>>,
    }

    impl FixtureSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn page(mut self, url: &str, body: impl Into<String>) -> Self {
            self.pages.insert(url.to_string(), body.into());
            self
        }

        pub fn fixture(self, url: &str, name: &str) -> Self {
            let body = std::fs::read_to_string(format!("tests/fixtures/{}", name)).unwrap();
            self.page(url, body)
        }

        pub fn failing(mut self, url: &str) -> Self {
            self.failing.push(url.to_string());
            self
        }
    }

    #[async_trait]
    impl PageSource for FixtureSource {
        fn method(&self) -> FetchMethod {
            FetchMethod::Http
        }

        async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
            self.requested.lock().unwrap().push(url.to_string());
            if self.failing.iter().any(|u| u == url) {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status: 503,
                });
            }
            let body = self.pages.get(url).cloned().ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })?;
            Ok(FetchedPage {
                url: url.to_string(),
                body,
                status: Some(200),
                elapsed: Duration::from_millis(5),
                method: FetchMethod::Http,
            })
        }
    }

    /// A source that fails its first fetch and is unavailable from then on,
    /// like a browser that cannot launch.
    #[derive(Default)]
    pub struct UnlaunchableSource {
        pub calls: Arc<AtomicUsize>,
        failed: AtomicBool,
    }

    #[async_trait]
    impl PageSource for UnlaunchableSource {
        fn method(&self) -> FetchMethod {
            FetchMethod::Browser
        }

        async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.failed.store(true, Ordering::SeqCst);
            Err(FetchError::Browser {
                url: url.to_string(),
                message: "no chromium executable".into(),
            })
        }

        fn is_available(&self) -> bool {
            !self.failed.load(Ordering::SeqCst)
        }
    }
}
