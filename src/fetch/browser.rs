//! Headless Chromium page source for pages that render their feed client-side.

use async_trait::async_trait;

use super::{FetchMethod, FetchedPage, PageSource};
use crate::config::Settings;
use crate::error::FetchError;

#[cfg(feature = "browser")]
mod imp {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};

    use chromiumoxide::{Browser, BrowserConfig};
    use futures::StreamExt;
    use tokio::sync::Mutex;
    use tracing::{debug, info, warn};

    use super::*;

    const CHROME_PATHS: &[&str] = &[
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    ];

    const READY_SCRIPT: &str = r#"
        new Promise((resolve) => {
            if (document.readyState === 'complete' || document.readyState === 'interactive') {
                resolve(document.readyState);
            } else {
                document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
                setTimeout(() => resolve('timeout'), 10000);
            }
        })
    "#;

    pub struct BrowserSource {
        headless: bool,
        timeout: Duration,
        scroll_steps: u32,
        scroll_pause: Duration,
        browser: Mutex<Option<Browser>>,
        launch_failed: AtomicBool,
    }

    impl BrowserSource {
        pub fn new(settings: &Settings) -> Result<Self, FetchError> {
            Ok(Self {
                headless: settings.browser_headless,
                timeout: Duration::from_secs(settings.request_timeout_secs),
                scroll_steps: settings.browser_scroll_steps,
                scroll_pause: Duration::from_millis(settings.browser_scroll_pause_ms),
                browser: Mutex::new(None),
                launch_failed: AtomicBool::new(false),
            })
        }

        fn err(url: &str, e: impl std::fmt::Display) -> FetchError {
            FetchError::Browser {
                url: url.to_string(),
                message: e.to_string(),
            }
        }

        async fn launch(&self, url: &str) -> Result<Browser, FetchError> {
            let mut builder = BrowserConfig::builder();
            if let Some(path) = CHROME_PATHS.iter().find(|p| std::path::Path::new(p).exists()) {
                builder = builder.chrome_executable(path);
            }
            if !self.headless {
                builder = builder.with_head();
            }
            let config = builder
                .arg("--disable-blink-features=AutomationControlled")
                .arg("--disable-dev-shm-usage")
                .arg("--no-first-run")
                .arg("--no-sandbox")
                .arg("--disable-gpu")
                .arg("--window-size=1920,1080")
                .build()
                .map_err(|e| Self::err(url, e))?;

            info!("Launching browser (headless={})", self.headless);
            let (browser, mut handler) = Browser::launch(config)
                .await
                .map_err(|e| Self::err(url, e))?;
            tokio::spawn(async move {
                while let Some(h) = handler.next().await {
                    if h.is_err() {
                        break;
                    }
                }
            });
            Ok(browser)
        }
    }

    #[async_trait]
    impl PageSource for BrowserSource {
        fn method(&self) -> FetchMethod {
            FetchMethod::Browser
        }

        async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
            if self.launch_failed.load(Ordering::Relaxed) {
                return Err(FetchError::Unavailable("browser"));
            }
            let mut guard = self.browser.lock().await;
            if guard.is_none() {
                match self.launch(url).await {
                    Ok(browser) => *guard = Some(browser),
                    Err(e) => {
                        warn!("browser launch failed, not retrying this run: {}", e);
                        self.launch_failed.store(true, Ordering::Relaxed);
                        return Err(e);
                    }
                }
            }
            let Some(browser) = guard.as_ref() else {
                return Err(Self::err(url, "browser not running"));
            };

            let start = Instant::now();
            let page = browser.new_page(url).await.map_err(|e| Self::err(url, e))?;

            match tokio::time::timeout(self.timeout, page.evaluate(READY_SCRIPT.to_string())).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => debug!("Could not check ready state: {}", e),
                Err(_) => warn!("Timeout waiting for page ready state"),
            }

            // The feed lazy-loads as the page scrolls.
            for _ in 0..self.scroll_steps {
                if let Err(e) = page
                    .evaluate("window.scrollTo(0, document.body.scrollHeight)".to_string())
                    .await
                {
                    debug!("scroll failed: {}", e);
                    break;
                }
                tokio::time::sleep(self.scroll_pause).await;
            }

            let body = page.content().await.map_err(|e| Self::err(url, e));
            if let Err(e) = page.close().await {
                debug!("closing tab failed: {}", e);
            }
            let body = body?;

            Ok(FetchedPage {
                url: url.to_string(),
                body,
                status: None,
                elapsed: start.elapsed(),
                method: FetchMethod::Browser,
            })
        }

        fn is_available(&self) -> bool {
            !self.launch_failed.load(Ordering::Relaxed)
        }

        async fn close(&self) {
            if let Some(mut browser) = self.browser.lock().await.take() {
                if let Err(e) = browser.close().await {
                    debug!("browser close failed: {}", e);
                }
            }
        }
    }
}

#[cfg(not(feature = "browser"))]
mod imp {
    use super::*;

    pub struct BrowserSource;

    impl BrowserSource {
        pub fn new(_settings: &Settings) -> Result<Self, FetchError> {
            Err(FetchError::Unavailable("browser"))
        }
    }

    #[async_trait]
    impl PageSource for BrowserSource {
        fn method(&self) -> FetchMethod {
            FetchMethod::Browser
        }

        async fn fetch(&self, _url: &str) -> Result<FetchedPage, FetchError> {
            Err(FetchError::Unavailable("browser"))
        }
    }
}

pub use imp::BrowserSource;
