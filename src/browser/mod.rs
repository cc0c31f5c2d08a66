//! Chromium-backed implementation of the session traits.
//!
//! Everything above this module speaks [`PageSession`]; this is the only
//! place that knows about CDP, Chrome executables, and launch flags.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::config::Settings;
use crate::session::{Driver, PageSession, Probe};

/// Common Chrome executable locations, checked before falling back to PATH.
const CHROME_PATHS: &[&str] = &[
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/opt/google/chrome/google-chrome",
];

/// Poll interval of the DOM wait loops.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Locate a Chrome/Chromium executable.
fn find_chrome() -> Result<PathBuf> {
    for path in CHROME_PATHS {
        let p = std::path::Path::new(path);
        if p.exists() {
            tracing::info!(path, "found Chrome");
            return Ok(p.to_path_buf());
        }
    }

    for cmd in &[
        "google-chrome",
        "google-chrome-stable",
        "chromium",
        "chromium-browser",
    ] {
        if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    tracing::info!(path, "found Chrome in PATH");
                    return Ok(PathBuf::from(path));
                }
            }
        }
    }

    Err(anyhow!(
        "Chrome/Chromium not found; install it or set chrome_executable in the config"
    ))
}

/// One launched browser process handing out pages.
pub struct CdpDriver {
    browser: Browser,
    handler: JoinHandle<()>,
    nav_timeout: Duration,
}

impl CdpDriver {
    /// Launch a fresh browser process according to the settings.
    pub async fn launch(settings: &Settings) -> Result<Self> {
        let chrome = match &settings.chrome_executable {
            Some(path) => path.clone(),
            None => find_chrome()?,
        };
        tracing::info!(
            chrome = %chrome.display(),
            headless = settings.headless,
            "launching browser"
        );

        let mut builder = BrowserConfig::builder().chrome_executable(chrome);
        if !settings.headless {
            // with_head means NOT headless.
            builder = builder.with_head();
        }
        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--disable-sync")
            .arg("--disable-translate")
            .arg("--no-sandbox")
            .arg("--disable-gpu");

        let config = builder
            .build()
            .map_err(|e| anyhow!("building browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("launching browser")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            browser,
            handler,
            nav_timeout: settings.engine.nav_timeout(),
        })
    }

    /// Close the browser process and stop its event loop.
    pub async fn shutdown(mut self) -> Result<()> {
        self.browser.close().await.context("closing browser")?;
        let _ = self.browser.wait().await;
        self.handler.abort();
        Ok(())
    }
}

#[async_trait]
impl Driver for CdpDriver {
    async fn open_session(&self) -> Result<Box<dyn PageSession>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("opening browser page")?;
        Ok(Box::new(CdpSession {
            page,
            nav_timeout: self.nav_timeout,
        }))
    }
}

/// One exclusive browser tab.
pub struct CdpSession {
    page: Page,
    nav_timeout: Duration,
}

impl CdpSession {
    async fn eval<T: serde::de::DeserializeOwned>(&self, script: String) -> Result<T> {
        let result = self
            .page
            .evaluate(script)
            .await
            .context("evaluating page script")?;
        result.into_value().context("decoding page script result")
    }
}

/// A string as a JS literal, quotes and escapes included.
fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

#[async_trait]
impl PageSession for CdpSession {
    async fn navigate(&self, url: &str) -> Result<()> {
        let nav = async {
            self.page.goto(url).await.context("navigating")?;
            self.page
                .wait_for_navigation()
                .await
                .context("waiting for navigation")?;
            Ok::<_, anyhow::Error>(())
        };
        tokio::time::timeout(self.nav_timeout, nav)
            .await
            .map_err(|_| anyhow!("navigation to {url} timed out"))?
    }

    async fn current_url(&self) -> Result<String> {
        self.page
            .url()
            .await
            .context("reading page URL")?
            .ok_or_else(|| anyhow!("page has no URL"))
    }

    async fn count_matches(&self, selector: &str) -> Result<u64> {
        self.eval(format!(
            "document.querySelectorAll({}).length",
            js_string(selector)
        ))
        .await
    }

    async fn read_text(&self, selector: &str) -> Result<Option<String>> {
        self.eval(format!(
            r#"(() => {{
  const el = document.querySelector({});
  return el ? el.textContent.trim() : null;
}})()"#,
            js_string(selector)
        ))
        .await
    }

    async fn texts(&self, selector: &str) -> Result<Vec<String>> {
        self.eval(format!(
            r#"Array.from(document.querySelectorAll({})).map((el) => el.textContent.trim())"#,
            js_string(selector)
        ))
        .await
    }

    async fn attr_values(&self, selector: &str, attr: &str) -> Result<Vec<String>> {
        // Prefer the DOM property so src/href come back absolute.
        self.eval(format!(
            r#"(() => {{
  const attr = {attr};
  return Array.from(document.querySelectorAll({sel}))
    .map((el) => {{
      const v = el[attr];
      return typeof v === "string" && v ? v : el.getAttribute(attr);
    }})
    .filter((v) => typeof v === "string" && v);
}})()"#,
            attr = js_string(attr),
            sel = js_string(selector),
        ))
        .await
    }

    async fn eval_json(&self, script: &str) -> Result<serde_json::Value> {
        self.eval(script.to_string()).await
    }

    async fn scroll_to_bottom(&self) -> Result<()> {
        self.eval::<serde_json::Value>(
            "window.scrollTo(0, document.body.scrollHeight); null".to_string(),
        )
        .await?;
        Ok(())
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Probe<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.count_matches(selector).await {
                Ok(n) if n > 0 => return Probe::Found(()),
                Ok(_) => {}
                Err(err) => tracing::debug!(selector, error = %err, "wait probe failed"),
            }
            if tokio::time::Instant::now() >= deadline {
                return Probe::TimedOut;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_text(
        &self,
        selector: &str,
        needle: &str,
        timeout: Duration,
    ) -> Probe<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.read_text(selector).await {
                Ok(Some(text)) if text.contains(needle) => return Probe::Found(text),
                Ok(_) => {}
                Err(err) => tracing::debug!(selector, error = %err, "text probe failed"),
            }
            if tokio::time::Instant::now() >= deadline {
                return Probe::TimedOut;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn close(&self) -> Result<()> {
        self.page.clone().close().await.context("closing page")
    }
}
