//! Chromium-backed page sessions
//!
//! Launches one headless Chromium per session with its own temporary profile,
//! grants geolocation at the configured anchor, auto-accepts JavaScript dialogs
//! and reads the results view through small `Runtime.evaluate` scripts.

use crate::config::{BrowserSettings, DiscoveryConfig};
use crate::session::{PageLauncher, ResultsPage, ScrollOutcome};
use crate::{DiscoveryError, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{GrantPermissionsParams, PermissionType};
use chromiumoxide::cdp::browser_protocol::emulation::SetGeolocationOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{
    EventJavascriptDialogOpening, HandleJavaScriptDialogParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Accuracy in metres reported with the overridden geolocation.
const GEOLOCATION_ACCURACY: f64 = 50.0;

/// Binary names tried on `PATH`, in order.
const CHROME_BINARY_NAMES: &[&str] = &[
    "chrome",
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
];

/// Locates a Chrome/Chromium executable.
///
/// Checks the configured path, the `CHROME` environment variable, binaries on
/// `PATH`, then the usual install locations of the current platform.
pub fn find_chrome(settings: &BrowserSettings) -> Result<PathBuf> {
    let mut checked = Vec::new();

    if let Some(path) = &settings.chrome_executable {
        if path.exists() {
            return Ok(path.clone());
        }
        checked.push(path.clone());
    }

    if let Ok(path) = std::env::var("CHROME") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(path);
        }
        checked.push(path);
    }

    for name in CHROME_BINARY_NAMES {
        if let Ok(path) = which::which(name) {
            return Ok(path);
        }
    }

    for path in standard_chrome_paths() {
        if path.exists() {
            return Ok(path);
        }
        checked.push(path);
    }

    Err(DiscoveryError::Navigation(format!(
        "Chrome/Chromium not found (checked PATH and {} locations: {}). \
         Install Chromium or set CHROME to its executable.",
        checked.len(),
        checked
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    )))
}

fn standard_chrome_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    #[cfg(target_os = "linux")]
    {
        vec![
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/chromium"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/snap/bin/chromium"),
            PathBuf::from("/opt/google/chrome/chrome"),
        ]
    }

    #[cfg(target_os = "windows")]
    {
        let program_files =
            std::env::var("ProgramFiles").unwrap_or_else(|_| "C:\\Program Files".to_string());
        vec![
            PathBuf::from(format!("{}\\Google\\Chrome\\Application\\chrome.exe", program_files)),
            PathBuf::from(format!("{}\\Chromium\\Application\\chrome.exe", program_files)),
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        vec![]
    }
}

/// Opens [`ChromePageSession`]s using the browser and page settings of a `DiscoveryConfig`.
#[derive(Debug, Clone, Default)]
pub struct ChromeLauncher {
    config: DiscoveryConfig,
}

impl ChromeLauncher {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PageLauncher for ChromeLauncher {
    type Page = ChromePageSession;

    async fn open(&self, url: &str) -> Result<ChromePageSession> {
        ChromePageSession::open(&self.config, url).await
    }
}

/// A headless Chromium tab navigated to a search results view.
pub struct ChromePageSession {
    browser: Option<Browser>,
    page: Option<Page>,
    handler_task: Option<JoinHandle<()>>,
    dialog_task: Option<JoinHandle<()>>,
    /// Removed from disk when dropped.
    profile_dir: Option<TempDir>,
    container_selector: String,
    entry_selector: String,
    name_attribute: String,
    end_marker_selector: String,
    end_marker_text: String,
    scroll_timeout: Duration,
}

impl ChromePageSession {
    /// Launches a browser, prepares a tab and navigates it to `url`.
    ///
    /// Any failure tears the browser down again before it is reported as
    /// `DiscoveryError::Navigation`.
    pub async fn open(config: &DiscoveryConfig, url: &str) -> Result<Self> {
        let chrome_path = find_chrome(&config.browser)?;
        info!("Launching browser at {}", chrome_path.display());

        // A unique profile per session keeps concurrent runs off each other's SingletonLock
        let profile_dir = tempfile::Builder::new()
            .prefix("eatwhat-profile-")
            .tempdir()
            .map_err(|e| {
                DiscoveryError::Navigation(format!("Failed to create browser profile directory: {e}"))
            })?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(&chrome_path)
            .user_data_dir(profile_dir.path())
            .window_size(config.browser.window_width, config.browser.window_height)
            .no_sandbox()
            .args([
                "--disable-dev-shm-usage",
                "--disable-gpu",
                "--disable-blink-features=AutomationControlled",
                "--no-first-run",
                "--no-default-browser-check",
                "--lang=zh-TW",
            ]);
        if !config.browser.headless {
            builder = builder.with_head();
        }
        for arg in &config.browser.extra_args {
            builder = builder.arg(arg);
        }
        let browser_config = builder
            .build()
            .map_err(|e| DiscoveryError::Navigation(format!("Failed to build browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| DiscoveryError::Navigation(format!("Failed to launch browser: {e}")))?;

        // The handler drives the CDP connection and must be polled for the browser's lifetime
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    let message = e.to_string();
                    if message.contains("data did not match any variant of untagged enum Message") {
                        continue;
                    }
                    debug!("CDP handler error: {}", message);
                    if message.contains("connection closed") || message.contains("websocket") {
                        break;
                    }
                }
            }
            debug!("CDP handler task completed");
        });

        let mut session = Self {
            browser: Some(browser),
            page: None,
            handler_task: Some(handler_task),
            dialog_task: None,
            profile_dir: Some(profile_dir),
            container_selector: config.result_container_selector.clone(),
            entry_selector: config.entry_selector.clone(),
            name_attribute: config.name_attribute.clone(),
            end_marker_selector: config.end_marker_selector.clone(),
            end_marker_text: config.end_marker_text.clone(),
            scroll_timeout: config.scroll_timeout(),
        };

        match session.prepare_and_navigate(config, url).await {
            Ok(()) => Ok(session),
            Err(e) => {
                if let Err(close_err) = session.close().await {
                    debug!("Browser close after failed open (ignored): {}", close_err);
                }
                Err(match e {
                    navigation @ DiscoveryError::Navigation(_) => navigation,
                    other => DiscoveryError::Navigation(other.to_string()),
                })
            }
        }
    }

    async fn prepare_and_navigate(&mut self, config: &DiscoveryConfig, url: &str) -> Result<()> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| DiscoveryError::Navigation("browser already closed".to_string()))?;

        browser
            .execute(GrantPermissionsParams::new(vec![PermissionType::Geolocation]))
            .await?;

        let page = browser.new_page("about:blank").await?;

        page.execute(
            SetGeolocationOverrideParams::builder()
                .latitude(config.anchor.latitude)
                .longitude(config.anchor.longitude)
                .accuracy(GEOLOCATION_ACCURACY)
                .build(),
        )
        .await?;

        let mut dialogs = page.event_listener::<EventJavascriptDialogOpening>().await?;
        let dialog_page = page.clone();
        self.dialog_task = Some(tokio::spawn(async move {
            while let Some(dialog) = dialogs.next().await {
                debug!("Accepting {:?} dialog: {}", dialog.r#type, dialog.message);
                if let Err(e) = dialog_page
                    .execute(HandleJavaScriptDialogParams::new(true))
                    .await
                {
                    warn!("Failed to accept dialog: {}", e);
                }
            }
        }));

        debug!("Navigating to {}", url);
        page.goto(url)
            .await
            .map_err(|e| DiscoveryError::Navigation(format!("Failed to load {url}: {e}")))?
            .wait_for_navigation()
            .await
            .map_err(|e| DiscoveryError::Navigation(format!("Failed to load {url}: {e}")))?;

        self.page = Some(page);
        Ok(())
    }

    fn page(&self) -> Result<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| DiscoveryError::Extraction("page session is closed".to_string()))
    }

    async fn evaluate<T: DeserializeOwned>(&self, script: String) -> Result<T> {
        let result = self.page()?.evaluate(script).await?;
        result
            .into_value()
            .map_err(|e| DiscoveryError::Extraction(format!("Unexpected script result: {e}")))
    }
}

/// Encodes `value` as a JavaScript string literal.
fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

/// Script scrolling the last entry named `anchor` inside the result container into view.
///
/// Names are compared trimmed, the same way the extractor reads them.
fn scroll_script(container: &str, entry: &str, attribute: &str, anchor: &str) -> String {
    format!(
        r#"(() => {{
            const container = document.querySelector({container});
            if (!container) return false;
            const entries = Array.from(container.querySelectorAll({entry}))
                .filter(el => (el.getAttribute({attribute}) || "").trim() === {anchor});
            const target = entries[entries.length - 1];
            if (!target) return false;
            target.scrollIntoView({{ block: "end", inline: "nearest", behavior: "instant" }});
            return true;
        }})()"#,
        container = js_string(container),
        entry = js_string(entry),
        attribute = js_string(attribute),
        anchor = js_string(anchor),
    )
}

#[async_trait]
impl ResultsPage for ChromePageSession {
    async fn snapshot_result_container(&mut self) -> Result<String> {
        let script = format!(
            r#"(() => {{
                const container = document.querySelector({selector});
                return container ? container.innerHTML : null;
            }})()"#,
            selector = js_string(&self.container_selector),
        );

        let html: Option<String> = self.evaluate(script).await?;
        html.ok_or_else(|| DiscoveryError::ContainerNotFound(self.container_selector.clone()))
    }

    async fn end_marker_present(&mut self) -> Result<bool> {
        let script = format!(
            r#"(() => Array.from(document.querySelectorAll({selector}))
                .some(el => (el.textContent || "").includes({text})))()"#,
            selector = js_string(&self.end_marker_selector),
            text = js_string(&self.end_marker_text),
        );

        self.evaluate(script).await
    }

    async fn scroll_to_last_visible_entry(&mut self, anchor: &str) -> Result<ScrollOutcome> {
        let script = scroll_script(
            &self.container_selector,
            &self.entry_selector,
            &self.name_attribute,
            anchor,
        );

        match tokio::time::timeout(self.scroll_timeout, self.evaluate::<bool>(script)).await {
            Ok(Ok(true)) => Ok(ScrollOutcome::Scrolled),
            Ok(Ok(false)) => Ok(ScrollOutcome::NotFound),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(ScrollOutcome::TimedOut),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(task) = self.dialog_task.take() {
            task.abort();
        }
        self.page = None;

        if let Some(mut browser) = self.browser.take() {
            debug!("Closing browser");
            if let Err(e) = browser.close().await {
                debug!("Browser close error (ignored): {}", e);
            }
            if let Err(e) = browser.wait().await {
                debug!("Browser wait error (ignored): {}", e);
            }
        }

        if let Some(task) = self.handler_task.take() {
            task.abort();
        }

        if let Some(dir) = self.profile_dir.take() {
            if let Err(e) = dir.close() {
                debug!("Failed to remove browser profile directory: {}", e);
            }
        }

        Ok(())
    }
}

impl Drop for ChromePageSession {
    fn drop(&mut self) {
        // Dropped without close(): stop the background tasks; the browser kills its child on drop
        if let Some(task) = self.dialog_task.take() {
            task.abort();
        }
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
    }
}
