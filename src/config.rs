use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of the environment variables that override configuration values.
pub const ENV_PREFIX: &str = "EATWHAT";

/// Base name of the optional configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_NAME: &str = "eatwhat";

/// The `AppConfig` struct holds every setting of the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Settings of the venue discovery engine.
    pub discovery: DiscoveryConfig,
    /// Settings of the chat command layer.
    pub bot: BotConfig,
}

/// The geographic point the map search is centred on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoAnchor {
    pub longitude: f64,
    pub latitude: f64,
    /// Map zoom level written into the search URL.
    pub zoom: f64,
}

impl Default for GeoAnchor {
    fn default() -> Self {
        Self {
            longitude: 120.5966694,
            latitude: 22.6427084,
            zoom: 15.33,
        }
    }
}

/// The `DiscoveryConfig` struct holds the tunable parameters of a discovery run.
/// It covers the search URL, the page markup the extractor relies on, and the timing heuristics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Where the map search is centred, also granted as the browser's geolocation.
    pub anchor: GeoAnchor,
    /// Search endpoint the encoded query is appended to.
    pub search_base_url: String,
    /// Path and query appended after the anchor segment of the search URL.
    pub search_url_suffix: String,
    /// Phrase appended to the landmark before encoding.
    pub query_suffix: String,
    /// CSS selector of the scrollable results container.
    pub result_container_selector: String,
    /// CSS selector of a single result entry inside the container.
    pub entry_selector: String,
    /// Entry attribute holding the venue name.
    pub name_attribute: String,
    /// Entry attribute holding the venue link.
    pub link_attribute: String,
    /// CSS selector of the elements that may carry the end-of-results text.
    pub end_marker_selector: String,
    /// Text that marks the end of the result list.
    pub end_marker_text: String,
    /// Stop when no new venue was merged for this long.
    pub stall_timeout_ms: u64,
    /// Upper bound on one scroll-into-view attempt.
    pub scroll_timeout_ms: u64,
    /// How long the end marker must persist before the run drains.
    pub end_marker_debounce_ms: u64,
    /// Pause between scanning passes.
    pub scan_interval_ms: u64,
    /// Browser launch options.
    pub browser: BrowserSettings,
}

/// Options for launching the headless browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    /// Explicit Chrome/Chromium binary. Detected when unset.
    pub chrome_executable: Option<PathBuf>,
    pub window_width: u32,
    pub window_height: u32,
    /// Extra command-line switches passed to the browser.
    pub extra_args: Vec<String>,
}

/// The `BotConfig` struct holds the settings of the command layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Number of venues per result page.
    pub page_size: usize,
    /// Maximum number of autocomplete suggestions.
    pub autocomplete_limit: usize,
    /// User id the interactive shell acts as.
    pub default_user: u64,
}

impl Default for DiscoveryConfig {
    /// Provides default values for the `DiscoveryConfig` struct.
    ///
    /// # Returns
    ///
    /// A `DiscoveryConfig` targeting the Taiwanese Google Maps search UI.
    fn default() -> Self {
        Self {
            anchor: GeoAnchor::default(),
            search_base_url: String::from("https://www.google.com.tw/maps/search"),
            search_url_suffix: String::from("data=!4m4!2m3!5m1!2e1!6e5?entry=ttu"),
            query_suffix: String::from("附近餐廳"),
            result_container_selector: String::from(".m6QErb.DxyBCb.kA9KIf.dS8AEf.XiKgde.ecceSd"),
            entry_selector: String::from(".hfpxzc"),
            name_attribute: String::from("aria-label"),
            link_attribute: String::from("href"),
            end_marker_selector: String::from("p.fontBodyMedium"),
            end_marker_text: String::from("你已看完所有搜尋結果。"),
            stall_timeout_ms: crate::DEFAULT_STALL_TIMEOUT.as_millis() as u64,
            scroll_timeout_ms: crate::DEFAULT_SCROLL_TIMEOUT.as_millis() as u64,
            end_marker_debounce_ms: crate::DEFAULT_END_MARKER_DEBOUNCE.as_millis() as u64,
            scan_interval_ms: crate::DEFAULT_SCAN_INTERVAL.as_millis() as u64,
            browser: BrowserSettings::default(),
        }
    }
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_executable: None,
            window_width: 1366,
            window_height: 768,
            extra_args: Vec::new(),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            page_size: crate::DEFAULT_PAGE_SIZE,
            autocomplete_limit: crate::DEFAULT_AUTOCOMPLETE_LIMIT,
            default_user: 0,
        }
    }
}

impl DiscoveryConfig {
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn scroll_timeout(&self) -> Duration {
        Duration::from_millis(self.scroll_timeout_ms)
    }

    pub fn end_marker_debounce(&self) -> Duration {
        Duration::from_millis(self.end_marker_debounce_ms)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }
}

impl AppConfig {
    /// Loads the configuration by layering defaults, a TOML file and the environment.
    ///
    /// With `path` set the file must exist; otherwise `eatwhat.toml` in the working
    /// directory is read when present. Environment variables such as
    /// `EATWHAT_DISCOVERY__STALL_TIMEOUT_MS` override both.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_environment(path, environment())
    }

    fn load_with_environment(path: Option<&Path>, environment: ::config::Environment) -> Result<Self> {
        let file = match path {
            Some(path) => ::config::File::from(path).required(true),
            None => ::config::File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        let settings = ::config::Config::builder()
            .add_source(::config::Config::try_from(&AppConfig::default())?)
            .add_source(file)
            .add_source(environment)
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

/// `EATWHAT_<SECTION>__<KEY>` variables, e.g. `EATWHAT_BOT__PAGE_SIZE=5`.
fn environment() -> ::config::Environment {
    ::config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
