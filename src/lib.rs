use std::time::Duration;
use thiserror::Error;

pub mod browser;
pub mod cache;
pub mod commands;
pub mod config;
pub mod discovery;
pub mod extractor;
pub mod query;
pub mod session;
pub mod types;

// Re-export commonly used types
pub use cache::ResultCache;
pub use config::{AppConfig, BotConfig, DiscoveryConfig};
pub use discovery::{discover, Discoverer, DiscoveryLoop, DiscoveryOutcome, Termination};
pub use types::{Venue, VenueSet};

/// The `DiscoveryError` enum represents the errors that can occur while discovering venues.
///
/// Only [`DiscoveryError::InvalidQuery`] and [`DiscoveryError::Navigation`] escape a
/// discovery run; every other variant is absorbed by the loop and logged.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// The landmark was empty or whitespace-only.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    /// The search page could not be loaded, or no browser could be launched.
    #[error("Navigation failed: {0}")]
    Navigation(String),
    /// The scrollable results container is not in the page.
    #[error("Result container not found: {0}")]
    ContainerNotFound(String),
    /// A Chrome DevTools Protocol call failed.
    #[error("Browser error: {0}")]
    Browser(Box<chromiumoxide::error::CdpError>),
    /// Result entries could not be read from a snapshot.
    #[error("Extraction failed: {0}")]
    Extraction(String),
    /// Configuration could not be loaded or contains an invalid selector.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<chromiumoxide::error::CdpError> for DiscoveryError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        DiscoveryError::Browser(Box::new(err))
    }
}

impl From<::config::ConfigError> for DiscoveryError {
    fn from(err: ::config::ConfigError) -> Self {
        DiscoveryError::Config(err.to_string())
    }
}

/// A type alias for `Result` with the `DiscoveryError` error type.
pub type Result<T> = std::result::Result<T, DiscoveryError>;

// Constants

/// How long a run may go without merging a new venue before it stops.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound on a single scroll-into-view attempt.
pub const DEFAULT_SCROLL_TIMEOUT: Duration = Duration::from_secs(10);
/// How long the end-of-results marker must stay in the page to count.
pub const DEFAULT_END_MARKER_DEBOUNCE: Duration = Duration::from_secs(3);
/// Pause between two scanning passes.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(250);
/// Number of venues shown per result page.
pub const DEFAULT_PAGE_SIZE: usize = 10;
/// Maximum number of autocomplete suggestions returned to the chat platform.
pub const DEFAULT_AUTOCOMPLETE_LIMIT: usize = 25;
