//! Page session seam between the discovery loop and a browser tab.
//!
//! The loop only talks to [`ResultsPage`]; the Chromium implementation lives in
//! [`crate::browser`], and tests drive the loop through scripted pages.

use crate::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// What happened when the page was asked to scroll to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollOutcome {
    Scrolled,
    /// No rendered entry carries the requested name.
    NotFound,
    /// The scroll did not finish within the scroll timeout.
    TimedOut,
}

/// One browser tab showing a search results view.
#[async_trait]
pub trait ResultsPage: Send {
    /// Serialized markup of the scrollable results container.
    ///
    /// Fails with `DiscoveryError::ContainerNotFound` when the container is absent.
    async fn snapshot_result_container(&mut self) -> Result<String>;

    /// Whether the end-of-results marker is in the page right now.
    async fn end_marker_present(&mut self) -> Result<bool>;

    /// Scrolls the entry whose accessible name is `anchor` into view.
    ///
    /// Must not fail on a slow or impossible scroll; report it through [`ScrollOutcome`].
    async fn scroll_to_last_visible_entry(&mut self, anchor: &str) -> Result<ScrollOutcome>;

    /// Releases the tab and everything behind it. Safe to call more than once.
    async fn close(&mut self) -> Result<()>;

    /// True only if the end marker is present and still present after `debounce`.
    ///
    /// The marker can flicker in before the last entries arrive, so a single
    /// sighting is not enough.
    async fn is_at_bottom(&mut self, debounce: Duration) -> Result<bool> {
        if !self.end_marker_present().await? {
            return Ok(false);
        }
        debug!("End marker seen, re-checking after {:?}", debounce);
        tokio::time::sleep(debounce).await;
        self.end_marker_present().await
    }
}

/// Opens [`ResultsPage`]s for search URLs.
#[async_trait]
pub trait PageLauncher: Send + Sync {
    type Page: ResultsPage;

    /// Opens a page at `url`. Fails with `DiscoveryError::Navigation` when it cannot load.
    async fn open(&self, url: &str) -> Result<Self::Page>;
}
