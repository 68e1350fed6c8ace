//! Landmark-to-venue discovery
//!
//! A run opens one results page, repeatedly scans it for new entries and scrolls
//! the list until either the end-of-results marker holds through its debounce
//! delay or no new venue has been merged for the stall budget. The page is
//! closed on every exit path and whatever was collected is returned.

use crate::browser::ChromeLauncher;
use crate::config::DiscoveryConfig;
use crate::extractor::ResultExtractor;
use crate::session::{PageLauncher, ResultsPage, ScrollOutcome};
use crate::{query, DiscoveryError, Result, VenueSet};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

/// States of a discovery run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    Starting,
    Scanning,
    Scrolling,
    Draining,
    Done,
    Failed,
}

impl fmt::Display for DiscoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiscoveryState::Starting => "starting",
            DiscoveryState::Scanning => "scanning",
            DiscoveryState::Scrolling => "scrolling",
            DiscoveryState::Draining => "draining",
            DiscoveryState::Done => "done",
            DiscoveryState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The end-of-results marker held through the debounce delay.
    EndOfResults,
    /// No new venue was merged for the stall budget.
    Stalled,
    /// The page misbehaved mid-run; the venues are whatever was collected before.
    Aborted,
}

/// The result of one discovery run. A short or empty list is still a success.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryOutcome {
    pub venues: VenueSet,
    pub termination: Termination,
    #[serde(skip)]
    pub elapsed: Duration,
}

/// Anything that can turn a landmark into venues.
#[async_trait]
pub trait Discoverer: Send + Sync {
    /// Runs discovery for `landmark`.
    ///
    /// Fails only with `DiscoveryError::InvalidQuery` or `DiscoveryError::Navigation`.
    async fn discover(&self, landmark: &str) -> Result<DiscoveryOutcome>;
}

/// Transient state of a single run.
struct DiscoverySession<P> {
    page: P,
    state: DiscoveryState,
    venues: VenueSet,
    last_progress: Instant,
    stall_budget: Duration,
    /// Name of the last entry rendered in the most recent snapshot.
    scroll_anchor: Option<String>,
    passes: usize,
}

impl<P: ResultsPage> DiscoverySession<P> {
    fn new(page: P, stall_budget: Duration) -> Self {
        Self {
            page,
            state: DiscoveryState::Starting,
            venues: VenueSet::new(),
            last_progress: Instant::now(),
            stall_budget,
            scroll_anchor: None,
            passes: 0,
        }
    }

    fn transition(&mut self, next: DiscoveryState) {
        debug!("Discovery state {} -> {}", self.state, next);
        self.state = next;
    }

    fn stalled(&self) -> bool {
        self.last_progress.elapsed() > self.stall_budget
    }
}

/// The `DiscoveryLoop` struct drives a results page until the venue list is exhausted or stalls.
pub struct DiscoveryLoop<L> {
    /// Opens the page each run scans.
    launcher: L,
    /// Reads entries out of container snapshots.
    extractor: ResultExtractor,
    /// Selectors, URL pieces and timing of a run.
    config: DiscoveryConfig,
}

impl DiscoveryLoop<ChromeLauncher> {
    /// Creates a loop that runs against a headless Chromium.
    pub fn chromium(config: DiscoveryConfig) -> Result<Self> {
        Self::new(ChromeLauncher::new(config.clone()), config)
    }
}

impl<L: PageLauncher> DiscoveryLoop<L> {
    /// Creates a new `DiscoveryLoop`.
    ///
    /// # Arguments
    ///
    /// * `launcher` - Opens the results page for a search URL.
    /// * `config` - Selectors, anchor and timing used by the run.
    ///
    /// # Returns
    ///
    /// The loop, or `DiscoveryError::Config` if the entry selector is invalid.
    pub fn new(launcher: L, config: DiscoveryConfig) -> Result<Self> {
        let extractor = ResultExtractor::from_config(&config)?;
        Ok(Self {
            launcher,
            extractor,
            config,
        })
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Runs discovery for `landmark` and returns the venues in discovery order.
    ///
    /// # Errors
    ///
    /// `DiscoveryError::InvalidQuery` for a blank landmark (no page is opened) and
    /// `DiscoveryError::Navigation` when the search page cannot be opened. Every
    /// later fault ends the run early with the venues collected so far.
    #[instrument(skip(self), fields(stall_timeout_ms = self.config.stall_timeout_ms))]
    pub async fn run(&self, landmark: &str) -> Result<DiscoveryOutcome> {
        let started = Instant::now();
        let url = query::landmark_search_url(&self.config, landmark)?;
        info!("Discovering venues near '{}'", landmark.trim());

        let page = self.launcher.open(&url).await?;
        let mut session = DiscoverySession::new(page, self.config.stall_timeout());

        let termination = match self.drive(&mut session).await {
            Ok(termination) => termination,
            Err(e) => {
                warn!(
                    "Discovery failed after {} venues, returning partial result: {}",
                    session.venues.len(),
                    e
                );
                session.transition(DiscoveryState::Failed);
                Termination::Aborted
            }
        };

        if let Err(e) = session.page.close().await {
            warn!("Failed to close page session: {}", e);
        }

        let elapsed = started.elapsed();
        info!(
            "Discovery finished ({:?}) with {} venues after {} passes in {:.2?}",
            termination,
            session.venues.len(),
            session.passes,
            elapsed
        );

        Ok(DiscoveryOutcome {
            venues: session.venues,
            termination,
            elapsed,
        })
    }

    async fn drive(&self, session: &mut DiscoverySession<L::Page>) -> Result<Termination> {
        session.last_progress = Instant::now();
        session.transition(DiscoveryState::Scanning);

        loop {
            match session.state {
                DiscoveryState::Scanning => {
                    self.scan(session).await?;

                    if session.stalled() {
                        info!(
                            "No new venues for more than {:?}, stopping",
                            session.stall_budget
                        );
                        session.transition(DiscoveryState::Done);
                        return Ok(Termination::Stalled);
                    }

                    if session
                        .page
                        .is_at_bottom(self.config.end_marker_debounce())
                        .await?
                    {
                        info!("Reached the end of the result list");
                        // entries may render between the last scan and the marker settling
                        self.scan(session).await?;
                        session.transition(DiscoveryState::Draining);
                    } else {
                        session.transition(DiscoveryState::Scrolling);
                    }
                }
                DiscoveryState::Scrolling => {
                    self.scroll(session).await;
                    sleep(self.config.scan_interval()).await;
                    session.transition(DiscoveryState::Scanning);
                }
                DiscoveryState::Draining => {
                    session.transition(DiscoveryState::Done);
                }
                DiscoveryState::Done => return Ok(Termination::EndOfResults),
                DiscoveryState::Starting | DiscoveryState::Failed => {
                    return Err(DiscoveryError::Extraction(format!(
                        "discovery loop entered unexpected state {}",
                        session.state
                    )));
                }
            }
        }
    }

    /// One extraction pass. A missing container skips the pass.
    async fn scan(&self, session: &mut DiscoverySession<L::Page>) -> Result<()> {
        session.passes += 1;

        let snapshot = match session.page.snapshot_result_container().await {
            Ok(snapshot) => snapshot,
            Err(DiscoveryError::ContainerNotFound(selector)) => {
                warn!(
                    "Result container '{}' not found, skipping pass {}",
                    selector, session.passes
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let entries = self.extractor.extract(&snapshot);
        if let Some(last) = entries.last() {
            session.scroll_anchor = Some(last.name.clone());
        }

        let mut added = 0;
        for venue in entries {
            let name = venue.name.clone();
            if session.venues.insert(venue) {
                added += 1;
                debug!("Venue {}: {}", session.venues.len(), name);
            }
        }

        if added > 0 {
            session.last_progress = Instant::now();
        }
        debug!(
            "Pass {} merged {} new venues ({} total)",
            session.passes,
            added,
            session.venues.len()
        );
        Ok(())
    }

    /// Scrolls towards the last rendered entry. Never fails the run.
    async fn scroll(&self, session: &mut DiscoverySession<L::Page>) {
        let Some(anchor) = session.scroll_anchor.clone() else {
            debug!("Nothing rendered yet, skipping scroll");
            return;
        };

        match session.page.scroll_to_last_visible_entry(&anchor).await {
            Ok(ScrollOutcome::Scrolled) => debug!("Scrolled to '{}'", anchor),
            Ok(ScrollOutcome::NotFound) => debug!("Scroll anchor '{}' no longer rendered", anchor),
            Ok(ScrollOutcome::TimedOut) => warn!("Timed out scrolling to '{}'", anchor),
            Err(e) => warn!("Scroll to '{}' failed: {}", anchor, e),
        }
    }
}

#[async_trait]
impl<L: PageLauncher> Discoverer for DiscoveryLoop<L> {
    async fn discover(&self, landmark: &str) -> Result<DiscoveryOutcome> {
        self.run(landmark).await
    }
}

/// Discovers venues near `landmark` with a headless Chromium.
pub async fn discover(landmark: &str, config: &DiscoveryConfig) -> Result<VenueSet> {
    let outcome = DiscoveryLoop::chromium(config.clone())?.run(landmark).await?;
    Ok(outcome.venues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Venue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    enum Frame {
        Missing,
        Entries(Vec<&'static str>, bool),
    }

    fn frame(names: &[&'static str]) -> Frame {
        Frame::Entries(names.to_vec(), false)
    }

    fn bottom(names: &[&'static str]) -> Frame {
        Frame::Entries(names.to_vec(), true)
    }

    fn link(name: &str) -> String {
        format!("https://maps.example/place/{name}")
    }

    fn render(names: &[&str]) -> String {
        names
            .iter()
            .map(|name| {
                format!(
                    r#"<div><a class="hfpxzc" aria-label="{name}" href="{}"></a></div>"#,
                    link(name)
                )
            })
            .collect()
    }

    #[derive(Clone, Copy)]
    enum ScrollBehaviour {
        Scroll,
        TimeOut,
        Fail,
    }

    #[derive(Clone, Default)]
    struct Probe {
        opens: Arc<AtomicUsize>,
        scrolls: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
        urls: Arc<Mutex<Vec<String>>>,
    }

    struct ScriptedPage {
        frames: Vec<Frame>,
        taken: usize,
        current: usize,
        scroll: ScrollBehaviour,
        /// Marker checks fail once this many snapshots were taken.
        fail_after: Option<usize>,
        probe: Probe,
    }

    #[async_trait]
    impl ResultsPage for ScriptedPage {
        async fn snapshot_result_container(&mut self) -> Result<String> {
            self.current = self.taken.min(self.frames.len() - 1);
            self.taken += 1;
            match &self.frames[self.current] {
                Frame::Missing => Err(DiscoveryError::ContainerNotFound("#feed".to_string())),
                Frame::Entries(names, _) => Ok(render(names)),
            }
        }

        async fn end_marker_present(&mut self) -> Result<bool> {
            if self.fail_after.is_some_and(|n| self.taken >= n) {
                return Err(DiscoveryError::Extraction("renderer crashed".to_string()));
            }
            Ok(matches!(self.frames[self.current], Frame::Entries(_, true)))
        }

        async fn scroll_to_last_visible_entry(&mut self, _anchor: &str) -> Result<ScrollOutcome> {
            self.probe.scrolls.fetch_add(1, Ordering::SeqCst);
            match self.scroll {
                ScrollBehaviour::Scroll => Ok(ScrollOutcome::Scrolled),
                ScrollBehaviour::TimeOut => {
                    sleep(Duration::from_secs(10)).await;
                    Ok(ScrollOutcome::TimedOut)
                }
                ScrollBehaviour::Fail => {
                    Err(DiscoveryError::Extraction("node detached".to_string()))
                }
            }
        }

        async fn close(&mut self) -> Result<()> {
            self.probe.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct ScriptedLauncher {
        frames: Vec<Frame>,
        scroll: ScrollBehaviour,
        fail_after: Option<usize>,
        fail_open: bool,
        probe: Probe,
    }

    impl ScriptedLauncher {
        fn new(frames: Vec<Frame>) -> Self {
            Self {
                frames,
                scroll: ScrollBehaviour::Scroll,
                fail_after: None,
                fail_open: false,
                probe: Probe::default(),
            }
        }
    }

    #[async_trait]
    impl PageLauncher for ScriptedLauncher {
        type Page = ScriptedPage;

        async fn open(&self, url: &str) -> Result<ScriptedPage> {
            self.probe.opens.fetch_add(1, Ordering::SeqCst);
            self.probe.urls.lock().unwrap().push(url.to_string());
            if self.fail_open {
                return Err(DiscoveryError::Navigation("net::ERR_NAME_NOT_RESOLVED".to_string()));
            }
            Ok(ScriptedPage {
                frames: self.frames.clone(),
                taken: 0,
                current: 0,
                scroll: self.scroll,
                fail_after: self.fail_after,
                probe: self.probe.clone(),
            })
        }
    }

    fn names(outcome: &DiscoveryOutcome) -> Vec<String> {
        outcome.venues.iter().map(|v| v.name.clone()).collect()
    }

    fn run_loop(launcher: ScriptedLauncher) -> DiscoveryLoop<ScriptedLauncher> {
        DiscoveryLoop::new(launcher, DiscoveryConfig::default()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_bottom_after_second_pass() {
        let launcher = ScriptedLauncher::new(vec![
            frame(&["A", "B", "C"]),
            bottom(&["A", "B", "C", "D"]),
        ]);
        let probe = launcher.probe.clone();

        let outcome = run_loop(launcher).run("台北101").await.unwrap();

        assert_eq!(names(&outcome), ["A", "B", "C", "D"]);
        assert_eq!(outcome.termination, Termination::EndOfResults);
        assert_eq!(outcome.venues.last(), Some(&Venue::new("D", link("D"))));
        // nothing is scrolled once the marker held
        assert_eq!(probe.scrolls.load(Ordering::SeqCst), 1);
        assert_eq!(probe.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_pass_catches_late_entries() {
        // the marker settles while E renders; the extra pass must pick it up
        let launcher = ScriptedLauncher::new(vec![
            frame(&["A"]),
            bottom(&["A", "B"]),
            bottom(&["A", "B", "E"]),
        ]);

        let outcome = run_loop(launcher).run("Kaohsiung Station").await.unwrap();

        assert_eq!(names(&outcome), ["A", "B", "E"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalls_on_unchanging_page() {
        let launcher = ScriptedLauncher::new(vec![frame(&["A", "B", "C"])]);
        let probe = launcher.probe.clone();
        let started = Instant::now();

        let outcome = run_loop(launcher).run("Nowhere").await.unwrap();

        let elapsed = started.elapsed();
        assert_eq!(names(&outcome), ["A", "B", "C"]);
        assert_eq!(outcome.termination, Termination::Stalled);
        assert!(elapsed >= Duration::from_secs(10), "stopped early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(11), "stopped late: {elapsed:?}");
        assert_eq!(probe.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_resets_stall_timer() {
        // a venue arriving before the budget runs out restarts the budget
        let mut frames = vec![frame(&["A"])];
        frames.extend(std::iter::repeat(frame(&["A"])).take(30));
        frames.push(frame(&["A", "B"]));
        let launcher = ScriptedLauncher::new(frames);
        let started = Instant::now();

        let outcome = run_loop(launcher).run("Tainan").await.unwrap();

        assert_eq!(names(&outcome), ["A", "B"]);
        assert_eq!(outcome.termination, Termination::Stalled);
        assert!(started.elapsed() > Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scroll_timeouts_do_not_stop_the_loop() {
        let mut launcher = ScriptedLauncher::new(vec![
            frame(&["A"]),
            frame(&["A", "B"]),
            frame(&["A", "B", "C"]),
            bottom(&["A", "B", "C"]),
        ]);
        launcher.scroll = ScrollBehaviour::TimeOut;
        let probe = launcher.probe.clone();

        let mut config = DiscoveryConfig::default();
        config.stall_timeout_ms = 30_000;
        let outcome = DiscoveryLoop::new(launcher, config)
            .unwrap()
            .run("Taichung")
            .await
            .unwrap();

        assert_eq!(names(&outcome), ["A", "B", "C"]);
        assert_eq!(outcome.termination, Termination::EndOfResults);
        assert_eq!(probe.scrolls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scroll_timeouts_bounded_by_stall_timer() {
        let mut launcher = ScriptedLauncher::new(vec![frame(&["A"])]);
        launcher.scroll = ScrollBehaviour::TimeOut;

        let outcome = run_loop(launcher).run("Hsinchu").await.unwrap();

        assert_eq!(outcome.termination, Termination::Stalled);
        assert_eq!(names(&outcome), ["A"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scroll_errors_are_tolerated() {
        let mut launcher =
            ScriptedLauncher::new(vec![frame(&["A"]), bottom(&["A", "B"])]);
        launcher.scroll = ScrollBehaviour::Fail;

        let outcome = run_loop(launcher).run("Keelung").await.unwrap();

        assert_eq!(names(&outcome), ["A", "B"]);
        assert_eq!(outcome.termination, Termination::EndOfResults);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_container_skips_pass() {
        let launcher = ScriptedLauncher::new(vec![
            Frame::Missing,
            Frame::Missing,
            bottom(&["A"]),
        ]);
        let probe = launcher.probe.clone();

        let outcome = run_loop(launcher).run("Yilan").await.unwrap();

        assert_eq!(names(&outcome), ["A"]);
        // no entry was rendered to anchor a scroll on
        assert_eq!(probe.scrolls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_container_forever_stalls_empty() {
        let launcher = ScriptedLauncher::new(vec![Frame::Missing]);

        let outcome = run_loop(launcher).run("Green Island").await.unwrap();

        assert!(outcome.venues.is_empty());
        assert_eq!(outcome.termination, Termination::Stalled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_failure_returns_partial_result() {
        let mut launcher = ScriptedLauncher::new(vec![
            frame(&["A", "B"]),
            frame(&["A", "B", "C"]),
        ]);
        launcher.fail_after = Some(2);
        let probe = launcher.probe.clone();

        let outcome = run_loop(launcher).run("Hualien").await.unwrap();

        assert_eq!(names(&outcome), ["A", "B", "C"]);
        assert_eq!(outcome.termination, Termination::Aborted);
        assert_eq!(probe.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_links_keep_first_name() {
        let launcher = ScriptedLauncher::new(vec![bottom(&["A", "A", "B"])]);

        let outcome = run_loop(launcher).run("Chiayi").await.unwrap();

        assert_eq!(names(&outcome), ["A", "B"]);
    }

    #[tokio::test]
    async fn test_blank_landmark_opens_nothing() {
        for landmark in ["", "   ", "\t\n"] {
            let launcher = ScriptedLauncher::new(vec![frame(&["A"])]);
            let probe = launcher.probe.clone();

            let result = run_loop(launcher).run(landmark).await;

            assert!(matches!(result, Err(DiscoveryError::InvalidQuery(_))));
            assert_eq!(probe.opens.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn test_navigation_error_propagates() {
        let mut launcher = ScriptedLauncher::new(vec![frame(&["A"])]);
        launcher.fail_open = true;

        let result = run_loop(launcher).run("Taitung").await;

        assert!(matches!(result, Err(DiscoveryError::Navigation(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_encoded_search_url() {
        let launcher = ScriptedLauncher::new(vec![bottom(&[])]);
        let probe = launcher.probe.clone();

        let outcome = run_loop(launcher).run("駁二").await.unwrap();

        assert!(outcome.venues.is_empty());
        let urls = probe.urls.lock().unwrap();
        assert_eq!(urls.len(), 1);
        assert!(urls[0].starts_with(
            "https://www.google.com.tw/maps/search/%E9%A7%81%E4%BA%8C%20%E9%99%84%E8%BF%91%E9%A4%90%E5%BB%B3/@"
        ));
    }
}
