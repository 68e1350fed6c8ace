use crate::{config::DiscoveryConfig, DiscoveryError, Result, Venue};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};

/// The `ResultExtractor` struct reads result entries out of a snapshot of the results container.
/// It only parses markup; it never touches the browser.
#[derive(Debug, Clone)]
pub struct ResultExtractor {
    /// Selector matching one result entry.
    entry_selector: Selector,
    /// Attribute holding the accessible name of an entry.
    name_attribute: String,
    /// Attribute holding the detail-page link of an entry.
    link_attribute: String,
}

impl ResultExtractor {
    /// Creates a new `ResultExtractor`.
    ///
    /// # Arguments
    ///
    /// * `entry_selector` - CSS selector matching a single result entry.
    /// * `name_attribute` - Attribute carrying the venue name, usually `aria-label`.
    /// * `link_attribute` - Attribute carrying the venue link, usually `href`.
    ///
    /// # Returns
    ///
    /// The extractor, or `DiscoveryError::Config` if the selector does not parse.
    pub fn new(
        entry_selector: &str,
        name_attribute: impl Into<String>,
        link_attribute: impl Into<String>,
    ) -> Result<Self> {
        let entry_selector = Selector::parse(entry_selector).map_err(|e| {
            DiscoveryError::Config(format!("Invalid entry selector '{}': {}", entry_selector, e))
        })?;

        Ok(Self {
            entry_selector,
            name_attribute: name_attribute.into(),
            link_attribute: link_attribute.into(),
        })
    }

    /// Builds an extractor from the entry settings of a `DiscoveryConfig`.
    pub fn from_config(config: &DiscoveryConfig) -> Result<Self> {
        Self::new(
            &config.entry_selector,
            config.name_attribute.as_str(),
            config.link_attribute.as_str(),
        )
    }

    /// Extracts every well-formed entry from a container snapshot, in document order.
    ///
    /// Entries lacking a non-blank name or link are skipped. Duplicates are kept;
    /// deduplication belongs to the caller's accumulator.
    #[instrument(skip(self, snapshot), fields(snapshot_length = snapshot.len()))]
    pub fn extract(&self, snapshot: &str) -> Vec<Venue> {
        let fragment = Html::parse_fragment(snapshot);

        let venues: Vec<Venue> = fragment
            .select(&self.entry_selector)
            .filter_map(|entry| self.entry_to_venue(entry))
            .collect();

        debug!("Extracted {} entries from snapshot", venues.len());
        venues
    }

    fn entry_to_venue(&self, entry: ElementRef<'_>) -> Option<Venue> {
        let element = entry.value();
        let name = element.attr(&self.name_attribute).map(str::trim);
        let link = element.attr(&self.link_attribute).map(str::trim);

        match (name, link) {
            (Some(name), Some(link)) if !name.is_empty() && !link.is_empty() => {
                Some(Venue::new(name, link))
            }
            _ => {
                debug!(?name, ?link, "Skipping malformed entry");
                None
            }
        }
    }
}
