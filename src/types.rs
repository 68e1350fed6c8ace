use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A dining venue found by a discovery run.
///
/// The `link` points at the venue's detail page and is its identity; two venues
/// may share a `name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Venue {
    /// Display name taken from the entry's accessible name.
    pub name: String,
    /// Detail-page link, unique within a `VenueSet`.
    pub link: String,
}

impl Venue {
    pub fn new(name: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            link: link.into(),
        }
    }

    /// Renders the venue as a markdown link, the way chat embeds list it.
    pub fn markdown(&self) -> String {
        format!("[{}]({})", self.name, self.link)
    }
}

/// Venues in discovery order with no repeated `link`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Venue>", into = "Vec<Venue>")]
pub struct VenueSet {
    venues: Vec<Venue>,
    links: HashSet<String>,
}

impl VenueSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `venue` unless its link was already seen. Returns whether it was new.
    pub fn insert(&mut self, venue: Venue) -> bool {
        if self.links.contains(&venue.link) {
            return false;
        }
        self.links.insert(venue.link.clone());
        self.venues.push(venue);
        true
    }

    /// Merges every venue of `batch` in order and returns how many were new.
    pub fn merge(&mut self, batch: impl IntoIterator<Item = Venue>) -> usize {
        let mut added = 0;
        for venue in batch {
            if self.insert(venue) {
                added += 1;
            }
        }
        added
    }

    pub fn contains_link(&self, link: &str) -> bool {
        self.links.contains(link)
    }

    pub fn len(&self) -> usize {
        self.venues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.venues.is_empty()
    }

    /// The most recently discovered venue.
    pub fn last(&self) -> Option<&Venue> {
        self.venues.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Venue> {
        self.venues.iter()
    }

    pub fn as_slice(&self) -> &[Venue] {
        &self.venues
    }

    pub fn into_vec(self) -> Vec<Venue> {
        self.venues
    }
}

impl From<Vec<Venue>> for VenueSet {
    fn from(venues: Vec<Venue>) -> Self {
        let mut set = VenueSet::new();
        set.merge(venues);
        set
    }
}

impl From<VenueSet> for Vec<Venue> {
    fn from(set: VenueSet) -> Self {
        set.venues
    }
}

impl FromIterator<Venue> for VenueSet {
    fn from_iter<I: IntoIterator<Item = Venue>>(iter: I) -> Self {
        let mut set = VenueSet::new();
        set.merge(iter);
        set
    }
}

impl IntoIterator for VenueSet {
    type Item = Venue;
    type IntoIter = std::vec::IntoIter<Venue>;

    fn into_iter(self) -> Self::IntoIter {
        self.venues.into_iter()
    }
}

impl<'a> IntoIterator for &'a VenueSet {
    type Item = &'a Venue;
    type IntoIter = std::slice::Iter<'a, Venue>;

    fn into_iter(self) -> Self::IntoIter {
        self.venues.iter()
    }
}
