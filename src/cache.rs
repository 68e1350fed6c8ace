use crate::{Venue, VenueSet};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::debug;

/// Identifier of a chat user.
pub type UserId = u64;

/// The venues stored for one (user, label) pair.
#[derive(Debug, Clone, Serialize)]
pub struct ResultCacheEntry {
    pub venues: VenueSet,
    pub stored_at: DateTime<Utc>,
}

/// One page of a cached venue list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultPage {
    /// Zero-based page index.
    pub index: usize,
    /// Number of pages; an empty list still has one (empty) page.
    pub count: usize,
    /// Number of venues across all pages.
    pub total: usize,
    pub venues: Vec<Venue>,
}

impl ResultPage {
    pub fn is_first(&self) -> bool {
        self.index == 0
    }

    pub fn is_last(&self) -> bool {
        self.index + 1 >= self.count
    }
}

/// Number of pages `total` venues split into, never less than one.
pub fn page_count(total: usize, page_size: usize) -> usize {
    total.div_ceil(page_size.max(1)).max(1)
}

/// Slices page `index` out of `venues`, clamping the index to the last page.
pub fn paginate(venues: &[Venue], index: usize, page_size: usize) -> ResultPage {
    let page_size = page_size.max(1);
    let count = page_count(venues.len(), page_size);
    let index = index.min(count - 1);

    let start = (index * page_size).min(venues.len());
    let end = (start + page_size).min(venues.len());

    ResultPage {
        index,
        count,
        total: venues.len(),
        venues: venues[start..end].to_vec(),
    }
}

/// Process-wide store of discovery results, keyed by user and request label.
///
/// Created once at start-up and shared by the command handlers. Each user's labels
/// keep the order they were first stored in; storing an existing label replaces its
/// venues in place.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: DashMap<UserId, Vec<(String, ResultCacheEntry)>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `venues` under (`user`, `label`), replacing any previous list.
    pub fn put(&self, user: UserId, label: &str, venues: VenueSet) {
        let entry = ResultCacheEntry {
            venues,
            stored_at: Utc::now(),
        };
        debug!(user, label, venues = entry.venues.len(), "Storing results");

        let mut labels = self.entries.entry(user).or_default();
        match labels.iter().position(|(existing, _)| existing == label) {
            Some(position) => labels[position].1 = entry,
            None => labels.push((label.to_string(), entry)),
        }
    }

    /// Stores an empty list for a search that is still running.
    pub fn reserve(&self, user: UserId, label: &str) {
        self.put(user, label, VenueSet::new());
    }

    pub fn get(&self, user: UserId, label: &str) -> Option<ResultCacheEntry> {
        self.entries.get(&user).and_then(|labels| {
            labels
                .iter()
                .find(|(existing, _)| existing == label)
                .map(|(_, entry)| entry.clone())
        })
    }

    pub fn contains(&self, user: UserId, label: &str) -> bool {
        self.entries
            .get(&user)
            .is_some_and(|labels| labels.iter().any(|(existing, _)| existing == label))
    }

    /// Removes and returns the entry for (`user`, `label`).
    ///
    /// A user whose last label is removed is dropped from the cache.
    pub fn delete(&self, user: UserId, label: &str) -> Option<ResultCacheEntry> {
        let entry = {
            let mut labels = self.entries.get_mut(&user)?;
            let position = labels.iter().position(|(existing, _)| existing == label)?;
            labels.remove(position).1
        };
        self.entries.remove_if(&user, |_, labels| labels.is_empty());
        Some(entry)
    }

    /// Number of users with at least one stored label.
    pub fn user_count(&self) -> usize {
        self.entries.len()
    }

    /// Labels stored for `user`, oldest first.
    pub fn list_keys(&self, user: UserId) -> Vec<String> {
        self.entries
            .get(&user)
            .map(|labels| labels.iter().map(|(label, _)| label.clone()).collect())
            .unwrap_or_default()
    }

    /// A uniformly random venue of the entry, if it holds any.
    pub fn random_pick(&self, user: UserId, label: &str) -> Option<Venue> {
        let entry = self.get(user, label)?;
        entry
            .venues
            .as_slice()
            .choose(&mut rand::thread_rng())
            .cloned()
    }

    /// Page `index` of the entry's venues, clamped to the last page.
    pub fn page(&self, user: UserId, label: &str, index: usize, page_size: usize) -> Option<ResultPage> {
        let entry = self.get(user, label)?;
        Some(paginate(entry.venues.as_slice(), index, page_size))
    }
}
