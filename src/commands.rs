//! Chat command handlers
//!
//! Platform-agnostic versions of the bot's slash commands. Handlers return
//! [`Reply`] values and leave their presentation to the front end.

use crate::cache::{ResultCache, ResultPage, UserId};
use crate::config::BotConfig;
use crate::discovery::{Discoverer, Termination};
use crate::Venue;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// What a command answers with.
///
/// Labels are the trimmed landmark text a search was started with; every handler
/// trims the label it is given before looking it up.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reply {
    /// A page of the venues found for `label`.
    Results {
        user: UserId,
        label: String,
        page: ResultPage,
        termination: Option<Termination>,
    },
    /// A random venue for `label`.
    Recommendation { label: String, venue: Venue },
    /// The entry for `label` was removed.
    Cleared { label: String },
    /// Nothing is stored for `label`; the user should run a search first.
    NoData { label: Option<String> },
    /// The search could not run.
    Error { message: String },
}

/// Direction of a page button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageMove {
    Previous,
    Next,
}

/// The `CommandHandler` struct answers chat commands against a shared result cache.
/// Cloning is cheap; clones share the cache and the page cursors.
#[derive(Clone)]
pub struct CommandHandler {
    /// Results of finished searches.
    cache: Arc<ResultCache>,
    /// Runs the searches.
    discoverer: Arc<dyn Discoverer>,
    /// Page size and autocomplete limit.
    config: BotConfig,
    /// The label and page each user last looked at.
    cursors: Arc<DashMap<UserId, (String, usize)>>,
}

impl CommandHandler {
    /// Creates a new `CommandHandler`.
    ///
    /// # Arguments
    ///
    /// * `cache` - The result cache shared with the rest of the process.
    /// * `discoverer` - Runs venue discovery for a landmark.
    /// * `config` - Bot settings.
    pub fn new(cache: Arc<ResultCache>, discoverer: Arc<dyn Discoverer>, config: BotConfig) -> Self {
        Self {
            cache,
            discoverer,
            config,
            cursors: Arc::new(DashMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Starts a search for venues near `landmark` on a background task.
    ///
    /// The entry for the landmark is reset to an empty list right away, so the
    /// label shows up in autocomplete while the search runs. The returned handle
    /// resolves to the reply once discovery finishes.
    pub fn start_search(&self, user: UserId, landmark: &str) -> JoinHandle<Reply> {
        let handler = self.clone();
        let label = landmark.trim().to_string();

        if !label.is_empty() {
            self.cache.reserve(user, &label);
        }

        tokio::spawn(async move { handler.complete_search(user, label).await })
    }

    /// Searches for venues near `landmark` and replies with the first page.
    pub async fn eatwhat(&self, user: UserId, landmark: &str) -> Reply {
        match self.start_search(user, landmark).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Search task for '{}' failed: {}", landmark, e);
                Reply::Error {
                    message: format!("search task failed: {e}"),
                }
            }
        }
    }

    async fn complete_search(&self, user: UserId, label: String) -> Reply {
        let outcome = match self.discoverer.discover(&label).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Search for '{}' failed: {}", label, e);
                return Reply::Error {
                    message: e.to_string(),
                };
            }
        };

        info!(
            user,
            label = %label,
            venues = outcome.venues.len(),
            "Search finished"
        );
        let termination = outcome.termination;
        self.cache.put(user, &label, outcome.venues);

        let mut reply = self.show_page(user, &label, 0);
        if let Reply::Results {
            termination: slot, ..
        } = &mut reply
        {
            *slot = Some(termination);
        }
        reply
    }

    /// Shows page `index` of the venues stored for `label`.
    pub fn show_page(&self, user: UserId, label: &str, index: usize) -> Reply {
        let label = label.trim();
        match self.cache.page(user, label, index, self.config.page_size) {
            Some(page) => {
                self.cursors.insert(user, (label.to_string(), page.index));
                Reply::Results {
                    user,
                    label: label.to_string(),
                    page,
                    termination: None,
                }
            }
            None => Reply::NoData {
                label: Some(label.to_string()),
            },
        }
    }

    /// Moves the user's current result view one page, staying within its bounds.
    pub fn move_page(&self, user: UserId, direction: PageMove) -> Reply {
        let Some((label, index)) = self.cursors.get(&user).map(|cursor| cursor.value().clone()) else {
            return Reply::NoData { label: None };
        };

        let target = match direction {
            PageMove::Previous => index.saturating_sub(1),
            PageMove::Next => index + 1,
        };
        self.show_page(user, &label, target)
    }

    /// Recommends a random venue stored for `label`.
    pub fn ewrandom(&self, user: UserId, label: &str) -> Reply {
        let label = label.trim();
        match self.cache.random_pick(user, label) {
            Some(venue) => Reply::Recommendation {
                label: label.to_string(),
                venue,
            },
            None => Reply::NoData {
                label: Some(label.to_string()),
            },
        }
    }

    /// Removes the venues stored for `label`, including an empty entry.
    pub fn ewclear(&self, user: UserId, label: &str) -> Reply {
        let label = label.trim();
        if self.cache.delete(user, label).is_none() {
            return Reply::NoData {
                label: Some(label.to_string()),
            };
        }

        self.cursors
            .remove_if(&user, |_, (current, _)| current.as_str() == label);
        Reply::Cleared {
            label: label.to_string(),
        }
    }

    /// Labels of `user` containing `query`, case-insensitively, oldest first.
    pub fn autocomplete(&self, user: UserId, query: &str) -> Vec<String> {
        let query = query.to_lowercase();
        self.cache
            .list_keys(user)
            .into_iter()
            .filter(|label| label.to_lowercase().contains(&query))
            .take(self.config.autocomplete_limit)
            .collect()
    }
}
