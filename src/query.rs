use crate::{config::DiscoveryConfig, DiscoveryError, Result};

/// Joins a landmark and the search suffix into the phrase typed into the map search.
pub fn compose_phrase(landmark: &str, suffix: &str) -> String {
    let landmark = landmark.trim();
    let suffix = suffix.trim();
    if suffix.is_empty() {
        landmark.to_string()
    } else {
        format!("{} {}", landmark, suffix)
    }
}

/// Percent-encodes `phrase` so it can be used as a single URL path segment.
///
/// Every byte outside the unreserved set (`A-Z a-z 0-9 - _ . ~`) is encoded,
/// including `/`, `?`, `#`, spaces and each UTF-8 byte of non-ASCII text.
///
/// # Errors
///
/// Returns `DiscoveryError::InvalidQuery` if `phrase` is empty or whitespace-only.
pub fn encode_query(phrase: &str) -> Result<String> {
    if phrase.trim().is_empty() {
        return Err(DiscoveryError::InvalidQuery(
            "search phrase must not be empty".to_string(),
        ));
    }
    Ok(urlencoding::encode(phrase).into_owned())
}

/// Builds the map search URL for an already encoded query token.
pub fn search_url(config: &DiscoveryConfig, token: &str) -> String {
    let anchor = &config.anchor;
    format!(
        "{}/{}/@{},{},{}z/{}",
        config.search_base_url.trim_end_matches('/'),
        token,
        anchor.latitude,
        anchor.longitude,
        anchor.zoom,
        config.search_url_suffix.trim_start_matches('/'),
    )
}

/// Validates `landmark`, appends the configured suffix and returns the search URL.
pub fn landmark_search_url(config: &DiscoveryConfig, landmark: &str) -> Result<String> {
    if landmark.trim().is_empty() {
        return Err(DiscoveryError::InvalidQuery(
            "landmark must not be empty".to_string(),
        ));
    }
    let token = encode_query(&compose_phrase(landmark, &config.query_suffix))?;
    Ok(search_url(config, &token))
}
