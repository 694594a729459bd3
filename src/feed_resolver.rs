//! Resolves a `FluxMonitorInitiator`'s `feeds` array into concrete HTTP
//! source URLs (spec §4.3, C3). Resolution is eager: every feed is checked
//! at `CheckerFactory` build time, so a bad feed fails the job before a
//! single checker starts rather than surfacing later as a flaky poll.

use crate::collaborators::BridgeStore;
use crate::error::FeedResolutionError;

/// Resolves every entry of `feeds` (a heterogeneous JSON array of URL
/// strings and `{"bridge": "<name>"}` objects) to an absolute URL.
///
/// To keep the dependency surface aligned with the teacher (which carries
/// no `url` crate), absolute-URL validity is checked with a minimal
/// internal prefix test rather than a full RFC 3986 parse.
pub async fn resolve(
    feeds: &serde_json::Value,
    bridges: &dyn BridgeStore,
) -> Result<Vec<String>, FeedResolutionError> {
    let entries = feeds.as_array().ok_or(FeedResolutionError::MalformedJson)?;

    let mut resolved = Vec::with_capacity(entries.len());
    for (idx, entry) in entries.iter().enumerate() {
        resolved.push(resolve_one(idx, entry, bridges).await?);
    }
    Ok(resolved)
}

async fn resolve_one(
    idx: usize,
    entry: &serde_json::Value,
    bridges: &dyn BridgeStore,
) -> Result<String, FeedResolutionError> {
    if let Some(url) = entry.as_str() {
        return require_absolute(url);
    }

    if let Some(obj) = entry.as_object() {
        if let Some(name) = obj.get("bridge").and_then(|v| v.as_str()) {
            let bridge = bridges
                .find_bridge(name)
                .await
                .map_err(|_| FeedResolutionError::UnknownBridge(name.to_string()))?;
            return require_absolute(&bridge.url);
        }
    }

    Err(FeedResolutionError::InvalidFeedShape(idx))
}

fn require_absolute(url: &str) -> Result<String, FeedResolutionError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(url.to_string())
    } else {
        Err(FeedResolutionError::InvalidUrl(url.to_string()))
    }
}
