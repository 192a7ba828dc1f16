//! Video search and metadata types

use serde::{Deserialize, Serialize};

/// One hit returned by a video search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    /// Human-readable duration as reported by the source (e.g. `4:31`)
    #[serde(default)]
    pub duration: String,
    /// View count as reported by the source
    #[serde(default)]
    pub views: String,
}

impl SearchResult {
    pub fn watch_url(&self) -> String {
        watch_url(&self.id)
    }
}

/// Canonical watch URL for a video id.
pub fn watch_url(id: &str) -> String {
    format!("https://youtube.com/watch?v={id}")
}

/// JSON sidecar written next to each downloaded clip (`video_<id>_meta.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub views: String,
    pub url: String,
    pub search_term: String,
}

impl VideoMetadata {
    pub fn from_search(result: &SearchResult, search_term: &str) -> Self {
        Self {
            title: result.title.clone(),
            duration: result.duration.clone(),
            views: result.views.clone(),
            url: result.watch_url(),
            search_term: search_term.to_string(),
        }
    }
}
