//! Wire payloads exchanged with the classification worker.
//!
//! Field names match the worker's JSON contract (`id`, `url`, `category`,
//! `theme`, `stats`), so both the JSON and `MsgPack` encodings produced by
//! [`crate::codec`] use the same keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Free-form statistics computed by the worker for a URL.
///
/// Keys are metric names (e.g. `"wordCount"`), values are arbitrary JSON.
pub type Stats = serde_json::Map<String, serde_json::Value>;

/// Which repository a classification result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    /// A site root such as `https://example.com`.
    Website,
    /// A single page under a website.
    Page,
}

impl SubjectKind {
    /// Returns the lowercase name used in logs and table names.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Website => "website",
            Self::Page => "page",
        }
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request published to the worker's request queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRequest {
    /// Identity of the website or page row being classified.
    pub id: u64,
    /// URL the worker should fetch and classify.
    pub url: String,
}

impl ClassificationRequest {
    #[must_use]
    pub fn new(id: u64, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
        }
    }
}

/// Reply produced by the worker.
///
/// The correlation token travels in transport metadata, not in the body.
/// `id` echoes the request's subject identity; `stats` may be absent or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResponse {
    /// Echoed subject identity.
    pub id: u64,
    /// Echoed URL. Older workers omit it.
    #[serde(default)]
    pub url: String,
    /// Category label, e.g. `"news"`.
    pub category: String,
    /// Theme label, e.g. `"politics"`.
    pub theme: String,
    /// Optional per-URL statistics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<Stats>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serializes_with_worker_field_names() {
        let req = ClassificationRequest::new(7, "https://example.com");
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value, json!({"id": 7, "url": "https://example.com"}));
    }

    #[test]
    fn response_accepts_null_stats() {
        let resp: ClassificationResponse = serde_json::from_value(json!({
            "id": 1,
            "url": "https://example.com",
            "category": "news",
            "theme": "politics",
            "stats": null
        }))
        .unwrap();
        assert!(resp.stats.is_none());
    }

    #[test]
    fn response_accepts_missing_url_and_stats() {
        let resp: ClassificationResponse = serde_json::from_value(json!({
            "id": 3,
            "category": "shop",
            "theme": "electronics"
        }))
        .unwrap();
        assert_eq!(resp.url, "");
        assert!(resp.stats.is_none());
    }

    #[test]
    fn response_requires_category() {
        let result: Result<ClassificationResponse, _> =
            serde_json::from_value(json!({"id": 3, "theme": "electronics"}));
        assert!(result.is_err());
    }

    #[test]
    fn response_keeps_arbitrary_stats_values() {
        let resp: ClassificationResponse = serde_json::from_value(json!({
            "id": 42,
            "url": "https://example.com",
            "category": "news",
            "theme": "politics",
            "stats": {"wordCount": 500, "languages": ["en", "de"], "ratio": 0.5}
        }))
        .unwrap();
        let stats = resp.stats.unwrap();
        assert_eq!(stats["wordCount"], json!(500));
        assert_eq!(stats["languages"], json!(["en", "de"]));
    }

    #[test]
    fn subject_kind_wire_names() {
        assert_eq!(serde_json::to_value(SubjectKind::Website).unwrap(), json!("website"));
        assert_eq!(serde_json::to_value(SubjectKind::Page).unwrap(), json!("page"));
        assert_eq!(SubjectKind::Page.to_string(), "page");
    }
}
