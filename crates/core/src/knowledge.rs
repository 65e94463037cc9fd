//! Knowledge-search types shared between the search adapter and the
//! generator parser's metadata join.

use serde::{Deserialize, Serialize};

/// One document returned by the knowledge-search service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KmDocument {
    pub public_id: String,

    #[serde(default)]
    pub content: Option<String>,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub sample_questions: Vec<String>,

    /// Arbitrary document metadata, carried as an opaque JSON string by the
    /// search service rather than structured, and re-parsed only where
    /// needed (thumbnail/navigation fields for the `metadata` event).
    #[serde(default)]
    pub metadata: Option<String>,
}

/// One scored search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KmSearchItem {
    #[serde(default)]
    pub score: Option<f64>,

    #[serde(default)]
    pub reranker_score: Option<f64>,

    pub document: KmDocument,
}

/// The verbatim response shape from the search service, forwarded to the
/// client as the `km_result` event payload.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KmSearchResponse {
    #[serde(default)]
    pub total: usize,

    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub answers: Vec<String>,

    #[serde(default)]
    pub data: Vec<KmSearchItem>,
}

impl KmSearchResponse {
    /// Looks up a search hit by the knowledge document's `public_id`, used
    /// by the generator parser to join `doc-ids` metadata against the
    /// preceding `km_result`.
    pub fn find_by_public_id(&self, public_id: &str) -> Option<&KmSearchItem> {
        self.data.iter().find(|item| item.document.public_id == public_id)
    }

    /// Merges multiple per-query responses: dedups by `public_id` keeping
    /// the first-seen occurrence, then sorts by descending
    /// `reranker_score`, then truncates to `max_results`.
    pub fn merge(responses: Vec<KmSearchResponse>, max_results: usize) -> KmSearchResponse {
        let mut seen = std::collections::HashSet::new();
        let mut merged = KmSearchResponse::default();
        for resp in responses {
            if merged.source.is_none() {
                merged.source = resp.source.clone();
            }
            merged.answers.extend(resp.answers);
            for item in resp.data {
                if seen.insert(item.document.public_id.clone()) {
                    merged.data.push(item);
                }
            }
        }
        merged
            .data
            .sort_by(|a, b| {
                b.reranker_score
                    .unwrap_or(0.0)
                    .partial_cmp(&a.reranker_score.unwrap_or(0.0))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        merged.data.truncate(max_results);
        merged.total = merged.data.len();
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, reranker_score: f64) -> KmSearchItem {
        KmSearchItem {
            score: Some(reranker_score),
            reranker_score: Some(reranker_score),
            document: KmDocument {
                public_id: id.into(),
                content: None,
                title: None,
                sample_questions: vec![],
                metadata: None,
            },
        }
    }

    #[test]
    fn merge_dedups_and_sorts_descending() {
        let a = KmSearchResponse {
            data: vec![item("doc-1", 0.5), item("doc-2", 0.9)],
            ..Default::default()
        };
        let b = KmSearchResponse {
            data: vec![item("doc-1", 0.99), item("doc-3", 0.1)],
            ..Default::default()
        };
        let merged = KmSearchResponse::merge(vec![a, b], 10);
        let ids: Vec<_> = merged.data.iter().map(|i| i.document.public_id.clone()).collect();
        assert_eq!(ids, vec!["doc-2", "doc-1", "doc-3"]);
    }

    #[test]
    fn merge_truncates_to_max_results() {
        let a = KmSearchResponse {
            data: vec![item("doc-1", 0.5), item("doc-2", 0.9), item("doc-3", 0.1)],
            ..Default::default()
        };
        let merged = KmSearchResponse::merge(vec![a], 2);
        assert_eq!(merged.data.len(), 2);
    }

    #[test]
    fn find_by_public_id_locates_joined_document() {
        let resp = KmSearchResponse {
            data: vec![item("doc-1", 0.5)],
            ..Default::default()
        };
        assert!(resp.find_by_public_id("doc-1").is_some());
        assert!(resp.find_by_public_id("doc-missing").is_none());
    }
}
