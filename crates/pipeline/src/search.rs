//! Knowledge Search adapter (C6): fans a request's query terms out to the
//! search service, bounded to at most 10 concurrent calls, then merges the
//! per-query result sets into one ranked, deduplicated response.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use answer_pipeline_core::knowledge::KmSearchResponse;
use answer_pipeline_core::traits::KnowledgeSearch;
use answer_pipeline_core::Result;

const MAX_CONCURRENT_QUERIES: usize = 10;

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

pub struct HttpKnowledgeSearch {
    client: reqwest::Client,
    config: SearchConfig,
}

impl HttpKnowledgeSearch {
    pub fn new(config: SearchConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("failed to build search http client");
        HttpKnowledgeSearch { client, config }
    }

    async fn one_query(
        &self,
        knowledge_id: &str,
        query: &str,
        language: &str,
    ) -> Result<KmSearchResponse> {
        #[derive(Serialize)]
        struct SearchRequestBody<'a> {
            knowledge_id: &'a str,
            query: &'a str,
            language: &'a str,
        }

        let url = format!("{}/search", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&SearchRequestBody {
                knowledge_id,
                query,
                language,
            })
            .send()
            .await
            .map_err(|e| crate::error::PipelineError::Search(e.to_string()))?;

        if !response.status().is_success() {
            return Err(answer_pipeline_core::Error::KnowledgeSearch(format!(
                "search http status {}",
                response.status()
            )));
        }

        response
            .json::<KmSearchResponse>()
            .await
            .map_err(|e| answer_pipeline_core::Error::KnowledgeSearch(e.to_string()))
    }
}

#[async_trait]
impl KnowledgeSearch for HttpKnowledgeSearch {
    async fn search(
        &self,
        knowledge_id: &str,
        queries: &[String],
        language: &str,
        max_results: usize,
    ) -> Result<KmSearchResponse> {
        let deduped: Vec<&str> = dedupe_queries(queries);

        let responses: Vec<KmSearchResponse> = stream::iter(deduped.into_iter())
            .map(|query| self.one_query(knowledge_id, query, language))
            .buffer_unordered(MAX_CONCURRENT_QUERIES)
            .filter_map(|result| async move {
                match result {
                    Ok(response) => Some(response),
                    Err(err) => {
                        tracing::warn!(error = %err, "knowledge search query failed, dropping");
                        None
                    }
                }
            })
            .collect()
            .await;

        Ok(KmSearchResponse::merge(responses, max_results))
    }
}

/// Deduplicates query terms while preserving first-seen order, and drops
/// blanks left over from an empty correction or an empty keyword list.
fn dedupe_queries(queries: &[String]) -> Vec<&str> {
    let mut seen = std::collections::HashSet::new();
    queries
        .iter()
        .map(String::as_str)
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .filter(|q| seen.insert(*q))
        .collect()
}

/// Builds the query-term list the orchestrator hands to `search`: the
/// validator's corrected transcript plus its extracted keywords.
pub fn build_queries(correction: &str, keywords: &[String]) -> Vec<String> {
    let mut queries = vec![correction.to_string()];
    queries.extend(keywords.iter().cloned());
    queries
}
