//! URL-text cache (C8): in-memory cache for prompt/lexicon/phoneme-
//! dictionary URLs. Only URLs that look like templated text assets (see
//! `cache::is_cache_worthy_url`) go through the cache; one-off asset URLs
//! bypass it and are fetched fresh on every call.

use std::sync::Arc;
use std::time::Duration;

use answer_pipeline_core::Result;

use crate::cache::{is_cache_worthy_url, TtlCache};

pub struct UrlTextFetcher {
    client: reqwest::Client,
    cache: Arc<TtlCache<String, Arc<String>>>,
}

impl UrlTextFetcher {
    /// Builds the fetcher with an explicit TTL policy, e.g. from
    /// `config::CacheConfig`.
    pub fn new(client: reqwest::Client, ttl: Duration, early_refresh: Duration) -> Self {
        UrlTextFetcher {
            client,
            cache: TtlCache::with_policy(ttl, early_refresh),
        }
    }

    /// Fetches and decodes `url` as UTF-8 text, transparently memoized when
    /// the URL is cache-worthy.
    pub async fn fetch(&self, url: &str) -> Result<String> {
        if !is_cache_worthy_url(url) {
            return Ok(self.client.get(url).send().await?.text().await?);
        }

        let client = self.client.clone();
        let u = url.to_string();
        let text = self
            .cache
            .get_or_load(url.to_string(), move || {
                let client = client.clone();
                let u = u.clone();
                async move {
                    let body = client.get(&u).send().await?.text().await?;
                    Ok::<Arc<String>, answer_pipeline_core::Error>(Arc::new(body))
                }
            })
            .await?;
        Ok((*text).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn cache_worthy_url_is_fetched_once() {
        let server = MockServer::start().await;
        let hits = Arc::new(AtomicUsize::new(0));
        Mock::given(method("GET"))
            .and(path("/system-prompt.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("you are a helpful assistant"))
            .expect(1)
            .mount(&server)
            .await;
        let _ = &hits;

        let fetcher = UrlTextFetcher::new(reqwest::Client::new(), Duration::from_secs(900), Duration::from_secs(180));
        let url = format!("{}/system-prompt.txt", server.uri());
        let first = fetcher.fetch(&url).await.unwrap();
        let second = fetcher.fetch(&url).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn non_cache_worthy_url_is_fetched_every_time() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/logo.png"))
            .respond_with(ResponseTemplate::new(200).set_body_string("binary-ish"))
            .expect(2)
            .mount(&server)
            .await;

        let fetcher = UrlTextFetcher::new(reqwest::Client::new(), Duration::from_secs(900), Duration::from_secs(180));
        let url = format!("{}/logo.png", server.uri());
        fetcher.fetch(&url).await.unwrap();
        fetcher.fetch(&url).await.unwrap();
    }
}
