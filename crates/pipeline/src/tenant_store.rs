//! Tenant-config fetch + process-wide cache (the tenant-config cache of
//! C8). A tenant's full config array is fetched from the external KV store
//! and cached as a whole, keyed by `org_id`; `config_id` lookup happens
//! within the cached array so a tenant with many configs pays the KV round
//! trip once per `org_id`, not once per config.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use answer_pipeline_core::tenant::TenantConfig;
use answer_pipeline_core::{Error, Result};

use crate::cache::TtlCache;

/// External collaborator contract: given an org id, return every config
/// record declared for it. The concrete KV-store schema is out of scope;
/// only this fetch contract is.
#[async_trait]
pub trait TenantConfigSource: Send + Sync {
    async fn fetch(&self, org_id: &str) -> Result<Vec<TenantConfig>>;
}

#[derive(Debug, Clone)]
pub struct TenantSourceConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

pub struct HttpTenantConfigSource {
    client: reqwest::Client,
    config: TenantSourceConfig,
}

impl HttpTenantConfigSource {
    pub fn new(config: TenantSourceConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("failed to build tenant-config http client");
        HttpTenantConfigSource { client, config }
    }
}

#[async_trait]
impl TenantConfigSource for HttpTenantConfigSource {
    async fn fetch(&self, org_id: &str) -> Result<Vec<TenantConfig>> {
        let url = format!("{}/tenants/{}/configs", self.config.base_url, org_id);
        let mut req = self.client.get(&url);
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }
        let response = req.send().await?;
        if !response.status().is_success() {
            return Err(Error::TenantConfig(format!(
                "tenant config http status {} for org {org_id}",
                response.status()
            )));
        }
        Ok(response.json::<Vec<TenantConfig>>().await?)
    }
}

pub struct TenantConfigCache {
    source: Arc<dyn TenantConfigSource>,
    cache: Arc<TtlCache<String, Arc<Vec<TenantConfig>>>>,
}

impl TenantConfigCache {
    /// Builds the cache with an explicit TTL policy, e.g. from
    /// `config::CacheConfig`.
    pub fn new(source: Arc<dyn TenantConfigSource>, ttl: Duration, early_refresh: Duration) -> Self {
        TenantConfigCache {
            source,
            cache: TtlCache::with_policy(ttl, early_refresh),
        }
    }

    pub async fn config_for(&self, org_id: &str, config_id: &str) -> Result<TenantConfig> {
        let source = self.source.clone();
        let key = org_id.to_string();
        let configs = self
            .cache
            .get_or_load(key, {
                let org_id = org_id.to_string();
                move || {
                    let source = source.clone();
                    let org_id = org_id.clone();
                    async move { source.fetch(&org_id).await.map(Arc::new) }
                }
            })
            .await?;

        configs
            .iter()
            .find(|c| c.config_id == config_id)
            .cloned()
            .ok_or_else(|| {
                Error::TenantConfig(format!("config {config_id} not found for org {org_id}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: Arc<AtomicUsize>,
        configs: Vec<TenantConfig>,
    }

    #[async_trait]
    impl TenantConfigSource for CountingSource {
        async fn fetch(&self, _org_id: &str) -> Result<Vec<TenantConfig>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.configs.clone())
        }
    }

    fn sample_config() -> TenantConfig {
        TenantConfig {
            config_id: "cfg-1".into(),
            km_id: Some("km-1".into()),
            display_name: None,
            default_primary_language: Some("en-US".into()),
            localization: Vec::new(),
            audio: Default::default(),
            processing_messages: Default::default(),
            max_km_results: None,
        }
    }

    #[tokio::test]
    async fn config_for_caches_after_first_fetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = Arc::new(CountingSource {
            calls: calls.clone(),
            configs: vec![sample_config()],
        });
        let cache = TenantConfigCache::new(source, Duration::from_secs(900), Duration::from_secs(180));

        let first = cache.config_for("org-1", "cfg-1").await.unwrap();
        let second = cache.config_for("org-1", "cfg-1").await.unwrap();
        assert_eq!(first.config_id, "cfg-1");
        assert_eq!(second.config_id, "cfg-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn config_for_errors_when_config_id_missing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = Arc::new(CountingSource {
            calls,
            configs: vec![sample_config()],
        });
        let cache = TenantConfigCache::new(source, Duration::from_secs(900), Duration::from_secs(180));
        assert!(cache.config_for("org-1", "nonexistent").await.is_err());
    }
}
