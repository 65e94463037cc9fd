//! Application state: the process-wide settings and adapter instances every
//! request is served from. Built once at startup in `main.rs` and shared
//! behind `axum::extract::State` as a cheap `Clone` (every field is an
//! `Arc`).

use std::path::PathBuf;
use std::sync::Arc;

use answer_pipeline_config::constants::timeouts;
use answer_pipeline_config::Settings;
use answer_pipeline_llm::{GeminiValidator, GeneratorConfig, HttpGenerator, ValidatorConfig};
use answer_pipeline_pipeline::search::{HttpKnowledgeSearch, SearchConfig};
use answer_pipeline_pipeline::tenant_store::{
    HttpTenantConfigSource, TenantConfigCache, TenantSourceConfig,
};
use answer_pipeline_pipeline::tts::{
    CloudTtsConfig, CloudTtsSynthesizer, HttpBlobStore, PhonemePatternCache,
};
use answer_pipeline_pipeline::url_text::UrlTextFetcher;
use answer_pipeline_pipeline::Dependencies;

/// Shared application state handed to every axum handler.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub dependencies: Arc<Dependencies>,
}

impl AppState {
    /// Builds every adapter and cache from `settings`, reading upstream API
    /// keys from the environment since they never belong in a settings file
    /// that might be checked in or logged.
    pub fn new(settings: Settings) -> Self {
        let settings = Arc::new(settings);
        let upstreams = &settings.upstreams;

        let tenant_source = HttpTenantConfigSource::new(TenantSourceConfig {
            base_url: upstreams.tenant_config_base_url.clone(),
            api_key: env_opt("TENANT_CONFIG_API_KEY"),
            timeout: timeouts::UPSTREAM_REQUEST,
        });
        let cache_ttl = settings.cache.ttl();
        let cache_early_refresh = settings.cache.early_refresh();
        let tenant_configs = Arc::new(TenantConfigCache::new(
            Arc::new(tenant_source),
            cache_ttl,
            cache_early_refresh,
        ));

        let url_text = Arc::new(UrlTextFetcher::new(
            reqwest::Client::new(),
            cache_ttl,
            cache_early_refresh,
        ));
        let phoneme_cache = Arc::new(PhonemePatternCache::new(reqwest::Client::new()));

        let validator = Arc::new(GeminiValidator::new(ValidatorConfig {
            base_url: upstreams.validator_base_url.clone(),
            api_key: env_var("VALIDATOR_API_KEY"),
            timeout: timeouts::UPSTREAM_REQUEST,
        }));

        let search = Arc::new(HttpKnowledgeSearch::new(SearchConfig {
            base_url: upstreams.search_base_url.clone(),
            api_key: env_var("KNOWLEDGE_SEARCH_API_KEY"),
            timeout: timeouts::UPSTREAM_REQUEST,
        }));

        let generator = Arc::new(HttpGenerator::new(GeneratorConfig {
            base_url: upstreams.generator_base_url.clone(),
            api_key: env_var("GENERATOR_API_KEY"),
            groq_base_url: upstreams.groq_base_url.clone(),
            groq_api_key: env_var("GROQ_API_KEY"),
            timeout: timeouts::UPSTREAM_REQUEST,
        }));

        let blob_store = Arc::new(HttpBlobStore::new(
            reqwest::Client::new(),
            env_var("TTS_BLOB_STORE_BASE_URL"),
        ));
        let tts_synthesizer = Arc::new(CloudTtsSynthesizer::new(
            CloudTtsConfig {
                base_url: upstreams.tts_base_url.clone(),
                subscription_key: env_var("CLOUD_TTS_SUBSCRIPTION_KEY"),
                region: upstreams.tts_region.clone(),
                timeout: timeouts::BLOB_STORE_READ,
            },
            blob_store,
        ));

        let mut dependencies = Dependencies::new(
            tenant_configs,
            url_text,
            phoneme_cache,
            validator,
            search,
            generator,
            tts_synthesizer,
        );
        dependencies.km_max_results = settings.orchestrator.km_max_results;
        dependencies.watchdog = settings.orchestrator.watchdog();
        dependencies.bundled_wait_audio_path =
            env_opt("BUNDLED_WAIT_AUDIO_PATH").map(PathBuf::from);

        AppState {
            settings,
            dependencies: Arc::new(dependencies),
        }
    }
}

fn env_var(name: &str) -> String {
    std::env::var(name).unwrap_or_default()
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_from_default_settings() {
        let state = AppState::new(Settings::default());
        assert_eq!(state.dependencies.km_max_results, 5);
    }
}
