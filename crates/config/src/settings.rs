//! Process-wide settings: the knobs that are NOT part of a tenant's
//! configuration record (§3 of the tenant config lives in
//! `answer_pipeline_core::tenant` and is fetched per request instead).

use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::constants::{endpoints, timeouts};
use crate::ConfigError;

/// Runtime environment, mirrored from the reference server's settings
/// pattern: relaxes or tightens validation strictness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Top-level process settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub upstreams: UpstreamConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_orchestrator()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "port cannot be 0".to_string(),
            });
        }
        if self.server.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.request_timeout_secs".to_string(),
                message: "timeout must be at least 1 second".to_string(),
            });
        }
        if self.environment.is_production()
            && self.server.cors_enabled
            && self.server.cors_origins.is_empty()
        {
            tracing::warn!(
                "CORS is enabled in production but no origins are configured; \
                 this may block legitimate requests"
            );
        }
        Ok(())
    }

    fn validate_orchestrator(&self) -> Result<(), ConfigError> {
        if self.orchestrator.channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "orchestrator.channel_capacity".to_string(),
                message: "event bus channel capacity must be at least 1".to_string(),
            });
        }
        if self.orchestrator.km_max_results == 0 {
            return Err(ConfigError::InvalidValue {
                field: "orchestrator.km_max_results".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// HTTP server bind address and request handling limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout_secs() -> u64 {
    timeouts::UPSTREAM_REQUEST.as_secs()
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout_secs(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
        }
    }
}

/// Lifetimes for the URL-text and tenant-config caches (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_cache_early_refresh_secs")]
    pub early_refresh_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
    timeouts::CACHE_TTL.as_secs()
}
fn default_cache_early_refresh_secs() -> u64 {
    timeouts::CACHE_EARLY_REFRESH.as_secs()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            early_refresh_secs: default_cache_early_refresh_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn early_refresh(&self) -> Duration {
        Duration::from_secs(self.early_refresh_secs)
    }
}

/// Base URLs for the external collaborators the orchestrator calls out to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_validator_base_url")]
    pub validator_base_url: String,

    #[serde(default = "default_search_base_url")]
    pub search_base_url: String,

    #[serde(default = "default_generator_base_url")]
    pub generator_base_url: String,

    #[serde(default = "default_groq_base_url")]
    pub groq_base_url: String,

    #[serde(default = "default_tts_base_url")]
    pub tts_base_url: String,

    #[serde(default = "default_tts_region")]
    pub tts_region: String,

    #[serde(default = "default_tenant_config_base_url")]
    pub tenant_config_base_url: String,
}

fn default_validator_base_url() -> String {
    std::env::var("VALIDATOR_BASE_URL").unwrap_or_else(|_| endpoints::VALIDATOR_DEFAULT.to_string())
}
fn default_search_base_url() -> String {
    std::env::var("KNOWLEDGE_SEARCH_BASE_URL")
        .unwrap_or_else(|_| endpoints::KNOWLEDGE_SEARCH_DEFAULT.to_string())
}
fn default_generator_base_url() -> String {
    std::env::var("GENERATOR_BASE_URL").unwrap_or_else(|_| endpoints::GENERATOR_DEFAULT.to_string())
}
fn default_groq_base_url() -> String {
    std::env::var("GROQ_BASE_URL").unwrap_or_else(|_| endpoints::GROQ_DEFAULT.to_string())
}
fn default_tts_base_url() -> String {
    std::env::var("CLOUD_TTS_BASE_URL").unwrap_or_else(|_| endpoints::CLOUD_TTS_DEFAULT.to_string())
}
fn default_tts_region() -> String {
    std::env::var("CLOUD_TTS_REGION").unwrap_or_else(|_| "southeastasia".to_string())
}
fn default_tenant_config_base_url() -> String {
    std::env::var("TENANT_CONFIG_BASE_URL")
        .unwrap_or_else(|_| endpoints::TENANT_CONFIG_STORE_DEFAULT.to_string())
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            validator_base_url: default_validator_base_url(),
            search_base_url: default_search_base_url(),
            generator_base_url: default_generator_base_url(),
            groq_base_url: default_groq_base_url(),
            tts_base_url: default_tts_base_url(),
            tts_region: default_tts_region(),
            tenant_config_base_url: default_tenant_config_base_url(),
        }
    }
}

/// Orchestrator-level knobs that apply across every tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_watchdog_secs")]
    pub watchdog_secs: u64,

    /// Event Bus channel capacity; the orchestrator's single producer and
    /// the SSE handler's single consumer share this bound.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Fallback when a tenant config doesn't declare `max_km_results`.
    #[serde(default = "default_km_max_results")]
    pub km_max_results: usize,
}

fn default_watchdog_secs() -> u64 {
    timeouts::ORCHESTRATOR_WATCHDOG.as_secs()
}
fn default_channel_capacity() -> usize {
    256
}
fn default_km_max_results() -> usize {
    5
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            watchdog_secs: default_watchdog_secs(),
            channel_capacity: default_channel_capacity(),
            km_max_results: default_km_max_results(),
        }
    }
}

impl OrchestratorConfig {
    pub fn watchdog(&self) -> Duration {
        Duration::from_secs(self.watchdog_secs)
    }
}

/// Logging/tracing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

/// Loads settings from files and environment.
///
/// Priority (highest to lowest):
/// 1. Environment variables (`ANSWER_PIPELINE__` prefix, `__` separator)
/// 2. `config/{env}.yaml`, if `env` is given
/// 3. `config/default.yaml`
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();
    builder = builder.add_source(File::with_name("config/default").required(false));
    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }
    builder = builder.add_source(
        Environment::with_prefix("ANSWER_PIPELINE")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8080);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn zero_port_is_rejected() {
        let mut settings = Settings::default();
        settings.server.port = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_channel_capacity_is_rejected() {
        let mut settings = Settings::default();
        settings.orchestrator.channel_capacity = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn cache_ttl_and_early_refresh_convert_to_durations() {
        let cache = CacheConfig::default();
        assert_eq!(cache.ttl(), timeouts::CACHE_TTL);
        assert_eq!(cache.early_refresh(), timeouts::CACHE_EARLY_REFRESH);
    }
}
