//! Process-wide configuration for the answer pipeline.
//!
//! Loads from YAML/TOML files and `ANSWER_PIPELINE__`-prefixed environment
//! variables, layered default-file → environment-file → environment. Only
//! process-wide knobs live here (server bind address, cache TTLs, watchdog,
//! upstream base URLs, orchestrator channel capacity); tenant-specific
//! fields (prompts, voices, keys) are fetched per request and live in
//! `answer_pipeline_core::tenant`.

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, CacheConfig, ObservabilityConfig, OrchestratorConfig, RuntimeEnvironment,
    ServerConfig, Settings, UpstreamConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("environment error: {0}")]
    Environment(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
