//! Shared error type for the answer pipeline.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("tenant config error: {0}")]
    TenantConfig(String),

    #[error("no localization matches language {language} or default language for config {config_id}")]
    LocalizationNotFound { config_id: String, language: String },

    #[error("validator error: {0}")]
    Validator(String),

    #[error("knowledge search error: {0}")]
    KnowledgeSearch(String),

    #[error("generator error: {0}")]
    Generator(String),

    #[error("tts error: {0}")]
    Tts(String),

    #[error("llm error: {0}")]
    Llm(String),

    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("request watchdog timed out after {0:?}")]
    Watchdog(std::time::Duration),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
