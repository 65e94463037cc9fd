//! Centralized constants for process-wide, non-tenant configuration.
//!
//! Tenant-specific values (prompts, voices, keys) never belong here; they
//! live in `answer_pipeline_core::tenant` and are fetched per request.

/// Default upstream service endpoints, overridable via settings or env.
pub mod endpoints {
    pub const VALIDATOR_DEFAULT: &str = "https://generativelanguage.googleapis.com";
    pub const KNOWLEDGE_SEARCH_DEFAULT: &str = "http://localhost:8081";
    pub const GENERATOR_DEFAULT: &str = "https://api.openai.com/v1";
    pub const GROQ_DEFAULT: &str = "https://api.groq.com/openai/v1";
    pub const CLOUD_TTS_DEFAULT: &str = "https://southeastasia.tts.speech.microsoft.com";
    pub const TENANT_CONFIG_STORE_DEFAULT: &str = "http://localhost:8082";
}

/// Cache lifetimes and request/watchdog timeouts.
pub mod timeouts {
    use std::time::Duration;

    /// TTL for the URL-text and tenant-config caches.
    pub const CACHE_TTL: Duration = Duration::from_secs(15 * 60);

    /// How long before `CACHE_TTL` expiry a background refresh is kicked off.
    pub const CACHE_EARLY_REFRESH: Duration = Duration::from_secs(3 * 60);

    /// Orchestrator watchdog: a request running longer than this is aborted.
    pub const ORCHESTRATOR_WATCHDOG: Duration = Duration::from_secs(300);

    /// HTTP client timeout applied to validator/search/generator/TTS calls.
    pub const UPSTREAM_REQUEST: Duration = Duration::from_secs(30);

    /// Blob-store read timeout; writes are fire-and-forget.
    pub const BLOB_STORE_READ: Duration = Duration::from_secs(3);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_early_refresh_is_shorter_than_ttl() {
        assert!(timeouts::CACHE_EARLY_REFRESH < timeouts::CACHE_TTL);
    }

    #[test]
    fn endpoints_are_non_empty() {
        assert!(!endpoints::VALIDATOR_DEFAULT.is_empty());
        assert!(!endpoints::GENERATOR_DEFAULT.is_empty());
    }
}
