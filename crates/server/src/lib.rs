//! HTTP/SSE server for the answer pipeline.
//!
//! Thin axum layer: decodes `RequestContext`, spins up a fresh `EventBus`
//! per request, hands both to `Orchestrator::run`, and streams the bus back
//! as server-sent events. Everything else lives downstream in `pipeline`,
//! `llm`, and `core`.

pub mod http;
pub mod state;

pub use http::create_router;
pub use state::AppState;

use thiserror::Error;

/// Server-layer errors: request decoding and the `/audio/trim` endpoint's
/// own failure modes. Orchestrator failures never reach here — they are
/// translated into `error` events on the bus instead.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}
