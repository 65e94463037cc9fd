//! Core types, traits, and the event bus for the answer pipeline.
//!
//! This crate provides the foundations shared by every other crate:
//! - [`request`]: the immutable per-call `RequestContext`.
//! - [`tenant`]: the tenant-configuration record and its lookup rules.
//! - [`knowledge`]: knowledge-search response types and merge logic.
//! - [`event`]: the Streaming Event Bus and its SSE-facing event types.
//! - [`traits`]: adapter contracts (validator, knowledge search, generator,
//!   TTS) implemented by the `llm` and `pipeline` crates.
//! - [`language`]: BCP-47 normalization and language-family matching.
//! - [`error`]: the crate-wide error type.

pub mod error;
pub mod event;
pub mod knowledge;
pub mod language;
pub mod request;
pub mod tenant;
pub mod traits;

pub use error::{Error, Result};
pub use event::{Event, EventBus, EventKind, MetadataItem, MetadataPayload, StatusKind};
pub use knowledge::{KmDocument, KmSearchItem, KmSearchResponse};
pub use request::{ChatRole, ChatTurn, RequestContext};
pub use tenant::{AudioConfig, LocalizationConfig, TenantConfig, TtsConfig, TtsModel};
pub use traits::{
    Generator, GeneratorDelta, GeneratorMessage, GeneratorRequest, KnowledgeSearch, TtsSynthesizer,
    Validator, ValidatorRequest, ValidatorResponse,
};
