//! Adapter contracts for the external collaborators the orchestrator calls
//! out to: the validator LLM, the knowledge-search service, the answer
//! generator, and the cloud TTS synthesizer. Concrete implementations live
//! in the `llm` and `pipeline` crates; the orchestrator depends only on
//! these traits so it can be driven in tests against stub adapters.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::knowledge::KmSearchResponse;
use crate::request::ChatTurn;

/// Input to one validator call.
pub struct ValidatorRequest<'a> {
    pub transcript: &'a str,
    pub system_prompt: &'a str,
    pub chat_history: &'a [ChatTurn],
    pub audio_wav: Option<&'a [u8]>,
    pub model: &'a str,
}

/// The validator's structured response.
#[derive(Debug, Clone)]
pub struct ValidatorResponse {
    pub correction: String,
    pub keywords: Vec<String>,
}

/// A single RPC to an external LLM that corrects a transcript and extracts
/// search keywords, given chat context and an optional audio blob.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, request: ValidatorRequest<'_>) -> Result<ValidatorResponse>;
}

/// Fan-out search over one or more queries, merged into a single response.
#[async_trait]
pub trait KnowledgeSearch: Send + Sync {
    async fn search(
        &self,
        knowledge_id: &str,
        queries: &[String],
        language: &str,
        max_results: usize,
    ) -> Result<KmSearchResponse>;
}

/// One incremental delta from a streaming generator call.
#[derive(Debug, Clone)]
pub struct GeneratorDelta {
    pub text: String,
    pub done: bool,
}

/// A chat message sent to the generator.
#[derive(Debug, Clone)]
pub struct GeneratorMessage {
    pub role: &'static str,
    pub content: String,
}

/// Input to one streaming generator call.
pub struct GeneratorRequest {
    pub model: String,
    pub messages: Vec<GeneratorMessage>,
    pub temperature: f32,
}

/// Streams incremental text deltas from an LLM. Implementations select a
/// concrete provider (direct/OpenAI-compatible vs. Groq) based on the
/// model-name prefix; the orchestrator is provider-agnostic.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate_stream(
        &self,
        request: GeneratorRequest,
    ) -> Result<BoxStream<'static, Result<GeneratorDelta>>>;
}

/// Synthesizes one phrase of text into audio, given an already-built SSML
/// document and the voice/language to charge against the cache key.
#[async_trait]
pub trait TtsSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        ssml: &str,
        phoneme_text: &str,
        language: &str,
        voice_name: &str,
    ) -> Result<Option<Vec<u8>>>;
}
