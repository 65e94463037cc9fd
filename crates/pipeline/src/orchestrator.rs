//! Orchestrator (C7): the single integration point. Sequences the
//! validator, knowledge-search, and generator adapters (C6), feeds the
//! generator's stream into the parser (C4), which feeds voice text into the
//! TTS streamer (C3), all wired through one request's event bus (C5).
//!
//! One `Orchestrator::run` call serves exactly one request and owns nothing
//! across requests; every process-wide resource (caches, HTTP clients,
//! adapters) is handed in via [`Dependencies`].

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use answer_pipeline_core::event::{EventBus, StatusKind};
use answer_pipeline_core::knowledge::KmSearchResponse;
use answer_pipeline_core::request::RequestContext;
use answer_pipeline_core::tenant::LocalizationConfig;
use answer_pipeline_core::traits::{
    Generator, GeneratorMessage, GeneratorRequest, KnowledgeSearch, TtsSynthesizer, Validator,
    ValidatorRequest,
};
use answer_pipeline_core::{Error, Result};
use answer_pipeline_llm::render_template;

use crate::parser::{finalize_metadata, GeneratorParser, ParserEvent};
use crate::search::build_queries;
use crate::tenant_store::TenantConfigCache;
use crate::tts::{PhonemePatternCache, TtsStreamer};
use crate::url_text::UrlTextFetcher;

const DEFAULT_VALIDATOR_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_GENERATOR_MODEL: &str = "gpt-4o-mini";
const DEFAULT_KM_MAX_RESULTS: usize = 5;
const DEFAULT_WATCHDOG: Duration = Duration::from_secs(300);
const SESSION_ENDED_MESSAGE: &str = "session ended by generator";
const COMPLETE_MESSAGE: &str = "request complete";
const TRANSCRIPT_UNAVAILABLE: &str = "<transcript not available>";

static PROCESSING_MESSAGE_PICK: AtomicUsize = AtomicUsize::new(0);

/// The process-wide resources and adapters a request is served with.
/// Constructed once at server startup and shared (via clone of the `Arc`
/// fields) across every request.
pub struct Dependencies {
    pub tenant_configs: Arc<TenantConfigCache>,
    pub url_text: Arc<UrlTextFetcher>,
    pub phoneme_cache: Arc<PhonemePatternCache>,
    pub validator: Arc<dyn Validator>,
    pub search: Arc<dyn KnowledgeSearch>,
    pub generator: Arc<dyn Generator>,
    pub tts_synthesizer: Arc<dyn TtsSynthesizer>,
    pub km_max_results: usize,
    pub watchdog: Duration,
    pub bundled_wait_audio_path: Option<PathBuf>,
}

impl Dependencies {
    pub fn new(
        tenant_configs: Arc<TenantConfigCache>,
        url_text: Arc<UrlTextFetcher>,
        phoneme_cache: Arc<PhonemePatternCache>,
        validator: Arc<dyn Validator>,
        search: Arc<dyn KnowledgeSearch>,
        generator: Arc<dyn Generator>,
        tts_synthesizer: Arc<dyn TtsSynthesizer>,
    ) -> Self {
        Dependencies {
            tenant_configs,
            url_text,
            phoneme_cache,
            validator,
            search,
            generator,
            tts_synthesizer,
            km_max_results: DEFAULT_KM_MAX_RESULTS,
            watchdog: DEFAULT_WATCHDOG,
            bundled_wait_audio_path: None,
        }
    }
}

pub struct Orchestrator;

impl Orchestrator {
    /// Runs one request to completion (or to its error/watchdog path),
    /// driving `bus` the whole way. Never panics or propagates an error to
    /// the caller: every failure is translated into `error`/`complete`
    /// events on the bus, which is the only channel the HTTP handler reads.
    pub async fn run(request: RequestContext, bus: EventBus, deps: Arc<Dependencies>) {
        let watchdog = deps.watchdog;
        let outcome = tokio::time::timeout(watchdog, run_inner(&request, &bus, &deps)).await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::error!(
                    org_id = %request.org_id,
                    config_id = %request.config_id,
                    error = %err,
                    "orchestrator request failed"
                );
                bus.send_status(StatusKind::Error, Some(err.to_string())).await;
                bus.send_error(err.to_string()).await;
            }
            Err(_) => {
                let err = Error::Watchdog(watchdog);
                tracing::error!(org_id = %request.org_id, "orchestrator watchdog elapsed");
                bus.send_status(StatusKind::Error, Some(err.to_string())).await;
                bus.send_error(err.to_string()).await;
            }
        }

        // Per the error-path completion rule, both components are marked
        // complete regardless of how far the request got, so the consumer
        // is always released.
        bus.mark_component_complete("text_generation");
        bus.mark_component_complete("tts_processing");
        bus.send_complete(COMPLETE_MESSAGE).await;
    }
}

async fn run_inner(request: &RequestContext, bus: &EventBus, deps: &Dependencies) -> Result<()> {
    bus.send_status(StatusKind::Starting, None).await;

    let tenant = deps
        .tenant_configs
        .config_for(&request.org_id, &request.config_id)
        .await?;
    let localization = tenant.localization_for(&request.language)?.clone();
    let language = localization.language.clone();

    let audio_wav = decode_and_trim_audio(request, &tenant.audio)?;

    bus.register_component("text_generation");
    let streamer = match &localization.tts {
        Some(tts_config) => {
            bus.register_component("tts_processing");
            Some(Arc::new(TtsStreamer::new(
                tts_config,
                &language,
                deps.phoneme_cache.clone(),
                deps.tts_synthesizer.clone(),
                bus.clone(),
            )))
        }
        None => {
            tracing::warn!(org_id = %request.org_id, "tenant has no tts config, degrading to text-only");
            None
        }
    };

    let (correction, keywords) = run_validation(
        request,
        bus,
        deps,
        &tenant.processing_message(&language, PROCESSING_MESSAGE_PICK.fetch_add(1, Ordering::Relaxed)),
        &localization,
        streamer.as_deref(),
        audio_wav.as_deref(),
    )
    .await?;

    bus.send_status(StatusKind::SearchingKm, None).await;
    let assistant_key = tenant.assistant_key_for(&language)?;
    let knowledge_id = tenant.km_id.clone().unwrap_or(assistant_key);
    let queries = build_queries(&correction, &keywords);
    let km_results = deps
        .search
        .search(&knowledge_id, &queries, &language, deps.km_max_results)
        .await?;
    bus.send_km_result(km_results.clone()).await;

    if !request.generate_answer {
        bus.send_status(StatusKind::Complete, None).await;
        return Ok(());
    }

    bus.send_status(StatusKind::GeneratingAnswer, None).await;
    if let Some(path) = &deps.bundled_wait_audio_path {
        bus.play_audio(path).await;
    }

    let ended = run_generation(
        bus,
        deps,
        &localization,
        streamer.as_deref(),
        &correction,
        &km_results,
    )
    .await?;

    if ended {
        bus.send_status(StatusKind::SessionEnded, Some(SESSION_ENDED_MESSAGE.to_string())).await;
    }
    bus.send_status(StatusKind::Complete, None).await;
    Ok(())
}

fn decode_and_trim_audio(
    request: &RequestContext,
    audio_policy: &answer_pipeline_core::tenant::AudioConfig,
) -> Result<Option<Vec<u8>>> {
    use base64::Engine;

    let Some(b64) = &request.base64_audio else {
        return Ok(None);
    };
    let wav = base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map_err(|e| Error::Pipeline(format!("invalid base64 audio: {e}")))?;

    if !audio_policy.auto_trim_silent {
        return Ok(Some(wav));
    }

    match crate::audio::wav_to_pcm(&wav) {
        Some(pcm) => {
            let threshold = audio_policy.silence_threshold.unwrap_or(0.05);
            let trimmed = crate::audio::trim_silence_with_threshold(&pcm, threshold);
            Ok(Some(crate::audio::pcm_to_wav(&trimmed)))
        }
        None => {
            tracing::warn!("failed to decode audio for trimming, using untrimmed bytes");
            Ok(Some(wav))
        }
    }
}

/// Runs the validation branch: either the caller pre-supplied keywords (the
/// validator is skipped entirely) or the validator is called with
/// confidence-gated transcript text, after a "please wait" utterance is
/// queued onto the TTS streamer to fill dead air.
async fn run_validation(
    request: &RequestContext,
    bus: &EventBus,
    deps: &Dependencies,
    processing_message: &str,
    localization: &LocalizationConfig,
    streamer: Option<&TtsStreamer>,
    audio_wav: Option<&[u8]>,
) -> Result<(String, Vec<String>)> {
    if let Some(keywords) = &request.keywords {
        bus.send_validation_result(request.transcript.clone(), keywords.clone()).await;
        return Ok((request.transcript.clone(), keywords.clone()));
    }

    bus.send_status(StatusKind::Validating, None).await;
    if let Some(streamer) = streamer {
        streamer.append_text(&format!("{processing_message} <break/>")).await;
    }

    let transcript = match (
        localization.transcript_confidence_threshold,
        request.transcript_confidence,
    ) {
        (Some(threshold), Some(confidence)) if confidence < threshold => {
            TRANSCRIPT_UNAVAILABLE.to_string()
        }
        _ => request.transcript.clone(),
    };

    let system_prompt = resolve_text(
        &deps.url_text,
        localization.validator_system_prompt_template_url.as_deref(),
        localization.system_prompt.as_deref(),
    )
    .await?;
    let model = localization
        .validator_model
        .clone()
        .unwrap_or_else(|| DEFAULT_VALIDATOR_MODEL.to_string());

    let response = deps
        .validator
        .validate(ValidatorRequest {
            transcript: &transcript,
            system_prompt: &system_prompt,
            chat_history: &request.chat_history,
            audio_wav,
            model: &model,
        })
        .await?;

    bus.send_validation_result(response.correction.clone(), response.keywords.clone()).await;
    Ok((response.correction, response.keywords))
}

/// Resolves an optionally-templated text field: a URL is fetched (through
/// the URL-text cache) in preference to a literal value; absent both, the
/// empty string.
async fn resolve_text(
    url_text: &UrlTextFetcher,
    url: Option<&str>,
    literal: Option<&str>,
) -> Result<String> {
    if let Some(url) = url {
        return url_text.fetch(url).await;
    }
    Ok(literal.unwrap_or_default().to_string())
}

fn build_context(km_results: &KmSearchResponse) -> String {
    km_results
        .data
        .iter()
        .filter_map(|item| {
            item.document
                .content
                .as_deref()
                .or(item.document.title.as_deref())
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Streams the generator's response into the parser, routing each parser
/// event to its sink, and returns whether the generator emitted the
/// session-end sentinel.
async fn run_generation(
    bus: &EventBus,
    deps: &Dependencies,
    localization: &LocalizationConfig,
    streamer: Option<&TtsStreamer>,
    correction: &str,
    km_results: &KmSearchResponse,
) -> Result<bool> {
    let system_prompt_template = resolve_text(
        &deps.url_text,
        localization.generator_system_prompt_url.as_deref(),
        None,
    )
    .await?;
    let current_time = chrono::Utc::now().to_rfc3339();
    let system_prompt = render_template(
        &system_prompt_template,
        &[("context", &build_context(km_results)), ("current_time", &current_time)],
    );

    let user_prompt = match &localization.generator_affirmation_prompt_url {
        Some(url) => {
            let template = deps.url_text.fetch(url).await.unwrap_or_default();
            if template.trim().is_empty() {
                correction.to_string()
            } else {
                render_template(&template, &[("question", correction)])
            }
        }
        None => correction.to_string(),
    };

    let messages = vec![
        GeneratorMessage {
            role: "system",
            content: system_prompt,
        },
        GeneratorMessage {
            role: "user",
            content: user_prompt,
        },
    ];

    let model = localization
        .generator_model
        .clone()
        .unwrap_or_else(|| DEFAULT_GENERATOR_MODEL.to_string());

    let mut stream = deps
        .generator
        .generate_stream(GeneratorRequest {
            model,
            messages,
            temperature: 0.0,
        })
        .await?;

    let mut parser = GeneratorParser::new();
    let mut ended = false;

    while let Some(delta) = stream.next().await {
        let delta = delta?;
        if delta.done {
            break;
        }
        let events = parser.feed(&delta.text);
        if route_events(events, bus, streamer, parser.is_formatted()).await {
            ended = true;
            break;
        }
    }

    if !ended {
        let events = parser.finalize();
        if route_events(events, bus, streamer, parser.is_formatted()).await {
            ended = true;
        }
    }

    if let Some(streamer) = streamer {
        streamer.flush().await;
    }

    if let Some(raw) = parser.take_metadata_raw() {
        let metadata = finalize_metadata(&raw, km_results);
        bus.send_metadata(metadata.items).await;
    }

    Ok(ended)
}

/// Routes a batch of parser events to their sinks. Returns `true` as soon
/// as a `SessionEnded` event is seen; the caller stops feeding the
/// generator stream at that point since everything after the sentinel is
/// discarded anyway.
async fn route_events(
    events: Vec<ParserEvent>,
    bus: &EventBus,
    streamer: Option<&TtsStreamer>,
    formatted: bool,
) -> bool {
    for event in events {
        match event {
            ParserEvent::Thinking(content) => bus.send_thinking(content).await,
            ParserEvent::Voice(text) => {
                if let Some(streamer) = streamer {
                    streamer.append_text(&text).await;
                }
            }
            ParserEvent::Answer(content) => {
                bus.send_answer_chunk(content.clone()).await;
                if !formatted {
                    if let Some(streamer) = streamer {
                        streamer.append_text(&content).await;
                    }
                }
            }
            ParserEvent::SessionEnded => return true,
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    use answer_pipeline_core::knowledge::{KmDocument, KmSearchItem};
    use answer_pipeline_core::request::{ChatRole, ChatTurn};
    use answer_pipeline_core::tenant::{AudioConfig, LocalizationConfig, TenantConfig};
    use answer_pipeline_core::traits::ValidatorResponse;
    use futures::stream::{self, BoxStream};

    use crate::tenant_store::TenantConfigSource;

    struct FakeValidator {
        response: ValidatorResponse,
    }

    #[async_trait::async_trait]
    impl Validator for FakeValidator {
        async fn validate(&self, _request: ValidatorRequest<'_>) -> Result<ValidatorResponse> {
            Ok(self.response.clone())
        }
    }

    struct FakeSearch {
        response: KmSearchResponse,
    }

    #[async_trait::async_trait]
    impl KnowledgeSearch for FakeSearch {
        async fn search(
            &self,
            _knowledge_id: &str,
            _queries: &[String],
            _language: &str,
            _max_results: usize,
        ) -> Result<KmSearchResponse> {
            Ok(self.response.clone())
        }
    }

    struct FakeGenerator {
        chunks: Vec<&'static str>,
    }

    #[async_trait::async_trait]
    impl Generator for FakeGenerator {
        async fn generate_stream(
            &self,
            _request: GeneratorRequest,
        ) -> Result<BoxStream<'static, Result<GeneratorDelta>>> {
            let deltas: Vec<Result<GeneratorDelta>> = self
                .chunks
                .iter()
                .map(|text| {
                    Ok(GeneratorDelta {
                        text: text.to_string(),
                        done: false,
                    })
                })
                .collect();
            Ok(Box::pin(stream::iter(deltas)))
        }
    }

    struct NullTts;

    #[async_trait::async_trait]
    impl TtsSynthesizer for NullTts {
        async fn synthesize(
            &self,
            _ssml: &str,
            _phoneme_text: &str,
            _language: &str,
            _voice_name: &str,
        ) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
    }

    struct StaticTenantSource {
        configs: Vec<TenantConfig>,
    }

    #[async_trait::async_trait]
    impl TenantConfigSource for StaticTenantSource {
        async fn fetch(&self, _org_id: &str) -> Result<Vec<TenantConfig>> {
            Ok(self.configs.clone())
        }
    }

    fn tenant_config(tts: bool) -> TenantConfig {
        TenantConfig {
            config_id: "cfg-1".into(),
            km_id: Some("km-1".into()),
            display_name: None,
            default_primary_language: None,
            localization: vec![LocalizationConfig {
                language: "en-US".into(),
                assistant_key: Some("key-en".into()),
                generator_system_prompt_url: None,
                system_prompt: Some("answer helpfully about {context} at {current_time}".into()),
                generator_affirmation_prompt_url: None,
                tts: if tts {
                    Some(Default::default())
                } else {
                    None
                },
                ..Default::default()
            }],
            audio: AudioConfig::default(),
            processing_messages: Default::default(),
            max_km_results: None,
        }
    }

    fn request(keywords: Option<Vec<String>>, generate_answer: bool) -> RequestContext {
        RequestContext {
            org_id: "org-1".into(),
            config_id: "cfg-1".into(),
            language: "en-US".into(),
            transcript: "what are your hours".into(),
            base64_audio: None,
            keywords,
            transcript_confidence: None,
            chat_history: vec![ChatTurn {
                role: ChatRole::User,
                content: "hi".into(),
            }],
            generate_answer,
        }
    }

    fn km_response() -> KmSearchResponse {
        KmSearchResponse {
            total: 1,
            source: Some("fake".into()),
            answers: vec![],
            data: vec![KmSearchItem {
                score: Some(0.9),
                reranker_score: Some(0.9),
                document: KmDocument {
                    public_id: "doc-1".into(),
                    content: Some("we are open 9 to 5".into()),
                    title: Some("hours".into()),
                    sample_questions: vec![],
                    metadata: None,
                },
            }],
        }
    }

    fn deps(generator_chunks: Vec<&'static str>, tts: bool) -> Arc<Dependencies> {
        let tenant_source = Arc::new(StaticTenantSource {
            configs: vec![tenant_config(tts)],
        });
        Arc::new(Dependencies::new(
            Arc::new(TenantConfigCache::new(
                tenant_source,
                Duration::from_secs(900),
                Duration::from_secs(180),
            )),
            Arc::new(UrlTextFetcher::new(
                reqwest::Client::new(),
                Duration::from_secs(900),
                Duration::from_secs(180),
            )),
            Arc::new(PhonemePatternCache::new(reqwest::Client::new())),
            Arc::new(FakeValidator {
                response: ValidatorResponse {
                    correction: "what are your hours".into(),
                    keywords: vec!["hours".into()],
                },
            }),
            Arc::new(FakeSearch {
                response: km_response(),
            }),
            Arc::new(FakeGenerator {
                chunks: generator_chunks,
            }),
            Arc::new(NullTts),
        ))
    }

    async fn drain(bus: EventBus) -> Vec<answer_pipeline_core::event::EventKind> {
        let mut stream = bus.stream();
        drop(bus);
        let mut kinds = Vec::new();
        while let Some(event) = stream.next().await {
            kinds.push(event.kind);
        }
        kinds
    }

    #[tokio::test]
    async fn happy_path_emits_answer_and_completes() {
        let bus = EventBus::new(64);
        let deps = deps(vec!["we are open 9 to 5"], false);
        Orchestrator::run(request(None, true), bus.clone(), deps).await;
        let events = drain(bus).await;

        use answer_pipeline_core::event::EventKind;
        assert!(events
            .iter()
            .any(|e| matches!(e, EventKind::AnswerChunk { data } if data.content.contains("open"))));
        assert!(events.iter().any(|e| matches!(e, EventKind::Complete { .. })));
        assert!(!events.iter().any(|e| matches!(e, EventKind::Error { .. })));
    }

    #[tokio::test]
    async fn precomputed_keywords_skip_validator() {
        let bus = EventBus::new(64);
        let deps = deps(vec!["we are open 9 to 5"], false);
        let req = request(Some(vec!["hours".into()]), true);
        Orchestrator::run(req, bus.clone(), deps).await;
        let events = drain(bus).await;

        use answer_pipeline_core::event::EventKind;
        let validation = events.iter().find_map(|e| match e {
            EventKind::ValidationResult { data } => Some(data),
            _ => None,
        });
        assert_eq!(
            validation.unwrap().correction,
            "what are your hours"
        );
    }

    #[tokio::test]
    async fn generate_answer_false_skips_generation() {
        let bus = EventBus::new(64);
        let deps = deps(vec!["should not be used"], false);
        Orchestrator::run(request(None, false), bus.clone(), deps).await;
        let events = drain(bus).await;

        use answer_pipeline_core::event::EventKind;
        assert!(!events.iter().any(|e| matches!(e, EventKind::AnswerChunk { .. })));
        assert!(events.iter().any(|e| matches!(e, EventKind::Complete { .. })));
    }

    #[tokio::test]
    async fn session_ended_sentinel_emits_session_ended_status() {
        let bus = EventBus::new(64);
        let deps = deps(vec!["final words", "{#NXENDX#}"], false);
        Orchestrator::run(request(None, true), bus.clone(), deps).await;
        let events = drain(bus).await;

        use answer_pipeline_core::event::{EventKind, StatusKind};
        assert!(events.iter().any(|e| matches!(
            e,
            EventKind::Status {
                status: StatusKind::SessionEnded,
                ..
            }
        )));
    }
}
