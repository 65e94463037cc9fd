//! TTS Streamer (C3): buffers parser-supplied voice text by the literal
//! `<break/>` marker and dispatches one synthesis call per completed
//! phrase, in order, pushing the resulting audio straight onto the event
//! bus. Constructed fresh for every request.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use answer_pipeline_core::event::EventBus;
use answer_pipeline_core::language;
use answer_pipeline_core::tenant::{TtsConfig, TtsModel};
use answer_pipeline_core::traits::TtsSynthesizer;

use crate::tts::phoneme::PhonemePatternCache;
use crate::tts::ssml::SsmlFormatter;

const BREAK_MARKER: &str = "<break/>";
const THAI_FALLBACK_VOICE: &str = "th-TH-PremwadeeNeural";
const MULTILINGUAL_FALLBACK_VOICE: &str = "es-ES-XimenaMultilingualNeural";

/// Looks up the tenant's declared voice for `language` by exact match;
/// absent that, Thai-family requests fall back to a dedicated Thai voice
/// and everything else falls back to the generic multilingual default.
pub fn resolve_voice(models: &[TtsModel], language: &str) -> TtsModel {
    if let Some(m) = models.iter().find(|m| m.language.eq_ignore_ascii_case(language)) {
        return m.clone();
    }
    if language::family(language) == "th" {
        return fallback_voice(language, THAI_FALLBACK_VOICE);
    }
    fallback_voice(language, MULTILINGUAL_FALLBACK_VOICE)
}

fn fallback_voice(language: &str, name: &str) -> TtsModel {
    TtsModel {
        language: language.to_string(),
        name: name.to_string(),
        pitch: "medium".to_string(),
        rate: "1.0".to_string(),
        phoneme_url: None,
    }
}

pub struct TtsStreamer {
    language: String,
    voice: TtsModel,
    lexicon_url: Option<String>,
    phoneme_urls: Vec<String>,
    formatter: SsmlFormatter,
    phoneme_cache: Arc<PhonemePatternCache>,
    synthesizer: Arc<dyn TtsSynthesizer>,
    bus: EventBus,
    buffer: Mutex<String>,
    chunk_order: AtomicUsize,
}

impl TtsStreamer {
    pub fn new(
        tts_config: &TtsConfig,
        language: &str,
        phoneme_cache: Arc<PhonemePatternCache>,
        synthesizer: Arc<dyn TtsSynthesizer>,
        bus: EventBus,
    ) -> Self {
        let voice = resolve_voice(&tts_config.models, language);
        let phoneme_urls = [tts_config.phoneme_url.clone(), voice.phoneme_url.clone()]
            .into_iter()
            .flatten()
            .collect();

        TtsStreamer {
            language: language.to_string(),
            voice,
            lexicon_url: tts_config.lexicon_url.clone(),
            phoneme_urls,
            formatter: SsmlFormatter::default(),
            phoneme_cache,
            synthesizer,
            bus,
            buffer: Mutex::new(String::new()),
            chunk_order: AtomicUsize::new(0),
        }
    }

    /// Appends generator voice-text to the buffer and synthesizes every
    /// phrase completed by a `<break/>` marker it produces.
    pub async fn append_text(&self, text: &str) {
        let phrases = {
            let mut buf = self.buffer.lock();
            buf.push_str(text);
            let mut phrases = Vec::new();
            while let Some(idx) = buf.find(BREAK_MARKER) {
                phrases.push(buf[..idx].to_string());
                buf.drain(..idx + BREAK_MARKER.len());
            }
            phrases
        };
        for phrase in phrases {
            self.synthesize_and_emit(phrase).await;
        }
    }

    /// Forces synthesis of whatever trailing text never reached a `<break/>`
    /// marker. Called once, at the end of the parsed stream.
    pub async fn flush(&self) {
        let remaining = {
            let mut buf = self.buffer.lock();
            std::mem::take(&mut *buf)
        };
        if !remaining.trim().is_empty() {
            self.synthesize_and_emit(remaining).await;
        }
    }

    async fn synthesize_and_emit(&self, phrase: String) {
        let trimmed = phrase.trim();
        if trimmed.is_empty() {
            return;
        }
        let order = self.chunk_order.fetch_add(1, Ordering::SeqCst);
        let patterns = self
            .phoneme_cache
            .patterns_for(&self.phoneme_urls, &self.language)
            .await;
        let ssml_out = self
            .formatter
            .format(trimmed, &self.voice, self.lexicon_url.as_deref(), &patterns);

        match self
            .synthesizer
            .synthesize(
                &ssml_out.ssml,
                &ssml_out.phoneme_text,
                &self.language,
                &self.voice.name,
            )
            .await
        {
            Ok(Some(audio)) => {
                self.bus
                    .send_tts_audio(trimmed.to_string(), self.language.clone(), &audio)
                    .await;
            }
            Ok(None) => {
                tracing::debug!(order, "tts synthesis produced no audio for phrase");
            }
            Err(err) => {
                tracing::warn!(order, error = %err, "tts synthesis failed, degrading to text-only");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn models() -> Vec<TtsModel> {
        vec![
            TtsModel {
                language: "en-US".into(),
                name: "en-US-JennyNeural".into(),
                pitch: "medium".into(),
                rate: "1.0".into(),
                phoneme_url: None,
            },
            TtsModel {
                language: "id-ID".into(),
                name: "id-ID-GadisNeural".into(),
                pitch: "medium".into(),
                rate: "1.0".into(),
                phoneme_url: None,
            },
        ]
    }

    #[test]
    fn resolve_voice_matches_exact_language() {
        let voice = resolve_voice(&models(), "en-US");
        assert_eq!(voice.name, "en-US-JennyNeural");
    }

    #[test]
    fn resolve_voice_does_not_rescan_by_family() {
        // en-GB isn't an exact match for the tenant's en-US voice, so it
        // falls all the way through to the multilingual default rather than
        // being rescanned by language family.
        let voice = resolve_voice(&models(), "en-GB");
        assert_eq!(voice.name, MULTILINGUAL_FALLBACK_VOICE);
    }

    #[test]
    fn resolve_voice_falls_back_to_thai_voice_for_thai_family() {
        let voice = resolve_voice(&models(), "th-TH");
        assert_eq!(voice.name, THAI_FALLBACK_VOICE);
    }

    #[test]
    fn resolve_voice_falls_back_to_multilingual_default() {
        let voice = resolve_voice(&models(), "ja-JP");
        assert_eq!(voice.name, MULTILINGUAL_FALLBACK_VOICE);
    }
}
