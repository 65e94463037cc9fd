//! SSML Formatter (C2): turns generator answer text into the SSML document
//! sent to the cloud TTS API, applying phoneme substitution, parenthetical
//! stripping, and a lexicon reference ahead of the voice's prosody settings.

use std::sync::Arc;

use answer_pipeline_core::language;
use answer_pipeline_core::tenant::TtsModel;

use crate::tts::phoneme::CompiledPhonemePattern;

/// Strips `(...)`-bracketed asides from spoken text — parenthetical
/// citations, footnote markers, or stage directions the generator emits
/// that should never be read aloud.
pub fn strip_parentheticals(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0u32;
    for ch in text.chars() {
        match ch {
            '(' => depth += 1,
            ')' => {
                if depth > 0 {
                    depth -= 1;
                }
            }
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }
    collapse_whitespace(&out)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Applies every compiled phoneme pattern to `text`, replacing matched terms
/// with their `<phoneme>` tag. Patterns were sorted longest-term-first at
/// compile time so multi-word terms win over their substrings.
fn apply_phoneme_patterns(text: &str, patterns: &[CompiledPhonemePattern]) -> (String, bool) {
    let mut out = text.to_string();
    let mut applied = false;
    for pattern in patterns {
        if pattern.regex.is_match(&out) {
            out = pattern
                .regex
                .replace_all(&out, pattern.replacement_tag.as_str())
                .into_owned();
            applied = true;
        }
    }
    (out, applied)
}

pub struct SsmlOutput {
    /// The full SSML document to send to the TTS API.
    pub ssml: String,
    /// The phoneme-substituted, parenthetical-stripped text used as the
    /// cache-key input — stable across callers even though the final SSML
    /// embeds voice-specific prosody attributes too.
    pub phoneme_text: String,
}

pub struct SsmlFormatter {
    strip_parentheticals: bool,
}

impl Default for SsmlFormatter {
    fn default() -> Self {
        SsmlFormatter {
            strip_parentheticals: true,
        }
    }
}

impl SsmlFormatter {
    pub fn new(strip_parentheticals: bool) -> Self {
        SsmlFormatter {
            strip_parentheticals,
        }
    }

    /// Builds the SSML document for one answer chunk of text, given the
    /// voice's model config, its compiled phoneme patterns, and an optional
    /// lexicon URL. A phoneme match takes precedence over the lexicon
    /// reference for the same utterance — both apply to disjoint spans of
    /// text in practice, but only the lexicon is skipped when nothing in
    /// the phoneme dictionary fired, since a lexicon with no matching terms
    /// present is a wasted round trip for the TTS engine to parse.
    pub fn format(
        &self,
        text: &str,
        voice: &TtsModel,
        lexicon_url: Option<&str>,
        patterns: &Arc<Vec<CompiledPhonemePattern>>,
    ) -> SsmlOutput {
        let working = if self.strip_parentheticals {
            strip_parentheticals(text)
        } else {
            collapse_whitespace(text)
        };

        let (substituted, phoneme_applied) = apply_phoneme_patterns(&working, patterns);
        let lang_tag = language::normalize(&voice.language);

        let lexicon_ref = lexicon_url
            .filter(|_| phoneme_applied)
            .map(|url| format!(r#"<lexicon uri="{}"/>"#, escape_xml(url)))
            .unwrap_or_default();

        let body = if phoneme_applied {
            substituted
        } else {
            escape_xml(&substituted)
        };

        let ssml = format!(
            r#"<speak version="1.0" xmlns="http://www.w3.org/2001/10/synthesis" xml:lang="{lang}">{lexicon}<voice name="{voice_name}"><prosody pitch="{pitch}" rate="{rate}">{body}</prosody></voice></speak>"#,
            lang = lang_tag,
            lexicon = lexicon_ref,
            voice_name = escape_xml(&voice.name),
            pitch = escape_xml(&voice.pitch),
            rate = escape_xml(&voice.rate),
            body = body,
        );

        SsmlOutput {
            ssml,
            phoneme_text: working,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    fn voice() -> TtsModel {
        TtsModel {
            language: "en-US".into(),
            name: "en-US-JennyNeural".into(),
            pitch: "medium".into(),
            rate: "1.0".into(),
            phoneme_url: None,
        }
    }

    fn pattern(term: &str, tag: &str) -> CompiledPhonemePattern {
        CompiledPhonemePattern {
            regex: Regex::new(&format!(r"(?i)\b{}\b", regex::escape(term))).unwrap(),
            term: term.to_string(),
            replacement_tag: tag.to_string(),
        }
    }

    #[test]
    fn strips_parenthetical_asides() {
        assert_eq!(
            strip_parentheticals("The price is $10 (excluding tax) today"),
            "The price is $10 today"
        );
    }

    #[test]
    fn unmatched_parenthesis_is_not_fatal() {
        assert_eq!(strip_parentheticals("broken (aside"), "broken");
    }

    #[test]
    fn format_embeds_voice_and_prosody() {
        let formatter = SsmlFormatter::default();
        let patterns = Arc::new(Vec::new());
        let out = formatter.format("Hello there", &voice(), None, &patterns);
        assert!(out.ssml.contains(r#"xml:lang="en-US""#));
        assert!(out.ssml.contains("en-US-JennyNeural"));
        assert!(out.ssml.contains(r#"pitch="medium""#));
        assert!(out.ssml.contains("Hello there"));
    }

    #[test]
    fn lexicon_only_referenced_when_phoneme_matched() {
        let formatter = SsmlFormatter::default();
        let no_match = Arc::new(vec![pattern("qdrant", "<phoneme>qdrant</phoneme>")]);
        let out = formatter.format("hello world", &voice(), Some("https://lex"), &no_match);
        assert!(!out.ssml.contains("lexicon"));

        let out = formatter.format("use qdrant now", &voice(), Some("https://lex"), &no_match);
        assert!(out.ssml.contains("lexicon"));
        assert!(out.ssml.contains("<phoneme>qdrant</phoneme>"));
    }
}
