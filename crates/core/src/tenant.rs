//! Tenant configuration: the deeply nested, per-`(org_id, config_id)` record
//! fetched from an external key-value store and cached process-wide.
//!
//! The shape mirrors the upstream configuration schema closely rather than
//! re-modeling it, since the core only reads a handful of fields out of a
//! much larger document and new fields appear there faster than this crate
//! can track them. Unrecognized fields are ignored by `serde` rather than
//! rejected.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::language::normalize;

/// One language-specific localization block within a tenant's config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalizationConfig {
    pub language: String,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub assistant_id: Option<String>,

    #[serde(default)]
    pub assistant_key: Option<String>,

    #[serde(default)]
    pub system_prompt: Option<String>,

    #[serde(default)]
    pub affirmation_prompt: Option<String>,

    #[serde(default)]
    pub validator_transcript_prompt_template_url: Option<String>,

    #[serde(default)]
    pub validator_system_prompt_template_url: Option<String>,

    #[serde(default)]
    pub validator_model: Option<String>,

    #[serde(default)]
    pub transcript_confidence_threshold: Option<f32>,

    #[serde(default)]
    pub generator_system_prompt_url: Option<String>,

    #[serde(default)]
    pub generator_affirmation_prompt_url: Option<String>,

    #[serde(default)]
    pub generator_model: Option<String>,

    #[serde(default)]
    pub tts: Option<TtsConfig>,
}

/// One voice definition within a tenant's Azure-style TTS config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsModel {
    pub language: String,
    pub name: String,

    #[serde(default = "default_pitch")]
    pub pitch: String,

    #[serde(default = "default_rate")]
    pub rate: String,

    #[serde(default)]
    pub phoneme_url: Option<String>,
}

fn default_pitch() -> String {
    "medium".to_string()
}

fn default_rate() -> String {
    "1.0".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsConfig {
    #[serde(default)]
    pub subscription_key: Option<String>,

    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default)]
    pub lexicon_url: Option<String>,

    #[serde(default)]
    pub phoneme_url: Option<String>,

    #[serde(default)]
    pub models: Vec<TtsModel>,
}

fn default_region() -> String {
    "southeastasia".to_string()
}

/// Audio handling policy for a tenant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioConfig {
    #[serde(default)]
    pub auto_trim_silent: bool,

    #[serde(default)]
    pub silence_threshold: Option<f32>,
}

/// Language-indexed pool of "please wait" utterances played during
/// validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingMessages {
    #[serde(flatten)]
    pub by_language: HashMap<String, Vec<String>>,
}

/// The full per-`(org_id, config_id)` record, as parsed out of the
/// `configValue` array returned by the key-value store for an org.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantConfig {
    pub config_id: String,

    #[serde(default)]
    pub km_id: Option<String>,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub default_primary_language: Option<String>,

    #[serde(default)]
    pub localization: Vec<LocalizationConfig>,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub processing_messages: ProcessingMessages,

    #[serde(default)]
    pub max_km_results: Option<usize>,
}

impl TenantConfig {
    /// Finds the localization whose `language` matches `language` (after
    /// BCP-47 normalization), falling back to the tenant's declared default
    /// language. Per the data-model invariant, exactly one of these two must
    /// resolve, or the request fails.
    pub fn localization_for(&self, language: &str) -> Result<&LocalizationConfig> {
        let wanted = normalize(language);
        if let Some(loc) = self
            .localization
            .iter()
            .find(|l| normalize(&l.language) == wanted)
        {
            return Ok(loc);
        }
        if let Some(default_lang) = &self.default_primary_language {
            let default_norm = normalize(default_lang);
            if let Some(loc) = self
                .localization
                .iter()
                .find(|l| normalize(&l.language) == default_norm)
            {
                return Ok(loc);
            }
        }
        Err(Error::LocalizationNotFound {
            config_id: self.config_id.clone(),
            language: language.to_string(),
        })
    }

    /// Resolves the effective assistant key for a language: the
    /// language-specific localization's key, or the default localization's.
    pub fn assistant_key_for(&self, language: &str) -> Result<String> {
        let loc = self.localization_for(language)?;
        loc.assistant_key
            .clone()
            .ok_or_else(|| Error::TenantConfig(format!("no assistant_key for {language}")))
    }

    /// Transcript-confidence threshold: per-language override first, then
    /// the localization's own default, else `None` (no gating).
    pub fn confidence_threshold_for(&self, language: &str) -> Option<f32> {
        self.localization_for(language)
            .ok()
            .and_then(|loc| loc.transcript_confidence_threshold)
    }

    /// A random language-appropriate "please wait" utterance, falling back
    /// through the built-in per-locale table, then to English, when the
    /// tenant declares none.
    pub fn processing_message(&self, language: &str, pick: usize) -> String {
        let family = crate::language::family(language);
        if let Some(pool) = self.processing_messages.by_language.get(&family) {
            if !pool.is_empty() {
                return pool[pick % pool.len()].clone();
            }
        }
        fallback_processing_message(language).to_string()
    }
}

/// Built-in single-utterance fallback for when a tenant declares no
/// processing messages, keyed by the exact normalized locale tag — not the
/// bare language family, so e.g. `en-GB` does not match the `en-US` entry
/// and instead falls through to the English default like every other
/// unlisted locale.
fn fallback_processing_message(language: &str) -> &'static str {
    match crate::language::normalize(language).as_str() {
        "en-US" => "Please wait a moment",
        "th-TH" => "กรุณารอสักครู่ค่ะ",
        "zh-CN" => "请稍等片刻",
        "ja-JP" => "少しお待ちください",
        "ko-KR" => "잠시만 기다려 주세요",
        "ar-AE" => "من فضلك، انتظر لحظة",
        "ru-RU" => "Пожалуйста, подождите минуту",
        _ => "Please wait a moment",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TenantConfig {
        TenantConfig {
            config_id: "cfg-1".into(),
            km_id: Some("km-1".into()),
            display_name: None,
            default_primary_language: Some("en-US".into()),
            localization: vec![
                LocalizationConfig {
                    language: "en-US".into(),
                    assistant_key: Some("key-en".into()),
                    transcript_confidence_threshold: Some(0.7),
                    ..Default::default()
                },
                LocalizationConfig {
                    language: "th-TH".into(),
                    assistant_key: Some("key-th".into()),
                    ..Default::default()
                },
            ],
            audio: AudioConfig::default(),
            processing_messages: ProcessingMessages::default(),
            max_km_results: None,
        }
    }

    #[test]
    fn localization_matches_exact_language() {
        let cfg = sample();
        let loc = cfg.localization_for("th-th").unwrap();
        assert_eq!(loc.assistant_key.as_deref(), Some("key-th"));
    }

    #[test]
    fn localization_falls_back_to_default_language() {
        let cfg = sample();
        let loc = cfg.localization_for("fr-FR").unwrap();
        assert_eq!(loc.assistant_key.as_deref(), Some("key-en"));
    }

    #[test]
    fn localization_fails_when_neither_matches() {
        let mut cfg = sample();
        cfg.default_primary_language = Some("de-DE".into());
        assert!(cfg.localization_for("fr-FR").is_err());
    }

    #[test]
    fn confidence_threshold_only_for_configured_language() {
        let cfg = sample();
        assert_eq!(cfg.confidence_threshold_for("en-US"), Some(0.7));
        assert_eq!(cfg.confidence_threshold_for("th-TH"), None);
    }

    #[test]
    fn processing_message_falls_back_when_tenant_declares_none() {
        let cfg = sample();
        let msg = cfg.processing_message("en-US", 0);
        assert_eq!(msg, "Please wait a moment");
    }

    #[test]
    fn processing_message_fallback_is_keyed_by_exact_locale_not_family() {
        let cfg = sample();
        // en-GB shares the "en" family with en-US but isn't a listed
        // locale, so it must fall through to the generic default rather
        // than matching the en-US entry.
        assert_eq!(cfg.processing_message("en-GB", 0), "Please wait a moment");
        assert_eq!(cfg.processing_message("ja-JP", 0), "少しお待ちください");
        assert_eq!(cfg.processing_message("ru-RU", 0), "Пожалуйста, подождите минуту");
    }
}
