//! Per-request, immutable input to the orchestrator.

use serde::{Deserialize, Serialize};

/// A single turn of prior conversation, supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// Immutable input to one orchestrator run. Constructed once from the
/// inbound HTTP request and never mutated afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    pub org_id: String,
    pub config_id: String,
    pub language: String,
    pub transcript: String,

    #[serde(default)]
    pub base64_audio: Option<String>,

    #[serde(default)]
    pub keywords: Option<Vec<String>>,

    #[serde(default)]
    pub transcript_confidence: Option<f32>,

    #[serde(default)]
    pub chat_history: Vec<ChatTurn>,

    #[serde(default = "default_generate_answer")]
    pub generate_answer: bool,
}

fn default_generate_answer() -> bool {
    true
}

impl RequestContext {
    /// Whether the validator should be skipped because the caller already
    /// supplied keywords.
    pub fn has_precomputed_keywords(&self) -> bool {
        self.keywords.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_generate_answer_is_true() {
        let json = r#"{"org_id":"o","config_id":"c","language":"en-US","transcript":"hi"}"#;
        let ctx: RequestContext = serde_json::from_str(json).unwrap();
        assert!(ctx.generate_answer);
        assert!(!ctx.has_precomputed_keywords());
    }

    #[test]
    fn keywords_present_short_circuits_validator() {
        let mut ctx: RequestContext = serde_json::from_str(
            r#"{"org_id":"o","config_id":"c","language":"en-US","transcript":"hi"}"#,
        )
        .unwrap();
        assert!(!ctx.has_precomputed_keywords());
        ctx.keywords = Some(vec!["a".into()]);
        assert!(ctx.has_precomputed_keywords());
    }
}
