//! Gemini-style validator adapter: one RPC that corrects a transcript and
//! extracts knowledge-search keywords from chat context plus an optional
//! audio blob.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use answer_pipeline_core::request::ChatRole;
use answer_pipeline_core::traits::{Validator, ValidatorRequest, ValidatorResponse};
use answer_pipeline_core::{Error, Result};

use crate::prompt::strip_code_fences;

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

pub struct GeminiValidator {
    client: reqwest::Client,
    config: ValidatorConfig,
}

impl GeminiValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("failed to build validator http client");
        GeminiValidator { client, config }
    }

    /// Gemini 2.5 Pro is the only model family that benefits from an
    /// explicit thinking budget on this lightweight validation call; every
    /// other model gets a budget of zero (effectively disabling it).
    fn thinking_budget(model: &str) -> u32 {
        if model.contains("2.5-pro") {
            128
        } else {
            0
        }
    }
}

#[derive(Debug, Deserialize)]
struct GeminiValidationResult {
    correction: String,
    #[serde(default)]
    keywords: Vec<String>,
}

#[async_trait]
impl Validator for GeminiValidator {
    async fn validate(&self, request: ValidatorRequest<'_>) -> Result<ValidatorResponse> {
        let mut contents = Vec::new();
        for turn in request.chat_history {
            contents.push(json!({
                "role": match turn.role {
                    ChatRole::User => "user",
                    ChatRole::Assistant => "model",
                },
                "parts": [{"text": turn.content}],
            }));
        }

        let mut parts = vec![json!({"text": request.transcript})];
        if let Some(audio) = request.audio_wav {
            parts.push(json!({
                "inlineData": {
                    "mimeType": "audio/wav",
                    "data": base64::engine::general_purpose::STANDARD.encode(audio),
                }
            }));
        }
        contents.push(json!({"role": "user", "parts": parts}));

        let body = json!({
            "systemInstruction": {"parts": [{"text": request.system_prompt}]},
            "contents": contents,
            "generationConfig": {
                "temperature": 0.0,
                "topP": 0.95,
                "thinkingConfig": {"thinkingBudget": Self::thinking_budget(request.model)},
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "OBJECT",
                    "properties": {
                        "correction": {"type": "STRING"},
                        "chat_history": {"type": "ARRAY", "items": {"type": "STRING"}},
                        "keywords": {"type": "ARRAY", "items": {"type": "STRING"}},
                    },
                    "required": ["correction", "chat_history", "keywords"],
                },
            },
            "safetySettings": [
                {"category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_MEDIUM_AND_ABOVE"},
                {"category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "BLOCK_MEDIUM_AND_ABOVE"},
                {"category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": "BLOCK_MEDIUM_AND_ABOVE"},
                {"category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": "BLOCK_MEDIUM_AND_ABOVE"},
            ],
        });

        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url, request.model
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(crate::LlmError::from)?;

        if !response.status().is_success() {
            return Err(Error::Validator(format!(
                "validator http status {}",
                response.status()
            )));
        }

        let value: serde_json::Value = response.json().await.map_err(crate::LlmError::from)?;
        let text = value
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Validator("validator response missing text part".into()))?;

        let cleaned = strip_code_fences(text);
        let parsed: GeminiValidationResult = serde_json::from_str(cleaned)
            .map_err(|e| Error::Validator(format!("invalid validator JSON: {e}")))?;

        Ok(ValidatorResponse {
            correction: parsed.correction,
            keywords: parsed.keywords,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thinking_budget_enabled_only_for_25_pro() {
        assert_eq!(GeminiValidator::thinking_budget("gemini-2.5-pro"), 128);
        assert_eq!(GeminiValidator::thinking_budget("gemini-2.5-flash"), 0);
        assert_eq!(GeminiValidator::thinking_budget("gemini-1.5-pro"), 0);
    }

    #[tokio::test]
    async fn validate_strips_fence_and_parses_response() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let body = serde_json::json!({
            "candidates": [{
                "content": {
                    "parts": [{
                        "text": "```json\n{\"correction\":\"what is the wifi password\",\"chat_history\":[],\"keywords\":[\"wifi\",\"password\"]}\n```"
                    }]
                }
            }]
        });
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.5-flash:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let validator = GeminiValidator::new(ValidatorConfig {
            base_url: server.uri(),
            api_key: "test-key".into(),
            timeout: Duration::from_secs(5),
        });

        let response = validator
            .validate(ValidatorRequest {
                transcript: "whats teh wifi pasword",
                system_prompt: "You are a transcript validator.",
                chat_history: &[],
                audio_wav: None,
                model: "gemini-2.5-flash",
            })
            .await
            .unwrap();

        assert_eq!(response.correction, "what is the wifi password");
        assert_eq!(response.keywords, vec!["wifi", "password"]);
    }
}
