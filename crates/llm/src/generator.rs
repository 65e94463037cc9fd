//! Streaming answer-generator adapter. One `Generator` trait, two wire
//! formats: a direct/OpenAI-compatible chat-completions stream, and Groq's
//! Chat Completions API, selected by the `groq/` model-name prefix. The
//! orchestrator never sees the distinction.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use answer_pipeline_core::traits::{Generator, GeneratorDelta, GeneratorMessage, GeneratorRequest};
use answer_pipeline_core::{Error, Result};

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub base_url: String,
    pub api_key: String,
    pub groq_base_url: String,
    pub groq_api_key: String,
    pub timeout: Duration,
}

pub struct HttpGenerator {
    client: reqwest::Client,
    config: GeneratorConfig,
}

impl HttpGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("failed to build generator http client");
        HttpGenerator { client, config }
    }
}

/// Whether a tenant-configured model name should be routed to Groq rather
/// than the direct/OpenAI-compatible backend.
pub fn is_groq_model(model: &str) -> bool {
    model.starts_with("groq/")
}

/// Strips the `groq/` prefix, leaving the real upstream model name.
fn strip_groq_prefix(model: &str) -> &str {
    model.strip_prefix("groq/").unwrap_or(model)
}

/// Groq only accepts one system message; the orchestrator's prompt
/// assembly may produce more than one (tenant system prompt + affirmation
/// prompt), so they are joined with a blank line into a single leading
/// system message before every other message, in original order.
fn combine_system_prompts(messages: Vec<GeneratorMessage>) -> Vec<GeneratorMessage> {
    let (system, rest): (Vec<_>, Vec<_>) =
        messages.into_iter().partition(|m| m.role == "system");
    if system.is_empty() {
        return rest;
    }
    let combined = system
        .into_iter()
        .map(|m| m.content)
        .collect::<Vec<_>>()
        .join("\n\n");
    let mut out = vec![GeneratorMessage {
        role: "system",
        content: combined,
    }];
    out.extend(rest);
    out
}

#[derive(Debug, Deserialize)]
struct StreamChoiceDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamChoiceDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

/// Parses one SSE-framed chat-completions stream into text deltas. Both the
/// direct backend and Groq's OpenAI-compatible endpoint emit this shape:
/// `data: {...}\n\n` repeated, terminated by a literal `data: [DONE]`.
fn parse_sse_stream(
    response: reqwest::Response,
) -> BoxStream<'static, Result<GeneratorDelta>> {
    let byte_stream = response.bytes_stream();
    let stream = async_stream::try_stream! {
        let mut buf = String::new();
        futures::pin_mut!(byte_stream);
        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(|e| Error::Generator(e.to_string()))?;
            buf.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(idx) = buf.find("\n\n") {
                let line = buf[..idx].to_string();
                buf.drain(..idx + 2);
                let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                    continue;
                };
                if data == "[DONE]" {
                    yield GeneratorDelta { text: String::new(), done: true };
                    return;
                }
                let parsed: StreamChunk = serde_json::from_str(data)
                    .map_err(|e| Error::Generator(format!("bad stream chunk: {e}")))?;
                for choice in parsed.choices {
                    let done = choice.finish_reason.is_some();
                    if let Some(text) = choice.delta.content {
                        if !text.is_empty() {
                            yield GeneratorDelta { text, done: false };
                        }
                    }
                    if done {
                        yield GeneratorDelta { text: String::new(), done: true };
                        return;
                    }
                }
            }
        }
    };
    Box::pin(stream)
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate_stream(
        &self,
        request: GeneratorRequest,
    ) -> Result<BoxStream<'static, Result<GeneratorDelta>>> {
        if is_groq_model(&request.model) {
            let model = strip_groq_prefix(&request.model).to_string();
            let messages = combine_system_prompts(request.messages);
            let body = json!({
                "model": model,
                "messages": messages.iter().map(|m| json!({"role": m.role, "content": m.content})).collect::<Vec<_>>(),
                "stream": true,
                "temperature": request.temperature,
                "top_p": 1.0,
                "max_completion_tokens": 8192,
                "reasoning_effort": "medium",
            });
            let url = format!("{}/chat/completions", self.config.groq_base_url);
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.config.groq_api_key)
                .json(&body)
                .send()
                .await
                .map_err(crate::LlmError::from)?;
            if !response.status().is_success() {
                return Err(Error::Generator(format!(
                    "groq http status {}",
                    response.status()
                )));
            }
            Ok(parse_sse_stream(response))
        } else {
            let body = json!({
                "model": request.model,
                "messages": request.messages.iter().map(|m| json!({"role": m.role, "content": m.content})).collect::<Vec<_>>(),
                "stream": true,
                "temperature": request.temperature,
            });
            let url = format!("{}/chat/completions", self.config.base_url);
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .json(&body)
                .send()
                .await
                .map_err(crate::LlmError::from)?;
            if !response.status().is_success() {
                return Err(Error::Generator(format!(
                    "generator http status {}",
                    response.status()
                )));
            }
            Ok(parse_sse_stream(response))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_groq_model_checks_prefix() {
        assert!(is_groq_model("groq/llama-3.3-70b"));
        assert!(!is_groq_model("gpt-4o"));
    }

    #[test]
    fn strip_groq_prefix_removes_prefix_only() {
        assert_eq!(strip_groq_prefix("groq/llama-3.3-70b"), "llama-3.3-70b");
        assert_eq!(strip_groq_prefix("gpt-4o"), "gpt-4o");
    }

    #[test]
    fn combine_system_prompts_joins_with_blank_line() {
        let messages = vec![
            GeneratorMessage { role: "system", content: "a".into() },
            GeneratorMessage { role: "system", content: "b".into() },
            GeneratorMessage { role: "user", content: "q".into() },
        ];
        let combined = combine_system_prompts(messages);
        assert_eq!(combined.len(), 2);
        assert_eq!(combined[0].role, "system");
        assert_eq!(combined[0].content, "a\n\nb");
        assert_eq!(combined[1].role, "user");
    }

    #[test]
    fn combine_system_prompts_is_noop_without_system_messages() {
        let messages = vec![GeneratorMessage { role: "user", content: "q".into() }];
        let combined = combine_system_prompts(messages);
        assert_eq!(combined.len(), 1);
    }
}
