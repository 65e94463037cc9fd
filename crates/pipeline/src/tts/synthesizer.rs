//! TTS Cache + Synthesizer (C2): blob-cached cloud text-to-speech. Cache
//! reads are guarded by a 3s timeout and degrade to resynthesis on miss or
//! timeout; cache writes are fire-and-forget.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use sha2::{Digest, Sha256};

use answer_pipeline_core::traits::TtsSynthesizer;
use answer_pipeline_core::Result;

const BLOB_READ_TIMEOUT: Duration = Duration::from_secs(3);

fn unsafe_voice_chars() -> &'static Regex {
    static RE: once_cell::sync::Lazy<Regex> =
        once_cell::sync::Lazy::new(|| Regex::new(r"[^A-Za-z0-9_.\-]").unwrap());
    &RE
}

/// Replaces every character outside `[A-Za-z0-9_.\-]` with `_`.
pub fn safe_voice_name(voice: &str) -> String {
    unsafe_voice_chars().replace_all(voice, "_").into_owned()
}

/// `sha256(phoneme_text ∥ language ∥ voice_name)`, truncated to 16 hex
/// characters.
pub fn cache_hash(phoneme_text: &str, language: &str, voice_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(phoneme_text.as_bytes());
    hasher.update(language.as_bytes());
    hasher.update(voice_name.as_bytes());
    let digest = hasher.finalize();
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

pub fn blob_path(language: &str, voice_name: &str, phoneme_text: &str) -> String {
    format!(
        "{}/{}/{}.wav",
        language,
        safe_voice_name(voice_name),
        cache_hash(phoneme_text, language, voice_name)
    )
}

/// Object-store facade for cached TTS audio blobs. A real deployment backs
/// this with cloud blob storage; tests and local runs can use an in-memory
/// implementation.
#[async_trait]
pub trait AudioBlobStore: Send + Sync {
    async fn get(&self, path: &str) -> Option<Vec<u8>>;
    async fn put(&self, path: &str, bytes: Vec<u8>);
}

/// Blob store backed by a plain HTTP object-storage endpoint: `GET
/// {base_url}/{path}` to read, `PUT {base_url}/{path}` to write. Any non-2xx
/// or transport error is treated as absence — callers degrade to
/// resynthesis rather than propagate blob-store errors.
pub struct HttpBlobStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBlobStore {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        HttpBlobStore { client, base_url }
    }
}

#[async_trait]
impl AudioBlobStore for HttpBlobStore {
    async fn get(&self, path: &str) -> Option<Vec<u8>> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => resp.bytes().await.ok().map(|b| b.to_vec()),
            _ => None,
        }
    }

    async fn put(&self, path: &str, bytes: Vec<u8>) {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        if let Err(err) = self.client.put(&url).body(bytes).send().await {
            tracing::warn!(path, error = %err, "tts cache write failed");
        }
    }
}

#[derive(Debug, Clone)]
pub struct CloudTtsConfig {
    pub base_url: String,
    pub subscription_key: String,
    pub region: String,
    pub timeout: Duration,
}

pub struct CloudTtsSynthesizer {
    client: reqwest::Client,
    blob_store: Arc<dyn AudioBlobStore>,
    config: CloudTtsConfig,
}

impl CloudTtsSynthesizer {
    pub fn new(config: CloudTtsConfig, blob_store: Arc<dyn AudioBlobStore>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("failed to build tts http client");
        CloudTtsSynthesizer {
            client,
            blob_store,
            config,
        }
    }

    /// POSTs SSML to the cloud TTS endpoint, requesting raw 16kHz/16bit/mono
    /// PCM. A non-2xx response is a synthesis failure, not an error: the
    /// caller degrades to no audio for this phrase.
    async fn call_remote(&self, ssml: &str) -> Option<Vec<u8>> {
        let url = format!("{}/cognitiveservices/v1", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .header("Ocp-Apim-Subscription-Key", &self.config.subscription_key)
            .header("Content-Type", "application/ssml+xml")
            .header(
                "X-Microsoft-OutputFormat",
                "raw-16khz-16bit-mono-pcm",
            )
            .header("Region", &self.config.region)
            .body(ssml.to_string())
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => resp.bytes().await.ok().map(|b| b.to_vec()),
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "tts synthesis call failed");
                None
            }
            Err(err) => {
                tracing::warn!(error = %err, "tts synthesis call failed");
                None
            }
        }
    }
}

#[async_trait]
impl TtsSynthesizer for CloudTtsSynthesizer {
    async fn synthesize(
        &self,
        ssml: &str,
        phoneme_text: &str,
        language: &str,
        voice_name: &str,
    ) -> Result<Option<Vec<u8>>> {
        let path = blob_path(language, voice_name, phoneme_text);

        if let Ok(Some(bytes)) =
            tokio::time::timeout(BLOB_READ_TIMEOUT, self.blob_store.get(&path)).await
        {
            return Ok(Some(bytes));
        }

        let Some(pcm) = self.call_remote(ssml).await else {
            return Ok(None);
        };
        let trimmed = crate::audio::trim_silence(&pcm);
        let wav = crate::audio::pcm_to_wav(&trimmed);

        let store = self.blob_store.clone();
        let write_path = path;
        let write_bytes = wav.clone();
        tokio::spawn(async move { store.put(&write_path, write_bytes).await });

        Ok(Some(wav))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex as AsyncMutex;

    #[test]
    fn safe_voice_name_replaces_disallowed_characters() {
        assert_eq!(safe_voice_name("en-US/Jenny Neural"), "en-US_Jenny_Neural");
        assert_eq!(safe_voice_name("th-TH-Premwadee"), "th-TH-Premwadee");
    }

    #[test]
    fn cache_hash_is_16_hex_chars_and_deterministic() {
        let a = cache_hash("hello", "en-US", "Jenny");
        let b = cache_hash("hello", "en-US", "Jenny");
        assert_eq!(a.len(), 16);
        assert_eq!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn cache_hash_distinguishes_inputs() {
        let a = cache_hash("hello", "en-US", "Jenny");
        let b = cache_hash("hello", "en-GB", "Jenny");
        assert_ne!(a, b);
    }

    #[test]
    fn blob_path_uses_language_safe_voice_and_hash() {
        let path = blob_path("en-US", "en-US/Jenny", "hi");
        assert!(path.starts_with("en-US/en-US_Jenny/"));
        assert!(path.ends_with(".wav"));
    }

    struct InMemoryBlobStore {
        data: AsyncMutex<std::collections::HashMap<String, Vec<u8>>>,
    }

    impl InMemoryBlobStore {
        fn new() -> Self {
            InMemoryBlobStore {
                data: AsyncMutex::new(std::collections::HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl AudioBlobStore for InMemoryBlobStore {
        async fn get(&self, path: &str) -> Option<Vec<u8>> {
            self.data.lock().await.get(path).cloned()
        }

        async fn put(&self, path: &str, bytes: Vec<u8>) {
            self.data.lock().await.insert(path.to_string(), bytes);
        }
    }

    #[tokio::test]
    async fn blob_store_round_trip() {
        let store = InMemoryBlobStore::new();
        assert!(store.get("a/b/c.wav").await.is_none());
        store.put("a/b/c.wav", vec![1, 2, 3]).await;
        assert_eq!(store.get("a/b/c.wav").await, Some(vec![1, 2, 3]));
    }
}
