//! Phoneme Pattern Cache: a process-wide cache of compiled phoneme
//! substitution patterns, keyed by the combined set of phoneme-dictionary
//! URLs a tenant's TTS config declares. Concurrent first-loads for the same
//! key are serialized behind a per-key lock so the HTTP fetch happens once.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use regex::Regex;
use serde::Deserialize;
use tokio::sync::Mutex as AsyncMutex;

const DEFAULT_LANGUAGE_KEY: &str = "default";

#[derive(Debug, Clone)]
pub struct CompiledPhonemePattern {
    pub regex: Regex,
    pub term: String,
    pub replacement_tag: String,
}

#[derive(Debug, Deserialize)]
struct RawPhonemeEntry {
    term: String,
    phoneme: String,
    #[serde(default)]
    language: Option<String>,
}

/// Builds a `<phoneme>` SSML tag for one matched term.
fn replacement_tag(entry: &RawPhonemeEntry) -> String {
    format!(
        r#"<phoneme alphabet="ipa" ph="{}">{}</phoneme>"#,
        entry.phoneme, entry.term
    )
}

fn compile_pattern(entry: &RawPhonemeEntry) -> Option<CompiledPhonemePattern> {
    let regex = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(&entry.term))).ok()?;
    Some(CompiledPhonemePattern {
        regex,
        term: entry.term.clone(),
        replacement_tag: replacement_tag(entry),
    })
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

type CompiledByLanguage = HashMap<String, Arc<Vec<CompiledPhonemePattern>>>;

pub struct PhonemePatternCache {
    http: reqwest::Client,
    compiled: DashMap<String, CompiledByLanguage>,
    load_locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl PhonemePatternCache {
    pub fn new(http: reqwest::Client) -> Self {
        PhonemePatternCache {
            http,
            compiled: DashMap::new(),
            load_locks: DashMap::new(),
        }
    }

    fn cache_key(urls: &[String]) -> String {
        let mut sorted: Vec<&str> = urls.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(sorted.join("|").as_bytes());
        to_hex(&hasher.finalize())
    }

    /// Returns the compiled patterns for `language`, loading and compiling
    /// them from `urls` on first use. Falls back to the dictionary's
    /// language-less "default" entries for languages with no dedicated
    /// terms, and to an empty pattern list if nothing was ever declared.
    pub async fn patterns_for(
        &self,
        urls: &[String],
        language: &str,
    ) -> Arc<Vec<CompiledPhonemePattern>> {
        let key = Self::cache_key(urls);
        if let Some(hit) = self.lookup(&key, language) {
            return hit;
        }

        let lock = self
            .load_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if let Some(hit) = self.lookup(&key, language) {
            return hit;
        }

        let mut by_language: HashMap<String, Vec<RawPhonemeEntry>> = HashMap::new();
        for url in urls {
            for entry in self.fetch_url(url).await {
                let lang_key = entry
                    .language
                    .clone()
                    .unwrap_or_else(|| DEFAULT_LANGUAGE_KEY.to_string());
                by_language.entry(lang_key).or_default().push(entry);
            }
        }

        let mut compiled: CompiledByLanguage = HashMap::new();
        for (lang, mut entries) in by_language {
            entries.sort_by(|a, b| b.term.len().cmp(&a.term.len()));
            let patterns: Vec<_> = entries.iter().filter_map(compile_pattern).collect();
            compiled.insert(lang, Arc::new(patterns));
        }
        self.compiled.insert(key.clone(), compiled);

        self.lookup(&key, language).unwrap_or_default()
    }

    fn lookup(&self, key: &str, language: &str) -> Option<Arc<Vec<CompiledPhonemePattern>>> {
        let langs = self.compiled.get(key)?;
        langs
            .get(language)
            .or_else(|| langs.get(DEFAULT_LANGUAGE_KEY))
            .cloned()
    }

    /// Fetches and parses one phoneme-dictionary URL. Any failure (network,
    /// status, JSON shape) degrades to an empty list — a missing phoneme
    /// dictionary should never fail synthesis.
    async fn fetch_url(&self, url: &str) -> Vec<RawPhonemeEntry> {
        match self.http.get(url).send().await {
            Ok(resp) if resp.status().is_success() => {
                resp.json::<Vec<RawPhonemeEntry>>().await.unwrap_or_default()
            }
            Ok(resp) => {
                tracing::warn!(url, status = %resp.status(), "phoneme dictionary fetch failed");
                Vec::new()
            }
            Err(err) => {
                tracing::warn!(url, error = %err, "phoneme dictionary fetch failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiled_pattern_matches_whole_word_case_insensitive() {
        let entry = RawPhonemeEntry {
            term: "Qdrant".into(),
            phoneme: "kjuːˈdrænt".into(),
            language: None,
        };
        let pattern = compile_pattern(&entry).unwrap();
        assert!(pattern.regex.is_match("I use qdrant daily"));
        assert!(!pattern.regex.is_match("Qdrantish word"));
    }

    #[test]
    fn cache_key_is_order_independent() {
        let a = PhonemePatternCache::cache_key(&["b".into(), "a".into()]);
        let b = PhonemePatternCache::cache_key(&["a".into(), "b".into()]);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn missing_dictionary_degrades_to_empty_patterns() {
        let cache = PhonemePatternCache::new(reqwest::Client::new());
        let patterns = cache
            .patterns_for(&["http://127.0.0.1:1/missing.json".to_string()], "en-US")
            .await;
        assert!(patterns.is_empty());
    }
}
