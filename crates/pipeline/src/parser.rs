//! Generator Parser (C4): an incremental state machine that routes a
//! streaming, partially structured LLM response into its constituent
//! sinks — thinking, spoken voice text, display answer text, metadata, and
//! the session-end sentinel — without ever leaking a partial tag or
//! bracket span into client-visible output.

use serde::Deserialize;

use answer_pipeline_core::event::{MetadataItem, MetadataPayload};
use answer_pipeline_core::knowledge::KmSearchResponse;

const SESSION_END_SENTINEL: &str = "{#NXENDX#}";
const SECTION_A_OPEN: &str = "<sectionA>";
const SECTION_A_CLOSE: &str = "</sectionA>";
const SECTION_B_OPEN: &str = "<sectionB>";
const SECTION_B_CLOSE: &str = "</sectionB>";
const THINKING_OPEN: &str = "<thinking>";
const THINKING_CLOSE: &str = "</thinking>";
const META_TAG: &str = "meta:docs";
const UNFORMATTED_THRESHOLD: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unknown,
    SectionA,
    SectionB,
    Thinking,
    Answer,
    Metadata,
    Completed,
    SessionEnd,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParserEvent {
    Thinking(String),
    Voice(String),
    Answer(String),
    SessionEnded,
}

pub struct GeneratorParser {
    state: State,
    buf: String,
    pending_session_end: bool,
    metadata_raw: String,
    saw_section_a: bool,
}

impl Default for GeneratorParser {
    fn default() -> Self {
        Self::new()
    }
}

impl GeneratorParser {
    pub fn new() -> Self {
        GeneratorParser {
            state: State::Unknown,
            buf: String::new(),
            pending_session_end: false,
            metadata_raw: String::new(),
            saw_section_a: false,
        }
    }

    pub fn session_ended(&self) -> bool {
        self.state == State::SessionEnd
    }

    /// Whether the response ever entered `SECTION_A`, i.e. used the
    /// formatted shape. The orchestrator forwards `answer_chunk` text to
    /// the TTS streamer itself only for the unformatted shape, since the
    /// formatted shape already routes its voice text through `SECTION_A`.
    pub fn is_formatted(&self) -> bool {
        self.saw_section_a
    }

    /// Feeds the next chunk of raw generator text and returns every event
    /// this feed made ready to emit, in order.
    pub fn feed(&mut self, chunk: &str) -> Vec<ParserEvent> {
        self.buf.push_str(chunk);
        let mut events = Vec::new();
        while let Some(event) = self.scan_once() {
            events.push(event);
        }
        events
    }

    /// Flushes whatever text never reached a terminal marker, once, at the
    /// end of the stream. Any buffer left over is emitted through whatever
    /// sink was active; per the bracket invariant an unmatched `[` still in
    /// the buffer at this point is just literal text.
    pub fn finalize(&mut self) -> Vec<ParserEvent> {
        if self.pending_session_end {
            self.pending_session_end = false;
            self.state = State::SessionEnd;
            return vec![ParserEvent::SessionEnded];
        }
        if matches!(self.state, State::SessionEnd | State::Metadata) {
            return Vec::new();
        }
        let remaining = std::mem::take(&mut self.buf);
        self.emit_for_state(remaining).into_iter().collect()
    }

    /// Takes ownership of whatever metadata JSON text was accumulated, for
    /// finalization against the request's knowledge-search results. `None`
    /// if the parser never entered the metadata state.
    pub fn take_metadata_raw(&mut self) -> Option<String> {
        if self.metadata_raw.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.metadata_raw))
        }
    }

    fn emit_for_state(&self, text: String) -> Option<ParserEvent> {
        if text.trim().is_empty() {
            return None;
        }
        match self.state {
            State::SectionA => Some(ParserEvent::Voice(text)),
            State::Thinking => Some(ParserEvent::Thinking(text)),
            _ => Some(ParserEvent::Answer(text)),
        }
    }

    fn scan_once(&mut self) -> Option<ParserEvent> {
        if self.pending_session_end {
            self.pending_session_end = false;
            self.state = State::SessionEnd;
            self.buf.clear();
            return Some(ParserEvent::SessionEnded);
        }
        if self.state == State::SessionEnd {
            self.buf.clear();
            return None;
        }

        // The session-end sentinel is only recognized in the states that
        // follow the formatted/unformatted answer body (SECTION_B, ANSWER,
        // COMPLETED); a sentinel arriving while still inside SECTION_A, a
        // THINKING block, or before the shape is even known is just literal
        // text at this point, same as the generator never checks for it
        // there either.
        if matches!(self.state, State::SectionB | State::Answer | State::Completed) {
            if let Some(idx) = self.buf.find(SESSION_END_SENTINEL) {
                let preceding: String = self.buf.drain(..idx).collect();
                self.buf.drain(..SESSION_END_SENTINEL.len());
                self.pending_session_end = true;
                return self.emit_for_state(preceding).or_else(|| self.scan_once());
            }
        }

        if self.state == State::Metadata {
            let chunk = std::mem::take(&mut self.buf);
            self.metadata_raw.push_str(&chunk);
            return None;
        }

        if matches!(self.state, State::SectionB | State::Answer | State::Completed) {
            if let Some((start, end, true)) = scan_bracket(&self.buf) {
                let preceding: String = self.buf.drain(..start).collect();
                self.buf.drain(..end - start);
                self.state = State::Metadata;
                return self
                    .emit_for_state(preceding)
                    .or_else(|| self.scan_once());
            }
        }

        match self.state {
            State::Unknown => self.scan_unknown(),
            State::SectionA => self.scan_section_a(),
            State::SectionB => self.scan_tagged(SECTION_B_CLOSE, State::SectionB, State::Completed),
            State::Thinking => self.scan_thinking(),
            State::Answer | State::Completed => self.scan_free_text(),
            State::Metadata | State::SessionEnd => None,
        }
    }

    /// SECTION_A never transitions to METADATA directly: a `[meta:docs]`
    /// tag found inside section A content is stripped (along with its
    /// immediately following JSON object) into the metadata buffer in
    /// place, and parsing continues waiting for `<sectionB>`.
    fn scan_section_a(&mut self) -> Option<ParserEvent> {
        if let Some(idx) = self.buf.find(SECTION_A_CLOSE) {
            self.buf.drain(idx..idx + SECTION_A_CLOSE.len());
        }
        if let Some((tag_start, tag_end, true)) = scan_bracket(&self.buf) {
            let after_tag = &self.buf[tag_end..];
            if let Some(json) = extract_first_json_object(after_tag) {
                let json_start = tag_end + after_tag.find('{').expect("json present");
                let json_end = json_start + json.len();
                let voice_before: String = self.buf[..tag_start].to_string();
                self.metadata_raw.push_str(&json);
                self.buf.drain(..json_end);
                return self
                    .emit_as(voice_before, State::SectionA)
                    .or_else(|| self.scan_once());
            }
            if tag_start > 0 {
                let voice_before: String = self.buf.drain(..tag_start).collect();
                return self.emit_as(voice_before, State::SectionA);
            }
            return None;
        }
        self.scan_tagged(SECTION_B_OPEN, State::SectionA, State::SectionB)
    }

    fn scan_unknown(&mut self) -> Option<ParserEvent> {
        let section_a_idx = self.buf.find(SECTION_A_OPEN);
        let thinking_idx = self.buf.find(THINKING_OPEN);
        let take_section_a = match (section_a_idx, thinking_idx) {
            (Some(a), Some(t)) => a <= t,
            (Some(_), None) => true,
            _ => false,
        };

        if take_section_a {
            let idx = section_a_idx.unwrap();
            self.buf.drain(..idx + SECTION_A_OPEN.len());
            self.state = State::SectionA;
            self.saw_section_a = true;
            return self.scan_once();
        }
        if let Some(idx) = thinking_idx {
            self.buf.drain(..idx + THINKING_OPEN.len());
            self.state = State::Thinking;
            return self.scan_once();
        }
        if self.buf.len() >= UNFORMATTED_THRESHOLD && !self.buf.trim_start().starts_with('<') {
            self.state = State::Answer;
            return self.scan_once();
        }
        None
    }

    fn scan_thinking(&mut self) -> Option<ParserEvent> {
        let idx = self.buf.find(THINKING_CLOSE)?;
        let content: String = self.buf.drain(..idx).collect();
        self.buf.drain(..THINKING_CLOSE.len());
        let event = self.emit_for_state(content);

        self.state = if let Some(idx) = self.buf.find(SECTION_A_OPEN) {
            self.buf.drain(..idx + SECTION_A_OPEN.len());
            self.saw_section_a = true;
            State::SectionA
        } else {
            State::Answer
        };

        event.or_else(|| self.scan_once())
    }

    /// Shared driver for SECTION_A (waiting on `<sectionB>`) and SECTION_B
    /// (waiting on `</sectionB>`): everything up to the marker belongs to
    /// `from`'s sink; the marker itself is consumed and the state advances
    /// to `to`. Absent the marker, streams out whatever prefix is safe
    /// (i.e. not a still-open `[` bracket) and waits for more input.
    fn scan_tagged(&mut self, marker: &str, from: State, to: State) -> Option<ParserEvent> {
        if let Some(idx) = self.buf.find(marker) {
            let content: String = self.buf.drain(..idx).collect();
            self.buf.drain(..marker.len());
            self.state = to;
            let event = self.emit_as(content, from);
            return event.or_else(|| self.scan_once());
        }
        let safe_len = safe_prefix_len(&self.buf);
        if safe_len == 0 {
            return None;
        }
        let content: String = self.buf.drain(..safe_len).collect();
        self.emit_as(content, from)
    }

    fn scan_free_text(&mut self) -> Option<ParserEvent> {
        let safe_len = safe_prefix_len(&self.buf);
        if safe_len == 0 {
            return None;
        }
        let content: String = self.buf.drain(..safe_len).collect();
        self.emit_for_state(content)
    }

    fn emit_as(&self, text: String, as_state: State) -> Option<ParserEvent> {
        if text.trim().is_empty() {
            return None;
        }
        match as_state {
            State::SectionA => Some(ParserEvent::Voice(text)),
            State::Thinking => Some(ParserEvent::Thinking(text)),
            _ => Some(ParserEvent::Answer(text)),
        }
    }
}

/// Index of the first complete `[...]` span and whether its inner text is
/// the literal `meta:docs` tag. `None` if no complete span is buffered yet
/// (an unmatched `[` must wait for more input).
fn scan_bracket(buf: &str) -> Option<(usize, usize, bool)> {
    let start = buf.find('[')?;
    let rel_end = buf[start..].find(']')?;
    let end = start + rel_end + 1;
    let inner = buf[start + 1..end - 1].trim();
    Some((start, end, inner.eq_ignore_ascii_case(META_TAG)))
}

/// Everything up to an *unclosed* `[` is safe to emit now; that bracket
/// might turn out to be a `[meta:docs]` tag once it closes, so it's held
/// back rather than risk voicing or displaying a fragment of it. A bracket
/// that's already closed was necessarily already classified (and, if a meta
/// tag, already consumed) by the caller before this is reached, so it's
/// just literal text at this point and safe to emit through.
fn safe_prefix_len(buf: &str) -> usize {
    match buf.find('[') {
        Some(idx) if !buf[idx..].contains(']') => idx,
        _ => buf.len(),
    }
}

#[derive(Debug, Deserialize)]
struct MetaDocsPayload {
    #[serde(rename = "doc-ids")]
    doc_ids: String,
}

/// Finalizes a parser's accumulated metadata buffer into the structured
/// event payload, joining each referenced `doc-ids` entry against the
/// request's knowledge-search results by `public_id`.
pub fn finalize_metadata(raw: &str, km_results: &KmSearchResponse) -> MetadataPayload {
    if let Some(json) = extract_first_json_object(raw) {
        if let Ok(payload) = serde_json::from_str::<MetaDocsPayload>(&json) {
            let items = items_for_doc_ids(payload.doc_ids.split(','), km_results);
            if !items.is_empty() {
                return MetadataPayload { items };
            }
        }
    }

    let heuristic = items_for_doc_ids(heuristic_doc_id_tokens(raw).iter().map(String::as_str), km_results);
    if !heuristic.is_empty() {
        return MetadataPayload { items: heuristic };
    }

    MetadataPayload {
        items: vec![MetadataItem {
            doc_id: "raw".to_string(),
            title: Some(raw.trim().to_string()),
            thumbnail_url: None,
            images: Vec::new(),
            navigation: None,
        }],
    }
}

fn items_for_doc_ids<'a>(
    ids: impl Iterator<Item = &'a str>,
    km_results: &KmSearchResponse,
) -> Vec<MetadataItem> {
    ids.map(str::trim)
        .filter(|id| !id.is_empty())
        .filter_map(|id| {
            km_results.find_by_public_id(id).map(|item| MetadataItem {
                doc_id: id.to_string(),
                title: item.document.title.clone(),
                thumbnail_url: None,
                images: Vec::new(),
                navigation: None,
            })
        })
        .collect()
}

fn extract_first_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0i32;
    for (offset, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// When no well-formed `{"doc-ids": "..."}` object is present, falls back
/// to scanning for bare id-shaped tokens and lets the knowledge-result
/// lookup itself reject anything that isn't a real `public_id`.
fn heuristic_doc_id_tokens(text: &str) -> Vec<String> {
    static RE: once_cell::sync::Lazy<regex::Regex> =
        once_cell::sync::Lazy::new(|| regex::Regex::new(r"[A-Za-z0-9_-]{4,}").unwrap());
    RE.find_iter(text).map(|m| m.as_str().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use answer_pipeline_core::knowledge::{KmDocument, KmSearchItem};

    fn km_with_doc1() -> KmSearchResponse {
        KmSearchResponse {
            total: 1,
            source: None,
            answers: Vec::new(),
            data: vec![KmSearchItem {
                score: Some(0.9),
                reranker_score: Some(0.9),
                document: KmDocument {
                    public_id: "doc-1".into(),
                    content: None,
                    title: Some("Hi".into()),
                    sample_questions: Vec::new(),
                    metadata: None,
                },
            }],
        }
    }

    fn feed_all(parser: &mut GeneratorParser, text: &str) -> Vec<ParserEvent> {
        let mut events = parser.feed(text);
        events.extend(parser.finalize());
        events
    }

    #[test]
    fn formatted_happy_path_routes_every_sink() {
        let mut parser = GeneratorParser::new();
        let text = "<thinking>ok</thinking><sectionA>Hello <break/> world [meta:docs] {\"doc-ids\":\"doc-1\"}</sectionA><sectionB>H. World.</sectionB>";
        let events = feed_all(&mut parser, text);

        assert_eq!(events[0], ParserEvent::Thinking("ok".into()));
        assert!(events.iter().any(|e| *e == ParserEvent::Voice("Hello <break/> world ".into())));
        assert!(events.iter().any(|e| *e == ParserEvent::Answer("H. World.".into())));

        let raw = parser.take_metadata_raw().unwrap();
        let metadata = finalize_metadata(&raw, &km_with_doc1());
        assert_eq!(metadata.items.len(), 1);
        assert_eq!(metadata.items[0].doc_id, "doc-1");
        assert_eq!(metadata.items[0].title.as_deref(), Some("Hi"));
    }

    #[test]
    fn unformatted_shape_without_tags_falls_back_to_answer() {
        let mut parser = GeneratorParser::new();
        let events = feed_all(&mut parser, "This is a perfectly ordinary untagged answer.");
        assert!(events
            .iter()
            .any(|e| matches!(e, ParserEvent::Answer(text) if text.contains("ordinary"))));
    }

    #[test]
    fn session_end_sentinel_discards_trailing_content() {
        let mut parser = GeneratorParser::new();
        let events = feed_all(
            &mut parser,
            "<sectionA>partial voice</sectionA><sectionB>done{#NXENDX#}should not appear</sectionB>",
        );
        assert!(events.contains(&ParserEvent::SessionEnded));
        assert!(parser.session_ended());
        assert!(!events.iter().any(|e| matches!(e, ParserEvent::Answer(t) if t.contains("should not appear"))));
    }

    #[test]
    fn session_end_sentinel_mid_section_a_does_not_leak_raw_tags() {
        // The sentinel lands inside SECTION_B here, but the whole chunk is
        // fed in one shot while the parser is still in State::Unknown, so
        // the section tags must be parsed out before the sentinel ever
        // truncates anything.
        let mut parser = GeneratorParser::new();
        let events = feed_all(
            &mut parser,
            "<sectionA>partial voice</sectionA><sectionB>done{#NXENDX#}should not appear</sectionB>",
        );
        assert!(events.contains(&ParserEvent::Voice("partial voice".into())));
        assert!(events.contains(&ParserEvent::Answer("done".into())));
        assert!(events.contains(&ParserEvent::SessionEnded));
        for event in &events {
            if let ParserEvent::Answer(text) = event {
                assert!(!text.contains('<'), "raw tag leaked into answer_chunk: {text:?}");
            }
        }
    }

    #[test]
    fn bracket_split_across_feeds_is_never_voiced_partially() {
        let mut parser = GeneratorParser::new();
        let mut events = parser.feed("<sectionA>no leak before [meta");
        events.extend(parser.feed(":docs] {\"doc-ids\":\"doc-1\"}</sectionA><sectionB>x</sectionB>"));
        events.extend(parser.finalize());

        for event in &events {
            if let ParserEvent::Voice(text) = event {
                assert!(!text.contains('['));
            }
        }
        assert!(parser.take_metadata_raw().is_some());
    }

    #[test]
    fn non_meta_bracket_is_treated_as_literal_answer_text() {
        let mut parser = GeneratorParser::new();
        let events = feed_all(&mut parser, "See footnote [3] for details, this sentence is plenty long.");
        let combined: String = events
            .iter()
            .filter_map(|e| match e {
                ParserEvent::Answer(t) => Some(t.clone()),
                _ => None,
            })
            .collect();
        assert!(combined.contains("[3]"));
    }
}
