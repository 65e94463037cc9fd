//! The Streaming Event Bus: the single serialization point through which
//! every concurrently produced signal (status changes, validation results,
//! knowledge hits, text and audio chunks, errors) is funneled into one
//! ordered stream for the HTTP handler to drain.
//!
//! Multiple producers — the orchestrator's own task, the knowledge-search
//! fan-out tasks, the TTS synthesis call — hold clones of [`EventBus`] and
//! call `send_*` concurrently. There is exactly one consumer: the SSE
//! handler, which takes the bus's [`ReceiverStream`] once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::knowledge::KmSearchResponse;

/// Upper bound on how long a producer waits for the consumer to drain the
/// channel before giving up and dropping the event. Bounds how long a
/// pathologically stuck consumer can wedge the orchestrator task; a merely
/// slow one is backpressured within this window, not dropped.
const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(10);

/// Status values carried on `status`, `complete`, and `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Starting,
    Validating,
    SearchingKm,
    GeneratingAnswer,
    SessionEnded,
    Complete,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResultData {
    pub correction: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThinkingData {
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerChunkData {
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TtsAudioData {
    pub text: String,
    pub language: String,
    pub audio_size: usize,
    pub audio_data: String,
    pub audio_format: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioAssetData {
    pub audio_data: String,
    pub audio_size: usize,
    pub audio_format: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetadataImage {
    pub title: Option<String>,
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct MetadataPin {
    pub location: MetadataLocation,
    pub icon_url: Option<String>,
    pub rotation: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct MetadataLocation {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct MetadataNavigation {
    pub map_image_url: Option<String>,
    pub pin: Option<MetadataPin>,
    pub qr_code_url: Option<String>,
    pub client_geo_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetadataItem {
    pub doc_id: String,
    pub title: Option<String>,
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub images: Vec<MetadataImage>,
    #[serde(default)]
    pub navigation: Option<MetadataNavigation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetadataPayload {
    pub items: Vec<MetadataItem>,
}

/// The wire shape of one SSE message. `#[serde(tag = "type")]` realizes the
/// tagged-union payload table; `timestamp` and the status companion field
/// are carried on the envelope in [`Event`] rather than duplicated per
/// variant.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Status {
        status: StatusKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    ValidationResult {
        data: ValidationResultData,
    },
    KmResult {
        data: KmSearchResponse,
    },
    Thinking {
        data: ThinkingData,
    },
    AnswerChunk {
        data: AnswerChunkData,
    },
    TtsAudio {
        data: TtsAudioData,
    },
    Audio {
        data: AudioAssetData,
    },
    Metadata {
        data: MetadataPayload,
    },
    Error {
        message: String,
        status: StatusKind,
    },
    Complete {
        message: String,
        status: StatusKind,
    },
}

/// One fully timestamped message as delivered to the client.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(flatten)]
    pub kind: EventKind,
    pub timestamp: String,
}

impl Event {
    fn now(kind: EventKind) -> Self {
        Event {
            kind,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

struct EventBusInner {
    sender: mpsc::Sender<Event>,
    receiver: Mutex<Option<mpsc::Receiver<Event>>>,
    completion: Mutex<HashMap<String, bool>>,
    error_occurred: AtomicBool,
}

/// Cheaply cloneable handle shared by every producer of one request's event
/// stream. Created per request and dropped with it.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        EventBus {
            inner: Arc::new(EventBusInner {
                sender,
                receiver: Mutex::new(Some(receiver)),
                completion: Mutex::new(HashMap::new()),
                error_occurred: AtomicBool::new(false),
            }),
        }
    }

    /// Declares a subsystem that must complete before `complete` may be
    /// sent. Safe to call multiple times for the same name.
    pub fn register_component(&self, name: &str) {
        self.inner
            .completion
            .lock()
            .entry(name.to_string())
            .or_insert(false);
    }

    /// Marks a subsystem complete. Idempotent: marking an already-complete
    /// or never-registered component is a no-op registration-then-mark.
    pub fn mark_component_complete(&self, name: &str) {
        self.inner
            .completion
            .lock()
            .insert(name.to_string(), true);
    }

    /// Whether every registered component has been marked complete at
    /// least once. Vacuously true if nothing was registered.
    pub fn all_complete(&self) -> bool {
        self.inner.completion.lock().values().all(|done| *done)
    }

    /// Applies backpressure when the channel is full rather than dropping
    /// silently: a live, slow-draining consumer gets the producer to wait
    /// for it, preserving the prefix-consistent, gap-free event ordering.
    /// Only a consumer that's genuinely gone (channel closed) or pathologically
    /// stuck for longer than `ENQUEUE_TIMEOUT` results in a dropped event.
    async fn enqueue(&self, kind: EventKind) {
        let event = Event::now(kind);
        match tokio::time::timeout(ENQUEUE_TIMEOUT, self.inner.sender.send(event)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::debug!(error = %err, "event bus send failed, consumer gone");
            }
            Err(_) => {
                tracing::warn!(
                    timeout = ?ENQUEUE_TIMEOUT,
                    "event bus send timed out under sustained backpressure, dropping event"
                );
            }
        }
    }

    pub async fn send_status(&self, status: StatusKind, message: Option<String>) {
        self.enqueue(EventKind::Status { status, message }).await;
    }

    pub async fn send_validation_result(&self, correction: String, keywords: Vec<String>) {
        self.enqueue(EventKind::ValidationResult {
            data: ValidationResultData { correction, keywords },
        })
        .await;
    }

    pub async fn send_km_result(&self, data: KmSearchResponse) {
        self.enqueue(EventKind::KmResult { data }).await;
    }

    pub async fn send_thinking(&self, content: String) {
        self.enqueue(EventKind::Thinking {
            data: ThinkingData { content },
        })
        .await;
    }

    pub async fn send_answer_chunk(&self, content: String) {
        self.enqueue(EventKind::AnswerChunk {
            data: AnswerChunkData { content },
        })
        .await;
    }

    pub async fn send_tts_audio(&self, text: String, language: String, audio: &[u8]) {
        self.enqueue(EventKind::TtsAudio {
            data: TtsAudioData {
                text,
                language,
                audio_size: audio.len(),
                audio_data: base64::engine::general_purpose::STANDARD.encode(audio),
                audio_format: "raw-16khz-16bit-mono-pcm",
            },
        })
        .await;
    }

    /// Reads a bundled, prerecorded audio asset from disk and enqueues it as
    /// an `audio` event. Failure to read the asset is logged and swallowed:
    /// a missing "please wait" clip is not worth failing the request over.
    pub async fn play_audio(&self, path: &std::path::Path) {
        match std::fs::read(path) {
            Ok(bytes) => {
                self.enqueue(EventKind::Audio {
                    data: AudioAssetData {
                        audio_size: bytes.len(),
                        audio_data: base64::engine::general_purpose::STANDARD.encode(&bytes),
                        audio_format: "raw-16khz-16bit-mono-pcm",
                    },
                })
                .await
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to read bundled audio asset");
            }
        }
    }

    pub async fn send_metadata(&self, items: Vec<MetadataItem>) {
        self.enqueue(EventKind::Metadata {
            data: MetadataPayload { items },
        })
        .await;
    }

    /// Enqueues an `error` event and sets the bus's error flag, which
    /// releases the consumer via the same AND/OR termination rule as a
    /// normal completion.
    pub async fn send_error(&self, message: impl Into<String>) {
        self.inner.error_occurred.store(true, Ordering::SeqCst);
        self.enqueue(EventKind::Error {
            message: message.into(),
            status: StatusKind::Error,
        })
        .await;
    }

    pub fn has_error(&self) -> bool {
        self.inner.error_occurred.load(Ordering::SeqCst)
    }

    /// Sends the terminal `complete` event. Per the completion-registry
    /// invariant, this refuses unless every registered component is marked
    /// complete (or the bus already carries an error, in which case the
    /// orchestrator's error path has already released the consumer via
    /// `send_error` and this call is purely cosmetic).
    pub async fn send_complete(&self, message: impl Into<String>) {
        if !self.all_complete() && !self.has_error() {
            tracing::error!("send_complete called before all components finished; suppressing");
            return;
        }
        self.enqueue(EventKind::Complete {
            message: message.into(),
            status: StatusKind::Complete,
        })
        .await;
    }

    /// Takes the receiving half as a stream. Panics if called more than
    /// once; there is exactly one consumer per request.
    pub fn stream(&self) -> ReceiverStream<Event> {
        let receiver = self
            .inner
            .receiver
            .lock()
            .take()
            .expect("EventBus::stream called more than once");
        ReceiverStream::new(receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn complete_is_suppressed_until_all_components_done() {
        let bus = EventBus::new(16);
        bus.register_component("text_generation");
        bus.register_component("tts_processing");
        bus.send_complete("done").await;
        bus.mark_component_complete("text_generation");
        bus.send_complete("done").await;
        bus.mark_component_complete("tts_processing");
        bus.send_complete("done").await;

        let mut stream = bus.stream();
        drop(bus);
        let mut completes = 0;
        while let Some(event) = tokio_stream::StreamExt::next(&mut stream).await {
            if matches!(event.kind, EventKind::Complete { .. }) {
                completes += 1;
            }
        }
        assert_eq!(completes, 1);
    }

    #[tokio::test]
    async fn error_allows_complete_to_release_consumer() {
        let bus = EventBus::new(16);
        bus.register_component("text_generation");
        bus.send_error("boom").await;
        bus.send_complete("done").await;

        let events = bus.stream();
        drop(bus);
        let collected: Vec<_> = tokio_stream::StreamExt::collect(events).await;
        assert!(collected
            .iter()
            .any(|e| matches!(e.kind, EventKind::Error { .. })));
        assert!(collected
            .iter()
            .any(|e| matches!(e.kind, EventKind::Complete { .. })));
    }

    #[tokio::test]
    async fn enqueue_backpressures_instead_of_dropping_while_consumer_drains() {
        // Capacity 1, and nobody reads until after every send has been
        // issued: with try_send these would have been silently dropped.
        let bus = EventBus::new(1);
        let mut stream = bus.stream();

        let sends: Vec<_> = (0..5)
            .map(|i| {
                let bus = bus.clone();
                tokio::spawn(async move {
                    bus.send_answer_chunk(format!("chunk-{i}")).await;
                })
            })
            .collect();

        let mut received = Vec::new();
        while received.len() < 5 {
            if let Some(event) = tokio_stream::StreamExt::next(&mut stream).await {
                if let EventKind::AnswerChunk { data } = event.kind {
                    received.push(data.content);
                }
            }
        }
        for send in sends {
            send.await.unwrap();
        }
        assert_eq!(received.len(), 5);
    }

    #[test]
    fn mark_component_complete_is_idempotent() {
        let bus = EventBus::new(4);
        bus.register_component("a");
        bus.mark_component_complete("a");
        bus.mark_component_complete("a");
        assert!(bus.all_complete());
    }

    #[test]
    fn all_complete_vacuously_true_with_no_registrations() {
        let bus = EventBus::new(4);
        assert!(bus.all_complete());
    }
}
