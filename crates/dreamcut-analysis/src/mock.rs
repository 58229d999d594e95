//! In-process model and publisher doubles for tests and local runs.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use dreamcut_core::error::{DreamcutError, ModelError, Result};
use dreamcut_core::media::MediaType;
use dreamcut_core::message::{Message, UsageMetadata};
use dreamcut_core::model::{
    CallOptions, ChatModel, ChatResult, VisionModel, VisionRequest, VisionResponse,
};

use crate::progress::{ProgressEvent, ProgressPublisher};

/// A mock ChatModel that returns preset responses and tracks call counts.
pub struct MockChatModel {
    name: String,
    responses: Vec<String>,
    error: Option<ModelError>,
    call_count: AtomicUsize,
}

impl MockChatModel {
    /// Create a `MockChatModel` that cycles through the given responses.
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            name: "mock-chat".into(),
            responses,
            error: None,
            call_count: AtomicUsize::new(0),
        }
    }

    /// Create a `MockChatModel` that always returns the same response.
    pub fn with_response(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    /// Create a `MockChatModel` whose every call fails with `error`.
    pub fn failing(error: ModelError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(Vec::new())
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Get the number of times this model has been invoked.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn generate(&self, _messages: &[Message], _options: &CallOptions) -> Result<ChatResult> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        if let Some(err) = &self.error {
            return Err(DreamcutError::Model(err.clone()));
        }
        if self.responses.is_empty() {
            return Err(DreamcutError::Model(ModelError::InvalidResponse(
                "mock has no responses".into(),
            )));
        }
        let response = &self.responses[idx % self.responses.len()];
        Ok(ChatResult {
            message: Message::ai(response.clone()),
            usage: Some(UsageMetadata {
                input_tokens: 10,
                output_tokens: 10,
                total_tokens: 20,
            }),
        })
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

/// A mock VisionModel. Requests whose URL contains any of the configured
/// failure markers (default `"invalid"`) fail with the configured error.
pub struct MockVisionModel {
    name: String,
    response: String,
    media_types: Vec<MediaType>,
    fail_markers: Vec<String>,
    failure: ModelError,
    delay: Duration,
    call_count: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockVisionModel {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            name: "mock-vision".into(),
            response: response.into(),
            media_types: vec![MediaType::Image, MediaType::Video, MediaType::Audio],
            fail_markers: vec!["invalid".into()],
            failure: ModelError::ApiRequest("HTTP 404 Not Found: media could not be fetched".into()),
            delay: Duration::ZERO,
            call_count: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_media_types(mut self, media_types: Vec<MediaType>) -> Self {
        self.media_types = media_types;
        self
    }

    /// Fail every request whose URL contains `marker`.
    pub fn failing_on(mut self, marker: impl Into<String>) -> Self {
        self.fail_markers.push(marker.into());
        self
    }

    /// Fail every request with `error`.
    pub fn failing_all(mut self, error: ModelError) -> Self {
        self.fail_markers = vec![String::new()];
        self.failure = error;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Highest number of `describe` calls observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionModel for MockVisionModel {
    async fn describe(&self, request: &VisionRequest) -> Result<VisionResponse> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self
            .fail_markers
            .iter()
            .any(|m| request.media_url.contains(m.as_str()))
        {
            return Err(DreamcutError::Model(self.failure.clone()));
        }
        Ok(VisionResponse {
            text: self.response.clone(),
            usage: None,
        })
    }

    fn model_name(&self) -> &str {
        &self.name
    }

    fn supports(&self, media_type: MediaType) -> bool {
        self.media_types.contains(&media_type)
    }
}

/// A publisher that keeps every event in memory.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl ProgressPublisher for RecordingPublisher {
    fn publish(&self, _query_id: &str, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
