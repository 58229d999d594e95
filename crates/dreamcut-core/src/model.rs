use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::media::MediaType;
use crate::message::{Message, UsageMetadata};

fn default_true() -> bool {
    true
}

/// Desired response format for structured output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Free-form text (default, equivalent to omitting the field).
    Text,
    /// Force JSON output (no schema).
    JsonObject,
    /// Force JSON output conforming to a schema.
    JsonSchema {
        name: String,
        schema: serde_json::Value,
        #[serde(default = "default_true")]
        strict: bool,
    },
}

/// Options controlling a ChatModel invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallOptions {
    /// Maximum tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Sampling temperature (0.0 - 2.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Stop sequences.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,

    /// Structured output format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

impl CallOptions {
    /// Options asking for a bare JSON object.
    pub fn json() -> Self {
        Self {
            response_format: Some(ResponseFormat::JsonObject),
            ..Default::default()
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f64>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Result of a chat model generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResult {
    /// The generated message.
    pub message: Message,

    /// Token usage metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageMetadata>,
}

/// Trait for hosted chat language models.
///
/// Implementations handle API communication, request formatting,
/// and response parsing for a specific model provider.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate a response for the given messages.
    async fn generate(&self, messages: &[Message], options: &CallOptions) -> Result<ChatResult>;

    /// Return the model name/identifier.
    fn model_name(&self) -> &str;
}

/// A request to describe one media asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionRequest {
    pub media_url: String,
    pub media_type: MediaType,
    pub prompt: String,
}

/// Raw text produced by a captioning/vision model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionResponse {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageMetadata>,
}

/// Trait for hosted vision / captioning models.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Describe the media behind `request.media_url`.
    async fn describe(&self, request: &VisionRequest) -> Result<VisionResponse>;

    /// Return the model name/identifier.
    fn model_name(&self) -> &str;

    /// Whether this model accepts the given media type.
    fn supports(&self, media_type: MediaType) -> bool {
        media_type == MediaType::Image
    }
}

#[async_trait]
impl<T: ChatModel + ?Sized> ChatModel for std::sync::Arc<T> {
    async fn generate(&self, messages: &[Message], options: &CallOptions) -> Result<ChatResult> {
        (**self).generate(messages, options).await
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

#[async_trait]
impl<T: VisionModel + ?Sized> VisionModel for std::sync::Arc<T> {
    async fn describe(&self, request: &VisionRequest) -> Result<VisionResponse> {
        (**self).describe(request).await
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn supports(&self, media_type: MediaType) -> bool {
        (**self).supports(media_type)
    }
}
