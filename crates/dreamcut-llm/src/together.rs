//! Together AI chat completions (OpenAI-compatible) integration.

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

use dreamcut_core::error::{DreamcutError, ModelError, Result};
use dreamcut_core::message::{AIContent, ContentPart, Message, MessageContent, UsageMetadata};
use dreamcut_core::model::{CallOptions, ChatModel, ChatResult, ResponseFormat};

use crate::provider::Provider;

// ---------------------------------------------------------------------------
// Chat completions request/response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<CompletionMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<CompletionResponseFormat>,
}

#[derive(Debug, Serialize)]
pub struct CompletionResponseFormat {
    #[serde(rename = "type")]
    pub format_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<CompletionJsonSchema>,
}

#[derive(Debug, Serialize)]
pub struct CompletionJsonSchema {
    pub name: String,
    pub schema: serde_json::Value,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub strict: bool,
}

#[derive(Debug, Serialize)]
pub struct CompletionMessage {
    pub role: String,
    pub content: CompletionContent,
}

/// Text-only or multimodal parts array.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum CompletionContent {
    Text(String),
    Parts(Vec<CompletionContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum CompletionContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: CompletionImageUrl },
}

#[derive(Debug, Serialize)]
pub struct CompletionImageUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompletionResponse {
    pub choices: Vec<CompletionChoice>,
    pub usage: Option<CompletionUsage>,
}

#[derive(Debug, Deserialize)]
pub struct CompletionChoice {
    pub message: CompletionResponseMessage,
}

#[derive(Debug, Deserialize)]
pub struct CompletionResponseMessage {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompletionUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorDetail {
    pub message: String,
}

// ---------------------------------------------------------------------------
// Conversion helpers
// ---------------------------------------------------------------------------

pub fn message_content_to_completion(mc: &MessageContent) -> CompletionContent {
    match mc {
        MessageContent::Text(s) => CompletionContent::Text(s.clone()),
        MessageContent::Parts(parts) => CompletionContent::Parts(
            parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => CompletionContentPart::Text { text: text.clone() },
                    ContentPart::Image { url, detail } => CompletionContentPart::ImageUrl {
                        image_url: CompletionImageUrl {
                            url: url.clone(),
                            detail: detail.clone(),
                        },
                    },
                })
                .collect(),
        ),
    }
}

/// Map a transport-level reqwest failure onto the model error taxonomy.
pub(crate) fn transport_error(err: reqwest::Error) -> DreamcutError {
    if err.is_timeout() {
        DreamcutError::Model(ModelError::Timeout(err.to_string()))
    } else if err.is_connect() {
        DreamcutError::Model(ModelError::ApiRequest(format!("connect: {err}")))
    } else {
        DreamcutError::Model(ModelError::ApiRequest(err.to_string()))
    }
}

fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Map a non-success HTTP status and body onto the model error taxonomy.
pub(crate) fn status_error(status: StatusCode, headers: &HeaderMap, body: String) -> DreamcutError {
    let error_msg = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|e| e.error.message)
        .or_else(|_| {
            serde_json::from_str::<serde_json::Value>(&body).map(|v| {
                v.get("detail")
                    .and_then(|d| d.as_str())
                    .map(String::from)
                    .unwrap_or_else(|| body.clone())
            })
        })
        .unwrap_or(body);
    DreamcutError::Model(match status.as_u16() {
        401 | 403 => ModelError::Auth(error_msg),
        429 => ModelError::RateLimited {
            retry_after_secs: retry_after_secs(headers),
        },
        408 | 504 => ModelError::Timeout(format!("HTTP {status}: {error_msg}")),
        _ => ModelError::ApiRequest(format!("HTTP {status}: {error_msg}")),
    })
}

// ---------------------------------------------------------------------------
// TogetherChatModel
// ---------------------------------------------------------------------------

pub struct TogetherChatModel {
    api_key: String,
    model_id: String,
    base_url: String,
    client: reqwest::Client,
}

impl TogetherChatModel {
    pub fn new(api_key: String, model_id: String) -> Self {
        Self {
            api_key,
            model_id,
            base_url: Provider::Together.default_base_url().into(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the client at another OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    pub fn build_request(&self, messages: &[Message], options: &CallOptions) -> CompletionRequest {
        let api_messages = messages
            .iter()
            .map(|msg| match msg {
                Message::System { content } => CompletionMessage {
                    role: "system".into(),
                    content: CompletionContent::Text(content.clone()),
                },
                Message::User { content } => CompletionMessage {
                    role: "user".into(),
                    content: message_content_to_completion(content),
                },
                Message::AI(ai) => CompletionMessage {
                    role: "assistant".into(),
                    content: CompletionContent::Text(ai.content.clone()),
                },
            })
            .collect();

        let response_format = match &options.response_format {
            Some(ResponseFormat::JsonObject) => Some(CompletionResponseFormat {
                format_type: "json_object".into(),
                json_schema: None,
            }),
            Some(ResponseFormat::JsonSchema {
                name,
                schema,
                strict,
            }) => Some(CompletionResponseFormat {
                format_type: "json_schema".into(),
                json_schema: Some(CompletionJsonSchema {
                    name: name.clone(),
                    schema: schema.clone(),
                    strict: *strict,
                }),
            }),
            Some(ResponseFormat::Text) | None => None,
        };

        CompletionRequest {
            model: self.model_id.clone(),
            messages: api_messages,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            stop: if options.stop.is_empty() {
                None
            } else {
                Some(options.stop.clone())
            },
            response_format,
        }
    }
}

#[async_trait]
impl ChatModel for TogetherChatModel {
    async fn generate(&self, messages: &[Message], options: &CallOptions) -> Result<ChatResult> {
        let request_body = self.build_request(messages, options);

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read response body".into());
            tracing::warn!(model = %self.model_id, %status, "chat completion rejected");
            return Err(status_error(status, &headers, body));
        }

        let api_response: CompletionResponse = response
            .json()
            .await
            .map_err(|e| DreamcutError::Model(ModelError::InvalidResponse(e.to_string())))?;

        let text = api_response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| {
                DreamcutError::Model(ModelError::InvalidResponse(
                    "response contained no message content".into(),
                ))
            })?;

        let usage = api_response.usage.map(|u| UsageMetadata {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            total_tokens: if u.total_tokens > 0 {
                u.total_tokens
            } else {
                u.prompt_tokens + u.completion_tokens
            },
        });

        Ok(ChatResult {
            message: Message::AI(AIContent {
                content: text,
                usage: usage.clone(),
            }),
            usage,
        })
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}
