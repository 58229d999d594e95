use std::sync::Arc;
use std::time::Duration;

use dreamcut_core::error::{DreamcutError, ModelError, Result};
use dreamcut_core::media::MediaType;
use dreamcut_core::model::{ChatModel, VisionModel};

use crate::provider::Provider;
use crate::replicate::{PollSettings, ReplicateVisionModel};
use crate::retry::{RetryPolicy, RetryingChatModel, RetryingVisionModel};
use crate::together::TogetherChatModel;
use crate::vision::ChatVisionModel;

/// Connection settings shared by every adapter built by the factory.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub api_key: String,
    pub base_url: Option<String>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub poll: PollSettings,
}

impl ClientSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            poll: PollSettings::default(),
        }
    }
}

/// Build a reqwest client with the configured per-call timeout.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| DreamcutError::Model(ModelError::ApiRequest(format!("http client: {e}"))))
}

fn base_url(provider: &Provider, settings: &ClientSettings) -> String {
    settings
        .base_url
        .clone()
        .unwrap_or_else(|| provider.default_base_url().to_string())
}

/// Create a ChatModel instance for the given provider.
pub fn create_chat_model(
    provider: &Provider,
    model_id: String,
    settings: &ClientSettings,
) -> Result<Arc<dyn ChatModel>> {
    if !provider.is_chat_completions() {
        return Err(DreamcutError::Model(ModelError::Unsupported(format!(
            "{provider:?} has no chat completions endpoint"
        ))));
    }
    let model = TogetherChatModel::new(settings.api_key.clone(), model_id)
        .with_base_url(base_url(provider, settings))
        .with_http_client(http_client(settings.timeout)?);
    Ok(Arc::new(RetryingChatModel::new(model, settings.retry)))
}

/// Create a VisionModel instance for the given provider and media types.
///
/// Chat-completions providers describe images only; Replicate models accept
/// whatever media types the caller declares for the slug.
pub fn create_vision_model(
    provider: &Provider,
    model_id: String,
    media_types: Vec<MediaType>,
    settings: &ClientSettings,
) -> Result<Arc<dyn VisionModel>> {
    let client = http_client(settings.timeout)?;
    match provider {
        Provider::Together | Provider::OpenAI => {
            let chat = TogetherChatModel::new(settings.api_key.clone(), model_id)
                .with_base_url(base_url(provider, settings))
                .with_http_client(client);
            Ok(Arc::new(RetryingVisionModel::new(
                ChatVisionModel::new(chat),
                settings.retry,
            )))
        }
        Provider::Replicate => {
            let model = ReplicateVisionModel::new(settings.api_key.clone(), model_id)
                .with_base_url(base_url(provider, settings))
                .with_http_client(client)
                .with_media_types(media_types)
                .with_poll_settings(settings.poll)
                .with_retry_policy(settings.retry);
            Ok(Arc::new(model))
        }
    }
}
