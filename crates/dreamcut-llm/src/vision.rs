use async_trait::async_trait;

use dreamcut_core::error::{DreamcutError, ModelError, Result};
use dreamcut_core::media::MediaType;
use dreamcut_core::message::{ContentPart, Message};
use dreamcut_core::model::{CallOptions, ChatModel, VisionModel, VisionRequest, VisionResponse};

/// Adapts a vision-capable chat model to the `VisionModel` trait.
///
/// The asset URL is sent as an `image_url` content part next to the prompt.
pub struct ChatVisionModel<M: ChatModel> {
    model: M,
    options: CallOptions,
}

impl<M: ChatModel> ChatVisionModel<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            options: CallOptions {
                max_tokens: Some(1024),
                temperature: Some(0.2),
                ..Default::default()
            },
        }
    }

    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build_messages(request: &VisionRequest) -> Vec<Message> {
        vec![Message::user_with_parts(vec![
            ContentPart::Text {
                text: request.prompt.clone(),
            },
            ContentPart::Image {
                url: request.media_url.clone(),
                detail: Some("high".into()),
            },
        ])]
    }
}

#[async_trait]
impl<M: ChatModel + 'static> VisionModel for ChatVisionModel<M> {
    async fn describe(&self, request: &VisionRequest) -> Result<VisionResponse> {
        if !self.supports(request.media_type) {
            return Err(DreamcutError::Model(ModelError::Unsupported(format!(
                "{} only describes images, got {}",
                self.model.model_name(),
                request.media_type
            ))));
        }
        let messages = Self::build_messages(request);
        let result = self.model.generate(&messages, &self.options).await?;
        Ok(VisionResponse {
            text: result.message.text(),
            usage: result.usage,
        })
    }

    fn model_name(&self) -> &str {
        self.model.model_name()
    }

    fn supports(&self, media_type: MediaType) -> bool {
        media_type == MediaType::Image
    }
}
