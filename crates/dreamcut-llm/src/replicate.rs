//! Replicate predictions API integration for captioning models.
//!
//! A prediction is created, then polled until it reaches a terminal
//! status. Output is either a string or a list of streamed string chunks.
//!
//! Retries apply to each HTTP call, never to the whole describe: a failed
//! poll resumes the same prediction instead of enqueueing a new one.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use dreamcut_core::error::{DreamcutError, ModelError, Result};
use dreamcut_core::media::MediaType;
use dreamcut_core::model::{VisionModel, VisionRequest, VisionResponse};

use crate::provider::Provider;
use crate::retry::{RetryPolicy, with_retry};
use crate::together::{status_error, transport_error};

#[derive(Debug, Serialize)]
pub struct PredictionRequest {
    pub input: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

impl PredictionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PredictionStatus::Succeeded | PredictionStatus::Failed | PredictionStatus::Canceled
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub status: PredictionStatus,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl Prediction {
    /// Flatten the prediction output into a single text.
    pub fn output_text(&self) -> Option<String> {
        match self.output.as_ref()? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .concat(),
            ),
            serde_json::Value::Object(map) => map
                .get("caption")
                .or_else(|| map.get("text"))
                .or_else(|| map.get("transcription"))
                .and_then(|v| v.as_str())
                .map(String::from),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// Polling behaviour for a queued prediction.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_polls: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            max_polls: 120,
        }
    }
}

pub struct ReplicateVisionModel {
    api_token: String,
    model: String,
    base_url: String,
    media_types: Vec<MediaType>,
    poll: PollSettings,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl ReplicateVisionModel {
    /// `model` is an `owner/name` Replicate model slug.
    pub fn new(api_token: String, model: String) -> Self {
        Self {
            api_token,
            model,
            base_url: Provider::Replicate.default_base_url().into(),
            media_types: vec![MediaType::Image],
            poll: PollSettings::default(),
            retry: RetryPolicy::none(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_media_types(mut self, media_types: Vec<MediaType>) -> Self {
        self.media_types = media_types;
        self
    }

    pub fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn build_input(&self, request: &VisionRequest) -> PredictionRequest {
        let mut input = serde_json::Map::new();
        input.insert(
            request.media_type.as_str().to_string(),
            serde_json::Value::String(request.media_url.clone()),
        );
        if request.media_type != MediaType::Audio {
            input.insert(
                "prompt".into(),
                serde_json::Value::String(request.prompt.clone()),
            );
        }
        PredictionRequest { input }
    }

    async fn create_prediction(&self, body: &PredictionRequest) -> Result<Prediction> {
        let url = format!("{}/v1/models/{}/predictions", self.base_url, self.model);
        with_retry(self.retry, || self.send_create(&url, body)).await
    }

    async fn send_create(&self, url: &str, body: &PredictionRequest) -> Result<Prediction> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_token)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        Self::decode(response).await
    }

    async fn get_prediction(&self, id: &str) -> Result<Prediction> {
        let url = format!("{}/v1/predictions/{}", self.base_url, id);
        with_retry(self.retry, || self.send_get(&url)).await
    }

    async fn send_get(&self, url: &str) -> Result<Prediction> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(transport_error)?;
        Self::decode(response).await
    }

    async fn decode(response: reqwest::Response) -> Result<Prediction> {
        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read response body".into());
            return Err(status_error(status, &headers, body));
        }
        response
            .json()
            .await
            .map_err(|e| DreamcutError::Model(ModelError::InvalidResponse(e.to_string())))
    }

    async fn wait_for(&self, mut prediction: Prediction) -> Result<Prediction> {
        let mut polls = 0;
        while !prediction.status.is_terminal() {
            if polls >= self.poll.max_polls {
                return Err(DreamcutError::Model(ModelError::Stalled(format!(
                    "prediction {} still {:?} after {} polls",
                    prediction.id, prediction.status, polls
                ))));
            }
            tokio::time::sleep(self.poll.interval).await;
            prediction = self.get_prediction(&prediction.id).await?;
            polls += 1;
        }
        Ok(prediction)
    }
}

#[async_trait]
impl VisionModel for ReplicateVisionModel {
    async fn describe(&self, request: &VisionRequest) -> Result<VisionResponse> {
        if !self.supports(request.media_type) {
            return Err(DreamcutError::Model(ModelError::Unsupported(format!(
                "{} does not accept {} input",
                self.model, request.media_type
            ))));
        }

        let created = self.create_prediction(&self.build_input(request)).await?;
        tracing::debug!(prediction = %created.id, model = %self.model, "prediction queued");
        let finished = self.wait_for(created).await?;

        match finished.status {
            PredictionStatus::Succeeded => {
                let text = finished.output_text().ok_or_else(|| {
                    DreamcutError::Model(ModelError::InvalidResponse(format!(
                        "prediction {} succeeded without output",
                        finished.id
                    )))
                })?;
                Ok(VisionResponse { text, usage: None })
            }
            status => {
                let reason = finished
                    .error
                    .as_ref()
                    .map(|e| e.as_str().map(String::from).unwrap_or_else(|| e.to_string()))
                    .unwrap_or_else(|| "no error detail".into());
                Err(DreamcutError::Model(ModelError::ApiRequest(format!(
                    "prediction {} {:?}: {}",
                    finished.id, status, reason
                ))))
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn supports(&self, media_type: MediaType) -> bool {
        self.media_types.contains(&media_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(media_type: MediaType) -> VisionRequest {
        VisionRequest {
            media_url: "https://cdn.example.com/clip".into(),
            media_type,
            prompt: "Describe the shot".into(),
        }
    }

    #[test]
    fn build_input_keys_by_media_type() {
        let model = ReplicateVisionModel::new("tok".into(), "lucataco/video-llava".into())
            .with_media_types(vec![MediaType::Video]);
        let body = model.build_input(&request(MediaType::Video));
        assert_eq!(body.input["video"], "https://cdn.example.com/clip");
        assert_eq!(body.input["prompt"], "Describe the shot");
    }

    #[test]
    fn audio_input_has_no_prompt() {
        let model = ReplicateVisionModel::new("tok".into(), "openai/whisper".into());
        let body = model.build_input(&request(MediaType::Audio));
        assert!(body.input.contains_key("audio"));
        assert!(!body.input.contains_key("prompt"));
    }

    #[test]
    fn output_text_variants() {
        let p: Prediction = serde_json::from_str(
            r#"{"id":"a","status":"succeeded","output":["A neon ", "city at night"]}"#,
        )
        .unwrap();
        assert_eq!(p.output_text().as_deref(), Some("A neon city at night"));

        let p: Prediction =
            serde_json::from_str(r#"{"id":"b","status":"succeeded","output":"a cat"}"#).unwrap();
        assert_eq!(p.output_text().as_deref(), Some("a cat"));

        let p: Prediction = serde_json::from_str(
            r#"{"id":"c","status":"succeeded","output":{"transcription":"hello"}}"#,
        )
        .unwrap();
        assert_eq!(p.output_text().as_deref(), Some("hello"));

        let p: Prediction = serde_json::from_str(r#"{"id":"d","status":"processing"}"#).unwrap();
        assert!(p.output_text().is_none());
        assert!(!p.status.is_terminal());
    }

    #[tokio::test]
    async fn unsupported_media_type_rejected_without_request() {
        let model = ReplicateVisionModel::new("tok".into(), "lucataco/llava-13b".into())
            .with_base_url("http://127.0.0.1:1");
        let err = model.describe(&request(MediaType::Audio)).await.unwrap_err();
        assert!(matches!(err, DreamcutError::Model(ModelError::Unsupported(_))));
    }
}
