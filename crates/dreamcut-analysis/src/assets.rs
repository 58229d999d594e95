//! Step 2: caption every user asset concurrently.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use dreamcut_core::error::StepError;
use dreamcut_core::model::{VisionModel, VisionRequest};
use dreamcut_core::outcome::StepResult;

use crate::parser::{extract_json, f64_at, first_str, first_strings, str_at};
use crate::prompts::render_asset_prompt;
use crate::types::{AssetInput, AssetStepOptions, MediaType};

/// Quality score given to assets analyzed without a model.
const UNSCORED_QUALITY: f64 = 5.0;
/// Quality score given when a model replied in prose without a score.
const PROSE_QUALITY: f64 = 6.0;
const CAPTION_MAX_CHARS: usize = 200;

/// How an asset should be used in the final production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetRole {
    Primary,
    Supporting,
    StyleReference,
    Soundtrack,
    Unusable,
}

impl AssetRole {
    pub fn parse_label(label: &str) -> Option<Self> {
        let l = label.to_ascii_lowercase();
        if l.contains("unusable") || l.contains("discard") {
            Some(Self::Unusable)
        } else if l.contains("reference") || l.contains("style") {
            Some(Self::StyleReference)
        } else if l.contains("soundtrack") || l.contains("music") || l.contains("audio") {
            Some(Self::Soundtrack)
        } else if l.contains("primary") || l.contains("hero") || l.contains("main") {
            Some(Self::Primary)
        } else if l.contains("support") || l.contains("b-roll") || l.contains("broll") {
            Some(Self::Supporting)
        } else {
            None
        }
    }

    pub fn default_for(media_type: MediaType) -> Self {
        match media_type {
            MediaType::Video => Self::Primary,
            MediaType::Image => Self::Supporting,
            MediaType::Audio => Self::Soundtrack,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// A vision model described the asset.
    Model,
    /// No model covers the media type; the analysis comes from client metadata.
    MetadataOnly,
    /// The provider call failed.
    Failed,
}

/// Step 2 output for one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetAnalysis {
    pub asset_id: String,
    pub media_type: MediaType,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub mode: AnalysisMode,
    pub caption: String,
    pub detailed_description: String,
    /// 0.0 to 10.0.
    pub quality_score: f64,
    #[serde(default)]
    pub detected_attributes: Vec<String>,
    pub suggested_role: AssetRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    pub processing_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl AssetAnalysis {
    fn base(asset: &AssetInput, mode: AnalysisMode) -> Self {
        let (width, height) = asset.dimensions().unzip();
        Self {
            asset_id: asset.id.clone(),
            media_type: asset.media_type,
            success: mode != AnalysisMode::Failed,
            error: None,
            mode,
            caption: String::new(),
            detailed_description: String::new(),
            quality_score: 0.0,
            detected_attributes: Vec::new(),
            suggested_role: AssetRole::default_for(asset.media_type),
            duration_seconds: asset.duration_seconds(),
            width,
            height,
            processing_time_ms: 0,
            model: None,
        }
    }

    /// Placeholder for an asset whose provider call failed.
    pub fn failed(asset: &AssetInput, error: &StepError) -> Self {
        Self {
            error: Some(error.to_string()),
            suggested_role: AssetRole::Unusable,
            ..Self::base(asset, AnalysisMode::Failed)
        }
    }

    /// Analysis built from what the client told us, for media no model covers.
    pub fn metadata_only(asset: &AssetInput) -> Self {
        let caption = asset
            .user_description
            .clone()
            .or_else(|| asset.metadata.as_ref().and_then(|m| m.file_name.clone()))
            .unwrap_or_else(|| format!("{} asset {}", asset.media_type, asset.id));
        Self {
            detailed_description: caption.clone(),
            caption,
            quality_score: UNSCORED_QUALITY,
            ..Self::base(asset, AnalysisMode::MetadataOnly)
        }
    }

    /// Parse a vision model's reply. JSON replies are read field by field;
    /// prose replies become the description with a neutral score.
    pub fn from_model_reply(asset: &AssetInput, text: &str, model: &str) -> Self {
        let mut analysis = Self {
            model: Some(model.to_string()),
            ..Self::base(asset, AnalysisMode::Model)
        };

        match extract_json(text) {
            Ok(value) => {
                let description =
                    first_str(&value, &[&["description"], &["detailed_description"]]);
                let caption = first_str(&value, &[&["caption"], &["summary"]])
                    .or_else(|| description.as_deref().map(first_sentence));
                analysis.caption = caption.unwrap_or_default();
                analysis.detailed_description =
                    description.unwrap_or_else(|| analysis.caption.clone());
                analysis.quality_score = f64_at(&value, &["quality_score"])
                    .or_else(|| f64_at(&value, &["quality"]))
                    .map(normalize_score)
                    .unwrap_or(PROSE_QUALITY);
                analysis.detected_attributes = first_strings(
                    &value,
                    &[&["attributes"], &["detected_attributes"], &["tags"]],
                );
                if let Some(role) =
                    str_at(&value, &["suggested_role"]).and_then(|r| AssetRole::parse_label(&r))
                {
                    analysis.suggested_role = role;
                }
                if analysis.duration_seconds.is_none() {
                    analysis.duration_seconds =
                        f64_at(&value, &["duration_seconds"]).filter(|d| *d > 0.0);
                }
            }
            Err(_) => {
                let text = text.trim();
                analysis.caption = first_sentence(text);
                analysis.detailed_description = text.to_string();
                analysis.quality_score = PROSE_QUALITY;
            }
        }
        analysis
    }

    pub fn is_usable(&self) -> bool {
        self.success && self.suggested_role != AssetRole::Unusable
    }
}

/// Scores above 10 are read as percentages.
fn normalize_score(raw: f64) -> f64 {
    let score = if raw > 10.0 && raw <= 100.0 { raw / 10.0 } else { raw };
    score.clamp(0.0, 10.0)
}

fn first_sentence(text: &str) -> String {
    let end = text
        .find(['.', '!', '?', '\n'])
        .map(|i| i + 1)
        .unwrap_or(text.len());
    let sentence = text[..end].trim().trim_end_matches('\n');
    sentence.chars().take(CAPTION_MAX_CHARS).collect()
}

/// Aggregate statistics for a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetBatchSummary {
    pub total_assets: usize,
    pub successful_analyses: usize,
    pub failed_analyses: usize,
    /// Mean quality over successful analyses; 0 when there are none.
    pub average_quality: f64,
    pub media_type_counts: BTreeMap<MediaType, usize>,
    pub total_video_seconds: f64,
    pub total_processing_time_ms: u64,
}

impl AssetBatchSummary {
    pub fn from_analyses(analyses: &[AssetAnalysis]) -> Self {
        let successful: Vec<&AssetAnalysis> = analyses.iter().filter(|a| a.success).collect();
        let mut media_type_counts = BTreeMap::new();
        for a in analyses {
            *media_type_counts.entry(a.media_type).or_insert(0) += 1;
        }
        let average_quality = if successful.is_empty() {
            0.0
        } else {
            successful.iter().map(|a| a.quality_score).sum::<f64>() / successful.len() as f64
        };
        Self {
            total_assets: analyses.len(),
            successful_analyses: successful.len(),
            failed_analyses: analyses.len() - successful.len(),
            average_quality,
            media_type_counts,
            total_video_seconds: successful
                .iter()
                .filter(|a| a.media_type == MediaType::Video)
                .filter_map(|a| a.duration_seconds)
                .sum(),
            total_processing_time_ms: analyses.iter().map(|a| a.processing_time_ms).sum(),
        }
    }
}

/// Step 2 output: one entry per input asset, in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetBatchAnalysis {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub summary: AssetBatchSummary,
    pub analyses: Vec<AssetAnalysis>,
}

impl AssetBatchAnalysis {
    pub fn empty() -> Self {
        Self {
            success: true,
            error: None,
            summary: AssetBatchSummary::default(),
            analyses: Vec::new(),
        }
    }

    pub fn usable(&self) -> impl Iterator<Item = &AssetAnalysis> {
        self.analyses.iter().filter(|a| a.is_usable())
    }

    pub fn get(&self, asset_id: &str) -> Option<&AssetAnalysis> {
        self.analyses.iter().find(|a| a.asset_id == asset_id)
    }
}

/// Step 2 runner.
pub struct AssetAnalyzer {
    models: Vec<Arc<dyn VisionModel>>,
    max_concurrency: usize,
}

impl AssetAnalyzer {
    /// `models` are tried in order; the first that supports a media type
    /// handles every asset of that type.
    pub fn new(models: Vec<Arc<dyn VisionModel>>, max_concurrency: usize) -> Self {
        Self {
            models,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn model_for(&self, media_type: MediaType) -> Option<&Arc<dyn VisionModel>> {
        self.models.iter().find(|m| m.supports(media_type))
    }

    pub fn model_names(&self) -> Vec<String> {
        self.models.iter().map(|m| m.model_name().to_string()).collect()
    }

    /// Analyze every asset with at most `max_concurrency` provider calls in
    /// flight. `on_complete` runs once per asset as soon as it finishes.
    ///
    /// One asset's failure never affects another; the batch only fails when
    /// every asset was rejected for credentials.
    pub async fn analyze_all<F>(
        &self,
        assets: &[AssetInput],
        query: &str,
        options: &AssetStepOptions,
        on_complete: F,
    ) -> StepResult<AssetBatchAnalysis>
    where
        F: Fn(&AssetAnalysis) + Send + Sync,
    {
        if assets.is_empty() {
            return Ok(AssetBatchAnalysis::empty());
        }

        let limit = options
            .max_concurrency
            .map_or(self.max_concurrency, |n| n.clamp(1, self.max_concurrency));
        let semaphore = Semaphore::new(limit);
        let focus = options.focus.as_deref();
        let on_complete = &on_complete;
        let semaphore = &semaphore;

        let results = join_all(assets.iter().map(|asset| async move {
            let (analysis, error) = match semaphore.acquire().await {
                Ok(_permit) => self.analyze_one(asset, query, focus).await,
                Err(e) => {
                    let err = StepError::Skipped(format!("concurrency limiter closed: {e}"));
                    (AssetAnalysis::failed(asset, &err), Some(err))
                }
            };
            on_complete(&analysis);
            (analysis, error)
        }))
        .await;

        let all_auth = results
            .iter()
            .all(|(_, err)| err.as_ref().is_some_and(StepError::is_auth));
        let (analyses, _): (Vec<_>, Vec<_>) = results.into_iter().unzip();
        let summary = AssetBatchSummary::from_analyses(&analyses);

        tracing::info!(
            total = summary.total_assets,
            ok = summary.successful_analyses,
            failed = summary.failed_analyses,
            "asset batch analyzed"
        );

        if all_auth {
            return Ok(AssetBatchAnalysis {
                success: false,
                error: Some("vision provider rejected credentials for every asset".into()),
                summary,
                analyses,
            });
        }
        Ok(AssetBatchAnalysis {
            success: true,
            error: None,
            summary,
            analyses,
        })
    }

    async fn analyze_one(
        &self,
        asset: &AssetInput,
        query: &str,
        focus: Option<&str>,
    ) -> (AssetAnalysis, Option<StepError>) {
        let started = Instant::now();
        let Some(model) = self.model_for(asset.media_type) else {
            let mut analysis = AssetAnalysis::metadata_only(asset);
            analysis.processing_time_ms = started.elapsed().as_millis() as u64;
            return (analysis, None);
        };

        let request = VisionRequest {
            media_url: asset.url.clone(),
            media_type: asset.media_type,
            prompt: render_asset_prompt(asset, query, focus),
        };
        let (mut analysis, error) = match model.describe(&request).await {
            Ok(resp) => (
                AssetAnalysis::from_model_reply(asset, &resp.text, model.model_name()),
                None,
            ),
            Err(e) => {
                let err = StepError::from(e);
                tracing::warn!(asset_id = %asset.id, error = %err, "asset analysis failed");
                let mut failed = AssetAnalysis::failed(asset, &err);
                failed.model = Some(model.model_name().to_string());
                (failed, Some(err))
            }
        };
        analysis.processing_time_ms = started.elapsed().as_millis() as u64;
        (analysis, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockVisionModel;
    use crate::types::AssetMetadata;
    use dreamcut_core::error::ModelError;
    use std::sync::Mutex;
    use std::time::Duration;

    const REPLY: &str = r#"{"caption": "Neon street at night", "description": "A rain-soaked street lit by neon signs.", "quality_score": 8.5, "attributes": ["neon", "rain"], "suggested_role": "primary"}"#;

    fn asset(id: &str, url: &str, media_type: MediaType) -> AssetInput {
        AssetInput {
            id: id.into(),
            url: url.into(),
            media_type,
            user_description: None,
            metadata: None,
        }
    }

    fn video(id: &str, secs: f64) -> AssetInput {
        AssetInput {
            metadata: Some(AssetMetadata {
                duration_seconds: Some(secs),
                ..Default::default()
            }),
            ..asset(id, &format!("https://cdn.example.com/{id}.mp4"), MediaType::Video)
        }
    }

    fn analyzer(model: MockVisionModel, limit: usize) -> AssetAnalyzer {
        AssetAnalyzer::new(vec![Arc::new(model) as Arc<dyn VisionModel>], limit)
    }

    #[test]
    fn parses_json_reply() {
        let a = AssetAnalysis::from_model_reply(
            &asset("a1", "https://cdn.example.com/a.jpg", MediaType::Image),
            REPLY,
            "vision",
        );
        assert!(a.success);
        assert_eq!(a.caption, "Neon street at night");
        assert_eq!(a.quality_score, 8.5);
        assert_eq!(a.detected_attributes, vec!["neon", "rain"]);
        assert_eq!(a.suggested_role, AssetRole::Primary);
        assert_eq!(a.mode, AnalysisMode::Model);
    }

    #[test]
    fn prose_reply_becomes_description() {
        let a = AssetAnalysis::from_model_reply(
            &asset("a1", "https://cdn.example.com/a.jpg", MediaType::Image),
            "A golden retriever on a beach. The light is warm.",
            "vision",
        );
        assert_eq!(a.caption, "A golden retriever on a beach.");
        assert!(a.detailed_description.contains("warm"));
        assert_eq!(a.quality_score, PROSE_QUALITY);
        assert_eq!(a.suggested_role, AssetRole::Supporting);
    }

    #[test]
    fn percentage_scores_are_normalized() {
        assert_eq!(normalize_score(85.0), 8.5);
        assert_eq!(normalize_score(-3.0), 0.0);
        assert_eq!(normalize_score(250.0), 10.0);
    }

    #[test]
    fn role_labels() {
        assert_eq!(AssetRole::parse_label("Style reference"), Some(AssetRole::StyleReference));
        assert_eq!(AssetRole::parse_label("b-roll"), Some(AssetRole::Supporting));
        assert_eq!(AssetRole::parse_label("hero shot"), Some(AssetRole::Primary));
        assert_eq!(AssetRole::parse_label("whatever"), None);
    }

    #[test]
    fn summary_counts() {
        let ok = AssetAnalysis::from_model_reply(&video("v1", 12.0), REPLY, "vision");
        let failed = AssetAnalysis::failed(
            &video("v2", 30.0),
            &StepError::Provider(ModelError::Timeout("60s".into())),
        );
        let summary = AssetBatchSummary::from_analyses(&[ok, failed]);
        assert_eq!(summary.total_assets, 2);
        assert_eq!(summary.successful_analyses, 1);
        assert_eq!(summary.failed_analyses, 1);
        assert_eq!(summary.average_quality, 8.5);
        assert_eq!(summary.total_video_seconds, 12.0);
        assert_eq!(summary.media_type_counts.get(&MediaType::Video), Some(&2));
    }

    #[tokio::test]
    async fn empty_batch_is_successful() {
        let batch = analyzer(MockVisionModel::new(REPLY), 4)
            .analyze_all(&[], "q", &AssetStepOptions::default(), |_| {})
            .await
            .unwrap();
        assert!(batch.success);
        assert_eq!(batch.summary.total_assets, 0);
    }

    #[tokio::test]
    async fn one_failure_does_not_affect_others() {
        let assets = vec![
            asset("a1", "https://cdn.example.com/1.jpg", MediaType::Image),
            asset("a2", "https://invalid.example.com/2.jpg", MediaType::Image),
            asset("a3", "https://cdn.example.com/3.jpg", MediaType::Image),
        ];
        let batch = analyzer(MockVisionModel::new(REPLY), 4)
            .analyze_all(&assets, "q", &AssetStepOptions::default(), |_| {})
            .await
            .unwrap();

        assert!(batch.success);
        let ids: Vec<_> = batch.analyses.iter().map(|a| a.asset_id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a2", "a3"]);
        assert!(batch.analyses[0].success);
        assert!(!batch.analyses[1].success);
        assert_eq!(batch.analyses[1].quality_score, 0.0);
        assert_eq!(batch.analyses[1].suggested_role, AssetRole::Unusable);
        assert!(batch.analyses[1].error.is_some());
        assert!(batch.analyses[2].success);
        assert_eq!(batch.summary.failed_analyses, 1);
    }

    #[tokio::test]
    async fn all_auth_failures_fail_the_batch() {
        let model = MockVisionModel::new(REPLY).failing_all(ModelError::Auth("revoked".into()));
        let assets = vec![
            asset("a1", "https://cdn.example.com/1.jpg", MediaType::Image),
            asset("a2", "https://cdn.example.com/2.jpg", MediaType::Image),
        ];
        let batch = analyzer(model, 2)
            .analyze_all(&assets, "q", &AssetStepOptions::default(), |_| {})
            .await
            .unwrap();
        assert!(!batch.success);
        assert!(batch.error.is_some());
        assert_eq!(batch.analyses.len(), 2);
    }

    #[tokio::test]
    async fn non_auth_total_failure_keeps_batch_successful() {
        let assets = vec![asset("a1", "https://invalid.example.com/1.jpg", MediaType::Image)];
        let batch = analyzer(MockVisionModel::new(REPLY), 2)
            .analyze_all(&assets, "q", &AssetStepOptions::default(), |_| {})
            .await
            .unwrap();
        assert!(batch.success);
        assert_eq!(batch.summary.successful_analyses, 0);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let model = Arc::new(MockVisionModel::new(REPLY).with_delay(Duration::from_millis(20)));
        let analyzer = AssetAnalyzer::new(vec![model.clone() as Arc<dyn VisionModel>], 2);
        let assets: Vec<_> = (0..6)
            .map(|i| asset(&format!("a{i}"), &format!("https://cdn.example.com/{i}.jpg"), MediaType::Image))
            .collect();
        let batch = analyzer
            .analyze_all(&assets, "q", &AssetStepOptions::default(), |_| {})
            .await
            .unwrap();
        assert_eq!(batch.analyses.len(), 6);
        assert_eq!(model.call_count(), 6);
        assert!(model.max_in_flight() <= 2);
    }

    #[tokio::test]
    async fn request_cannot_raise_concurrency_cap() {
        let model = Arc::new(MockVisionModel::new(REPLY).with_delay(Duration::from_millis(10)));
        let analyzer = AssetAnalyzer::new(vec![model.clone() as Arc<dyn VisionModel>], 1);
        let assets: Vec<_> = (0..3)
            .map(|i| asset(&format!("a{i}"), &format!("https://cdn.example.com/{i}.jpg"), MediaType::Image))
            .collect();
        let options = AssetStepOptions {
            max_concurrency: Some(10),
            focus: None,
        };
        analyzer.analyze_all(&assets, "q", &options, |_| {}).await.unwrap();
        assert_eq!(model.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn unsupported_media_gets_metadata_only_analysis() {
        let model = MockVisionModel::new(REPLY).with_media_types(vec![MediaType::Image]);
        let mut track = asset("m1", "https://cdn.example.com/theme.mp3", MediaType::Audio);
        track.user_description = Some("synthwave theme".into());
        let batch = analyzer(model, 2)
            .analyze_all(&[track], "q", &AssetStepOptions::default(), |_| {})
            .await
            .unwrap();
        let a = &batch.analyses[0];
        assert!(a.success);
        assert_eq!(a.mode, AnalysisMode::MetadataOnly);
        assert_eq!(a.caption, "synthwave theme");
        assert_eq!(a.suggested_role, AssetRole::Soundtrack);
    }

    #[tokio::test]
    async fn on_complete_fires_once_per_asset() {
        let seen = Mutex::new(Vec::new());
        let assets = vec![
            asset("a1", "https://cdn.example.com/1.jpg", MediaType::Image),
            asset("a2", "https://invalid.example.com/2.jpg", MediaType::Image),
        ];
        analyzer(MockVisionModel::new(REPLY), 1)
            .analyze_all(&assets, "q", &AssetStepOptions::default(), |a| {
                seen.lock().unwrap().push((a.asset_id.clone(), a.success));
            })
            .await
            .unwrap();
        let mut seen = seen.into_inner().unwrap();
        seen.sort();
        assert_eq!(seen, vec![("a1".into(), true), ("a2".into(), false)]);
    }

    #[tokio::test]
    async fn metadata_duration_wins_over_model() {
        let reply = r#"{"caption": "clip", "duration_seconds": 99}"#;
        let batch = analyzer(MockVisionModel::new(reply), 1)
            .analyze_all(&[video("v1", 12.0)], "q", &AssetStepOptions::default(), |_| {})
            .await
            .unwrap();
        assert_eq!(batch.analyses[0].duration_seconds, Some(12.0));
        assert_eq!(batch.summary.total_video_seconds, 12.0);
    }
}
