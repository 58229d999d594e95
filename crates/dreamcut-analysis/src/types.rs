//! Request-side data model shared by every pipeline step.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

pub use dreamcut_core::media::MediaType;

/// Optional technical metadata the client already knows about an asset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct AssetMetadata {
    #[serde(default, alias = "duration", alias = "durationSeconds")]
    #[validate(range(min = 0.0))]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default, alias = "fileName", alias = "filename")]
    pub file_name: Option<String>,
    #[serde(default, alias = "mimeType")]
    pub mime_type: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// One user-supplied media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct AssetInput {
    #[validate(length(min = 1, max = 128))]
    pub id: String,
    #[validate(url)]
    pub url: String,
    #[serde(alias = "mediaType", alias = "type")]
    pub media_type: MediaType,
    #[serde(default, alias = "userDescription", skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 2000))]
    pub user_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub metadata: Option<AssetMetadata>,
}

impl AssetInput {
    pub fn duration_seconds(&self) -> Option<f64> {
        self.metadata.as_ref().and_then(|m| m.duration_seconds)
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        let m = self.metadata.as_ref()?;
        match (m.width, m.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        }
    }
}

/// Style preferences supplied alongside the query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub style: Vec<String>,
    #[serde(default)]
    pub mood: Vec<String>,
    #[serde(default, alias = "aspectRatio")]
    pub aspect_ratio: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
}

/// Explicit hints that override what Step 1 infers from the query text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct QueryHints {
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default, alias = "outputImages")]
    #[validate(range(min = 1, max = 100))]
    pub output_images: Option<u32>,
    #[serde(default, alias = "outputVideoSeconds")]
    #[validate(range(min = 1.0, max = 3600.0))]
    pub output_video_seconds: Option<f64>,
    #[serde(default)]
    pub preferences: Option<Preferences>,
    #[serde(default, alias = "budgetCredits")]
    pub budget_credits: Option<u32>,
}

fn default_true() -> bool {
    true
}

fn default_max_options() -> usize {
    3
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryStepOptions {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetStepOptions {
    /// Upper bound on concurrent provider calls; never raises the server cap.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    /// Extra instruction for the captioning prompt ("lighting", "faces", ...).
    #[serde(default)]
    pub focus: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombineStepOptions {
    /// When false the LLM synthesis is skipped and only the rule-based merge runs.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub temperature: Option<f64>,
}

impl Default for CombineStepOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryStepOptions {
    #[serde(default = "default_max_options")]
    pub max_creative_options: usize,
}

impl Default for SummaryStepOptions {
    fn default() -> Self {
        Self {
            max_creative_options: default_max_options(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeOptions {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub per_asset_events: bool,
}

impl Default for RealtimeOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            per_asset_events: true,
        }
    }
}

/// Nested per-step configuration carried by a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    #[serde(default)]
    pub step1: QueryStepOptions,
    #[serde(default)]
    pub step2: AssetStepOptions,
    #[serde(default)]
    pub step3: CombineStepOptions,
    #[serde(default)]
    pub step4: SummaryStepOptions,
    #[serde(default)]
    pub realtime: RealtimeOptions,
}

fn validate_query_text(query: &str) -> Result<(), ValidationError> {
    if query.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("query must contain non-whitespace text".into());
        return Err(err);
    }
    Ok(())
}

/// One analysis request, immutable once it enters the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct AnalysisRequest {
    #[validate(length(min = 1), custom(function = "validate_query_text"))]
    pub query: String,
    #[serde(default)]
    #[validate(nested)]
    pub assets: Vec<AssetInput>,
    #[serde(default)]
    pub options: AnalysisOptions,
    #[serde(default)]
    #[validate(nested)]
    pub hints: QueryHints,
}

/// Server-configured limits checked on top of the static field rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLimits {
    pub max_query_chars: usize,
    pub max_assets: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_query_chars: 8000,
            max_assets: 20,
        }
    }
}

impl AnalysisRequest {
    pub fn new(query: impl Into<String>, assets: Vec<AssetInput>) -> Self {
        Self {
            query: query.into(),
            assets,
            options: AnalysisOptions::default(),
            hints: QueryHints::default(),
        }
    }

    pub fn with_hints(mut self, hints: QueryHints) -> Self {
        self.hints = hints;
        self
    }

    pub fn with_options(mut self, options: AnalysisOptions) -> Self {
        self.options = options;
        self
    }

    /// Run the derive rules plus the configured limits and id uniqueness.
    pub fn validate_with(&self, limits: &RequestLimits) -> Result<(), ValidationErrors> {
        let mut errors = match self.validate() {
            Ok(()) => ValidationErrors::new(),
            Err(e) => e,
        };

        if self.query.chars().count() > limits.max_query_chars {
            let mut err = ValidationError::new("length");
            err.message = Some(
                format!("query exceeds {} characters", limits.max_query_chars).into(),
            );
            errors.add("query", err);
        }

        if self.assets.len() > limits.max_assets {
            let mut err = ValidationError::new("length");
            err.message = Some(format!("at most {} assets are accepted", limits.max_assets).into());
            errors.add("assets", err);
        }

        let mut seen = HashSet::new();
        if let Some(dup) = self.assets.iter().find(|a| !seen.insert(a.id.as_str())) {
            let mut err = ValidationError::new("unique");
            err.message = Some(format!("duplicate asset id '{}'", dup.id).into());
            errors.add("assets", err);
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}
