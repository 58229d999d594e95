use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{ValidationError, ValidationErrors};

use dreamcut_analysis::combine::{CreativeBrief, SessionMode};
use dreamcut_analysis::pipeline::{ModelInfo, PipelineOutput};
use dreamcut_analysis::progress::channel_name;
use dreamcut_analysis::summarize::ComprehensiveAnalysis;
use dreamcut_analysis::types::{
    AnalysisOptions, AnalysisRequest, AssetInput, QueryHints, RequestLimits,
};
use dreamcut_core::outcome::StepReport;

use crate::store::BriefRecord;

/// Request bodies that are checked against the configured limits after
/// deserialization.
pub trait CheckedRequest {
    fn check(&self, limits: &RequestLimits) -> Result<(), ValidationErrors>;
}

impl CheckedRequest for AnalysisRequest {
    fn check(&self, limits: &RequestLimits) -> Result<(), ValidationErrors> {
        self.validate_with(limits)
    }
}

// --- Query analyzer (legacy) ---

/// Legacy body: hints sit at the top level next to the query.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryAnalyzerRequest {
    pub query: String,
    #[serde(default)]
    pub assets: Vec<AssetInput>,
    #[serde(flatten)]
    pub hints: QueryHints,
    #[serde(default)]
    pub options: AnalysisOptions,
}

impl QueryAnalyzerRequest {
    pub fn into_request(self) -> AnalysisRequest {
        AnalysisRequest::new(self.query, self.assets)
            .with_hints(self.hints)
            .with_options(self.options)
    }
}

impl CheckedRequest for QueryAnalyzerRequest {
    fn check(&self, limits: &RequestLimits) -> Result<(), ValidationErrors> {
        self.clone().into_request().validate_with(limits)
    }
}

/// The stored brief as the legacy endpoint reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BriefView {
    pub id: String,
    pub query_id: String,
    pub session_mode: SessionMode,
    pub creative_brief: CreativeBrief,
    pub created_at: DateTime<Utc>,
}

impl BriefView {
    pub fn new(record: &BriefRecord, analysis: &ComprehensiveAnalysis) -> Self {
        Self {
            id: record.id.clone(),
            query_id: record.query_id.clone(),
            session_mode: record.session_mode,
            creative_brief: analysis.brief.clone(),
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryAnalyzerResponse {
    pub success: bool,
    pub brief: BriefView,
    pub analysis: ComprehensiveAnalysis,
    pub metadata: ResponseMetadata,
}

// --- Unified analyzer ---

#[derive(Debug, Serialize, Deserialize)]
pub struct UnifiedAnalyzerResponse {
    pub success: bool,
    pub brief_id: String,
    pub analysis: ComprehensiveAnalysis,
    pub steps: Vec<StepReport>,
    pub warnings: Vec<String>,
    pub metadata: ResponseMetadata,
}

// --- Realtime analyzer ---

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeAnalyzerRequest {
    #[serde(flatten)]
    pub request: AnalysisRequest,
    pub user_id: String,
    #[serde(default)]
    pub query_id: Option<String>,
}

impl CheckedRequest for RealtimeAnalyzerRequest {
    fn check(&self, limits: &RequestLimits) -> Result<(), ValidationErrors> {
        let mut errors = match self.request.validate_with(limits) {
            Ok(()) => ValidationErrors::new(),
            Err(e) => e,
        };
        if self.user_id.trim().is_empty() {
            let mut err = ValidationError::new("required");
            err.message = Some("user_id must not be empty".into());
            errors.add("user_id", err);
        }
        if let Some(id) = &self.query_id {
            let valid = !id.is_empty()
                && id.len() <= 128
                && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !valid {
                let mut err = ValidationError::new("format");
                err.message = Some("query_id must be 1-128 letters, digits, '-' or '_'".into());
                errors.add("query_id", err);
            }
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RealtimeSubscription {
    pub channel: String,
    pub events: Vec<String>,
    pub stream_url: String,
}

impl RealtimeSubscription {
    pub fn for_query(query_id: &str) -> Self {
        Self {
            channel: channel_name(query_id),
            events: ["init", "analyzing", "merging", "complete", "failed"]
                .into_iter()
                .map(String::from)
                .collect(),
            stream_url: format!("/api/realtime/{query_id}/events"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RealtimeAnalyzerResponse {
    pub success: bool,
    pub query_id: String,
    pub request_id: String,
    pub status_url: String,
    pub realtime_subscription: RealtimeSubscription,
}

// --- Shared ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub request_id: String,
    pub query_id: String,
    pub processing_time_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub session_mode: SessionMode,
    pub models: ModelInfo,
}

impl ResponseMetadata {
    pub fn new(request_id: &str, output: &PipelineOutput, models: ModelInfo) -> Self {
        Self {
            request_id: request_id.to_string(),
            query_id: output.query_id.clone(),
            processing_time_ms: output.elapsed_ms,
            timestamp: Utc::now(),
            session_mode: output.analysis.session_mode,
            models,
        }
    }
}

/// Static description returned by `GET` on each analyzer route.
#[derive(Debug, Serialize, Deserialize)]
pub struct Capabilities {
    pub endpoint: String,
    pub method: String,
    pub description: String,
    pub steps: Vec<String>,
    pub media_types: Vec<String>,
    pub limits: CapabilityLimits,
    pub models: ModelInfo,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CapabilityLimits {
    pub max_assets: usize,
    pub max_query_chars: usize,
    pub max_concurrent_assets: usize,
}
