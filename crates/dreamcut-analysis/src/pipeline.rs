//! The four-step orchestrator.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use dreamcut_core::error::StepError;
use dreamcut_core::model::{ChatModel, VisionModel};
use dreamcut_core::outcome::{StepReport, StepResult};

use crate::assets::{AssetAnalyzer, AssetBatchAnalysis, AssetBatchSummary};
use crate::combine::{CombinedAnalysis, Combiner};
use crate::conflicts;
use crate::fallback;
use crate::progress::{AssetProgress, NoopPublisher, ProgressEvent, ProgressPublisher, Stage};
use crate::query::{QueryAnalysis, QueryAnalyzer};
use crate::summarize::{ComprehensiveAnalysis, SummaryInput, summarize};
use crate::types::AnalysisRequest;

pub const QUERY_STEP: &str = "query_analysis";
pub const ASSET_STEP: &str = "asset_analysis";
pub const COMBINE_STEP: &str = "combination";
pub const SUMMARY_STEP: &str = "summary";

/// Models used by each step.
#[derive(Clone)]
pub struct PipelineModels {
    pub query: Arc<dyn ChatModel>,
    pub combine: Arc<dyn ChatModel>,
    /// Tried in order; the first that supports a media type handles it.
    pub vision: Vec<Arc<dyn VisionModel>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub max_concurrent_assets: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_assets: 4,
        }
    }
}

/// Model identifiers reported back to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub query: String,
    pub vision: Vec<String>,
    pub combine: String,
}

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub query_id: String,
    pub analysis: ComprehensiveAnalysis,
    pub query_analysis: QueryAnalysis,
    pub asset_batch: AssetBatchAnalysis,
    pub combined: CombinedAnalysis,
    pub steps: Vec<StepReport>,
    pub warnings: Vec<String>,
    pub elapsed_ms: u64,
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

/// Runs query analysis, asset analysis, combination and summary in order,
/// publishing progress as it goes.
///
/// Only an invalid request (or an internal inconsistency in Step 4) fails a
/// run; provider failures degrade to heuristics and rule-based fallbacks
/// that are recorded as warnings.
pub struct UnifiedAnalyzer {
    query: QueryAnalyzer,
    assets: AssetAnalyzer,
    combiner: Combiner,
    publisher: Arc<dyn ProgressPublisher>,
}

impl UnifiedAnalyzer {
    pub fn new(
        models: PipelineModels,
        config: PipelineConfig,
        publisher: Arc<dyn ProgressPublisher>,
    ) -> Self {
        Self {
            query: QueryAnalyzer::new(models.query),
            assets: AssetAnalyzer::new(models.vision, config.max_concurrent_assets),
            combiner: Combiner::new(models.combine),
            publisher,
        }
    }

    pub fn query_analyzer(&self) -> &QueryAnalyzer {
        &self.query
    }

    pub fn models(&self) -> ModelInfo {
        ModelInfo {
            query: self.query.model_name().to_string(),
            vision: self.assets.model_names(),
            combine: self.combiner.model_name().to_string(),
        }
    }

    pub async fn run(&self, query_id: &str, request: &AnalysisRequest) -> StepResult<PipelineOutput> {
        let started = Instant::now();
        let publisher: &dyn ProgressPublisher = if request.options.realtime.enabled {
            &*self.publisher
        } else {
            &NoopPublisher
        };
        let emit = |stage: Stage, message: String, progress: f32| {
            publisher.publish(query_id, ProgressEvent::new(query_id, stage, message, progress));
        };

        let total = request.assets.len();
        tracing::info!(query_id, assets = total, "analysis started");
        emit(Stage::Init, format!("Analyzing request with {total} assets"), 0.0);

        let mut steps = Vec::with_capacity(4);
        let mut warnings = Vec::new();

        // Step 1
        let t = Instant::now();
        let step1 = self
            .query
            .analyze(&request.query, &request.hints, &request.options.step1)
            .await;
        steps.push(StepReport::from_result(1, QUERY_STEP, &step1, elapsed_ms(t)));
        let query_analysis = match step1 {
            Ok(analysis) => analysis,
            Err(StepError::Validation(msg)) => {
                emit(Stage::Failed, msg.clone(), 1.0);
                return Err(StepError::Validation(msg));
            }
            Err(e) => {
                tracing::warn!(query_id, error = %e, "query analysis failed, using heuristics");
                warnings.push(format!("Query analysis fell back to keyword heuristics: {e}"));
                QueryAnalysis::heuristic(&request.query, &request.hints)
            }
        };

        // Step 2
        let t = Instant::now();
        let completed = AtomicUsize::new(0);
        let per_asset = request.options.realtime.per_asset_events;
        let step2 = self
            .assets
            .analyze_all(&request.assets, &request.query, &request.options.step2, |a| {
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if per_asset {
                    let event = ProgressEvent::new(
                        query_id,
                        Stage::Analyzing,
                        format!("Analyzed asset {} ({done}/{total})", a.asset_id),
                        0.1 + 0.6 * done as f32 / total.max(1) as f32,
                    )
                    .with_asset(AssetProgress {
                        asset_id: a.asset_id.clone(),
                        success: a.success,
                        completed: done,
                        total,
                    });
                    publisher.publish(query_id, event);
                }
            })
            .await;
        let batch = match step2 {
            Ok(batch) => batch,
            Err(e) => AssetBatchAnalysis {
                success: false,
                error: Some(e.to_string()),
                summary: AssetBatchSummary::default(),
                analyses: Vec::new(),
            },
        };
        steps.push(if request.assets.is_empty() {
            StepReport::skipped(2, ASSET_STEP, "no assets supplied")
        } else {
            StepReport {
                step: 2,
                name: ASSET_STEP.into(),
                success: batch.success,
                skipped: false,
                error: batch.error.clone(),
                duration_ms: elapsed_ms(t),
            }
        });
        for failed in batch.analyses.iter().filter(|a| !a.success) {
            warnings.push(format!(
                "Asset {} could not be analyzed: {}",
                failed.asset_id,
                failed.error.as_deref().unwrap_or("unknown error")
            ));
        }

        // Step 3
        emit(Stage::Merging, "Combining query and asset analyses".into(), 0.75);
        let t = Instant::now();
        let combined = if batch.analyses.is_empty() {
            steps.push(StepReport::skipped(3, COMBINE_STEP, "no assets supplied"));
            fallback::asset_free(&query_analysis)
        } else if !request.options.step3.enabled {
            steps.push(StepReport::skipped(3, COMBINE_STEP, "creative synthesis disabled"));
            fallback::asset_driven(
                &query_analysis,
                &batch,
                conflicts::detect(&query_analysis, &batch),
            )
        } else {
            let step3 = self
                .combiner
                .combine(&query_analysis, &batch, &request.options.step3)
                .await;
            steps.push(StepReport::from_result(3, COMBINE_STEP, &step3, elapsed_ms(t)));
            match step3 {
                Ok(combined) => combined,
                Err(e) => {
                    warnings.push(format!("Combination fell back to rule-based merge: {e}"));
                    fallback::asset_driven(
                        &query_analysis,
                        &batch,
                        conflicts::detect(&query_analysis, &batch),
                    )
                }
            }
        };

        // Step 4
        let t = Instant::now();
        let step4 = summarize(&SummaryInput {
            query_id,
            assets: &batch,
            combined: &combined,
            steps: &steps,
            warnings: &warnings,
            options: &request.options.step4,
        });
        steps.push(StepReport::from_result(4, SUMMARY_STEP, &step4, elapsed_ms(t)));
        let mut analysis = match step4 {
            Ok(analysis) => analysis,
            Err(e) => {
                tracing::error!(query_id, error = %e, "summary failed");
                emit(Stage::Failed, e.to_string(), 1.0);
                return Err(e);
            }
        };
        analysis.processing_insights.steps = steps.clone();
        analysis.processing_insights.total_processing_time_ms =
            steps.iter().map(|s| s.duration_ms).sum();

        let elapsed = elapsed_ms(started);
        tracing::info!(
            query_id,
            elapsed_ms = elapsed,
            session_mode = combined.session_mode.as_str(),
            warnings = warnings.len(),
            "analysis complete"
        );
        emit(Stage::Complete, "Analysis complete".into(), 1.0);

        Ok(PipelineOutput {
            query_id: query_id.to_string(),
            analysis,
            query_analysis,
            asset_batch: batch,
            combined,
            steps,
            warnings,
            elapsed_ms: elapsed,
        })
    }
}
