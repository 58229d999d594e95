//! Step 4: fold every earlier output into the client-facing comprehensive
//! analysis. Pure and deterministic: the same inputs always serialize to
//! the same bytes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use dreamcut_core::error::StepError;
use dreamcut_core::outcome::{StepReport, StepResult};

use crate::assets::{AssetAnalysis, AssetBatchAnalysis, AssetRole};
use crate::combine::{AssetPlan, CombinedAnalysis, CreativeBrief, SessionMode};
use crate::conflicts::{Conflict, DEFAULT_VIDEO_SECONDS, Resolution, ResolutionAction};
use crate::query::OutputType;
use crate::types::{MediaType, SummaryStepOptions};

/// Credit costs of the downstream production services.
pub mod credits {
    pub const VIDEO_PER_SECOND: u32 = 2;
    pub const PER_IMAGE: u32 = 4;
    /// Charged per started 10 seconds of narration.
    pub const VOICEOVER_PER_10_SECONDS: u32 = 1;
    pub const SCRIPT: u32 = 5;
    pub const EDITING: u32 = 3;

    // `as` saturates on out-of-range floats; the multiplications must too.
    pub fn video(seconds: f64) -> u32 {
        (seconds.max(0.0).ceil() as u32).saturating_mul(VIDEO_PER_SECOND)
    }

    pub fn images(count: u32) -> u32 {
        count.saturating_mul(PER_IMAGE)
    }

    pub fn voiceover(seconds: f64) -> u32 {
        ((seconds.max(0.0) / 10.0).ceil() as u32).saturating_mul(VOICEOVER_PER_10_SECONDS)
    }

    pub fn total(amounts: impl IntoIterator<Item = u32>) -> u32 {
        amounts.into_iter().fold(0, u32::saturating_add)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetUtilization {
    pub total_assets: usize,
    pub analyzed_assets: usize,
    pub utilized_assets: usize,
    pub reference_only: usize,
    pub unusable: usize,
    /// utilized / total, 0 when there are no assets.
    pub utilization_rate: f64,
}

impl AssetUtilization {
    pub fn from_plan(plan: &[AssetPlan], assets: &AssetBatchAnalysis) -> Self {
        let count = |pred: fn(&AssetPlan) -> bool| plan.iter().filter(|p| pred(p)).count();
        let total_assets = assets.summary.total_assets;
        let utilized_assets = count(|p| {
            !matches!(p.role, AssetRole::Unusable | AssetRole::StyleReference) && p.utilization > 0.0
        });
        Self {
            total_assets,
            analyzed_assets: assets.summary.successful_analyses,
            utilized_assets,
            reference_only: count(|p| p.role == AssetRole::StyleReference),
            unusable: count(|p| p.role == AssetRole::Unusable),
            utilization_rate: if total_assets == 0 {
                0.0
            } else {
                utilized_assets as f64 / total_assets as f64
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalUnderstanding {
    pub user_intent: String,
    pub goal: String,
    pub output_type: OutputType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_images: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    pub core_concept: String,
    pub style: Vec<String>,
    pub mood: Vec<String>,
    pub asset_utilization: AssetUtilization,
    pub conflicts: Vec<Conflict>,
    pub resolutions: Vec<Resolution>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductionStage {
    Script,
    AssetPreparation,
    ImageGeneration,
    VideoGeneration,
    Voiceover,
    Editing,
}

/// One recommended downstream production step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStep {
    pub order: u32,
    pub stage: ProductionStage,
    pub description: String,
    pub estimated_credits: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRecommendations {
    pub steps: Vec<PipelineStep>,
    pub estimated_total_credits: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_credits: Option<u32>,
    pub within_budget: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreativeOption {
    pub id: String,
    pub title: String,
    pub approach: String,
    pub description: String,
    pub uses_assets: bool,
    pub estimated_credits: u32,
    pub within_budget: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingInsights {
    pub steps: Vec<StepReport>,
    pub warnings: Vec<String>,
    pub total_processing_time_ms: u64,
    pub models_used: Vec<String>,
}

/// Step 4 output and the final product of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComprehensiveAnalysis {
    pub query_id: String,
    pub query: String,
    pub session_mode: SessionMode,
    pub global_understanding: GlobalUnderstanding,
    pub brief: CreativeBrief,
    pub asset_plan: Vec<AssetPlan>,
    pub creative_options: Vec<CreativeOption>,
    pub pipeline_recommendations: PipelineRecommendations,
    pub processing_insights: ProcessingInsights,
    pub asset_analyses: Vec<AssetAnalysis>,
}

/// Everything Step 4 reads.
pub struct SummaryInput<'a> {
    pub query_id: &'a str,
    pub assets: &'a AssetBatchAnalysis,
    pub combined: &'a CombinedAnalysis,
    pub steps: &'a [StepReport],
    pub warnings: &'a [String],
    pub options: &'a SummaryStepOptions,
}

pub fn summarize(input: &SummaryInput<'_>) -> StepResult<ComprehensiveAnalysis> {
    let combined = input.combined;
    let query = &combined.query;

    if let Some(stray) = combined
        .asset_plan
        .iter()
        .find(|p| input.assets.get(&p.asset_id).is_none())
    {
        return Err(StepError::Validation(format!(
            "asset plan references unknown asset '{}'",
            stray.asset_id
        )));
    }

    let steps = production_plan(combined, input.assets);
    let estimated_total_credits = credits::total(steps.iter().map(|s| s.estimated_credits));
    let budget = query.constraints.budget_credits;
    let within = |credits: u32| budget.is_none_or(|b| credits <= b);

    let pipeline_recommendations = PipelineRecommendations {
        within_budget: within(estimated_total_credits),
        steps,
        estimated_total_credits,
        budget_credits: budget,
    };

    let mut creative_options = creative_options(combined, &pipeline_recommendations);
    creative_options.truncate(input.options.max_creative_options);
    for option in &mut creative_options {
        option.within_budget = within(option.estimated_credits);
    }

    let global_understanding = GlobalUnderstanding {
        user_intent: query.intent.primary.clone(),
        goal: query.intent.goal.clone(),
        output_type: query.intent.output_type,
        target_duration_seconds: query.constraints.duration_seconds,
        target_images: query.constraints.output_images,
        aspect_ratio: query.constraints.aspect_ratio.clone(),
        core_concept: query.creative_reframing.core_concept.clone(),
        style: query.constraints.style.clone(),
        mood: query.constraints.mood.clone(),
        asset_utilization: AssetUtilization::from_plan(&combined.asset_plan, input.assets),
        conflicts: combined.report.conflicts.clone(),
        resolutions: combined.report.resolutions.clone(),
    };

    Ok(ComprehensiveAnalysis {
        query_id: input.query_id.to_string(),
        query: query.query.clone(),
        session_mode: combined.session_mode,
        global_understanding,
        brief: combined.brief.clone(),
        asset_plan: combined.asset_plan.clone(),
        creative_options,
        pipeline_recommendations,
        processing_insights: insights(input),
        asset_analyses: input.assets.analyses.clone(),
    })
}

fn insights(input: &SummaryInput<'_>) -> ProcessingInsights {
    let mut warnings: Vec<String> = Vec::new();
    for w in input.combined.warnings.iter().chain(input.warnings) {
        if !warnings.contains(w) {
            warnings.push(w.clone());
        }
    }

    let mut models = BTreeSet::new();
    models.extend(input.combined.query.model.clone());
    models.extend(input.assets.analyses.iter().filter_map(|a| a.model.clone()));
    models.extend(input.combined.synthesized_by.clone());

    ProcessingInsights {
        steps: input.steps.to_vec(),
        warnings,
        total_processing_time_ms: input.steps.iter().map(|s| s.duration_ms).sum(),
        models_used: models.into_iter().collect(),
    }
}

fn resolution_amount<T>(
    combined: &CombinedAnalysis,
    action: ResolutionAction,
    pick: impl Fn(&Resolution) -> Option<T>,
) -> Option<T> {
    combined
        .report
        .resolutions
        .iter()
        .filter(|r| r.action == action)
        .find_map(pick)
}

/// Seconds of footage to generate for a video request.
fn video_generation_seconds(combined: &CombinedAnalysis, assets: &AssetBatchAnalysis, target: f64) -> f64 {
    if let Some(secs) = resolution_amount(combined, ResolutionAction::GenerateAdditionalFootage, |r| {
        r.generate_seconds
    })
    .or_else(|| resolution_amount(combined, ResolutionAction::AnimateStills, |r| r.generate_seconds))
    {
        return secs;
    }
    let footage: f64 = combined
        .asset_plan
        .iter()
        .filter(|p| p.media_type == MediaType::Video && p.role != AssetRole::Unusable)
        .filter_map(|p| assets.get(&p.asset_id).and_then(|a| a.duration_seconds))
        .sum();
    if footage > 0.0 { 0.0 } else { target }
}

fn images_to_generate(combined: &CombinedAnalysis, wanted: u32) -> u32 {
    if let Some(n) = resolution_amount(combined, ResolutionAction::GenerateImages, |r| r.generate_images) {
        return n;
    }
    if resolution_amount(combined, ResolutionAction::ExtractFrames, |_| Some(())).is_some() {
        return 0;
    }
    let usable = combined
        .asset_plan
        .iter()
        .filter(|p| p.media_type == MediaType::Image && p.role != AssetRole::Unusable)
        .count() as u32;
    wanted.saturating_sub(usable)
}

fn production_plan(combined: &CombinedAnalysis, assets: &AssetBatchAnalysis) -> Vec<PipelineStep> {
    let query = &combined.query;
    let output = query.intent.output_type;
    let mut steps: Vec<(ProductionStage, String, u32)> = Vec::new();

    if output != OutputType::Image {
        steps.push((
            ProductionStage::Script,
            "Write the script and shot list from the brief".into(),
            credits::SCRIPT,
        ));
    }

    let prep: Vec<&str> = combined
        .report
        .resolutions
        .iter()
        .filter(|r| {
            matches!(
                r.action,
                ResolutionAction::TrimFootage
                    | ResolutionAction::Reframe
                    | ResolutionAction::EnhanceAsset
                    | ResolutionAction::ExtractFrames
            )
        })
        .map(|r| r.description.as_str())
        .collect();
    if !prep.is_empty() {
        steps.push((
            ProductionStage::AssetPreparation,
            format!("Prepare supplied assets: {}", prep.join("; ")),
            0,
        ));
    }

    if output.wants_images() {
        let wanted = query.constraints.output_images.unwrap_or(1);
        let count = images_to_generate(combined, wanted);
        if count > 0 {
            steps.push((
                ProductionStage::ImageGeneration,
                format!("Generate {count} images"),
                credits::images(count),
            ));
        }
    }

    let target = query.constraints.duration_seconds.unwrap_or(DEFAULT_VIDEO_SECONDS);
    if output.wants_video() {
        let secs = video_generation_seconds(combined, assets, target);
        if secs > 0.0 {
            steps.push((
                ProductionStage::VideoGeneration,
                format!("Generate {secs:.0}s of video"),
                credits::video(secs),
            ));
        }
    }

    if output != OutputType::Image {
        steps.push((
            ProductionStage::Voiceover,
            format!("Record {target:.0}s of narration"),
            credits::voiceover(target),
        ));
    }

    steps.push((
        ProductionStage::Editing,
        "Assemble, grade and export".into(),
        credits::EDITING,
    ));

    steps
        .into_iter()
        .enumerate()
        .map(|(i, (stage, description, estimated_credits))| PipelineStep {
            order: i as u32 + 1,
            stage,
            description,
            estimated_credits,
        })
        .collect()
}

fn creative_options(
    combined: &CombinedAnalysis,
    plan: &PipelineRecommendations,
) -> Vec<CreativeOption> {
    let query = &combined.query;
    let reframing = &query.creative_reframing;
    let uses_assets = combined.session_mode == SessionMode::AssetDriven;
    let generation = credits::total(
        plan.steps
            .iter()
            .filter(|s| {
                matches!(
                    s.stage,
                    ProductionStage::VideoGeneration | ProductionStage::ImageGeneration
                )
            })
            .map(|s| s.estimated_credits),
    );

    let mut options = vec![CreativeOption {
        id: "faithful".into(),
        title: "Faithful interpretation".into(),
        approach: "Follows the request as stated".into(),
        description: combined.brief.creative_direction.clone(),
        uses_assets,
        estimated_credits: plan.estimated_total_credits,
        within_budget: true,
    }];

    if uses_assets {
        options.push(CreativeOption {
            id: "asset-forward".into(),
            title: "Built from your assets".into(),
            approach: "Uses only the supplied assets, trimming and looping them to fit".into(),
            description: format!(
                "{} using only your own material",
                reframing.core_concept.trim_end_matches('.')
            ),
            uses_assets: true,
            estimated_credits: plan.estimated_total_credits.saturating_sub(generation),
            within_budget: true,
        });
    } else {
        let look = if reframing.visual_direction.is_empty() {
            if query.constraints.style.is_empty() {
                "a bold graphic look".to_string()
            } else {
                query.constraints.style.join(", ")
            }
        } else {
            reframing.visual_direction.clone()
        };
        options.push(CreativeOption {
            id: "stylized".into(),
            title: "Stylized take".into(),
            approach: "Pushes the visual treatment further".into(),
            description: format!("{} rendered with {look}", reframing.core_concept.trim_end_matches('.')),
            uses_assets: false,
            estimated_credits: plan.estimated_total_credits,
            within_budget: true,
        });
    }

    let angle = reframing.alternative_angles.first().cloned().unwrap_or_else(|| {
        format!(
            "Reimagine \"{}\" from an unexpected point of view",
            reframing.core_concept.trim_end_matches('.')
        )
    });
    options.push(CreativeOption {
        id: "reimagined".into(),
        title: "Bold reinterpretation".into(),
        approach: "Keeps the goal but changes the story angle".into(),
        description: angle,
        uses_assets,
        estimated_credits: plan.estimated_total_credits,
        within_budget: true,
    });

    options
}
