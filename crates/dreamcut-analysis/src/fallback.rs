//! Rule-only combined analyses, used when there are no assets, when the
//! synthesis model is unavailable, and as the base the model refines.

use std::collections::HashSet;

use crate::assets::{AssetBatchAnalysis, AssetRole};
use crate::combine::{AssetPlan, CombinedAnalysis, CreativeBrief, SessionMode};
use crate::conflicts::{ConflictReport, ResolutionAction};
use crate::query::{OutputType, QueryAnalysis};

/// Share of an asset's content expected to reach the final cut, by role.
pub fn role_utilization(role: AssetRole) -> f64 {
    match role {
        AssetRole::Primary | AssetRole::Soundtrack => 1.0,
        AssetRole::Supporting => 0.6,
        AssetRole::StyleReference => 0.3,
        AssetRole::Unusable => 0.0,
    }
}

pub fn role_usage(role: AssetRole) -> &'static str {
    match role {
        AssetRole::Primary => "Hero material anchoring the piece",
        AssetRole::Supporting => "Cutaways and supporting shots",
        AssetRole::StyleReference => "Look and color reference for generated material",
        AssetRole::Soundtrack => "Audio bed under the edit",
        AssetRole::Unusable => "Excluded from the production",
    }
}

fn default_beats(output_type: OutputType) -> Vec<String> {
    let beats: &[&str] = match output_type {
        OutputType::Video | OutputType::Mixed => &[
            "Hook: open on the strongest image",
            "Build: develop the core idea",
            "Payoff: land the message",
        ],
        OutputType::Image => &[
            "Establish the visual motif",
            "Vary composition across the set",
        ],
        OutputType::Audio => &["Intro", "Body", "Outro"],
    };
    beats.iter().map(|b| b.to_string()).collect()
}

/// Brief derived from the query analysis alone.
pub fn brief_from_query(query: &QueryAnalysis) -> CreativeBrief {
    let reframing = &query.creative_reframing;
    let creative_direction = if reframing.visual_direction.is_empty() {
        reframing.core_concept.clone()
    } else {
        format!(
            "{}. {}",
            reframing.core_concept.trim_end_matches('.'),
            reframing.visual_direction
        )
    };
    let narrative_beats = if reframing.emotional_arc.is_empty() {
        default_beats(query.intent.output_type)
    } else {
        reframing.emotional_arc.clone()
    };
    let audio_direction = if query.constraints.mood.is_empty() {
        "Score matched to the pacing of the edit".to_string()
    } else {
        format!("Score with a {} feel", query.constraints.mood.join(", "))
    };

    CreativeBrief {
        creative_direction,
        narrative_beats,
        visual_style: query.constraints.style.clone(),
        audio_direction,
        production_notes: Vec::new(),
    }
}

/// Combined analysis for a request with no assets.
pub fn asset_free(query: &QueryAnalysis) -> CombinedAnalysis {
    let mut brief = brief_from_query(query);
    brief
        .production_notes
        .push("No user assets supplied; all material will be generated".into());
    CombinedAnalysis {
        session_mode: SessionMode::AssetFree,
        query: query.clone(),
        report: ConflictReport::default(),
        asset_plan: Vec::new(),
        brief,
        warnings: Vec::new(),
        synthesized_by: None,
    }
}

/// Plan every asset from its analysis and the conflict resolutions.
///
/// Successful assets always keep a non-zero utilization; only failed or
/// excluded assets are marked unusable.
pub fn plan_assets(batch: &AssetBatchAnalysis, report: &ConflictReport) -> Vec<AssetPlan> {
    let excluded: HashSet<&str> = report.excluded_assets().collect();
    let enhanced: HashSet<&str> = report.enhanced_assets().collect();

    batch
        .analyses
        .iter()
        .map(|a| {
            let id = a.asset_id.as_str();
            let role = if !a.success || excluded.contains(id) {
                AssetRole::Unusable
            } else if enhanced.contains(id) {
                AssetRole::Supporting
            } else if a.suggested_role == AssetRole::Unusable {
                AssetRole::StyleReference
            } else {
                a.suggested_role
            };
            let mut usage = role_usage(role).to_string();
            if let Some(res) = report.resolutions.iter().find(|r| {
                r.asset_ids.iter().any(|rid| rid == id)
                    && !matches!(
                        r.action,
                        ResolutionAction::ExcludeAsset | ResolutionAction::EnhanceAsset
                    )
            }) {
                usage = format!("{usage}; {}", res.description.to_lowercase());
            }
            AssetPlan {
                asset_id: a.asset_id.clone(),
                media_type: a.media_type,
                role,
                usage,
                utilization: role_utilization(role),
            }
        })
        .collect()
}

/// Rule-only combined analysis for a request with assets.
pub fn asset_driven(
    query: &QueryAnalysis,
    batch: &AssetBatchAnalysis,
    report: ConflictReport,
) -> CombinedAnalysis {
    let asset_plan = plan_assets(batch, &report);
    let mut brief = brief_from_query(query);
    let usable = asset_plan
        .iter()
        .filter(|p| p.role != AssetRole::Unusable)
        .count();
    brief.production_notes.push(format!(
        "{usable} of {} supplied assets are usable",
        asset_plan.len()
    ));
    brief
        .production_notes
        .extend(report.resolutions.iter().map(|r| r.description.clone()));

    CombinedAnalysis {
        session_mode: SessionMode::AssetDriven,
        query: query.clone(),
        report,
        asset_plan,
        brief,
        warnings: Vec::new(),
        synthesized_by: None,
    }
}
