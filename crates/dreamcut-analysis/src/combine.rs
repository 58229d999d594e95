//! Step 3: merge the query analysis with the asset analyses into one
//! production brief.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use dreamcut_core::error::StepError;
use dreamcut_core::message::Message;
use dreamcut_core::model::{CallOptions, ChatModel};
use dreamcut_core::outcome::StepResult;

use crate::assets::{AssetBatchAnalysis, AssetRole};
use crate::conflicts::{self, ConflictReport};
use crate::fallback;
use crate::parser::{at, extract_json, first_strings, str_at};
use crate::prompts::SYNTHESIS_SYSTEM_PROMPT;
use crate::query::QueryAnalysis;
use crate::types::{CombineStepOptions, MediaType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Everything is generated from the query.
    AssetFree,
    /// User assets shape the production.
    AssetDriven,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::AssetFree => "asset_free",
            SessionMode::AssetDriven => "asset_driven",
        }
    }
}

/// How one asset will be used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetPlan {
    pub asset_id: String,
    pub media_type: MediaType,
    pub role: AssetRole,
    pub usage: String,
    /// 0.0 to 1.0; zero only for unusable assets.
    pub utilization: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreativeBrief {
    pub creative_direction: String,
    #[serde(default)]
    pub narrative_beats: Vec<String>,
    #[serde(default)]
    pub visual_style: Vec<String>,
    pub audio_direction: String,
    #[serde(default)]
    pub production_notes: Vec<String>,
}

/// Step 3 output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedAnalysis {
    pub session_mode: SessionMode,
    pub query: QueryAnalysis,
    #[serde(flatten)]
    pub report: ConflictReport,
    #[serde(default)]
    pub asset_plan: Vec<AssetPlan>,
    pub brief: CreativeBrief,
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Synthesis model, when one refined the rule-based brief.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesized_by: Option<String>,
}

impl CombinedAnalysis {
    /// Fold a synthesis reply into the rule-based analysis.
    ///
    /// Conflict resolutions are never overridden, and the model cannot mark
    /// a successfully analyzed asset unusable.
    pub fn refine(&mut self, value: &Value, model: &str) {
        let brief = &mut self.brief;
        if let Some(direction) = str_at(value, &["creative_direction"]) {
            brief.creative_direction = direction;
        }
        let beats = first_strings(value, &[&["narrative_beats"]]);
        if !beats.is_empty() {
            brief.narrative_beats = beats;
        }
        let style = first_strings(value, &[&["visual_style"]]);
        if !style.is_empty() {
            brief.visual_style = style;
        }
        if let Some(audio) = str_at(value, &["audio_direction"]) {
            brief.audio_direction = audio;
        }
        for note in first_strings(value, &[&["production_notes"]]) {
            if !brief.production_notes.contains(&note) {
                brief.production_notes.push(note);
            }
        }

        let enhanced: Vec<String> = self.report.enhanced_assets().map(String::from).collect();
        let roles = at(value, &["asset_roles"]).and_then(Value::as_array);
        for entry in roles.into_iter().flatten() {
            let Some(id) = str_at(entry, &["asset_id"]) else {
                continue;
            };
            let Some(plan) = self
                .asset_plan
                .iter_mut()
                .find(|p| p.asset_id == id && p.role != AssetRole::Unusable)
            else {
                continue;
            };
            if let Some(role) = str_at(entry, &["role"]).and_then(|r| AssetRole::parse_label(&r)) {
                let role = match role {
                    AssetRole::Unusable => AssetRole::StyleReference,
                    AssetRole::Primary if enhanced.contains(&id) => AssetRole::Supporting,
                    other => other,
                };
                plan.role = role;
                plan.utilization = fallback::role_utilization(role);
            }
            if let Some(usage) = str_at(entry, &["usage"]) {
                plan.usage = usage;
            }
        }
        self.synthesized_by = Some(model.to_string());
    }
}

/// Step 3 runner.
pub struct Combiner {
    model: Arc<dyn ChatModel>,
}

impl Combiner {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Detect conflicts, build the rule-based plan, then ask the synthesis
    /// model for creative direction. A synthesis failure degrades to the
    /// rule-based plan with a warning.
    pub async fn combine(
        &self,
        query: &QueryAnalysis,
        batch: &AssetBatchAnalysis,
        options: &CombineStepOptions,
    ) -> StepResult<CombinedAnalysis> {
        if batch.analyses.is_empty() {
            return Err(StepError::Skipped("no assets to combine".into()));
        }
        if !batch.success {
            return Err(StepError::Validation(format!(
                "asset analysis did not succeed: {}",
                batch.error.as_deref().unwrap_or("unknown error")
            )));
        }

        let report = conflicts::detect(query, batch);
        let mut combined = fallback::asset_driven(query, batch, report);

        let messages = vec![
            Message::system(SYNTHESIS_SYSTEM_PROMPT),
            Message::user(synthesis_context(&combined, batch).to_string()),
        ];
        let call = CallOptions::json()
            .with_temperature(options.temperature.or(Some(0.7)))
            .with_max_tokens(Some(1500));

        let reply = match self.model.generate(&messages, &call).await {
            Ok(result) => extract_json(&result.message.text()),
            Err(e) => Err(StepError::from(e)),
        };
        match reply {
            Ok(value) => combined.refine(&value, self.model.model_name()),
            Err(e) => {
                tracing::warn!(error = %e, "creative synthesis failed, using rule-based brief");
                combined
                    .warnings
                    .push(format!("Creative synthesis unavailable, using rule-based brief: {e}"));
            }
        }
        Ok(combined)
    }
}

fn synthesis_context(combined: &CombinedAnalysis, batch: &AssetBatchAnalysis) -> Value {
    let assets: Vec<Value> = combined
        .asset_plan
        .iter()
        .filter_map(|plan| {
            let a = batch.get(&plan.asset_id)?;
            Some(json!({
                "asset_id": a.asset_id,
                "media_type": a.media_type,
                "caption": a.caption,
                "quality_score": a.quality_score,
                "duration_seconds": a.duration_seconds,
                "planned_role": plan.role,
            }))
        })
        .collect();
    json!({
        "request": combined.query.query,
        "intent": combined.query.intent,
        "constraints": combined.query.constraints,
        "creative_reframing": combined.query.creative_reframing,
        "assets": assets,
        "conflicts": combined.report.conflicts,
        "resolutions": combined.report.resolutions,
    })
}
