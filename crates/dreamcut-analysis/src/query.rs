//! Step 1: turn the free-text request into structured intent.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use dreamcut_core::error::StepError;
use dreamcut_core::message::Message;
use dreamcut_core::model::{CallOptions, ChatModel};
use dreamcut_core::outcome::StepResult;

use crate::parser::{extract_json, f64_at, first_str, first_strings, str_at};
use crate::prompts::{QUERY_SYSTEM_PROMPT, render_query_prompt};
use crate::types::{QueryHints, QueryStepOptions};

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d+(?:\.\d+)?)\s*-?\s*(seconds?|secs?|s|minutes?|mins?|m)\b")
        .expect("duration pattern compiles")
});

static IMAGE_COUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d+)\s+(?:\w+\s+)?(images|photos|pictures|posters|stills|illustrations|thumbnails)\b")
        .expect("image count pattern compiles")
});

/// Longest output duration Step 1 will carry forward, in seconds.
pub const MAX_DURATION_SECONDS: f64 = 3600.0;
/// Most images Step 1 will carry forward.
pub const MAX_OUTPUT_IMAGES: u32 = 100;

const VIDEO_WORDS: &[&str] = &[
    "video", "trailer", "clip", "reel", "film", "commercial", "teaser", "animation", "montage",
];
const IMAGE_WORDS: &[&str] = &[
    "image", "photo", "poster", "thumbnail", "illustration", "picture", "logo", "still",
];
const AUDIO_WORDS: &[&str] = &["podcast", "voiceover", "audio", "jingle", "soundtrack"];

/// What kind of media the user wants back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    #[default]
    Video,
    Image,
    Audio,
    Mixed,
}

impl OutputType {
    /// Map a model's free-form label onto a known output type.
    pub fn parse_label(label: &str) -> Option<Self> {
        let l = label.to_ascii_lowercase();
        if l.contains("mix") || l.contains("multi") {
            Some(Self::Mixed)
        } else if l.contains("video") || l.contains("film") || l.contains("clip") {
            Some(Self::Video)
        } else if l.contains("image") || l.contains("photo") || l.contains("picture") {
            Some(Self::Image)
        } else if l.contains("audio") || l.contains("voice") || l.contains("music") {
            Some(Self::Audio)
        } else {
            None
        }
    }

    /// Keyword guess from the raw request text.
    pub fn infer_from_text(text: &str) -> Self {
        let l = text.to_ascii_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| l.contains(w));
        if has(VIDEO_WORDS) {
            Self::Video
        } else if has(IMAGE_WORDS) {
            Self::Image
        } else if has(AUDIO_WORDS) {
            Self::Audio
        } else {
            Self::Video
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Mixed => "mixed",
        }
    }

    pub fn wants_video(&self) -> bool {
        matches!(self, Self::Video | Self::Mixed)
    }

    pub fn wants_images(&self) -> bool {
        matches!(self, Self::Image | Self::Mixed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub primary: String,
    pub output_type: OutputType,
    pub goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_images: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(default)]
    pub style: Vec<String>,
    #[serde(default)]
    pub mood: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_credits: Option<u32>,
    #[serde(default)]
    pub must_include: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreativeReframing {
    pub core_concept: String,
    #[serde(default)]
    pub emotional_arc: Vec<String>,
    #[serde(default)]
    pub visual_direction: String,
    #[serde(default)]
    pub alternative_angles: Vec<String>,
}

/// Output of Step 1.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub query: String,
    pub intent: Intent,
    pub constraints: Constraints,
    pub creative_reframing: CreativeReframing,
    #[serde(default)]
    pub missing_information: Vec<String>,
    pub confidence: f64,
    /// Model that produced the analysis; `None` for the keyword heuristic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl QueryAnalysis {
    /// Build an analysis from a parsed model reply.
    pub fn from_model_output(query: &str, value: &Value, model: &str) -> Self {
        let output_type = first_str(value, &[&["intent", "output_type"], &["output_type"]])
            .and_then(|l| OutputType::parse_label(&l))
            .unwrap_or_else(|| OutputType::infer_from_text(query));
        let primary = first_str(value, &[&["intent", "primary"], &["intent"]])
            .unwrap_or_else(|| format!("create {}", output_type.as_str()));
        let goal = str_at(value, &["intent", "goal"]).unwrap_or_else(|| primary.clone());

        let mut analysis = Self {
            query: query.to_string(),
            intent: Intent {
                primary,
                output_type,
                goal,
                platform: str_at(value, &["intent", "platform"]),
            },
            constraints: Constraints {
                duration_seconds: f64_at(value, &["constraints", "duration_seconds"])
                    .filter(|d| *d > 0.0),
                output_images: f64_at(value, &["constraints", "output_images"])
                    .filter(|n| *n >= 1.0)
                    .map(|n| n.round() as u32),
                aspect_ratio: str_at(value, &["constraints", "aspect_ratio"]),
                style: first_strings(value, &[&["constraints", "style"], &["style"]]),
                mood: first_strings(value, &[&["constraints", "mood"], &["mood"]]),
                budget_credits: None,
                must_include: first_strings(value, &[&["constraints", "must_include"]]),
            },
            creative_reframing: CreativeReframing {
                core_concept: first_str(
                    value,
                    &[&["creative_reframing", "core_concept"], &["core_concept"]],
                )
                .unwrap_or_default(),
                emotional_arc: first_strings(value, &[&["creative_reframing", "emotional_arc"]]),
                visual_direction: str_at(value, &["creative_reframing", "visual_direction"])
                    .unwrap_or_default(),
                alternative_angles: first_strings(
                    value,
                    &[&["creative_reframing", "alternative_angles"]],
                ),
            },
            missing_information: first_strings(
                value,
                &[&["missing_information"], &["clarifying_questions"]],
            ),
            confidence: f64_at(value, &["confidence"]).unwrap_or(0.5).clamp(0.0, 1.0),
            model: Some(model.to_string()),
        };
        analysis.fill_from_text();
        analysis
    }

    /// Keyword-only analysis used when the model is unavailable.
    pub fn heuristic(query: &str, hints: &QueryHints) -> Self {
        let output_type = OutputType::infer_from_text(query);
        let mut analysis = Self {
            query: query.to_string(),
            intent: Intent {
                primary: format!("create {}", output_type.as_str()),
                output_type,
                goal: query.trim().to_string(),
                platform: None,
            },
            confidence: 0.3,
            ..Default::default()
        };
        analysis.fill_from_text();
        analysis.apply_hints(hints);
        analysis
    }

    /// Explicit hints always win over inferred values.
    pub fn apply_hints(&mut self, hints: &QueryHints) {
        if let Some(intent) = &hints.intent {
            self.intent.primary = intent.clone();
        }
        match (hints.output_images, hints.output_video_seconds) {
            (Some(n), Some(secs)) => {
                self.constraints.output_images = Some(n);
                self.constraints.duration_seconds = Some(secs);
                self.intent.output_type = OutputType::Mixed;
            }
            (Some(n), None) => {
                self.constraints.output_images = Some(n);
                if self.intent.output_type != OutputType::Mixed {
                    self.intent.output_type = OutputType::Image;
                }
            }
            (None, Some(secs)) => {
                self.constraints.duration_seconds = Some(secs);
                if self.intent.output_type != OutputType::Mixed {
                    self.intent.output_type = OutputType::Video;
                }
            }
            (None, None) => {}
        }
        if let Some(prefs) = &hints.preferences {
            if !prefs.style.is_empty() {
                self.constraints.style = prefs.style.clone();
            }
            if !prefs.mood.is_empty() {
                self.constraints.mood = prefs.mood.clone();
            }
            if prefs.aspect_ratio.is_some() {
                self.constraints.aspect_ratio = prefs.aspect_ratio.clone();
            }
            if prefs.platform.is_some() {
                self.intent.platform = prefs.platform.clone();
            }
        }
        if hints.budget_credits.is_some() {
            self.constraints.budget_credits = hints.budget_credits;
        }
        self.clamp_constraints();
        self.note_missing_duration();
    }

    fn fill_from_text(&mut self) {
        if self.constraints.duration_seconds.is_none() {
            self.constraints.duration_seconds = duration_from_text(&self.query);
        }
        if self.constraints.output_images.is_none() {
            self.constraints.output_images = image_count_from_text(&self.query);
        }
        if self.creative_reframing.core_concept.is_empty() {
            self.creative_reframing.core_concept = self.query.trim().to_string();
        }
        self.clamp_constraints();
        self.note_missing_duration();
    }

    /// Bound text- and model-derived amounts to what production can deliver.
    fn clamp_constraints(&mut self) {
        let c = &mut self.constraints;
        c.duration_seconds = c.duration_seconds.map(|d| d.min(MAX_DURATION_SECONDS));
        c.output_images = c.output_images.map(|n| n.min(MAX_OUTPUT_IMAGES));
    }

    fn note_missing_duration(&mut self) {
        let needs_note = self.intent.output_type.wants_video()
            && self.constraints.duration_seconds.is_none()
            && !self
                .missing_information
                .iter()
                .any(|m| m.to_ascii_lowercase().contains("duration"));
        if needs_note {
            self.missing_information
                .push("Target duration was not specified".into());
        }
        if self.constraints.duration_seconds.is_some() {
            self.missing_information
                .retain(|m| m != "Target duration was not specified");
        }
    }
}

/// First "30s" / "2 minutes" style duration in the text, in seconds.
pub fn duration_from_text(text: &str) -> Option<f64> {
    let caps = DURATION_RE.captures(text)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2)?.as_str().to_ascii_lowercase();
    let secs = if unit.starts_with('m') {
        value * 60.0
    } else {
        value
    };
    (secs > 0.0).then_some(secs)
}

/// "4 images" / "3 square posters" style counts.
pub fn image_count_from_text(text: &str) -> Option<u32> {
    let caps = IMAGE_COUNT_RE.captures(text)?;
    let n: u64 = caps.get(1)?.as_str().parse().ok()?;
    (n > 0).then(|| u32::try_from(n).unwrap_or(u32::MAX))
}

/// Step 1 runner.
pub struct QueryAnalyzer {
    model: Arc<dyn ChatModel>,
}

impl QueryAnalyzer {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    pub async fn analyze(
        &self,
        query: &str,
        hints: &QueryHints,
        options: &QueryStepOptions,
    ) -> StepResult<QueryAnalysis> {
        if query.trim().is_empty() {
            return Err(StepError::Validation("query is empty".into()));
        }

        let messages = vec![
            Message::system(QUERY_SYSTEM_PROMPT),
            Message::user(render_query_prompt(query, hints)),
        ];
        let call = CallOptions::json()
            .with_temperature(options.temperature.or(Some(0.3)))
            .with_max_tokens(options.max_tokens.or(Some(1200)));

        let result = self.model.generate(&messages, &call).await?;
        let value = extract_json(&result.message.text())?;

        let mut analysis = QueryAnalysis::from_model_output(query, &value, self.model.model_name());
        analysis.apply_hints(hints);
        tracing::debug!(
            output_type = analysis.intent.output_type.as_str(),
            duration = ?analysis.constraints.duration_seconds,
            confidence = analysis.confidence,
            "query analyzed"
        );
        Ok(analysis)
    }
}
