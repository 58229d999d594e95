//! Prompt text for the three model-backed steps.

use std::fmt::Write;

use crate::types::{AssetInput, QueryHints};

pub const QUERY_SYSTEM_PROMPT: &str = r#"You are the creative director of an AI video studio. Read a user's request and describe what they want produced.

Respond with a single JSON object and nothing else:
{
  "intent": {
    "primary": "short phrase, e.g. product teaser",
    "output_type": "video | image | audio | mixed",
    "goal": "what the finished piece should achieve",
    "platform": "target platform if mentioned, else null"
  },
  "constraints": {
    "duration_seconds": number or null,
    "output_images": number or null,
    "aspect_ratio": "16:9 | 9:16 | 1:1 | 4:5 or null",
    "style": ["visual style keywords"],
    "mood": ["emotional tone keywords"],
    "must_include": ["elements the user explicitly asked for"]
  },
  "creative_reframing": {
    "core_concept": "one sentence capturing the idea",
    "emotional_arc": ["beat", "beat", "beat"],
    "visual_direction": "camera, color and lighting direction",
    "alternative_angles": ["a different way to tell the same story"]
  },
  "missing_information": ["questions worth asking the user"],
  "confidence": number between 0 and 1
}"#;

pub const ASSET_PROMPT: &str = "Analyze this media file for use in a video or image production.
Respond with a single JSON object:
{\"caption\": \"one sentence\", \"description\": \"detailed description of content, composition, lighting and motion\", \"quality_score\": number from 0 to 10, \"attributes\": [\"keywords\"], \"suggested_role\": \"primary | supporting | style_reference | soundtrack | unusable\", \"duration_seconds\": number or null}";

pub const SYNTHESIS_SYSTEM_PROMPT: &str = r#"You merge a creative request with an inventory of user-supplied media into a production brief.
Conflicts have already been detected and resolved; respect those resolutions.

Respond with a single JSON object and nothing else:
{
  "creative_direction": "two or three sentences",
  "narrative_beats": ["ordered beats of the piece"],
  "visual_style": ["style keywords"],
  "audio_direction": "music and sound direction",
  "production_notes": ["practical notes for the editor"],
  "asset_roles": [{"asset_id": "id", "role": "primary | supporting | style_reference | soundtrack", "usage": "how the asset is used"}]
}"#;

/// User turn for Step 1: the raw query plus any explicit hints.
pub fn render_query_prompt(query: &str, hints: &QueryHints) -> String {
    let mut out = format!("Request: {query}");
    if let Some(intent) = &hints.intent {
        let _ = write!(out, "\nStated intent: {intent}");
    }
    if let Some(n) = hints.output_images {
        let _ = write!(out, "\nRequested images: {n}");
    }
    if let Some(secs) = hints.output_video_seconds {
        let _ = write!(out, "\nRequested video length: {secs} seconds");
    }
    if let Some(prefs) = &hints.preferences {
        if !prefs.style.is_empty() {
            let _ = write!(out, "\nPreferred style: {}", prefs.style.join(", "));
        }
        if !prefs.mood.is_empty() {
            let _ = write!(out, "\nPreferred mood: {}", prefs.mood.join(", "));
        }
        if let Some(ratio) = &prefs.aspect_ratio {
            let _ = write!(out, "\nAspect ratio: {ratio}");
        }
        if let Some(platform) = &prefs.platform {
            let _ = write!(out, "\nPlatform: {platform}");
        }
    }
    if let Some(budget) = hints.budget_credits {
        let _ = write!(out, "\nCredit budget: {budget}");
    }
    out
}

/// Per-asset captioning prompt.
pub fn render_asset_prompt(asset: &AssetInput, query: &str, focus: Option<&str>) -> String {
    let mut out = String::from(ASSET_PROMPT);
    let _ = write!(out, "\n\nThe user is making: {query}");
    if let Some(desc) = &asset.user_description {
        let _ = write!(out, "\nThe user describes this file as: {desc}");
    }
    if let Some(focus) = focus {
        let _ = write!(out, "\nPay particular attention to: {focus}");
    }
    out
}
