//! Deterministic detection and resolution of mismatches between what the
//! user asked for and the assets they supplied.

use serde::{Deserialize, Serialize};

use crate::assets::{AnalysisMode, AssetAnalysis, AssetBatchAnalysis};
use crate::query::{OutputType, QueryAnalysis};
use crate::types::MediaType;

/// Footage within this fraction of the requested duration is accepted as is.
pub const DURATION_TOLERANCE: f64 = 0.10;
/// Assets scored below this are enhanced and demoted to supporting use.
pub const LOW_QUALITY_THRESHOLD: f64 = 4.0;
/// Target length assumed when a video request names no duration.
pub const DEFAULT_VIDEO_SECONDS: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    DurationExceedsRequest,
    DurationShortOfRequest,
    OutputTypeMismatch,
    ImageCountShortfall,
    AspectRatioMismatch,
    LowQualityAsset,
    FailedAsset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    TrimFootage,
    GenerateAdditionalFootage,
    AnimateStills,
    ExtractFrames,
    GenerateImages,
    Reframe,
    EnhanceAsset,
    ExcludeAsset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,
    pub kind: ConflictKind,
    pub severity: Severity,
    pub description: String,
    #[serde(default)]
    pub asset_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub conflict_id: String,
    pub action: ResolutionAction,
    pub description: String,
    #[serde(default)]
    pub asset_ids: Vec<String>,
    /// Seconds of new footage this resolution asks the generator for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_seconds: Option<f64>,
    /// Number of new images this resolution asks the generator for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_images: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub conflicts: Vec<Conflict>,
    pub resolutions: Vec<Resolution>,
}

impl ConflictReport {
    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn has(&self, kind: ConflictKind) -> bool {
        self.conflicts.iter().any(|c| c.kind == kind)
    }

    pub fn resolution_for(&self, kind: ConflictKind) -> Option<&Resolution> {
        let conflict = self.conflicts.iter().find(|c| c.kind == kind)?;
        self.resolutions.iter().find(|r| r.conflict_id == conflict.id)
    }

    /// Asset ids that a resolution excludes from the production.
    pub fn excluded_assets(&self) -> impl Iterator<Item = &str> {
        self.resolutions
            .iter()
            .filter(|r| r.action == ResolutionAction::ExcludeAsset)
            .flat_map(|r| r.asset_ids.iter().map(String::as_str))
    }

    /// Asset ids demoted to supporting use.
    pub fn enhanced_assets(&self) -> impl Iterator<Item = &str> {
        self.resolutions
            .iter()
            .filter(|r| r.action == ResolutionAction::EnhanceAsset)
            .flat_map(|r| r.asset_ids.iter().map(String::as_str))
    }

    fn push(
        &mut self,
        kind: ConflictKind,
        severity: Severity,
        description: String,
        asset_ids: Vec<String>,
        resolution: (ResolutionAction, String),
    ) -> &mut Resolution {
        let id = format!("conflict-{}", self.conflicts.len() + 1);
        self.conflicts.push(Conflict {
            id: id.clone(),
            kind,
            severity,
            description,
            asset_ids: asset_ids.clone(),
        });
        self.resolutions.push(Resolution {
            conflict_id: id,
            action: resolution.0,
            description: resolution.1,
            asset_ids,
            generate_seconds: None,
            generate_images: None,
        });
        let last = self.resolutions.len() - 1;
        &mut self.resolutions[last]
    }
}

fn ids<'a>(assets: impl IntoIterator<Item = &'a AssetAnalysis>) -> Vec<String> {
    assets.into_iter().map(|a| a.asset_id.clone()).collect()
}

/// Parse "16:9" style ratios into width / height.
pub fn parse_aspect_ratio(ratio: &str) -> Option<f64> {
    let (w, h) = ratio.split_once([':', 'x', '/'])?;
    let w: f64 = w.trim().parse().ok()?;
    let h: f64 = h.trim().parse().ok()?;
    (w > 0.0 && h > 0.0).then(|| w / h)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Orientation {
    Landscape,
    Portrait,
    Square,
}

fn orientation(ratio: f64) -> Orientation {
    if (ratio - 1.0).abs() < 0.05 {
        Orientation::Square
    } else if ratio > 1.0 {
        Orientation::Landscape
    } else {
        Orientation::Portrait
    }
}

/// Apply the conflict policy. Rules run in a fixed order so the same inputs
/// always yield the same report.
pub fn detect(query: &QueryAnalysis, batch: &AssetBatchAnalysis) -> ConflictReport {
    let mut report = ConflictReport::default();
    let output = query.intent.output_type;
    let usable: Vec<&AssetAnalysis> = batch.usable().collect();
    let videos: Vec<&AssetAnalysis> = usable
        .iter()
        .copied()
        .filter(|a| a.media_type == MediaType::Video)
        .collect();
    let images: Vec<&AssetAnalysis> = usable
        .iter()
        .copied()
        .filter(|a| a.media_type == MediaType::Image)
        .collect();

    if output.wants_video() {
        let requested = query.constraints.duration_seconds;
        let footage: f64 = videos.iter().filter_map(|a| a.duration_seconds).sum();

        if let Some(requested) = requested.filter(|_| footage > 0.0) {
            if footage > requested * (1.0 + DURATION_TOLERANCE) {
                report.push(
                    ConflictKind::DurationExceedsRequest,
                    Severity::Info,
                    format!(
                        "Supplied footage runs {footage:.0}s but {requested:.0}s was requested"
                    ),
                    ids(videos.iter().copied()),
                    (
                        ResolutionAction::TrimFootage,
                        format!("Trim footage to {requested:.0}s, keeping the highest-quality segments"),
                    ),
                );
            } else if footage < requested * (1.0 - DURATION_TOLERANCE) {
                let gap = requested - footage;
                report
                    .push(
                        ConflictKind::DurationShortOfRequest,
                        Severity::Warning,
                        format!(
                            "Supplied footage runs {footage:.0}s but {requested:.0}s was requested"
                        ),
                        ids(videos.iter().copied()),
                        (
                            ResolutionAction::GenerateAdditionalFootage,
                            format!("Generate {gap:.0}s of additional footage to fill the gap"),
                        ),
                    )
                    .generate_seconds = Some(gap);
            }
        }

        if output == OutputType::Video && videos.is_empty() && !images.is_empty() {
            let target = requested.unwrap_or(DEFAULT_VIDEO_SECONDS);
            report
                .push(
                    ConflictKind::OutputTypeMismatch,
                    Severity::Warning,
                    "A video was requested but only still images were supplied".into(),
                    ids(images.iter().copied()),
                    (
                        ResolutionAction::AnimateStills,
                        format!("Animate the stills into {target:.0}s of motion footage"),
                    ),
                )
                .generate_seconds = Some(target);
        }
    }

    if output.wants_images() {
        let frames_from_video = output == OutputType::Image && images.is_empty() && !videos.is_empty();
        if frames_from_video {
            report.push(
                ConflictKind::OutputTypeMismatch,
                Severity::Info,
                "Images were requested but only video footage was supplied".into(),
                ids(videos.iter().copied()),
                (
                    ResolutionAction::ExtractFrames,
                    "Extract key frames from the footage as image sources".into(),
                ),
            );
        }

        if let Some(wanted) = query.constraints.output_images {
            let available = images.len() as u32;
            if !frames_from_video && available < wanted {
                let missing = wanted - available;
                report
                    .push(
                        ConflictKind::ImageCountShortfall,
                        Severity::Warning,
                        format!("{wanted} images requested but {available} usable images supplied"),
                        ids(images.iter().copied()),
                        (
                            ResolutionAction::GenerateImages,
                            format!("Generate {missing} additional images in the same style"),
                        ),
                    )
                    .generate_images = Some(missing);
            }
        }
    }

    if let Some(target) = query
        .constraints
        .aspect_ratio
        .as_deref()
        .and_then(parse_aspect_ratio)
    {
        let wanted = orientation(target);
        let mismatched: Vec<&AssetAnalysis> = usable
            .iter()
            .copied()
            .filter(|a| a.media_type != MediaType::Audio)
            .filter(|a| match (a.width, a.height) {
                (Some(w), Some(h)) if h > 0 => orientation(w as f64 / h as f64) != wanted,
                _ => false,
            })
            .collect();
        if !mismatched.is_empty() {
            let ratio = query.constraints.aspect_ratio.clone().unwrap_or_default();
            report.push(
                ConflictKind::AspectRatioMismatch,
                Severity::Info,
                format!("{} assets do not match the requested {ratio} framing", mismatched.len()),
                ids(mismatched),
                (
                    ResolutionAction::Reframe,
                    format!("Reframe with smart cropping or outpainting to {ratio}"),
                ),
            );
        }
    }

    let low_quality: Vec<&AssetAnalysis> = usable
        .iter()
        .copied()
        .filter(|a| a.mode == AnalysisMode::Model && a.quality_score < LOW_QUALITY_THRESHOLD)
        .collect();
    if !low_quality.is_empty() {
        report.push(
            ConflictKind::LowQualityAsset,
            Severity::Info,
            format!(
                "{} assets scored below {LOW_QUALITY_THRESHOLD:.0}/10",
                low_quality.len()
            ),
            ids(low_quality),
            (
                ResolutionAction::EnhanceAsset,
                "Upscale and denoise, then use as supporting material only".into(),
            ),
        );
    }

    let failed: Vec<&AssetAnalysis> = batch.analyses.iter().filter(|a| !a.success).collect();
    if !failed.is_empty() {
        report.push(
            ConflictKind::FailedAsset,
            Severity::Warning,
            format!("{} assets could not be analyzed", failed.len()),
            ids(failed),
            (
                ResolutionAction::ExcludeAsset,
                "Exclude from the production; generate replacements if needed".into(),
            ),
        );
    }

    report
}
