use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;

use dreamcut_analysis::assets::{AnalysisMode, AssetAnalysis, AssetBatchAnalysis, AssetBatchSummary, AssetRole};
use dreamcut_analysis::conflicts::{ResolutionAction, detect};
use dreamcut_analysis::fallback;
use dreamcut_analysis::mock::{MockChatModel, MockVisionModel, RecordingPublisher};
use dreamcut_analysis::parser::extract_json;
use dreamcut_analysis::prelude::*;
use dreamcut_analysis::query::duration_from_text;
use dreamcut_analysis::summarize::{SummaryInput, summarize};
use dreamcut_analysis::types::SummaryStepOptions;
use dreamcut_core::model::VisionModel;

/// Strategy for flat JSON objects with plain string, number and bool values.
fn arb_json_object() -> impl Strategy<Value = serde_json::Value> {
    let leaf = prop_oneof![
        any::<bool>().prop_map(|b| json!(b)),
        any::<i32>().prop_map(|n| json!(n)),
        "[a-zA-Z0-9 _]{0,20}".prop_map(|s| json!(s)),
    ];
    prop::collection::vec(("[a-z]{1,8}", leaf), 0..6).prop_map(|pairs| {
        let map: serde_json::Map<String, serde_json::Value> = pairs.into_iter().collect();
        serde_json::Value::Object(map)
    })
}

fn media_type(i: u8) -> MediaType {
    match i % 3 {
        0 => MediaType::Image,
        1 => MediaType::Video,
        _ => MediaType::Audio,
    }
}

/// Strategy for one asset analysis: (media type, success, quality, seconds).
fn arb_analysis() -> impl Strategy<Value = (u8, bool, f64, Option<f64>)> {
    (0u8..3, any::<bool>(), 0.0f64..10.0, prop::option::of(1.0f64..120.0))
}

fn build_batch(specs: &[(u8, bool, f64, Option<f64>)]) -> AssetBatchAnalysis {
    let analyses: Vec<AssetAnalysis> = specs
        .iter()
        .enumerate()
        .map(|(i, (mt, success, quality, secs))| {
            let media_type = media_type(*mt);
            AssetAnalysis {
                asset_id: format!("asset-{i}"),
                media_type,
                success: *success,
                error: (!success).then(|| "fetch failed".to_string()),
                mode: if *success { AnalysisMode::Model } else { AnalysisMode::Failed },
                caption: "caption".into(),
                detailed_description: "description".into(),
                quality_score: if *success { *quality } else { 0.0 },
                detected_attributes: vec![],
                suggested_role: if *success {
                    AssetRole::default_for(media_type)
                } else {
                    AssetRole::Unusable
                },
                duration_seconds: if media_type == MediaType::Image { None } else { *secs },
                width: None,
                height: None,
                processing_time_ms: 3,
                model: Some("vision".into()),
            }
        })
        .collect();
    AssetBatchAnalysis {
        success: true,
        error: None,
        summary: AssetBatchSummary::from_analyses(&analyses),
        analyses,
    }
}

fn arb_query() -> impl Strategy<Value = QueryAnalysis> {
    (
        prop_oneof!["trailer", "poster", "podcast", "montage"],
        prop::option::of(5u32..180),
        prop::option::of(1u32..8),
        prop::option::of(10u32..500),
    )
        .prop_map(|(kind, secs, images, budget)| {
            let hints = QueryHints {
                output_video_seconds: secs.map(f64::from),
                output_images: images,
                budget_credits: budget,
                ..Default::default()
            };
            QueryAnalysis::heuristic(&format!("make a {kind}"), &hints)
        })
}

// ---------------------------------------------------------------------------
// 1. extract_json: prose and fences around an object never change the result
// ---------------------------------------------------------------------------
proptest! {
    #[test]
    fn extract_json_ignores_wrapping(value in arb_json_object()) {
        let text = serde_json::to_string(&value).unwrap();
        prop_assert_eq!(&extract_json(&text).unwrap(), &value);
        prop_assert_eq!(&extract_json(&format!("```json\n{text}\n```")).unwrap(), &value);
        prop_assert_eq!(&extract_json(&format!("Here you go: {text} Hope that helps")).unwrap(), &value);
    }
}

// ---------------------------------------------------------------------------
// 2. Durations written as "<n>s" or "<n> minutes" are read back exactly
// ---------------------------------------------------------------------------
proptest! {
    #[test]
    fn durations_are_parsed(n in 1u32..3600, minutes in any::<bool>()) {
        let (text, expected) = if minutes {
            (format!("a {n} minutes long film"), f64::from(n) * 60.0)
        } else {
            (format!("a {n}s film"), f64::from(n))
        };
        prop_assert_eq!(duration_from_text(&text), Some(expected));
    }
}

// ---------------------------------------------------------------------------
// 3. Batch summary counts always add up
// ---------------------------------------------------------------------------
proptest! {
    #[test]
    fn batch_summary_counts_add_up(specs in prop::collection::vec(arb_analysis(), 0..12)) {
        let batch = build_batch(&specs);
        let s = &batch.summary;
        prop_assert_eq!(s.total_assets, specs.len());
        prop_assert_eq!(s.successful_analyses + s.failed_analyses, s.total_assets);
        prop_assert_eq!(s.media_type_counts.values().sum::<usize>(), s.total_assets);
        prop_assert!((0.0..=10.0).contains(&s.average_quality));
    }
}

// ---------------------------------------------------------------------------
// 4. Every successful asset gets a role with non-zero use; failed ones are
//    excluded by a resolution
// ---------------------------------------------------------------------------
proptest! {
    #[test]
    fn asset_plan_respects_analysis_outcome(
        query in arb_query(),
        specs in prop::collection::vec(arb_analysis(), 1..10),
    ) {
        let batch = build_batch(&specs);
        let report = detect(&query, &batch);
        let excluded: Vec<&str> = report.excluded_assets().collect();
        let combined = fallback::asset_driven(&query, &batch, report.clone());

        prop_assert_eq!(combined.asset_plan.len(), batch.analyses.len());
        for (plan, analysis) in combined.asset_plan.iter().zip(&batch.analyses) {
            prop_assert_eq!(&plan.asset_id, &analysis.asset_id);
            if analysis.success {
                prop_assert!(plan.utilization > 0.0);
                prop_assert_ne!(plan.role, AssetRole::Unusable);
            } else {
                prop_assert_eq!(plan.role, AssetRole::Unusable);
                prop_assert!(excluded.contains(&analysis.asset_id.as_str()));
            }
        }
        for resolution in &report.resolutions {
            prop_assert!(report.conflicts.iter().any(|c| c.id == resolution.conflict_id));
            if resolution.action == ResolutionAction::ExcludeAsset {
                prop_assert!(!resolution.asset_ids.is_empty());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 5. Summary is deterministic and internally consistent
// ---------------------------------------------------------------------------
proptest! {
    #[test]
    fn summary_is_deterministic(
        query in arb_query(),
        specs in prop::collection::vec(arb_analysis(), 0..8),
    ) {
        let batch = build_batch(&specs);
        let combined = if batch.analyses.is_empty() {
            fallback::asset_free(&query)
        } else {
            fallback::asset_driven(&query, &batch, detect(&query, &batch))
        };
        let options = SummaryStepOptions::default();
        let input = SummaryInput {
            query_id: "q-prop",
            assets: &batch,
            combined: &combined,
            steps: &[],
            warnings: &[],
            options: &options,
        };
        let first = summarize(&input).unwrap();
        let second = summarize(&input).unwrap();
        prop_assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );

        let recs = &first.pipeline_recommendations;
        prop_assert_eq!(
            recs.estimated_total_credits,
            recs.steps.iter().map(|s| s.estimated_credits).sum::<u32>()
        );
        let util = &first.global_understanding.asset_utilization;
        prop_assert!((0.0..=1.0).contains(&util.utilization_rate));
        prop_assert_eq!(util.total_assets, specs.len());
        prop_assert!(first.creative_options.len() <= options.max_creative_options);
    }
}

// ---------------------------------------------------------------------------
// 6. The orchestrator keeps one result per asset, in input order
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]
    #[test]
    fn pipeline_preserves_asset_order(fails in prop::collection::vec(any::<bool>(), 0..8)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let assets: Vec<AssetInput> = fails
            .iter()
            .enumerate()
            .map(|(i, fail)| AssetInput {
                id: format!("a{i}"),
                url: if *fail {
                    format!("https://invalid.example.com/{i}.jpg")
                } else {
                    format!("https://cdn.example.com/{i}.jpg")
                },
                media_type: MediaType::Image,
                user_description: None,
                metadata: None,
            })
            .collect();
        let analyzer = UnifiedAnalyzer::new(
            PipelineModels {
                query: Arc::new(MockChatModel::with_response("{}")),
                combine: Arc::new(MockChatModel::with_response("{}")),
                vision: vec![Arc::new(MockVisionModel::new("{\"caption\": \"x\"}")) as Arc<dyn VisionModel>],
            },
            PipelineConfig { max_concurrent_assets: 3 },
            Arc::new(RecordingPublisher::new()),
        );

        let out = rt
            .block_on(analyzer.run("q", &AnalysisRequest::new("make a reel", assets.clone())))
            .unwrap();
        let ids: Vec<&str> = out.analysis.asset_analyses.iter().map(|a| a.asset_id.as_str()).collect();
        let expected: Vec<&str> = assets.iter().map(|a| a.id.as_str()).collect();
        prop_assert_eq!(ids, expected);
        for (analysis, fail) in out.analysis.asset_analyses.iter().zip(&fails) {
            prop_assert_eq!(analysis.success, !fail);
        }
    }
}
