//! End-to-end runs of the four-step analysis against mock providers.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;

use dreamcut_analysis::conflicts::ConflictKind;
use dreamcut_analysis::mock::{MockChatModel, MockVisionModel, RecordingPublisher};
use dreamcut_analysis::prelude::*;
use dreamcut_analysis::query::{MAX_DURATION_SECONDS, MAX_OUTPUT_IMAGES};
use dreamcut_analysis::summarize::ProductionStage;
use dreamcut_analysis::types::AssetMetadata;
use dreamcut_core::error::ModelError;
use dreamcut_core::model::VisionModel;

const TRAILER_REPLY: &str = r#"```json
{
  "intent": {"primary": "cinematic trailer", "output_type": "video", "goal": "tease a cyberpunk world"},
  "constraints": {"duration_seconds": 30, "style": ["cinematic", "neon"], "mood": ["tense"]},
  "creative_reframing": {"core_concept": "A city that never sleeps, seen through one rain-soaked night"},
  "confidence": 0.92
}
```"#;

const PROMO_REPLY: &str = r#"{"intent": {"primary": "promo", "output_type": "video"}, "constraints": {"duration_seconds": 30}, "confidence": 0.8}"#;

const VISION_REPLY: &str = r#"{"caption": "barista pouring latte art", "quality_score": 7.5, "detected_attributes": ["warm light", "close-up"]}"#;

const SYNTHESIS_REPLY: &str = r#"Here is the plan:
{"creative_direction": "Warm morning ritual", "narrative_beats": ["Doors open", "First pour", "Regulars arrive"]}"#;

fn models(query: MockChatModel, combine: MockChatModel, vision: MockVisionModel) -> PipelineModels {
    PipelineModels {
        query: Arc::new(query),
        combine: Arc::new(combine),
        vision: vec![Arc::new(vision) as Arc<dyn VisionModel>],
    }
}

fn asset(id: &str, url: &str, media_type: MediaType, seconds: Option<f64>) -> AssetInput {
    AssetInput {
        id: id.into(),
        url: url.into(),
        media_type,
        user_description: None,
        metadata: seconds.map(|s| AssetMetadata {
            duration_seconds: Some(s),
            ..Default::default()
        }),
    }
}

fn coffee_shop_assets() -> Vec<AssetInput> {
    vec![
        asset("v1", "https://cdn.example.com/shop.mp4", MediaType::Video, Some(45.0)),
        asset("i1", "https://cdn.example.com/latte.jpg", MediaType::Image, None),
        asset("i2", "https://invalid.example.com/missing.jpg", MediaType::Image, None),
    ]
}

#[tokio::test]
async fn asset_free_trailer() {
    let vision = Arc::new(MockVisionModel::new(VISION_REPLY));
    let analyzer = UnifiedAnalyzer::new(
        PipelineModels {
            query: Arc::new(MockChatModel::with_response(TRAILER_REPLY)),
            combine: Arc::new(MockChatModel::with_response("{}")),
            vision: vec![vision.clone() as Arc<dyn VisionModel>],
        },
        PipelineConfig::default(),
        Arc::new(NoopPublisher),
    );

    let out = analyzer
        .run(
            "q-trailer",
            &AnalysisRequest::new("Create a cinematic 30s cyberpunk trailer", vec![]),
        )
        .await
        .unwrap();

    assert_eq!(vision.call_count(), 0);
    assert_eq!(out.analysis.session_mode, SessionMode::AssetFree);
    assert_eq!(out.query_analysis.intent.output_type, OutputType::Video);
    assert_eq!(out.query_analysis.constraints.duration_seconds, Some(30.0));
    assert!(out.warnings.is_empty());
    assert!(out.analysis.asset_plan.is_empty());
    assert_eq!(out.analysis.global_understanding.asset_utilization.total_assets, 0);

    let recs = &out.analysis.pipeline_recommendations;
    assert_eq!(recs.estimated_total_credits, 71);
    assert!(recs.within_budget);
    assert!(recs.steps.iter().any(|s| s.stage == ProductionStage::VideoGeneration));
    assert!(!out.analysis.creative_options.is_empty());
    assert!(out.analysis.creative_options.iter().all(|o| !o.uses_assets));
}

#[tokio::test]
async fn coffee_shop_promo_with_broken_asset() {
    let publisher = Arc::new(RecordingPublisher::new());
    let analyzer = UnifiedAnalyzer::new(
        models(
            MockChatModel::with_response(PROMO_REPLY),
            MockChatModel::with_response(SYNTHESIS_REPLY).named("mock-combiner"),
            MockVisionModel::new(VISION_REPLY),
        ),
        PipelineConfig::default(),
        publisher.clone(),
    );
    let request = AnalysisRequest::new(
        "Make a 30 second promo video for our coffee shop",
        coffee_shop_assets(),
    );

    let out = analyzer.run("q-promo", &request).await.unwrap();
    let analysis = &out.analysis;

    assert_eq!(analysis.session_mode, SessionMode::AssetDriven);
    let ids: Vec<&str> = analysis.asset_analyses.iter().map(|a| a.asset_id.as_str()).collect();
    assert_eq!(ids, vec!["v1", "i1", "i2"]);
    assert!(analysis.asset_analyses[0].success);
    assert_eq!(analysis.asset_analyses[0].duration_seconds, Some(45.0));
    assert!(!analysis.asset_analyses[2].success);

    let role_of = |id: &str| {
        analysis
            .asset_plan
            .iter()
            .find(|p| p.asset_id == id)
            .map(|p| p.role)
    };
    assert_eq!(role_of("v1"), Some(AssetRole::Primary));
    assert_eq!(role_of("i1"), Some(AssetRole::Supporting));
    assert_eq!(role_of("i2"), Some(AssetRole::Unusable));

    assert!(out.combined.report.has(ConflictKind::DurationExceedsRequest));
    assert!(out.combined.report.has(ConflictKind::FailedAsset));
    assert_eq!(out.combined.synthesized_by.as_deref(), Some("mock-combiner"));
    assert_eq!(analysis.brief.creative_direction, "Warm morning ritual");
    assert_eq!(analysis.brief.narrative_beats.len(), 3);

    assert!(out.steps.iter().all(|s| s.success && !s.skipped));
    assert!(out.warnings.iter().any(|w| w.contains("Asset i2 could not be analyzed")));
    assert!(
        analysis
            .pipeline_recommendations
            .steps
            .iter()
            .any(|s| s.stage == ProductionStage::AssetPreparation)
    );
    assert_eq!(
        analysis.processing_insights.models_used,
        vec!["mock-chat", "mock-combiner", "mock-vision"]
    );

    let events = publisher.events();
    assert_eq!(events.first().map(|e| e.stage), Some(Stage::Init));
    assert_eq!(events.last().map(|e| e.stage), Some(Stage::Complete));
    assert_eq!(events.iter().filter(|e| e.stage == Stage::Analyzing).count(), 3);
}

#[tokio::test]
async fn disabling_synthesis_keeps_rule_based_plan() {
    let combine = Arc::new(MockChatModel::with_response(SYNTHESIS_REPLY));
    let analyzer = UnifiedAnalyzer::new(
        PipelineModels {
            query: Arc::new(MockChatModel::with_response(PROMO_REPLY)),
            combine: combine.clone(),
            vision: vec![Arc::new(MockVisionModel::new(VISION_REPLY)) as Arc<dyn VisionModel>],
        },
        PipelineConfig::default(),
        Arc::new(NoopPublisher),
    );
    let mut request = AnalysisRequest::new("Make a 30 second promo video", coffee_shop_assets());
    request.options.step3.enabled = false;

    let out = analyzer.run("q-rules", &request).await.unwrap();

    assert_eq!(combine.call_count(), 0);
    assert!(out.steps[2].skipped);
    assert_eq!(out.combined.synthesized_by, None);
    assert_eq!(out.analysis.session_mode, SessionMode::AssetDriven);
}

#[tokio::test]
async fn provider_outage_still_produces_a_plan() {
    let analyzer = UnifiedAnalyzer::new(
        models(
            MockChatModel::failing(ModelError::RateLimited { retry_after_secs: Some(30) }),
            MockChatModel::failing(ModelError::RateLimited { retry_after_secs: None }),
            MockVisionModel::new(VISION_REPLY),
        ),
        PipelineConfig::default(),
        Arc::new(NoopPublisher),
    );
    let request = AnalysisRequest::new("Make a 30 second promo video", coffee_shop_assets());

    let out = analyzer.run("q-outage", &request).await.unwrap();

    assert!(!out.steps[0].success);
    assert!(out.steps[2].success);
    assert_eq!(out.combined.synthesized_by, None);
    assert_eq!(out.query_analysis.constraints.duration_seconds, Some(30.0));
    let warnings = &out.analysis.processing_insights.warnings;
    assert!(warnings.iter().any(|w| w.contains("heuristics")));
    assert!(warnings.iter().any(|w| w.contains("rule-based brief")));
    assert_eq!(out.analysis.asset_plan.len(), 3);
    assert!(out.analysis.pipeline_recommendations.estimated_total_credits > 0);
}

#[tokio::test]
async fn realtime_subscriber_sees_the_whole_run() {
    let hub = RealtimeHub::new();
    let mut rx = hub.subscribe("q-live");
    let analyzer = UnifiedAnalyzer::new(
        models(
            MockChatModel::with_response(PROMO_REPLY),
            MockChatModel::with_response(SYNTHESIS_REPLY),
            MockVisionModel::new(VISION_REPLY),
        ),
        PipelineConfig::default(),
        Arc::new(hub.clone()),
    );
    let request = AnalysisRequest::new("Make a 30 second promo video", coffee_shop_assets());

    analyzer.run("q-live", &request).await.unwrap();

    let mut stages = Vec::new();
    loop {
        match rx.recv().await {
            Ok(event) => {
                assert_eq!(event.query_id, "q-live");
                stages.push(event.stage);
            }
            Err(RecvError::Closed) => break,
            Err(RecvError::Lagged(n)) => panic!("lagged by {n}"),
        }
    }
    assert_eq!(stages.first(), Some(&Stage::Init));
    assert_eq!(stages.last(), Some(&Stage::Complete));
    assert_eq!(stages.iter().filter(|s| **s == Stage::Analyzing).count(), 3);
    assert_eq!(hub.subscriber_count("q-live"), 0);
}

#[tokio::test]
async fn oversized_requests_are_bounded() {
    let heuristic = UnifiedAnalyzer::new(
        models(
            MockChatModel::failing(ModelError::Timeout("60s".into())),
            MockChatModel::with_response("{}"),
            MockVisionModel::new(VISION_REPLY),
        ),
        PipelineConfig::default(),
        Arc::new(NoopPublisher),
    );

    let out = heuristic
        .run("q-long", &AnalysisRequest::new("Create a 3000000000s trailer", vec![]))
        .await
        .unwrap();
    assert_eq!(out.query_analysis.constraints.duration_seconds, Some(MAX_DURATION_SECONDS));
    assert!(out.analysis.pipeline_recommendations.estimated_total_credits < u32::MAX);

    let out = heuristic
        .run("q-many", &AnalysisRequest::new("generate 2000000000 images of a cat", vec![]))
        .await
        .unwrap();
    assert_eq!(out.query_analysis.constraints.output_images, Some(MAX_OUTPUT_IMAGES));
    assert!(out.analysis.pipeline_recommendations.estimated_total_credits < u32::MAX);

    let modelled = UnifiedAnalyzer::new(
        models(
            MockChatModel::with_response(
                r#"{"intent": {"primary": "trailer", "output_type": "video"}, "constraints": {"duration_seconds": 1e18}}"#,
            ),
            MockChatModel::with_response("{}"),
            MockVisionModel::new(VISION_REPLY),
        ),
        PipelineConfig::default(),
        Arc::new(NoopPublisher),
    );
    let out = modelled
        .run("q-model", &AnalysisRequest::new("an endless trailer", vec![]))
        .await
        .unwrap();
    assert_eq!(out.query_analysis.constraints.duration_seconds, Some(MAX_DURATION_SECONDS));
}
