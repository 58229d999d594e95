use axum::extract::State;
use axum::{Json, Router, routing::get};

use dreamcut_analysis::types::AnalysisRequest;

use crate::error::AppError;
use crate::extractors::ValidatedJson;
use crate::jobs::AnalysisJob;
use crate::state::AppState;
use crate::types::{Capabilities, ResponseMetadata, UnifiedAnalyzerResponse};

pub fn routes() -> Router<AppState> {
    Router::new().route("/unified-analyzer", get(describe).post(analyze))
}

async fn describe(State(state): State<AppState>) -> Json<Capabilities> {
    Json(super::capabilities(
        &state,
        "/api/unified-analyzer",
        "Runs all four analysis steps inline and returns the comprehensive analysis",
    ))
}

async fn analyze(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<AnalysisRequest>,
) -> Result<Json<UnifiedAnalyzerResponse>, AppError> {
    let job = AnalysisJob::new(req).without_realtime();
    let request_id = job.request_id.clone();
    tracing::info!(query_id = %job.query_id, request_id, "unified analysis requested");

    let (output, brief) = state
        .jobs
        .run_inline(job)
        .await
        .map_err(|e| e.into_app_error(state.expose_debug()))?;

    let metadata = ResponseMetadata::new(&request_id, &output, state.analyzer.models());
    Ok(Json(UnifiedAnalyzerResponse {
        success: true,
        brief_id: brief.id,
        analysis: output.analysis,
        steps: output.steps,
        warnings: output.warnings,
        metadata,
    }))
}
