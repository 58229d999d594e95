use axum::extract::State;
use axum::{Json, Router, routing::get};

use crate::error::AppError;
use crate::extractors::ValidatedJson;
use crate::jobs::AnalysisJob;
use crate::state::AppState;
use crate::types::{
    BriefView, Capabilities, QueryAnalyzerRequest, QueryAnalyzerResponse, ResponseMetadata,
};

pub fn routes() -> Router<AppState> {
    Router::new().route("/query-analyzer", get(describe).post(analyze))
}

async fn describe(State(state): State<AppState>) -> Json<Capabilities> {
    Json(super::capabilities(
        &state,
        "/api/query-analyzer",
        "Runs the full analysis and returns the stored creative brief",
    ))
}

async fn analyze(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<QueryAnalyzerRequest>,
) -> Result<Json<QueryAnalyzerResponse>, AppError> {
    let job = AnalysisJob::new(req.into_request()).without_realtime();
    let request_id = job.request_id.clone();

    let (output, brief) = state
        .jobs
        .run_inline(job)
        .await
        .map_err(|e| e.into_app_error(state.expose_debug()))?;

    let metadata = ResponseMetadata::new(&request_id, &output, state.analyzer.models());
    Ok(Json(QueryAnalyzerResponse {
        success: true,
        brief: BriefView::new(&brief, &output.analysis),
        analysis: output.analysis,
        metadata,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use serde_json::json;
    use tower::ServiceExt;

    use crate::api::testing::{app, get, json_body, post_json, state};

    #[tokio::test]
    async fn returns_brief_and_analysis() {
        let state = state();
        let store = state.store.clone();
        let resp = app(routes(), state)
            .oneshot(post_json(
                "/api/query-analyzer",
                json!({"query": "Make 4 posters for a coffee shop", "outputImages": 4}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = json_body(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["brief"]["session_mode"], "asset_free");
        assert_eq!(body["analysis"]["session_mode"], "asset_free");
        assert_eq!(body["metadata"]["models"]["combine"], "mock-combiner");

        let brief_id = body["brief"]["id"].as_str().unwrap();
        assert!(store.get_brief(brief_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_query_is_rejected() {
        let resp = app(routes(), state())
            .oneshot(post_json("/api/query-analyzer", json!({"assets": []})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["success"], false);
    }

    #[tokio::test]
    async fn invalid_asset_reports_field_details() {
        let resp = app(routes(), state())
            .oneshot(post_json(
                "/api/query-analyzer",
                json!({
                    "query": "a trailer",
                    "assets": [{"id": "a1", "url": "not a url", "media_type": "image"}]
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = json_body(resp).await;
        assert!(body["details"]["assets[0].url"].is_array());
    }

    #[tokio::test]
    async fn get_describes_endpoint() {
        let resp = app(routes(), state())
            .oneshot(get("/api/query-analyzer"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["endpoint"], "/api/query-analyzer");
        assert_eq!(body["steps"].as_array().unwrap().len(), 4);
        assert_eq!(body["models"]["vision"][0], "mock-vision");
    }
}
