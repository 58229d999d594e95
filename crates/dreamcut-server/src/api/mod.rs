pub mod queries;
pub mod query_analyzer;
pub mod realtime;
pub mod unified;

use axum::{Router, routing::get};

use crate::state::AppState;
use crate::types::{CapabilityLimits, Capabilities};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .nest(
            "/api",
            query_analyzer::routes()
                .merge(unified::routes())
                .merge(realtime::routes())
                .merge(queries::routes()),
        )
}

const STEPS: [&str; 4] = [
    "query analysis",
    "asset analysis",
    "combination",
    "comprehensive summary",
];

fn capabilities(state: &AppState, endpoint: &str, description: &str) -> Capabilities {
    let analysis = &state.config.analysis;
    Capabilities {
        endpoint: endpoint.to_string(),
        method: "POST".into(),
        description: description.to_string(),
        steps: STEPS.iter().map(|s| s.to_string()).collect(),
        media_types: ["image", "video", "audio"].iter().map(|s| s.to_string()).collect(),
        limits: CapabilityLimits {
            max_assets: analysis.max_assets,
            max_query_chars: analysis.max_query_chars,
            max_concurrent_assets: analysis.pipeline().max_concurrent_assets,
        },
        models: state.analyzer.models(),
        events: Vec::new(),
    }
}
