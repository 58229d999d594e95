pub mod api;
pub mod config;
pub mod error;
pub mod extractors;
pub mod jobs;
pub mod sqlite_store;
pub mod sse;
pub mod state;
pub mod store;
pub mod types;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    api::api_routes()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
