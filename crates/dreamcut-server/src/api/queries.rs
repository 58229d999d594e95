use axum::extract::{Path, State};
use axum::{Json, Router, routing::get};

use crate::error::AppError;
use crate::state::AppState;
use crate::store::{BriefRecord, QueryRecord};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/queries/{query_id}", get(get_query))
        .route("/briefs/{brief_id}", get(get_brief))
}

/// Status of a submitted analysis, including background failures.
async fn get_query(
    State(state): State<AppState>,
    Path(query_id): Path<String>,
) -> Result<Json<QueryRecord>, AppError> {
    state
        .store
        .get_query(&query_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("query {query_id}")))
}

async fn get_brief(
    State(state): State<AppState>,
    Path(brief_id): Path<String>,
) -> Result<Json<BriefRecord>, AppError> {
    state
        .store
        .get_brief(&brief_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("brief {brief_id}")))
}
