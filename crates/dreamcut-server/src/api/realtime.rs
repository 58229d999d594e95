use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router, routing::get};
use tokio::sync::broadcast::{Receiver, error::RecvError};

use dreamcut_analysis::progress::{ProgressEvent, RealtimeHub, Stage};

use crate::error::AppError;
use crate::extractors::ValidatedJson;
use crate::jobs::AnalysisJob;
use crate::sse::{ProgressEncoder, progress_response};
use crate::state::AppState;
use crate::store::{QueryRecord, QueryStatus};
use crate::types::{
    Capabilities, RealtimeAnalyzerRequest, RealtimeAnalyzerResponse, RealtimeSubscription,
};

/// How often an open event stream re-reads the query record.
const STATUS_POLL: Duration = Duration::from_millis(500);

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/realtime-analyzer", get(describe).post(submit))
        .route("/realtime/{query_id}/events", get(events))
}

async fn describe(State(state): State<AppState>) -> Json<Capabilities> {
    let mut caps = super::capabilities(
        &state,
        "/api/realtime-analyzer",
        "Starts an analysis in the background and streams progress on a per-query channel",
    );
    caps.events = RealtimeSubscription::for_query("").events;
    Json(caps)
}

async fn submit(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RealtimeAnalyzerRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut request = req.request;
    request.options.realtime.enabled = true;

    let mut job = AnalysisJob::new(request).with_user_id(req.user_id);
    if let Some(query_id) = req.query_id {
        job = job.with_query_id(query_id);
    }
    let (query_id, request_id) = (job.query_id.clone(), job.request_id.clone());

    // Detached: the outcome lands in the store and on the channel.
    state
        .jobs
        .submit(job)
        .await
        .map_err(|e| e.into_app_error(state.expose_debug()))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(RealtimeAnalyzerResponse {
            success: true,
            status_url: format!("/api/queries/{query_id}"),
            realtime_subscription: RealtimeSubscription::for_query(&query_id),
            query_id,
            request_id,
        }),
    ))
}

/// A hub receiver that releases the query's channel when the stream that
/// owns it is dropped, including on client disconnect.
struct Subscription {
    hub: RealtimeHub,
    query_id: String,
    rx: Option<Receiver<ProgressEvent>>,
}

impl Subscription {
    fn new(hub: RealtimeHub, query_id: &str) -> Self {
        let rx = hub.subscribe(query_id);
        Self {
            hub,
            query_id: query_id.to_string(),
            rx: Some(rx),
        }
    }

    async fn recv(&mut self) -> Result<ProgressEvent, RecvError> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => Err(RecvError::Closed),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        drop(self.rx.take());
        self.hub.close_if_idle(&self.query_id);
    }
}

enum Next {
    Received(Result<ProgressEvent, RecvError>),
    Poll,
}

/// Terminal event reconstructed from a finished query record.
fn snapshot(record: &QueryRecord) -> Option<ProgressEvent> {
    let (stage, message) = match record.status {
        QueryStatus::Completed => (
            Stage::Complete,
            match &record.brief_id {
                Some(id) => format!("Analysis complete; brief {id}"),
                None => "Analysis complete".to_string(),
            },
        ),
        QueryStatus::Failed => (
            Stage::Failed,
            record.error.clone().unwrap_or_else(|| "Analysis failed".into()),
        ),
        QueryStatus::Pending | QueryStatus::Running => return None,
    };
    Some(ProgressEvent::new(&record.query_id, stage, message, 1.0))
}

/// Live progress for one query as SSE.
///
/// Events published before the client connects are not replayed. A query
/// that has already finished yields a single terminal event built from its
/// record.
async fn events(
    State(state): State<AppState>,
    Path(query_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let mut subscription = Subscription::new(state.hub.clone(), &query_id);
    let Some(record) = state.store.get_query(&query_id).await? else {
        return Err(AppError::NotFound(format!("query {query_id}")));
    };

    let stream = async_stream::stream! {
        let mut encoder = ProgressEncoder::new();
        if let Some(event) = snapshot(&record) {
            drop(subscription);
            yield encoder.encode(&event);
            yield encoder.end();
            return;
        }

        let mut poll = tokio::time::interval(STATUS_POLL);
        loop {
            let next = tokio::select! {
                received = subscription.recv() => Next::Received(received),
                _ = poll.tick() => Next::Poll,
            };
            match next {
                Next::Received(Ok(event)) => {
                    let terminal = event.stage.is_terminal();
                    yield encoder.encode(&event);
                    if terminal {
                        break;
                    }
                }
                Next::Received(Err(RecvError::Lagged(skipped))) => {
                    tracing::warn!(query_id, skipped, "realtime subscriber lagged");
                }
                Next::Received(Err(RecvError::Closed)) => break,
                // Covers a run that finished between the client's POST and
                // its subscription.
                Next::Poll => match state.store.get_query(&query_id).await {
                    Ok(Some(latest)) => {
                        if let Some(event) = snapshot(&latest) {
                            yield encoder.encode(&event);
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => tracing::warn!(query_id, error = %e, "status poll failed"),
                },
            }
        }
        drop(subscription);
        yield encoder.end();
    };

    Ok(progress_response(stream))
}
