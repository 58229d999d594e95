use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

use dreamcut_analysis::pipeline::{PipelineOutput, UnifiedAnalyzer};
use dreamcut_analysis::progress::{ProgressEvent, ProgressPublisher, RealtimeHub, Stage};
use dreamcut_analysis::types::AnalysisRequest;
use dreamcut_core::error::StepError;

use crate::error::AppError;
use crate::store::{BriefRecord, BriefStore, QueryRecord, QueryStatus, StoreError};

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Pipeline(#[from] StepError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The analysis task panicked or was cancelled.
    #[error("analysis task aborted: {0}")]
    Aborted(String),
}

impl JobError {
    pub fn into_app_error(self, expose_debug: bool) -> AppError {
        match self {
            JobError::Pipeline(e) => AppError::from_step(e, expose_debug),
            JobError::Store(e) => AppError::from(e),
            aborted @ JobError::Aborted(_) => AppError::internal(aborted, expose_debug),
        }
    }
}

/// One analysis run and the ids it is tracked under.
#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub query_id: String,
    pub request_id: String,
    pub user_id: Option<String>,
    pub request: AnalysisRequest,
}

impl AnalysisJob {
    pub fn new(request: AnalysisRequest) -> Self {
        Self {
            query_id: Uuid::new_v4().to_string(),
            request_id: Uuid::new_v4().to_string(),
            user_id: None,
            request,
        }
    }

    pub fn with_query_id(mut self, query_id: impl Into<String>) -> Self {
        self.query_id = query_id.into();
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Skip progress publishing. The query id of a synchronous call is not
    /// known to the client until the response, so nobody can be subscribed.
    pub fn without_realtime(mut self) -> Self {
        self.request.options.realtime.enabled = false;
        self
    }

    fn record(&self) -> QueryRecord {
        QueryRecord::new(
            &self.query_id,
            &self.request_id,
            self.user_id.clone(),
            &self.request.query,
        )
    }
}

/// Runs analyses and records their terminal state in the brief store.
///
/// Every run moves its query record through `pending → running →
/// completed | failed`, so a background failure is visible through the
/// store even when no realtime subscriber is listening.
#[derive(Clone)]
pub struct JobRunner {
    analyzer: Arc<UnifiedAnalyzer>,
    store: Arc<dyn BriefStore>,
    hub: RealtimeHub,
}

impl JobRunner {
    pub fn new(analyzer: Arc<UnifiedAnalyzer>, store: Arc<dyn BriefStore>, hub: RealtimeHub) -> Self {
        Self {
            analyzer,
            store,
            hub,
        }
    }

    /// Run to completion within the caller's request.
    pub async fn run_inline(&self, job: AnalysisJob) -> Result<(PipelineOutput, BriefRecord), JobError> {
        self.store.create_query(job.record()).await?;
        self.mark(&job.query_id, QueryStatus::Running, None).await;

        let outcome = self.run_guarded(&job).await;
        if let Err(e) = &outcome {
            tracing::error!(query_id = %job.query_id, error = %e, "inline job failed");
            self.mark(&job.query_id, QueryStatus::Failed, Some(e.to_string())).await;
        }
        outcome
    }

    /// Record the job as pending and run it on a background task.
    ///
    /// Returns once the pending record is stored; the handle resolves when
    /// the run reaches a terminal state.
    pub async fn submit(&self, job: AnalysisJob) -> Result<JoinHandle<()>, JobError> {
        self.store.create_query(job.record()).await?;
        tracing::info!(query_id = %job.query_id, request_id = %job.request_id, "job queued");

        let runner = self.clone();
        Ok(tokio::spawn(async move { runner.execute(job).await }))
    }

    async fn execute(self, job: AnalysisJob) {
        let query_id = job.query_id.clone();
        self.mark(&query_id, QueryStatus::Running, None).await;

        match self.run_guarded(&job).await {
            Ok((_, brief)) => tracing::info!(query_id, brief_id = brief.id, "job completed"),
            Err(e) => {
                tracing::error!(query_id, error = %e, "job failed");
                self.mark(&query_id, QueryStatus::Failed, Some(e.to_string())).await;
            }
        }
    }

    /// Run the pipeline on its own task and persist the brief.
    ///
    /// A panic is caught here instead of leaving the record stuck in
    /// `running`, and subscribers get the `failed` event the pipeline
    /// never published.
    async fn run_guarded(&self, job: &AnalysisJob) -> Result<(PipelineOutput, BriefRecord), JobError> {
        let analyzer = Arc::clone(&self.analyzer);
        let (id, request) = (job.query_id.clone(), job.request.clone());
        let run = tokio::spawn(async move { analyzer.run(&id, &request).await });

        match run.await {
            Ok(Ok(output)) => {
                let brief = self.persist(job, &output).await?;
                Ok((output, brief))
            }
            // The pipeline has already published its own `failed` event.
            Ok(Err(e)) => Err(JobError::Pipeline(e)),
            Err(join) => {
                let err = JobError::Aborted(join.to_string());
                self.hub.publish(
                    &job.query_id,
                    ProgressEvent::new(&job.query_id, Stage::Failed, err.to_string(), 1.0),
                );
                Err(err)
            }
        }
    }

    async fn persist(&self, job: &AnalysisJob, output: &PipelineOutput) -> Result<BriefRecord, JobError> {
        let analysis = serde_json::to_value(&output.analysis)
            .map_err(|e| StoreError::Backend(format!("serialize analysis: {e}")))?;
        let brief = BriefRecord {
            id: Uuid::new_v4().to_string(),
            query_id: job.query_id.clone(),
            user_id: job.user_id.clone(),
            query: job.request.query.clone(),
            session_mode: output.analysis.session_mode,
            analysis,
            created_at: Utc::now(),
        };
        self.store.save_brief(brief.clone()).await?;
        Ok(brief)
    }

    async fn mark(&self, query_id: &str, status: QueryStatus, error: Option<String>) {
        if let Err(e) = self.store.set_status(query_id, status, error).await {
            tracing::warn!(query_id, status = status.as_str(), error = %e, "failed to record job status");
        }
    }
}
