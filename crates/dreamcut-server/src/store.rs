use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

use dreamcut_analysis::combine::SessionMode;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    Conflict(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Pending => "pending",
            QueryStatus::Running => "running",
            QueryStatus::Completed => "completed",
            QueryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(QueryStatus::Pending),
            "running" => Some(QueryStatus::Running),
            "completed" => Some(QueryStatus::Completed),
            "failed" => Some(QueryStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueryStatus::Completed | QueryStatus::Failed)
    }
}

/// One analysis request and where it got to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub query_id: String,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub query: String,
    pub status: QueryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brief_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueryRecord {
    pub fn new(
        query_id: impl Into<String>,
        request_id: impl Into<String>,
        user_id: Option<String>,
        query: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            query_id: query_id.into(),
            request_id: request_id.into(),
            user_id,
            query: query.into(),
            status: QueryStatus::Pending,
            error: None,
            brief_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The persisted result of one completed analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BriefRecord {
    pub id: String,
    pub query_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub query: String,
    pub session_mode: SessionMode,
    /// The serialized comprehensive analysis.
    pub analysis: Value,
    pub created_at: DateTime<Utc>,
}

/// Persistence for query status records and briefs.
#[async_trait]
pub trait BriefStore: Send + Sync {
    /// Insert a new query record. Fails with `Conflict` if the id is taken.
    async fn create_query(&self, record: QueryRecord) -> StoreResult<()>;

    async fn get_query(&self, query_id: &str) -> StoreResult<Option<QueryRecord>>;

    /// Move a query to `status`, recording `error` for failures.
    async fn set_status(
        &self,
        query_id: &str,
        status: QueryStatus,
        error: Option<String>,
    ) -> StoreResult<()>;

    /// Store the brief and mark its query completed.
    ///
    /// A query gets at most one brief; a second write is a `Conflict`.
    async fn save_brief(&self, brief: BriefRecord) -> StoreResult<()>;

    async fn get_brief(&self, brief_id: &str) -> StoreResult<Option<BriefRecord>>;
}

#[derive(Default)]
struct Tables {
    queries: HashMap<String, QueryRecord>,
    briefs: HashMap<String, BriefRecord>,
}

/// In-memory store, the default when no database path is configured.
#[derive(Clone, Default)]
pub struct MemoryBriefStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryBriefStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BriefStore for MemoryBriefStore {
    async fn create_query(&self, record: QueryRecord) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.queries.contains_key(&record.query_id) {
            return Err(StoreError::Conflict(format!("query {}", record.query_id)));
        }
        tables.queries.insert(record.query_id.clone(), record);
        Ok(())
    }

    async fn get_query(&self, query_id: &str) -> StoreResult<Option<QueryRecord>> {
        Ok(self.tables.read().await.queries.get(query_id).cloned())
    }

    async fn set_status(
        &self,
        query_id: &str,
        status: QueryStatus,
        error: Option<String>,
    ) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let record = tables
            .queries
            .get_mut(query_id)
            .ok_or_else(|| StoreError::NotFound(format!("query {query_id}")))?;
        record.status = status;
        record.error = error;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn save_brief(&self, brief: BriefRecord) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let Tables { queries, briefs } = &mut *tables;
        let record = queries
            .get_mut(&brief.query_id)
            .ok_or_else(|| StoreError::NotFound(format!("query {}", brief.query_id)))?;
        if record.brief_id.is_some() || briefs.contains_key(&brief.id) {
            return Err(StoreError::Conflict(format!("brief for query {}", brief.query_id)));
        }
        record.brief_id = Some(brief.id.clone());
        record.status = QueryStatus::Completed;
        record.error = None;
        record.updated_at = Utc::now();
        briefs.insert(brief.id.clone(), brief);
        Ok(())
    }

    async fn get_brief(&self, brief_id: &str) -> StoreResult<Option<BriefRecord>> {
        Ok(self.tables.read().await.briefs.get(brief_id).cloned())
    }
}
