use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use dreamcut_analysis::combine::SessionMode;

use crate::store::{BriefRecord, BriefStore, QueryRecord, QueryStatus, StoreError, StoreResult};

/// SQLite-backed brief store.
///
/// Thread-safe via `Arc<Mutex<Connection>>`. All SQLite operations are
/// dispatched to a blocking thread via `tokio::task::spawn_blocking`.
pub struct SqliteBriefStore {
    conn: Arc<Mutex<Connection>>,
}

fn backend(context: &'static str) -> impl Fn(rusqlite::Error) -> StoreError {
    move |e| StoreError::Backend(format!("{context}: {e}"))
}

fn lock(conn: &Mutex<Connection>) -> StoreResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| StoreError::Backend("connection mutex poisoned".into()))
}

impl SqliteBriefStore {
    /// Open (or create) a SQLite database at the given path.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path).map_err(backend("failed to open database"))?;
        Self::init(conn)
    }

    /// In-memory database, for tests.
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(backend("failed to open in-memory db"))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS queries (
                query_id TEXT PRIMARY KEY,
                request_id TEXT NOT NULL,
                user_id TEXT,
                query TEXT NOT NULL,
                status TEXT NOT NULL,
                error TEXT,
                brief_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS briefs (
                id TEXT PRIMARY KEY,
                query_id TEXT NOT NULL UNIQUE REFERENCES queries(query_id),
                user_id TEXT,
                query TEXT NOT NULL,
                session_mode TEXT NOT NULL,
                analysis TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_queries_user ON queries(user_id, created_at);",
        )
        .map_err(backend("failed to create tables"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&conn)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("spawn_blocking: {e}")))?
    }
}

fn parse_time(column: &str, value: String) -> StoreResult<DateTime<Utc>> {
    value
        .parse()
        .map_err(|e| StoreError::Corrupt(format!("{column} '{value}': {e}")))
}

type QueryRow = (
    String,
    String,
    Option<String>,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    String,
);

fn query_from_row(row: QueryRow) -> StoreResult<QueryRecord> {
    let (query_id, request_id, user_id, query, status, error, brief_id, created_at, updated_at) =
        row;
    let status = QueryStatus::parse(&status)
        .ok_or_else(|| StoreError::Corrupt(format!("status '{status}'")))?;
    Ok(QueryRecord {
        query_id,
        request_id,
        user_id,
        query,
        status,
        error,
        brief_id,
        created_at: parse_time("created_at", created_at)?,
        updated_at: parse_time("updated_at", updated_at)?,
    })
}

type BriefRow = (String, String, Option<String>, String, String, String, String);

fn brief_from_row(row: BriefRow) -> StoreResult<BriefRecord> {
    let (id, query_id, user_id, query, session_mode, analysis, created_at) = row;
    let session_mode: SessionMode = serde_json::from_value(serde_json::Value::String(session_mode))
        .map_err(|e| StoreError::Corrupt(format!("session_mode: {e}")))?;
    let analysis = serde_json::from_str(&analysis)
        .map_err(|e| StoreError::Corrupt(format!("analysis: {e}")))?;
    Ok(BriefRecord {
        id,
        query_id,
        user_id,
        query,
        session_mode,
        analysis,
        created_at: parse_time("created_at", created_at)?,
    })
}

#[async_trait]
impl BriefStore for SqliteBriefStore {
    async fn create_query(&self, record: QueryRecord) -> StoreResult<()> {
        self.with_conn(move |conn| {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO queries
                        (query_id, request_id, user_id, query, status, error, brief_id, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        record.query_id,
                        record.request_id,
                        record.user_id,
                        record.query,
                        record.status.as_str(),
                        record.error,
                        record.brief_id,
                        record.created_at.to_rfc3339(),
                        record.updated_at.to_rfc3339(),
                    ],
                )
                .map_err(backend("insert query"))?;
            if inserted == 0 {
                return Err(StoreError::Conflict(format!("query {}", record.query_id)));
            }
            Ok(())
        })
        .await
    }

    async fn get_query(&self, query_id: &str) -> StoreResult<Option<QueryRecord>> {
        let query_id = query_id.to_string();
        let row: Option<QueryRow> = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT query_id, request_id, user_id, query, status, error, brief_id, created_at, updated_at
                     FROM queries WHERE query_id = ?1",
                    params![query_id],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            row.get(6)?,
                            row.get(7)?,
                            row.get(8)?,
                        ))
                    },
                )
                .optional()
                .map_err(backend("select query"))
            })
            .await?;
        row.map(query_from_row).transpose()
    }

    async fn set_status(
        &self,
        query_id: &str,
        status: QueryStatus,
        error: Option<String>,
    ) -> StoreResult<()> {
        let query_id = query_id.to_string();
        self.with_conn(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE queries SET status = ?2, error = ?3, updated_at = ?4 WHERE query_id = ?1",
                    params![query_id, status.as_str(), error, Utc::now().to_rfc3339()],
                )
                .map_err(backend("update status"))?;
            if updated == 0 {
                return Err(StoreError::NotFound(format!("query {query_id}")));
            }
            Ok(())
        })
        .await
    }

    async fn save_brief(&self, brief: BriefRecord) -> StoreResult<()> {
        let analysis = serde_json::to_string(&brief.analysis)
            .map_err(|e| StoreError::Backend(format!("serialize analysis: {e}")))?;
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(backend("begin"))?;
            let existing: Option<Option<String>> = tx
                .query_row(
                    "SELECT brief_id FROM queries WHERE query_id = ?1",
                    params![brief.query_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(backend("select query"))?;
            match existing {
                None => return Err(StoreError::NotFound(format!("query {}", brief.query_id))),
                Some(Some(_)) => {
                    return Err(StoreError::Conflict(format!(
                        "brief for query {}",
                        brief.query_id
                    )));
                }
                Some(None) => {}
            }

            tx.execute(
                "INSERT INTO briefs (id, query_id, user_id, query, session_mode, analysis, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    brief.id,
                    brief.query_id,
                    brief.user_id,
                    brief.query,
                    brief.session_mode.as_str(),
                    analysis,
                    brief.created_at.to_rfc3339(),
                ],
            )
            .map_err(backend("insert brief"))?;
            tx.execute(
                "UPDATE queries SET status = ?2, error = NULL, brief_id = ?3, updated_at = ?4
                 WHERE query_id = ?1",
                params![
                    brief.query_id,
                    QueryStatus::Completed.as_str(),
                    brief.id,
                    Utc::now().to_rfc3339()
                ],
            )
            .map_err(backend("complete query"))?;
            tx.commit().map_err(backend("commit"))
        })
        .await
    }

    async fn get_brief(&self, brief_id: &str) -> StoreResult<Option<BriefRecord>> {
        let brief_id = brief_id.to_string();
        let row: Option<BriefRow> = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT id, query_id, user_id, query, session_mode, analysis, created_at
                     FROM briefs WHERE id = ?1",
                    params![brief_id],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            row.get(6)?,
                        ))
                    },
                )
                .optional()
                .map_err(backend("select brief"))
            })
            .await?;
        row.map(brief_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn brief(id: &str, query_id: &str) -> BriefRecord {
        BriefRecord {
            id: id.into(),
            query_id: query_id.into(),
            user_id: Some("u1".into()),
            query: "a trailer".into(),
            session_mode: SessionMode::AssetDriven,
            analysis: json!({"query_id": query_id, "creative_options": [1, 2, 3]}),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn query_lifecycle() {
        let store = SqliteBriefStore::in_memory().unwrap();
        store
            .create_query(QueryRecord::new("q1", "r1", Some("u1".into()), "a trailer"))
            .await
            .unwrap();
        store.set_status("q1", QueryStatus::Running, None).await.unwrap();
        assert_eq!(
            store.get_query("q1").await.unwrap().unwrap().status,
            QueryStatus::Running
        );

        store.save_brief(brief("b1", "q1")).await.unwrap();
        let record = store.get_query("q1").await.unwrap().unwrap();
        assert_eq!(record.status, QueryStatus::Completed);
        assert_eq!(record.brief_id.as_deref(), Some("b1"));
        assert_eq!(record.user_id.as_deref(), Some("u1"));

        let stored = store.get_brief("b1").await.unwrap().unwrap();
        assert_eq!(stored.session_mode, SessionMode::AssetDriven);
        assert_eq!(stored.analysis["creative_options"], json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn brief_is_written_once() {
        let store = SqliteBriefStore::in_memory().unwrap();
        store.create_query(QueryRecord::new("q1", "r1", None, "x")).await.unwrap();
        store.save_brief(brief("b1", "q1")).await.unwrap();
        assert!(matches!(
            store.save_brief(brief("b2", "q1")).await,
            Err(StoreError::Conflict(_))
        ));
        assert!(store.get_brief("b2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_query_and_missing_ids() {
        let store = SqliteBriefStore::in_memory().unwrap();
        store.create_query(QueryRecord::new("q1", "r1", None, "x")).await.unwrap();
        assert!(matches!(
            store.create_query(QueryRecord::new("q1", "r2", None, "y")).await,
            Err(StoreError::Conflict(_))
        ));
        assert!(matches!(
            store.set_status("nope", QueryStatus::Failed, None).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.save_brief(brief("b1", "nope")).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(store.get_query("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("briefs.db");
        {
            let store = SqliteBriefStore::new(&path).unwrap();
            store.create_query(QueryRecord::new("q1", "r1", None, "x")).await.unwrap();
            store
                .set_status("q1", QueryStatus::Failed, Some("provider outage".into()))
                .await
                .unwrap();
        }
        let store = SqliteBriefStore::new(&path).unwrap();
        let record = store.get_query("q1").await.unwrap().unwrap();
        assert_eq!(record.status, QueryStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("provider outage"));
    }
}
