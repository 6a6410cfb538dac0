//! `SQLite`-backed checkpoint log.
//!
//! One row per checkpoint. Rows are only ever inserted; `seq` gives the
//! append order and `created_at` (Unix micros) the time order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::store::{check_append, CheckpointStore, StoreError};
use crate::types::{Checkpoint, NextStep};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS checkpoints (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    thread_id   TEXT NOT NULL,
    next_step   TEXT NOT NULL,
    pending     TEXT,
    messages    TEXT NOT NULL,
    created_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_checkpoints_thread ON checkpoints(thread_id, seq);
CREATE INDEX IF NOT EXISTS idx_checkpoints_created ON checkpoints(thread_id, created_at);
";

/// Raw column values of one checkpoint row.
type RawRow = (String, String, Option<String>, String, i64);

/// `SQLite` checkpoint store.
///
/// Database path defaults to `~/.hitl-agent/checkpoints.db`. Statements run
/// on the blocking pool, so a commit's fsync never stalls a runtime worker.
pub struct SqliteCheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCheckpointStore {
    /// Open (or create) the store at the given database path.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                    operation: "creating checkpoint directory",
                    source,
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    /// Store backed by a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        // fsync on every commit: a returned save must survive a crash
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.execute_batch(SCHEMA)?;
        tracing::debug!(journal_mode = %mode, "Checkpoint schema ready");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `work` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| StoreError::Lock(e.to_string()))?;
            work(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Health check: verify database is accessible.
    pub fn health_check(&self) -> bool {
        self.conn
            .lock()
            .map(|c| c.execute_batch("SELECT 1").is_ok())
            .unwrap_or(false)
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let messages = serde_json::to_string(&checkpoint.messages)
            .map_err(|e| StoreError::serialization(&checkpoint.thread_id, e))?;
        let pending = checkpoint
            .pending
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::serialization(&checkpoint.thread_id, e))?;

        let owned = checkpoint.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;

            let latest: Option<i64> = tx
                .query_row(
                    "SELECT MAX(created_at) FROM checkpoints WHERE thread_id = ?1",
                    params![owned.thread_id],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();
            check_append(&owned, latest.and_then(DateTime::from_timestamp_micros))?;

            tx.execute(
                "INSERT INTO checkpoints (thread_id, next_step, pending, messages, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    owned.thread_id,
                    owned.next.as_str(),
                    pending,
                    messages,
                    owned.created_at.timestamp_micros(),
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await?;

        tracing::trace!(
            thread_id = %checkpoint.thread_id,
            next = checkpoint.next.as_str(),
            messages = checkpoint.messages.len(),
            "Checkpoint appended"
        );
        Ok(())
    }

    async fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        let thread_id = thread_id.to_string();
        let raw: Option<RawRow> = self
            .with_conn(move |conn| {
                let row: Option<RawRow> = conn
                    .query_row(
                        "SELECT thread_id, next_step, pending, messages, created_at
                         FROM checkpoints
                         WHERE thread_id = ?1
                         ORDER BY seq DESC
                         LIMIT 1",
                        params![thread_id],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;

        raw.map(decode_row).transpose()
    }

    async fn list_thread_ids(&self) -> Result<Vec<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT thread_id, MAX(created_at) AS latest
                 FROM checkpoints
                 GROUP BY thread_id
                 ORDER BY latest ASC, thread_id ASC",
            )?;

            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row?);
            }
            Ok(ids)
        })
        .await
    }

    async fn list_checkpoints(&self, thread_id: &str) -> Result<Vec<Checkpoint>, StoreError> {
        let thread_id = thread_id.to_string();
        let raw: Vec<RawRow> = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT thread_id, next_step, pending, messages, created_at
                     FROM checkpoints
                     WHERE thread_id = ?1
                     ORDER BY seq ASC",
                )?;

                let rows = stmt.query_map(params![thread_id], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                })?;
                let mut raw: Vec<RawRow> = Vec::new();
                for row in rows {
                    raw.push(row?);
                }
                Ok(raw)
            })
            .await?;

        raw.into_iter().map(decode_row).collect()
    }
}

fn decode_row(
    (thread_id, next_step, pending, messages, created_at): RawRow,
) -> Result<Checkpoint, StoreError> {
    let next = NextStep::parse(&next_step).ok_or_else(|| StoreError::Corrupt {
        thread_id: thread_id.clone(),
        reason: format!("unknown next step '{next_step}'"),
    })?;
    let created_at: DateTime<Utc> =
        DateTime::from_timestamp_micros(created_at).ok_or_else(|| StoreError::Corrupt {
            thread_id: thread_id.clone(),
            reason: format!("timestamp {created_at} out of range"),
        })?;
    let messages =
        serde_json::from_str(&messages).map_err(|e| StoreError::serialization(&thread_id, e))?;
    let pending = pending
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| StoreError::serialization(&thread_id, e))?;

    Ok(Checkpoint {
        thread_id,
        messages,
        next,
        pending,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Message, PendingConfirmation, ToolInvocationRequest};
    use serde_json::json;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, SqliteCheckpointStore) {
        let tmp = TempDir::new().unwrap();
        let store = SqliteCheckpointStore::open(&tmp.path().join("checkpoints.db")).unwrap();
        (tmp, store)
    }

    fn suspended_checkpoint(previous: Option<&Checkpoint>) -> Checkpoint {
        let call = ToolInvocationRequest::new("call-1", "delete_repository", json!({"repo_name": "foo"}));
        Checkpoint::suspended(
            vec![
                Message::user("delete my repo foo"),
                Message::AssistantToolCall {
                    calls: vec![call.clone()],
                },
            ],
            PendingConfirmation::for_call("t2", &call),
            previous,
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_saves_from_spawned_tasks() {
        let (_tmp, store) = temp_store();
        let store = std::sync::Arc::new(store);

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                tokio::spawn(async move {
                    let checkpoint = Checkpoint::idle(
                        format!("thread-{i}"),
                        vec![Message::user(format!("hello {i}"))],
                        None,
                    );
                    store.save(&checkpoint).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.list_thread_ids().await.unwrap().len(), 8);
        let latest = store.load_latest("thread-3").await.unwrap().unwrap();
        assert_eq!(latest.messages, vec![Message::user("hello 3")]);
    }

    #[test]
    fn test_health_check() {
        let (_tmp, store) = temp_store();
        assert!(store.health_check());
    }

    #[tokio::test]
    async fn test_round_trips_suspended_checkpoint() {
        let (_tmp, store) = temp_store();
        let checkpoint = suspended_checkpoint(None);
        store.save(&checkpoint).await.unwrap();

        let loaded = store.load_latest("t2").await.unwrap().unwrap();
        assert_eq!(loaded, checkpoint);
        assert_eq!(loaded.next, NextStep::ResumeTools);
        assert_eq!(loaded.pending.unwrap().tool_name, "delete_repository");
    }

    #[tokio::test]
    async fn test_unknown_thread_is_empty() {
        let (_tmp, store) = temp_store();
        assert!(store.load_latest("missing").await.unwrap().is_none());
        assert!(store.list_messages("missing").await.unwrap().is_empty());
        assert!(store.list_checkpoints("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_log_is_append_only() {
        let (_tmp, store) = temp_store();
        let first = Checkpoint::idle("t1", vec![Message::user("hi")], None);
        store.save(&first).await.unwrap();
        let second = Checkpoint::idle(
            "t1",
            vec![Message::user("hi"), Message::assistant("Hello there.")],
            Some(&first),
        );
        store.save(&second).await.unwrap();

        let log = store.list_checkpoints("t1").await.unwrap();
        assert_eq!(log, vec![first, second.clone()]);
        assert_eq!(store.list_messages("t1").await.unwrap(), second.messages);
    }

    #[tokio::test]
    async fn test_rejects_out_of_order_and_inconsistent() {
        let (_tmp, store) = temp_store();
        let first = Checkpoint::idle("t1", vec![], None);
        let second = Checkpoint::idle("t1", vec![], Some(&first));
        store.save(&second).await.unwrap();

        assert!(matches!(
            store.save(&first).await.unwrap_err(),
            StoreError::OutOfOrder { .. }
        ));

        let mut broken = Checkpoint::idle("t1", vec![], Some(&second));
        broken.next = NextStep::ResumeTools;
        assert!(matches!(
            store.save(&broken).await.unwrap_err(),
            StoreError::Inconsistent { .. }
        ));
        assert_eq!(store.list_checkpoints("t1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_thread_ids_ordered_by_latest_checkpoint() {
        let (_tmp, store) = temp_store();
        let a = Checkpoint::idle("a", vec![], None);
        store.save(&a).await.unwrap();
        let b = Checkpoint::idle("b", vec![], Some(&a));
        store.save(&b).await.unwrap();
        let c = Checkpoint::idle("c", vec![], Some(&b));
        store.save(&c).await.unwrap();
        let a2 = Checkpoint::idle("a", vec![], Some(&c));
        store.save(&a2).await.unwrap();

        assert_eq!(store.list_thread_ids().await.unwrap(), vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_persistence_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("nested").join("checkpoints.db");
        let checkpoint = suspended_checkpoint(None);

        {
            let store = SqliteCheckpointStore::open(&db_path).unwrap();
            store.save(&checkpoint).await.unwrap();
        }

        {
            let store = SqliteCheckpointStore::open(&db_path).unwrap();
            let loaded = store.load_latest("t2").await.unwrap().unwrap();
            assert!(loaded.is_suspended());
            assert_eq!(loaded, checkpoint);
        }
    }

    #[tokio::test]
    async fn test_in_memory_database() {
        let store = SqliteCheckpointStore::open_in_memory().unwrap();
        store
            .save(&Checkpoint::idle("t", vec![Message::user("x")], None))
            .await
            .unwrap();
        assert_eq!(store.list_thread_ids().await.unwrap(), vec!["t"]);
    }
}
