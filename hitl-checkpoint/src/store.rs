//! Checkpoint store contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{Checkpoint, Message};

/// Errors raised by checkpoint backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("failed to (de)serialize checkpoint for thread '{thread_id}': {source}")]
    Serialization {
        thread_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("checkpoint for thread '{thread_id}' at {created_at} is not after the latest one at {latest}")]
    OutOfOrder {
        thread_id: String,
        created_at: DateTime<Utc>,
        latest: DateTime<Utc>,
    },

    #[error("checkpoint for thread '{thread_id}' has an inconsistent next-step marker")]
    Inconsistent { thread_id: String },

    #[error("stored row for thread '{thread_id}' is corrupt: {reason}")]
    Corrupt { thread_id: String, reason: String },

    #[error("store lock poisoned: {0}")]
    Lock(String),

    #[error("blocking store task failed: {0}")]
    Task(String),

    #[error("I/O error while {operation}: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn serialization(thread_id: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            thread_id: thread_id.into(),
            source,
        }
    }
}

/// Append-only log of checkpoints keyed by thread id.
///
/// Writers for one thread must be serialized by the caller; the execution
/// engine holds a per-thread lock for the whole read-modify-append cycle.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Append a checkpoint. Durable once this returns `Ok`.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError>;

    /// Most recent checkpoint of a thread.
    async fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, StoreError>;

    /// Every thread id, ordered by the time of its latest checkpoint, oldest first.
    async fn list_thread_ids(&self) -> Result<Vec<String>, StoreError>;

    /// Full checkpoint log of a thread, oldest first.
    async fn list_checkpoints(&self, thread_id: &str) -> Result<Vec<Checkpoint>, StoreError>;

    /// Message history as of the latest checkpoint; empty for unknown threads.
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .load_latest(thread_id)
            .await?
            .map(|cp| cp.messages)
            .unwrap_or_default())
    }
}

/// Checks shared by all backends before an append.
pub(crate) fn check_append(
    checkpoint: &Checkpoint,
    latest: Option<DateTime<Utc>>,
) -> Result<(), StoreError> {
    if !checkpoint.is_consistent() {
        return Err(StoreError::Inconsistent {
            thread_id: checkpoint.thread_id.clone(),
        });
    }

    if let Some(latest) = latest {
        if checkpoint.created_at <= latest {
            return Err(StoreError::OutOfOrder {
                thread_id: checkpoint.thread_id.clone(),
                created_at: checkpoint.created_at,
                latest,
            });
        }
    }

    Ok(())
}
