//! In-process checkpoint store for tests and throwaway sessions.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::store::{check_append, CheckpointStore, StoreError};
use crate::types::Checkpoint;

/// Keeps every checkpoint in memory. Nothing survives the process.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    logs: RwLock<HashMap<String, Vec<Checkpoint>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total checkpoints across all threads.
    pub async fn len(&self) -> usize {
        self.logs.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let mut logs = self.logs.write().await;
        let log = logs.entry(checkpoint.thread_id.clone()).or_default();
        check_append(checkpoint, log.last().map(|cp| cp.created_at))?;
        log.push(checkpoint.clone());
        Ok(())
    }

    async fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self
            .logs
            .read()
            .await
            .get(thread_id)
            .and_then(|log| log.last().cloned()))
    }

    async fn list_thread_ids(&self) -> Result<Vec<String>, StoreError> {
        let logs = self.logs.read().await;
        let mut latest: Vec<_> = logs
            .iter()
            .filter_map(|(id, log)| log.last().map(|cp| (cp.created_at, id.clone())))
            .collect();
        latest.sort();
        Ok(latest.into_iter().map(|(_, id)| id).collect())
    }

    async fn list_checkpoints(&self, thread_id: &str) -> Result<Vec<Checkpoint>, StoreError> {
        Ok(self
            .logs
            .read()
            .await
            .get(thread_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    #[tokio::test]
    async fn test_save_and_load_latest() {
        let store = MemoryCheckpointStore::new();
        let first = Checkpoint::idle("t1", vec![Message::user("hi")], None);
        store.save(&first).await.unwrap();
        let second = Checkpoint::idle(
            "t1",
            vec![Message::user("hi"), Message::assistant("hello")],
            Some(&first),
        );
        store.save(&second).await.unwrap();

        assert_eq!(store.load_latest("t1").await.unwrap(), Some(second));
        assert_eq!(store.len().await, 2);
        assert!(store.load_latest("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_stale_append() {
        let store = MemoryCheckpointStore::new();
        let first = Checkpoint::idle("t1", vec![], None);
        let second = Checkpoint::idle("t1", vec![], Some(&first));
        store.save(&second).await.unwrap();

        let err = store.save(&first).await.unwrap_err();
        assert!(matches!(err, StoreError::OutOfOrder { .. }));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_thread_ids_oldest_first() {
        let store = MemoryCheckpointStore::new();
        let a = Checkpoint::idle("a", vec![], None);
        store.save(&a).await.unwrap();
        let b = Checkpoint::idle("b", vec![], Some(&a));
        store.save(&b).await.unwrap();
        // touching "a" again makes it the most recent
        let a2 = Checkpoint::idle("a", vec![], Some(&b));
        store.save(&a2).await.unwrap();

        assert_eq!(store.list_thread_ids().await.unwrap(), vec!["b", "a"]);
    }
}
