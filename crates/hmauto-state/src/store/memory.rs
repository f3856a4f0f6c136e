//! ---
//! hma_section: "03-persistence-logging"
//! hma_subsection: "module"
//! hma_type: "source"
//! hma_scope: "code"
//! hma_description: "Named state model, stores and transition service."
//! hma_version: "v0.0.0-prealpha"
//! hma_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;

use super::table::Table;
use super::{StateStore, StateTransaction};
use crate::model::State;
use crate::StoreError;

/// Volatile store. Contents are lost on restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    table: Arc<Table>,
}

impl MemoryStateStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether no record has been written yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, namespace_key: &str) -> Result<Option<State>, StoreError> {
        Ok(self.table.get(namespace_key))
    }

    async fn list(&self) -> Result<Vec<State>, StoreError> {
        Ok(self.table.list())
    }

    async fn begin(&self, namespace_key: &str) -> Result<Box<dyn StateTransaction>, StoreError> {
        Ok(Box::new(self.table.begin(namespace_key).await))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::StateKey;
    use std::time::Duration;

    fn record(value: &str) -> State {
        State::new(&StateKey::new("switch", "server_1"), value)
    }

    #[tokio::test]
    async fn rollback_discards_staged_write() {
        let store = MemoryStateStore::new();
        let mut tx = store.begin("hmstt.switch.server_1").await.unwrap();
        assert!(tx.current().is_none());
        tx.save(record("on")).await.unwrap();
        tx.rollback().await.unwrap();
        assert!(store.get("hmstt.switch.server_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn staged_write_is_invisible_until_commit() {
        let store = MemoryStateStore::new();
        let mut tx = store.begin("hmstt.switch.server_1").await.unwrap();
        tx.save(record("off")).await.unwrap();
        assert!(store.is_empty());
        tx.commit().await.unwrap();
        let state = store.get("hmstt.switch.server_1").await.unwrap().unwrap();
        assert_eq!(state.value, "off");
        assert_eq!(state.title, "Server 1");
    }

    #[tokio::test]
    async fn saving_another_row_is_rejected() {
        let store = MemoryStateStore::new();
        let mut tx = store.begin("hmstt.switch.other").await.unwrap();
        let result = tx.save(record("on")).await;
        assert!(matches!(result, Err(StoreError::KeyMismatch { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn second_writer_waits_for_row_lock() {
        let store = MemoryStateStore::new();
        let first = store.begin("hmstt.switch.server_1").await.unwrap();

        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let tx = store.begin("hmstt.switch.server_1").await.unwrap();
                tx.rollback().await.unwrap();
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!contender.is_finished());

        let other_row = store.begin("hmstt.switch.server_2").await.unwrap();
        other_row.rollback().await.unwrap();

        first.rollback().await.unwrap();
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn list_is_ordered_by_namespace_key() {
        let store = MemoryStateStore::new();
        for key in ["b", "a", "c"] {
            let mut tx = store.begin(&format!("hmstt.switch.{key}")).await.unwrap();
            tx.save(State::new(&StateKey::new("switch", key), "on"))
                .await
                .unwrap();
            tx.commit().await.unwrap();
        }
        let keys: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|state| state.key)
            .collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }
}
