//! ---
//! hma_section: "03-persistence-logging"
//! hma_subsection: "module"
//! hma_type: "source"
//! hma_scope: "code"
//! hma_description: "Named state model, stores and transition service."
//! hma_version: "v0.0.0-prealpha"
//! hma_owner: "tbd"
//! ---
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use super::file::StateFile;
use super::StateTransaction;
use crate::model::State;
use crate::StoreError;

/// Ordered records plus per-row locks, shared by both backends.
///
/// With a backing file, `save` writes the staged row to disk before the caller
/// publishes anything. Such rows sit in `prepared` until commit or rollback, and
/// every file snapshot is `records` overlaid with `prepared`.
#[derive(Debug, Default)]
pub(super) struct Table {
    records: RwLock<BTreeMap<String, State>>,
    prepared: Mutex<BTreeMap<String, State>>,
    rows: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    file: Option<StateFile>,
}

impl Table {
    pub(super) fn with_file(records: Vec<State>, file: StateFile) -> Self {
        let records = records
            .into_iter()
            .map(|state| (state.namespace_key.clone(), state))
            .collect();
        Self {
            records: RwLock::new(records),
            prepared: Mutex::new(BTreeMap::new()),
            rows: Mutex::new(HashMap::new()),
            file: Some(file),
        }
    }

    pub(super) fn get(&self, namespace_key: &str) -> Option<State> {
        self.records.read().get(namespace_key).cloned()
    }

    pub(super) fn list(&self) -> Vec<State> {
        self.records.read().values().cloned().collect()
    }

    pub(super) fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Committed rows overlaid with rows already written to disk but not yet committed.
    pub(super) fn durable_view(&self) -> Vec<State> {
        let prepared = self.prepared.lock();
        let mut view = self.records.read().clone();
        for (namespace_key, state) in prepared.iter() {
            view.insert(namespace_key.clone(), state.clone());
        }
        view.into_values().collect()
    }

    pub(super) fn set_prepared(&self, state: State) -> Option<State> {
        self.prepared
            .lock()
            .insert(state.namespace_key.clone(), state)
    }

    pub(super) fn clear_prepared(&self, namespace_key: &str, previous: Option<State>) {
        let mut prepared = self.prepared.lock();
        match previous {
            Some(state) => {
                prepared.insert(namespace_key.to_owned(), state);
            }
            None => {
                prepared.remove(namespace_key);
            }
        }
    }

    pub(super) async fn begin(self: &Arc<Self>, namespace_key: &str) -> RowTransaction {
        let row = self
            .rows
            .lock()
            .entry(namespace_key.to_owned())
            .or_default()
            .clone();
        let guard = row.lock_owned().await;
        let current = self.get(namespace_key);
        debug!(namespace_key, exists = current.is_some(), "row locked");
        RowTransaction {
            table: Arc::clone(self),
            namespace_key: namespace_key.to_owned(),
            current,
            pending: None,
            durable: false,
            _guard: guard,
        }
    }

    fn apply(&self, state: State) {
        // Same lock order as `durable_view`, so a snapshot never sees the row in neither map.
        let mut prepared = self.prepared.lock();
        prepared.remove(&state.namespace_key);
        self.records
            .write()
            .insert(state.namespace_key.clone(), state);
    }
}

/// Transaction holding the row lock for one namespace key.
pub(super) struct RowTransaction {
    table: Arc<Table>,
    namespace_key: String,
    current: Option<State>,
    pending: Option<State>,
    durable: bool,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for RowTransaction {
    fn drop(&mut self) {
        // Abandoned without commit or rollback; the next file write drops the row from disk.
        if self.durable {
            self.table.clear_prepared(&self.namespace_key, None);
        }
    }
}

#[async_trait]
impl StateTransaction for RowTransaction {
    fn current(&self) -> Option<&State> {
        self.current.as_ref()
    }

    async fn save(&mut self, state: State) -> Result<(), StoreError> {
        if state.namespace_key != self.namespace_key {
            return Err(StoreError::KeyMismatch {
                locked: self.namespace_key.clone(),
                saved: state.namespace_key,
            });
        }
        if let Some(file) = &self.table.file {
            file.prepare(&self.table, state.clone()).await?;
            self.durable = true;
        }
        self.pending = Some(state);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        let Some(state) = tx.pending.take() else {
            return Ok(());
        };
        tx.table.apply(state);
        tx.durable = false;
        debug!(namespace_key = %tx.namespace_key, "transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        let staged = tx.pending.take().is_some();
        debug!(namespace_key = %tx.namespace_key, staged, "transaction rolled back");
        if !tx.durable {
            return Ok(());
        }
        tx.durable = false;
        let Some(file) = &tx.table.file else {
            return Ok(());
        };
        if let Err(err) = file.discard(&tx.table, &tx.namespace_key).await {
            warn!(namespace_key = %tx.namespace_key, error = %err, "state file still holds rolled back row");
            return Err(err);
        }
        Ok(())
    }
}
