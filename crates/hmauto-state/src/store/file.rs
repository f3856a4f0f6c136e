//! ---
//! hma_section: "03-persistence-logging"
//! hma_subsection: "module"
//! hma_type: "source"
//! hma_scope: "code"
//! hma_description: "Named state model, stores and transition service."
//! hma_version: "v0.0.0-prealpha"
//! hma_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs as async_fs;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use super::table::Table;
use super::{StateStore, StateTransaction};
use crate::model::State;
use crate::StoreError;

/// Current state file envelope version.
pub const STATE_FILE_VERSION: u16 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StateFileEnvelope {
    version: u16,
    saved_at: DateTime<Utc>,
    states: Vec<State>,
}

/// JSON file rewritten in full on every save and rollback via temp file and rename.
#[derive(Debug)]
pub(super) struct StateFile {
    path: PathBuf,
    write_lock: AsyncMutex<()>,
}

impl StateFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: AsyncMutex::new(()),
        }
    }

    async fn load(&self) -> Result<Vec<State>, StoreError> {
        if !async_fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }
        let bytes = async_fs::read(&self.path).await?;
        let envelope: StateFileEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.version != STATE_FILE_VERSION {
            return Err(StoreError::UnsupportedVersion(envelope.version));
        }
        Ok(envelope.states)
    }

    /// Write the table with `state` staged for its row. On failure the file and
    /// the staged set are left as they were.
    pub(super) async fn prepare(&self, table: &Table, state: State) -> Result<(), StoreError> {
        let _write = self.write_lock.lock().await;
        let namespace_key = state.namespace_key.clone();
        let previous = table.set_prepared(state);
        if let Err(err) = self.write_snapshot(table).await {
            table.clear_prepared(&namespace_key, previous);
            return Err(err);
        }
        Ok(())
    }

    /// Drop a staged row and rewrite the file without it.
    pub(super) async fn discard(&self, table: &Table, namespace_key: &str) -> Result<(), StoreError> {
        let _write = self.write_lock.lock().await;
        table.clear_prepared(namespace_key, None);
        self.write_snapshot(table).await
    }

    async fn write_snapshot(&self, table: &Table) -> Result<(), StoreError> {
        let envelope = StateFileEnvelope {
            version: STATE_FILE_VERSION,
            saved_at: Utc::now(),
            states: table.durable_view(),
        };
        let json = serde_json::to_vec_pretty(&envelope)?;
        let tmp = self.path.with_extension("json.tmp");
        async_fs::write(&tmp, json).await?;
        async_fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), states = envelope.states.len(), "state file written");
        Ok(())
    }
}

/// Durable store backed by a single JSON document.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    table: Arc<Table>,
    path: PathBuf,
}

impl FileStateStore {
    /// Open or create the state file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                async_fs::create_dir_all(parent).await?;
            }
        }
        let file = StateFile::new(path.clone());
        let records = file.load().await?;
        Ok(Self {
            table: Arc::new(Table::with_file(records, file)),
            path,
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StateStore for FileStateStore {
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
