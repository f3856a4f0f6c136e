//! ---
//! hma_section: "03-persistence-logging"
//! hma_subsection: "module"
//! hma_type: "source"
//! hma_scope: "code"
//! hma_description: "Named state model, stores and transition service."
//! hma_version: "v0.0.0-prealpha"
//! hma_owner: "tbd"
//! ---
//! State persistence. Writes go through a per-key transaction that holds the row
//! lock from `begin` until `commit` or `rollback`, so writers to the same key are
//! serialised while other keys proceed independently. `save` is the point where a
//! write becomes durable; callers announce a change only after it succeeds.

mod file;
mod memory;
mod table;

use std::sync::Arc;

use async_trait::async_trait;
use hmauto_common::{StoreBackend, StoreConfig};
use tracing::info;

use crate::model::State;
use crate::StoreError;

pub use file::{FileStateStore, STATE_FILE_VERSION};
pub use memory::MemoryStateStore;

/// Keyed store of [`State`] records.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Point lookup by namespace key.
    async fn get(&self, namespace_key: &str) -> Result<Option<State>, StoreError>;

    /// Every record, ascending by namespace key.
    async fn list(&self) -> Result<Vec<State>, StoreError>;

    /// Lock the row for `namespace_key` and start a transaction on it.
    async fn begin(&self, namespace_key: &str) -> Result<Box<dyn StateTransaction>, StoreError>;
}

/// Read-modify-write unit over one row.
#[async_trait]
pub trait StateTransaction: Send {
    /// Value of the row as read under the lock.
    fn current(&self) -> Option<&State>;

    /// Stage a write and make it durable. Invisible to readers until commit.
    async fn save(&mut self, state: State) -> Result<(), StoreError>;

    /// Apply the staged write and release the row. Does no further IO, so a
    /// successful `save` cannot be lost here.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Discard the staged write, including its durable copy, and release the row.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Construct the backend selected in configuration.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn StateStore>, StoreError> {
    match config.backend {
        StoreBackend::Memory => {
            info!("using in-memory state store");
            Ok(Arc::new(MemoryStateStore::new()))
        }
        StoreBackend::File => {
            let store = FileStateStore::open(&config.path).await?;
            info!(path = %config.path.display(), states = store.len(), "using file state store");
            Ok(Arc::new(store))
        }
    }
}
