//! ---
//! hma_section: "03-persistence-logging"
//! hma_subsection: "module"
//! hma_type: "source"
//! hma_scope: "code"
//! hma_description: "Named state model, stores and transition service."
//! hma_version: "v0.0.0-prealpha"
//! hma_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Named, typed states: validation, transactional storage and change propagation.

pub mod key;
pub mod model;
pub mod policy;
pub mod service;
pub mod store;

/// Result alias used throughout the state crate.
pub type Result<T> = std::result::Result<T, StateError>;

/// Storage backend failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Wrapper for IO errors while reading or writing the state file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON encoding problems.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// A transaction was asked to save a record for a different row.
    #[error("transaction on {locked} cannot save {saved}")]
    KeyMismatch {
        /// Row held by the transaction.
        locked: String,
        /// Row of the rejected record.
        saved: String,
    },
    /// The state file carries an envelope version this build cannot read.
    #[error("unsupported state file version {0}")]
    UnsupportedVersion(u16),
}

/// Failures surfaced by the state service.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Unknown type, or a key that cannot form a namespace key.
    #[error("invalid type or key: {state_type}/{key}")]
    InvalidKey {
        /// Requested type.
        state_type: String,
        /// Requested key.
        key: String,
    },
    /// The value is not legal for the type.
    #[error("value '{value}' is not allowed for {state_type}/{key}")]
    InvalidTransition {
        /// Requested type.
        state_type: String,
        /// Requested key.
        key: String,
        /// Rejected value.
        value: String,
    },
    /// No record exists under the namespace key.
    #[error("state {0} not found")]
    NotFound(String),
    /// Storage failure.
    #[error("state store error: {0}")]
    Store(#[from] StoreError),
    /// The change could not be published; the write was rolled back.
    #[error("state change publish failed: {0}")]
    Publish(#[from] hmauto_msg::BusError),
}

impl StateError {
    /// Whether the caller supplied an illegal request.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StateError::InvalidKey { .. } | StateError::InvalidTransition { .. }
        )
    }
}

pub use key::{snake_to_title, StateKey, NAMESPACE_PREFIX};
pub use model::State;
pub use policy::{TransitionPolicy, SWITCH_OFF, SWITCH_ON, SWITCH_TYPE};
pub use service::{StateService, STATE_CHANGE_CATEGORY};
pub use store::{open_store, FileStateStore, MemoryStateStore, StateStore, StateTransaction};
