//! ---
//! hma_section: "03-persistence-logging"
//! hma_subsection: "module"
//! hma_type: "source"
//! hma_scope: "code"
//! hma_description: "Named state model, stores and transition service."
//! hma_version: "v0.0.0-prealpha"
//! hma_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::key::StateKey;

/// Persisted named value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Unique identity, `hmstt.<type>.<key>`.
    pub namespace_key: String,
    /// Type discriminator.
    #[serde(rename = "type")]
    pub state_type: String,
    /// Raw key as supplied by the caller.
    pub key: String,
    /// Display title derived from `key`.
    pub title: String,
    /// Current value.
    pub value: String,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

impl State {
    /// Fresh record for a key that has never been written.
    pub fn new(key: &StateKey, value: impl Into<String>) -> Self {
        Self {
            namespace_key: key.namespace_key(),
            state_type: key.state_type().to_owned(),
            key: key.key().to_owned(),
            title: key.display_title(),
            value: value.into(),
            updated_at: Utc::now(),
        }
    }

    /// Typed identity of this record.
    pub fn state_key(&self) -> StateKey {
        StateKey::new(&self.state_type, &self.key)
    }
}
