//! ---
//! hma_section: "03-persistence-logging"
//! hma_subsection: "module"
//! hma_type: "source"
//! hma_scope: "code"
//! hma_description: "Named state model, stores and transition service."
//! hma_version: "v0.0.0-prealpha"
//! hma_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use crate::key::{StateKey, KEY_DELIMITER};
use crate::StateError;

/// Type discriminator for power switches.
pub const SWITCH_TYPE: &str = "switch";
/// Switch value for powered.
pub const SWITCH_ON: &str = "on";
/// Switch value for unpowered.
pub const SWITCH_OFF: &str = "off";

/// Table of controllable types and the values each accepts.
///
/// Adding a type is a table entry; nothing else in the service branches on the type.
#[derive(Debug, Clone)]
pub struct TransitionPolicy {
    allowed: BTreeMap<String, Vec<String>>,
}

impl Default for TransitionPolicy {
    fn default() -> Self {
        Self::empty().with_type(SWITCH_TYPE, [SWITCH_ON, SWITCH_OFF])
    }
}

impl TransitionPolicy {
    /// Policy with no controllable types.
    pub fn empty() -> Self {
        Self {
            allowed: BTreeMap::new(),
        }
    }

    /// Register `state_type` with its accepted values.
    pub fn with_type<I, S>(mut self, state_type: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed
            .insert(state_type.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Known types, sorted.
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.allowed.keys().map(String::as_str)
    }

    /// Check that `(state_type, key)` addresses a controllable state.
    pub fn validate_key(&self, state_type: &str, key: &str) -> Result<StateKey, StateError> {
        let well_formed = !key.is_empty()
            && !key
                .chars()
                .any(|ch| ch == KEY_DELIMITER || ch == '*' || ch == '#' || ch.is_whitespace());
        if !well_formed || !self.allowed.contains_key(state_type) {
            return Err(StateError::InvalidKey {
                state_type: state_type.to_owned(),
                key: key.to_owned(),
            });
        }
        Ok(StateKey::new(state_type, key))
    }

    /// Check the full `(state_type, key, value)` triple.
    pub fn validate(&self, state_type: &str, key: &str, value: &str) -> Result<StateKey, StateError> {
        let state_key = self.validate_key(state_type, key)?;
        let accepted = self
            .allowed
            .get(state_type)
            .is_some_and(|values| values.iter().any(|allowed| allowed == value));
        if !accepted {
            return Err(StateError::InvalidTransition {
                state_type: state_type.to_owned(),
                key: key.to_owned(),
                value: value.to_owned(),
            });
        }
        Ok(state_key)
    }
}
