//! ---
//! hma_section: "03-persistence-logging"
//! hma_subsection: "module"
//! hma_type: "source"
//! hma_scope: "code"
//! hma_description: "Named state model, stores and transition service."
//! hma_version: "v0.0.0-prealpha"
//! hma_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};

/// Product prefix of every namespace key.
pub const NAMESPACE_PREFIX: &str = "hmstt";
/// Separator between namespace key segments.
pub const KEY_DELIMITER: char = '.';

/// Typed composite identity of a state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateKey {
    state_type: String,
    key: String,
}

impl StateKey {
    /// Build a key without validation. See [`crate::TransitionPolicy`] for the checked path.
    pub fn new(state_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            state_type: state_type.into(),
            key: key.into(),
        }
    }

    /// Type discriminator, e.g. `switch`.
    pub fn state_type(&self) -> &str {
        &self.state_type
    }

    /// Caller supplied identifier, e.g. `server_1`.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Storage and routing identity: `hmstt.<type>.<key>`.
    pub fn namespace_key(&self) -> String {
        format!(
            "{NAMESPACE_PREFIX}{KEY_DELIMITER}{}{KEY_DELIMITER}{}",
            self.state_type, self.key
        )
    }

    /// Human title derived from the raw key.
    pub fn display_title(&self) -> String {
        snake_to_title(&self.key)
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.namespace_key())
    }
}

/// `server_1` becomes `Server 1`. Only the first letter of each word changes case.
pub fn snake_to_title(raw: &str) -> String {
    let mut title = String::with_capacity(raw.len());
    let mut capitalize = true;
    for ch in raw.chars() {
        if ch == '_' {
            title.push(' ');
            capitalize = true;
        } else if capitalize {
            title.push(ch.to_ascii_uppercase());
            capitalize = false;
        } else {
            title.push(ch);
        }
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_key_joins_prefix_type_and_key() {
        let key = StateKey::new("switch", "server_1");
        assert_eq!(key.namespace_key(), "hmstt.switch.server_1");
        assert_eq!(key.to_string(), "hmstt.switch.server_1");
    }

    #[test]
    fn titles_capitalise_each_word() {
        assert_eq!(snake_to_title("server_1"), "Server 1");
        assert_eq!(snake_to_title("living_room_lamp"), "Living Room Lamp");
        assert_eq!(snake_to_title("modemX"), "ModemX");
        assert_eq!(snake_to_title(""), "");
    }
}
