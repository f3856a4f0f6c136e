//! ---
//! hma_section: "05-networking-external-interfaces"
//! hma_subsection: "module"
//! hma_type: "source"
//! hma_scope: "code"
//! hma_description: "Operator alert publishing and delivery."
//! hma_version: "v0.0.0-prealpha"
//! hma_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::AlertError;

/// Embed colour used when the level string is not recognised.
pub const UNKNOWN_LEVEL_COLOR: u32 = 0x808080;

/// Severity of an operator alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    /// Progress and recovery notices.
    Info,
    /// Degraded conditions that need attention.
    Warning,
    /// Failures.
    Error,
}

impl AlertLevel {
    /// Wire name, also the last word of the alert routing key.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
        }
    }

    /// Discord embed colour.
    pub fn color(&self) -> u32 {
        match self {
            AlertLevel::Info => 0x00FF00,
            AlertLevel::Warning => 0xFFFF00,
            AlertLevel::Error => 0xFF0000,
        }
    }
}

/// Colour for a raw level string, grey when unknown.
pub fn embed_color(level: &str) -> u32 {
    level
        .parse::<AlertLevel>()
        .map(|level| level.color())
        .unwrap_or(UNKNOWN_LEVEL_COLOR)
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertLevel {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(AlertLevel::Info),
            "warning" | "warn" => Ok(AlertLevel::Warning),
            "error" => Ok(AlertLevel::Error),
            _ => Err(AlertError::UnknownLevel(s.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_parse_case_insensitively() {
        assert_eq!("INFO".parse::<AlertLevel>().unwrap(), AlertLevel::Info);
        assert_eq!("warn".parse::<AlertLevel>().unwrap(), AlertLevel::Warning);
        assert!(matches!(
            "critical".parse::<AlertLevel>(),
            Err(AlertError::UnknownLevel(_))
        ));
    }

    #[test]
    fn unknown_levels_render_grey() {
        assert_eq!(embed_color("error"), 0xFF0000);
        assert_eq!(embed_color("debug"), UNKNOWN_LEVEL_COLOR);
    }
}
