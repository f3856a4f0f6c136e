//! ---
//! hma_section: "01-core-functionality"
//! hma_subsection: "module"
//! hma_type: "source"
//! hma_scope: "code"
//! hma_description: "Shared primitives and utilities for the controller runtime."
//! hma_version: "v0.0.0-prealpha"
//! hma_owner: "tbd"
//! ---
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::warn;

/// Parse a human duration string such as `2m`, `500ms` or `1h 30m`.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("empty duration"));
    }
    humantime::parse_duration(trimmed).map_err(|err| anyhow!("invalid duration '{raw}': {err}"))
}

/// Parse a strictly positive duration, logging and returning `fallback` when the
/// input is malformed or zero.
pub fn parse_duration_or(field: &str, raw: &str, fallback: Duration) -> Duration {
    match parse_duration(raw) {
        Ok(duration) if !duration.is_zero() => duration,
        Ok(_) => {
            warn!(
                field,
                value = raw,
                fallback_ms = duration_to_millis(fallback),
                "duration must be positive; using default"
            );
            fallback
        }
        Err(err) => {
            warn!(
                field,
                value = raw,
                error = %err,
                fallback_ms = duration_to_millis(fallback),
                "invalid duration; using default"
            );
            fallback
        }
    }
}

/// Convert a duration into milliseconds, saturating at `u64::MAX`.
pub fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compact_and_spaced_forms() {
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(
            parse_duration(" 1h 30m ").unwrap(),
            Duration::from_secs(90 * 60)
        );
    }

    #[test]
    fn fallback_applies_to_garbage_and_zero() {
        let fallback = Duration::from_secs(120);
        assert_eq!(parse_duration_or("interval", "soon", fallback), fallback);
        assert_eq!(parse_duration_or("interval", "", fallback), fallback);
        assert_eq!(parse_duration_or("interval", "0s", fallback), fallback);
        assert_eq!(
            parse_duration_or("interval", "45s", fallback),
            Duration::from_secs(45)
        );
    }
}
