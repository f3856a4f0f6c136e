//! ---
//! hma_section: "07-resilience-fault-tolerance"
//! hma_subsection: "module"
//! hma_type: "source"
//! hma_scope: "code"
//! hma_description: "Connectivity watchdog and remediation."
//! hma_version: "v0.0.0-prealpha"
//! hma_owner: "tbd"
//! ---
use std::time::Duration;

use hmauto_common::{parse_duration, parse_duration_or, BackoffConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;
use tracing::warn;

const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(600);
const DEFAULT_MULTIPLIER: f64 = 3.0;
const DEFAULT_RANDOMIZATION: f64 = 0.3;

/// Immutable exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// First un-jittered delay.
    pub initial_interval: Duration,
    /// Ceiling for the un-jittered delay.
    pub max_interval: Duration,
    /// Give up once this much time has passed. `None` retries forever.
    pub max_elapsed_time: Option<Duration>,
    /// Growth factor applied after every delay.
    pub multiplier: f64,
    /// Each delay is drawn from `current ± current * randomization_factor`.
    pub randomization_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
            max_elapsed_time: None,
            multiplier: DEFAULT_MULTIPLIER,
            randomization_factor: DEFAULT_RANDOMIZATION,
        }
    }
}

impl BackoffPolicy {
    /// Build from raw configuration, repairing unusable values with a warning.
    pub fn from_config(config: &BackoffConfig) -> Self {
        let initial_interval = parse_duration_or(
            "internet_check.backoff.initial_interval",
            &config.initial_interval,
            DEFAULT_INITIAL_INTERVAL,
        );
        let mut max_interval = parse_duration_or(
            "internet_check.backoff.max_interval",
            &config.max_interval,
            DEFAULT_MAX_INTERVAL,
        );
        if max_interval < initial_interval {
            warn!(
                max_interval_ms = max_interval.as_millis() as u64,
                initial_interval_ms = initial_interval.as_millis() as u64,
                "backoff ceiling below initial interval; raising ceiling"
            );
            max_interval = initial_interval;
        }

        let max_elapsed_time = match parse_duration(&config.max_elapsed_time) {
            Ok(duration) if duration.is_zero() => None,
            Ok(duration) => Some(duration),
            Err(err) => {
                warn!(
                    value = %config.max_elapsed_time,
                    error = %err,
                    "invalid backoff max_elapsed_time; retrying without limit"
                );
                None
            }
        };

        let multiplier = if config.multiplier.is_finite() && config.multiplier >= 1.0 {
            config.multiplier
        } else {
            warn!(
                value = config.multiplier,
                fallback = DEFAULT_MULTIPLIER,
                "backoff multiplier must be >= 1; using default"
            );
            DEFAULT_MULTIPLIER
        };

        let randomization_factor = if config.randomization_factor.is_finite() {
            let clamped = config.randomization_factor.clamp(0.0, 1.0);
            if clamped != config.randomization_factor {
                warn!(
                    value = config.randomization_factor,
                    clamped, "backoff randomization factor clamped to [0, 1]"
                );
            }
            clamped
        } else {
            DEFAULT_RANDOMIZATION
        };

        Self {
            initial_interval,
            max_interval,
            max_elapsed_time,
            multiplier,
            randomization_factor,
        }
    }

    /// Start a schedule with an entropy-seeded RNG.
    pub fn start(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(*self, StdRng::from_entropy())
    }

    /// Start a schedule with a fixed seed for deterministic jitter.
    pub fn start_seeded(&self, seed: u64) -> ExponentialBackoff {
        ExponentialBackoff::new(*self, StdRng::seed_from_u64(seed))
    }
}

/// Running schedule produced by a [`BackoffPolicy`].
#[derive(Debug)]
pub struct ExponentialBackoff {
    policy: BackoffPolicy,
    current: Duration,
    started: Instant,
    rng: StdRng,
}

impl ExponentialBackoff {
    fn new(policy: BackoffPolicy, rng: StdRng) -> Self {
        Self {
            policy,
            current: policy.initial_interval,
            started: Instant::now(),
            rng,
        }
    }

    /// Un-jittered interval the next delay is drawn around.
    pub fn current_interval(&self) -> Duration {
        self.current
    }

    /// Time since the schedule started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Next jittered delay, or `None` once waiting it out would exceed the elapsed budget.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let elapsed = self.elapsed();
        let delay = self.randomize(self.current);
        self.current = self
            .current
            .mul_f64(self.policy.multiplier)
            .min(self.policy.max_interval);
        match self.policy.max_elapsed_time {
            Some(limit) if elapsed + delay > limit => None,
            _ => Some(delay),
        }
    }

    fn randomize(&mut self, interval: Duration) -> Duration {
        let factor = self.policy.randomization_factor;
        if factor == 0.0 {
            return interval;
        }
        let base = interval.as_secs_f64();
        let delta = base * factor;
        let low = base - delta;
        let high = base + delta;
        Duration::from_secs_f64(low + self.rng.gen::<f64>() * (high - low))
    }
}
