//! Tunable thresholds and capacities
//!
//! Every constant here is read once at startup and held by value; there is
//! no hot-reload (the knowledge store is equally static, see
//! [`crate::knowledge`]). Grouped into one struct so the tracker, matcher and
//! fallback engine can each borrow the slice they care about without
//! threading a dozen scalar parameters through constructors.

use std::time::Duration;

/// Similarity classified HIGH at or above this value.
pub const T_HIGH: f32 = 0.70;

/// Similarity classified MEDIUM at or above this value (and below `T_HIGH`).
pub const T_MEDIUM: f32 = 0.40;

/// Similarity classified LOW at or above this value (and below `T_MEDIUM`).
/// Also the floor below which the matcher's result is not worth acting on.
pub const T_LOW: f32 = 0.15;

/// Observations scoring below this are not worth returning a candidate for.
pub const MINIMAL_FLOOR: f32 = 0.15;

/// Default sliding-window capacity (C4).
pub const WINDOW_CAPACITY: usize = 50;

/// Default cap on consecutive low/no-match observations before DEGRADED.
pub const MAX_CONSECUTIVE_LOW: u32 = 5;

/// Default cap on same-task forward step jumps accepted outside HIGH confidence.
pub const MAX_FORWARD_JUMP: i64 = 3;

/// Default VLM fallback request timeout.
pub const VLM_TIMEOUT: Duration = Duration::from_secs(10);

/// Default VLM fallback retry count (in addition to the first attempt).
pub const VLM_MAX_RETRIES: u32 = 2;

/// Default circuit breaker failure threshold.
pub const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;

/// Default circuit breaker rolling window.
pub const CIRCUIT_WINDOW: Duration = Duration::from_secs(60);

/// Default circuit breaker cool-down once open.
pub const CIRCUIT_COOLDOWN: Duration = Duration::from_secs(30);

/// Minimum non-whitespace character count for an observation to be matched.
pub const MIN_OBSERVATION_CHARS: usize = 5;

/// Default tick interval for a driver pulling queued observations through
/// the subconscious loop (see `stepwise-cli`'s interval-driven consumer).
pub const SUBCONSCIOUS_TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Thresholds and capacities for a single tracker instance.
///
/// Constructed once at startup (typically via [`Config::from_env`] in the
/// CLI) and shared by reference; nothing here changes at runtime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    pub t_high: f32,
    pub t_medium: f32,
    pub t_low: f32,
    pub minimal_floor: f32,
    pub window_capacity: usize,
    pub max_consecutive_low: u32,
    pub max_forward_jump: i64,
    pub vlm_timeout: Duration,
    pub vlm_max_retries: u32,
    pub circuit_failure_threshold: u32,
    pub circuit_window: Duration,
    pub circuit_cooldown: Duration,
    pub min_observation_chars: usize,
    pub subconscious_tick_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            t_high: T_HIGH,
            t_medium: T_MEDIUM,
            t_low: T_LOW,
            minimal_floor: MINIMAL_FLOOR,
            window_capacity: WINDOW_CAPACITY,
            max_consecutive_low: MAX_CONSECUTIVE_LOW,
            max_forward_jump: MAX_FORWARD_JUMP,
            vlm_timeout: VLM_TIMEOUT,
            vlm_max_retries: VLM_MAX_RETRIES,
            circuit_failure_threshold: CIRCUIT_FAILURE_THRESHOLD,
            circuit_window: CIRCUIT_WINDOW,
            circuit_cooldown: CIRCUIT_COOLDOWN,
            min_observation_chars: MIN_OBSERVATION_CHARS,
            subconscious_tick_interval: SUBCONSCIOUS_TICK_INTERVAL,
        }
    }
}

impl Config {
    /// Build a config from defaults overridden by `STEPWISE_*` environment
    /// variables where present. Malformed values are ignored (the default
    /// is kept) and logged at `warn`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_f32("STEPWISE_T_HIGH") {
            cfg.t_high = v;
        }
        if let Some(v) = env_f32("STEPWISE_T_MEDIUM") {
            cfg.t_medium = v;
        }
        if let Some(v) = env_f32("STEPWISE_T_LOW") {
            cfg.t_low = v;
        }
        if let Some(v) = env_usize("STEPWISE_WINDOW_CAPACITY") {
            cfg.window_capacity = v;
        }
        if let Some(v) = env_u32("STEPWISE_MAX_CONSECUTIVE_LOW") {
            cfg.max_consecutive_low = v;
        }
        if let Some(v) = env_i64("STEPWISE_MAX_FORWARD_JUMP") {
            cfg.max_forward_jump = v;
        }
        if let Some(v) = env_u64("STEPWISE_VLM_TIMEOUT_MS") {
            cfg.vlm_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_u32("STEPWISE_VLM_MAX_RETRIES") {
            cfg.vlm_max_retries = v;
        }
        if let Some(v) = env_u32("STEPWISE_CIRCUIT_FAILURE_THRESHOLD") {
            cfg.circuit_failure_threshold = v;
        }
        if let Some(v) = env_u64("STEPWISE_CIRCUIT_WINDOW_SECS") {
            cfg.circuit_window = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("STEPWISE_CIRCUIT_COOLDOWN_SECS") {
            cfg.circuit_cooldown = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("STEPWISE_SUBCONSCIOUS_TICK_MS") {
            cfg.subconscious_tick_interval = Duration::from_millis(v);
        }

        cfg
    }
}

fn env_f32(key: &str) -> Option<f32> {
    parse_env(key)
}

fn env_usize(key: &str) -> Option<usize> {
    parse_env(key)
}

fn env_u32(key: &str) -> Option<u32> {
    parse_env(key)
}

fn env_u64(key: &str) -> Option<u64> {
    parse_env(key)
}

fn env_i64(key: &str) -> Option<i64> {
    parse_env(key)
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    match std::env::var(key) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(key, raw, "ignoring malformed environment override");
                None
            }
        },
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_thresholds() {
        let cfg = Config::default();
        assert_eq!(cfg.t_high, 0.70);
        assert_eq!(cfg.t_medium, 0.40);
        assert_eq!(cfg.t_low, 0.15);
        assert_eq!(cfg.minimal_floor, 0.15);
        assert_eq!(cfg.window_capacity, 50);
        assert_eq!(cfg.max_forward_jump, 3);
    }

    #[test]
    fn from_env_ignores_malformed_override() {
        // SAFETY: test runs single-threaded w.r.t. this var via serial access below.
        unsafe { std::env::set_var("STEPWISE_T_HIGH", "not-a-float") };
        let cfg = Config::from_env();
        assert_eq!(cfg.t_high, T_HIGH);
        unsafe { std::env::remove_var("STEPWISE_T_HIGH") };
    }
}
