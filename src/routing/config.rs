//! Adaptive threshold controller configuration.
//!
//! Provides [`AdaptiveConfig`] for tuning how the
//! [`ThresholdController`](super::ThresholdController) moves the complexity
//! threshold and cache TTL. All fields have defaults and are
//! (de)serialisable via serde for TOML/JSON config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ── Default value functions ────────────────────────────────────────────

/// Default interval between tuning cycles, in seconds.
fn default_interval_secs() -> u64 {
    30
}

/// Default telemetry window considered per cycle, in seconds.
fn default_window_secs() -> u64 {
    300
}

/// Default threshold adjustment step.
fn default_step() -> f64 {
    0.5
}

/// Default lower bound for the complexity threshold.
fn default_min_threshold() -> f64 {
    2.0
}

/// Default upper bound for the complexity threshold.
fn default_max_threshold() -> f64 {
    9.5
}

/// Default minimum samples per signal before it can move the threshold.
fn default_min_samples() -> u64 {
    20
}

/// Default remote failure rate above which the threshold rises.
fn default_failure_ceiling() -> f64 {
    0.3
}

/// Default width of the "just below threshold" band.
fn default_near_threshold_band() -> f64 {
    1.0
}

/// Default negative-feedback rate that counts as poor rule-engine quality.
fn default_poor_feedback_rate() -> f64 {
    0.4
}

/// Default cache TTL adjustment step, in seconds.
fn default_ttl_step_secs() -> u64 {
    60
}

/// Default lower bound for the cache TTL, in seconds.
fn default_ttl_min_secs() -> u64 {
    60
}

/// Default upper bound for the cache TTL, in seconds.
fn default_ttl_max_secs() -> u64 {
    3_600
}

/// Default hit rate at or above which the cache TTL grows.
fn default_ttl_extend_hit_rate() -> f64 {
    0.5
}

/// Default hit rate below which the cache TTL shrinks.
fn default_ttl_shrink_hit_rate() -> f64 {
    0.05
}

/// Default enabled state.
fn default_enabled() -> bool {
    true
}

// ── AdaptiveConfig ─────────────────────────────────────────────────────

/// Adaptive threshold adjustment configuration.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
pub struct AdaptiveConfig {
    /// Whether tuning cycles may change the published config.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Seconds between tuning cycles.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Only telemetry recorded within this many seconds is considered.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// How much to raise/lower the threshold per cycle.
    #[serde(default = "default_step")]
    pub step: f64,

    /// The threshold never drops below this value.
    #[serde(default = "default_min_threshold")]
    pub min_threshold: f64,

    /// The threshold never rises above this value.
    #[serde(default = "default_max_threshold")]
    pub max_threshold: f64,

    /// Minimum samples a signal needs within the window before it acts.
    #[serde(default = "default_min_samples")]
    pub min_samples: u64,

    /// Remote failure/fallback rate above which the threshold is raised.
    #[serde(default = "default_failure_ceiling")]
    pub failure_ceiling: f64,

    /// Rule-based decisions scoring within this distance below the
    /// threshold count as "near threshold".
    #[serde(default = "default_near_threshold_band")]
    pub near_threshold_band: f64,

    /// Near-threshold negative feedback rate above which the threshold is
    /// lowered (when the remote path is healthy).
    #[serde(default = "default_poor_feedback_rate")]
    pub poor_feedback_rate: f64,

    /// Cache TTL adjustment step in seconds.
    #[serde(default = "default_ttl_step_secs")]
    pub ttl_step_secs: u64,

    /// Cache TTL lower bound in seconds.
    #[serde(default = "default_ttl_min_secs")]
    pub ttl_min_secs: u64,

    /// Cache TTL upper bound in seconds.
    #[serde(default = "default_ttl_max_secs")]
    pub ttl_max_secs: u64,

    /// Cache hit rate at or above which TTL grows by one step.
    #[serde(default = "default_ttl_extend_hit_rate")]
    pub ttl_extend_hit_rate: f64,

    /// Cache hit rate below which TTL shrinks by one step.
    #[serde(default = "default_ttl_shrink_hit_rate")]
    pub ttl_shrink_hit_rate: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_secs: default_interval_secs(),
            window_secs: default_window_secs(),
            step: default_step(),
            min_threshold: default_min_threshold(),
            max_threshold: default_max_threshold(),
            min_samples: default_min_samples(),
            failure_ceiling: default_failure_ceiling(),
            near_threshold_band: default_near_threshold_band(),
            poor_feedback_rate: default_poor_feedback_rate(),
            ttl_step_secs: default_ttl_step_secs(),
            ttl_min_secs: default_ttl_min_secs(),
            ttl_max_secs: default_ttl_max_secs(),
            ttl_extend_hit_rate: default_ttl_extend_hit_rate(),
            ttl_shrink_hit_rate: default_ttl_shrink_hit_rate(),
        }
    }
}

impl AdaptiveConfig {
    /// Tuning interval as a [`Duration`].
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Telemetry window as a [`Duration`].
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Validate an [`AdaptiveConfig`], returning a list of human-readable errors.
///
/// # Returns
///
/// An empty `Vec` on success, or one error string per violated constraint.
///
/// # Panics
///
/// This function never panics.
pub fn validate(config: &AdaptiveConfig) -> Vec<String> {
    let mut errors = Vec::new();

    if config.interval_secs == 0 {
        errors.push("adaptive.interval_secs must be > 0".to_string());
    }

    if config.window_secs == 0 {
        errors.push("adaptive.window_secs must be > 0".to_string());
    }

    if config.step <= 0.0 || config.step > 5.0 {
        errors.push(format!(
            "adaptive.step must be in (0.0, 5.0], got {}",
            config.step
        ));
    }

    if config.min_threshold < 0.0 || config.max_threshold > 10.0 {
        errors.push(format!(
            "adaptive threshold bounds must lie in [0.0, 10.0], got [{}, {}]",
            config.min_threshold, config.max_threshold
        ));
    }

    if config.min_threshold > config.max_threshold {
        errors.push(format!(
            "adaptive.min_threshold ({}) must be <= adaptive.max_threshold ({})",
            config.min_threshold, config.max_threshold
        ));
    }

    if config.failure_ceiling <= 0.0 || config.failure_ceiling > 1.0 {
        errors.push(format!(
            "adaptive.failure_ceiling must be in (0.0, 1.0], got {}",
            config.failure_ceiling
        ));
    }

    if config.poor_feedback_rate <= 0.0 || config.poor_feedback_rate > 1.0 {
        errors.push(format!(
            "adaptive.poor_feedback_rate must be in (0.0, 1.0], got {}",
            config.poor_feedback_rate
        ));
    }

    if config.near_threshold_band < 0.0 {
        errors.push(format!(
            "adaptive.near_threshold_band must be >= 0, got {}",
            config.near_threshold_band
        ));
    }

    if config.ttl_min_secs == 0 || config.ttl_min_secs > config.ttl_max_secs {
        errors.push(format!(
            "adaptive TTL bounds must satisfy 0 < ttl_min_secs <= ttl_max_secs, got [{}, {}]",
            config.ttl_min_secs, config.ttl_max_secs
        ));
    }

    if config.ttl_shrink_hit_rate > config.ttl_extend_hit_rate {
        errors.push(format!(
            "adaptive.ttl_shrink_hit_rate ({}) must be <= ttl_extend_hit_rate ({})",
            config.ttl_shrink_hit_rate, config.ttl_extend_hit_rate
        ));
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&AdaptiveConfig::default()).is_empty());
    }

    #[test]
    fn test_zero_step_rejected() {
        let cfg = AdaptiveConfig {
            step: 0.0,
            ..AdaptiveConfig::default()
        };
        let errors = validate(&cfg);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("adaptive.step"));
    }

    #[test]
    fn test_inverted_threshold_bounds_rejected() {
        let cfg = AdaptiveConfig {
            min_threshold: 8.0,
            max_threshold: 3.0,
            ..AdaptiveConfig::default()
        };
        assert!(validate(&cfg)
            .iter()
            .any(|e| e.contains("min_threshold")));
    }

    #[test]
    fn test_bounds_outside_score_range_rejected() {
        let cfg = AdaptiveConfig {
            max_threshold: 12.0,
            ..AdaptiveConfig::default()
        };
        assert!(!validate(&cfg).is_empty());
    }

    #[test]
    fn test_inverted_ttl_bounds_rejected() {
        let cfg = AdaptiveConfig {
            ttl_min_secs: 900,
            ttl_max_secs: 60,
            ..AdaptiveConfig::default()
        };
        assert!(validate(&cfg).iter().any(|e| e.contains("TTL")));
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let cfg = AdaptiveConfig {
            interval_secs: 0,
            window_secs: 0,
            failure_ceiling: 0.0,
            ..AdaptiveConfig::default()
        };
        assert_eq!(validate(&cfg).len(), 3);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg: AdaptiveConfig = toml::from_str("step = 0.25\nenabled = false").unwrap();
        assert!(!cfg.enabled);
        assert!((cfg.step - 0.25).abs() < f64::EPSILON);
        assert_eq!(cfg.interval(), Duration::from_secs(30));
        assert_eq!(cfg.window(), Duration::from_secs(300));
    }
}
