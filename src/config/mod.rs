//! # Stage: Router Configuration
//!
//! ## Responsibility
//! Parse and validate the TOML configuration for a [`QueryRouter`]
//! instance, and apply `QUERY_ROUTER_*` environment overrides on top.
//!
//! ```toml
//! ml_enabled = true
//! initial_complexity_threshold = 5.0
//! cache_ttl_seconds = 300
//! remote_timeout_ms = 2000
//! remote_base_url = "http://analysis.internal:8090"
//!
//! [weights]
//! statistical_term = 2.5
//!
//! [adaptive]
//! step = 0.5
//! ```
//!
//! ## Guarantees
//! - Deterministic: same TOML input always produces the same `RouterConfig`
//! - Validated: all semantic constraints are checked before a config is accepted
//! - Every field has a default, so an empty file is a valid config
//! - Schema-exportable: JSON Schema output enables IDE autocomplete
//!
//! ## NOT Responsible For
//! - Building the router (see [`QueryRouter::from_config`])
//! - Runtime tuning of the threshold (see [`crate::routing::controller`])
//!
//! [`QueryRouter`]: crate::QueryRouter
//! [`QueryRouter::from_config`]: crate::QueryRouter::from_config

pub mod loader;
pub mod validation;

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::routing::router::DEFAULT_IMPLICIT_FEEDBACK_FLOOR;
use crate::routing::{AdaptiveConfig, ThresholdConfig, WeightTable};

pub use validation::ConfigError;

// ── Environment overrides ────────────────────────────────────────────────

/// Overrides `ml_enabled`.
pub const ENV_ML_ENABLED: &str = "QUERY_ROUTER_ML_ENABLED";
/// Overrides `initial_complexity_threshold`.
pub const ENV_THRESHOLD: &str = "QUERY_ROUTER_THRESHOLD";
/// Overrides `cache_ttl_seconds`.
pub const ENV_CACHE_TTL_SECONDS: &str = "QUERY_ROUTER_CACHE_TTL_SECONDS";
/// Overrides `remote_timeout_ms`.
pub const ENV_REMOTE_TIMEOUT_MS: &str = "QUERY_ROUTER_REMOTE_TIMEOUT_MS";
/// Overrides `adaptive_threshold_enabled`.
pub const ENV_ADAPTIVE_ENABLED: &str = "QUERY_ROUTER_ADAPTIVE_ENABLED";
/// Overrides `remote_base_url`. An empty value clears it.
pub const ENV_REMOTE_URL: &str = "QUERY_ROUTER_REMOTE_URL";

// ── Default value functions ──────────────────────────────────────────────

/// Default: remote analysis enabled.
fn default_true() -> bool {
    true
}

/// Default complexity threshold: 5.0 (midpoint of the score range).
fn default_threshold() -> f64 {
    5.0
}

/// Default cache TTL: 300 seconds.
fn default_cache_ttl_seconds() -> u64 {
    300
}

/// Default remote timeout: 2000ms.
fn default_remote_timeout_ms() -> u64 {
    2_000
}

/// Default cache capacity: 10 000 entries.
fn default_cache_capacity() -> usize {
    10_000
}

/// Default telemetry ring capacity: 10 000 events.
fn default_telemetry_capacity() -> usize {
    10_000
}

fn default_implicit_feedback_floor() -> f64 {
    DEFAULT_IMPLICIT_FEEDBACK_FLOOR
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for a router instance.
///
/// Deserialized from TOML and validated before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RouterConfig {
    /// When `false`, the remote backend is never invoked.
    #[serde(default = "default_true")]
    pub ml_enabled: bool,

    /// Threshold in effect until the controller adjusts it.
    #[serde(default = "default_threshold")]
    pub initial_complexity_threshold: f64,

    /// Initial TTL for cache entries, in seconds.
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,

    /// Timeout for each remote call, in milliseconds.
    #[serde(default = "default_remote_timeout_ms")]
    pub remote_timeout_ms: u64,

    /// Master switch for the adaptive controller.
    #[serde(default = "default_true")]
    pub adaptive_threshold_enabled: bool,

    /// Maximum cache entries. `0` disables caching.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Maximum buffered telemetry events.
    #[serde(default = "default_telemetry_capacity")]
    pub telemetry_capacity: usize,

    /// Base URL of the remote analysis backend. No backend when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_base_url: Option<String>,

    /// Rule-based answers below this confidence count as negative feedback.
    #[serde(default = "default_implicit_feedback_floor")]
    pub implicit_feedback_floor: f64,

    /// Complexity scorer weights.
    #[serde(default)]
    pub weights: WeightTable,

    /// Adaptive controller tuning.
    #[serde(default)]
    pub adaptive: AdaptiveConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            ml_enabled: default_true(),
            initial_complexity_threshold: default_threshold(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
            remote_timeout_ms: default_remote_timeout_ms(),
            adaptive_threshold_enabled: default_true(),
            cache_capacity: default_cache_capacity(),
            telemetry_capacity: default_telemetry_capacity(),
            remote_base_url: None,
            implicit_feedback_floor: default_implicit_feedback_floor(),
            weights: WeightTable::default(),
            adaptive: AdaptiveConfig::default(),
        }
    }
}

impl RouterConfig {
    /// Initial [`ThresholdConfig`] snapshot.
    pub fn to_threshold_config(&self) -> ThresholdConfig {
        ThresholdConfig::initial(
            self.initial_complexity_threshold,
            Duration::from_secs(self.cache_ttl_seconds),
            Duration::from_millis(self.remote_timeout_ms),
        )
    }

    /// Controller config with the master switch folded in.
    pub fn controller_config(&self) -> AdaptiveConfig {
        AdaptiveConfig {
            enabled: self.adaptive_threshold_enabled && self.adaptive.enabled,
            ..self.adaptive.clone()
        }
    }

    /// Apply `QUERY_ROUTER_*` overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] if a variable is set but does
    /// not parse.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup. Unset keys are skipped.
    ///
    /// # Errors
    ///
    /// As [`apply_env_overrides`](Self::apply_env_overrides).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_ML_ENABLED) {
            self.ml_enabled = parse_bool(ENV_ML_ENABLED, &v)?;
        }
        if let Some(v) = lookup(ENV_THRESHOLD) {
            self.initial_complexity_threshold = parse_num(ENV_THRESHOLD, &v)?;
        }
        if let Some(v) = lookup(ENV_CACHE_TTL_SECONDS) {
            self.cache_ttl_seconds = parse_num(ENV_CACHE_TTL_SECONDS, &v)?;
        }
        if let Some(v) = lookup(ENV_REMOTE_TIMEOUT_MS) {
            self.remote_timeout_ms = parse_num(ENV_REMOTE_TIMEOUT_MS, &v)?;
        }
        if let Some(v) = lookup(ENV_ADAPTIVE_ENABLED) {
            self.adaptive_threshold_enabled = parse_bool(ENV_ADAPTIVE_ENABLED, &v)?;
        }
        if let Some(v) = lookup(ENV_REMOTE_URL) {
            let v = v.trim();
            self.remote_base_url = (!v.is_empty()).then(|| v.to_string());
        }
        Ok(())
    }
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidField {
            field: field.into(),
            value: value.into(),
            reason: "expected a boolean (true/false/1/0)".into(),
        }),
    }
}

fn parse_num<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidField {
        field: field.into(),
        value: value.into(),
        reason: e.to_string(),
    })
}

/// Export the JSON Schema for [`RouterConfig`].
///
/// # Errors
///
/// Returns a `serde_json::Error` if serialization fails.
pub fn export_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(RouterConfig);
    serde_json::to_string_pretty(&schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_empty_toml_yields_defaults() {
        let cfg: RouterConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, RouterConfig::default());
        assert!(cfg.ml_enabled);
        assert_eq!(cfg.remote_timeout_ms, 2_000);
        assert!(cfg.remote_base_url.is_none());
    }

    #[test]
    fn test_nested_tables_parse() {
        let cfg: RouterConfig = toml::from_str(
            r#"
initial_complexity_threshold = 6.5
remote_base_url = "http://localhost:8090"

[weights]
statistical_term = 3.0

[adaptive]
step = 0.25
min_samples = 5
"#,
        )
        .unwrap();
        assert!((cfg.initial_complexity_threshold - 6.5).abs() < f64::EPSILON);
        assert!((cfg.weights.statistical_term - 3.0).abs() < f64::EPSILON);
        assert!((cfg.weights.parameter - 1.2).abs() < f64::EPSILON);
        assert_eq!(cfg.adaptive.min_samples, 5);
        assert_eq!(cfg.remote_base_url.as_deref(), Some("http://localhost:8090"));
    }

    #[test]
    fn test_to_threshold_config() {
        let cfg = RouterConfig {
            cache_ttl_seconds: 120,
            remote_timeout_ms: 750,
            ..RouterConfig::default()
        };
        let t = cfg.to_threshold_config();
        assert_eq!(t.cache_ttl, Duration::from_secs(120));
        assert_eq!(t.remote_timeout, Duration::from_millis(750));
        assert_eq!(t.generation, 0);
    }

    #[test]
    fn test_master_switch_disables_controller() {
        let cfg = RouterConfig {
            adaptive_threshold_enabled: false,
            ..RouterConfig::default()
        };
        assert!(!cfg.controller_config().enabled);
        assert!(RouterConfig::default().controller_config().enabled);
    }

    #[test]
    fn test_overrides_apply() {
        let mut cfg = RouterConfig::default();
        cfg.apply_overrides(lookup(&[
            (ENV_ML_ENABLED, "false"),
            (ENV_THRESHOLD, "7.25"),
            (ENV_CACHE_TTL_SECONDS, "60"),
            (ENV_REMOTE_TIMEOUT_MS, "500"),
            (ENV_ADAPTIVE_ENABLED, "0"),
            (ENV_REMOTE_URL, "http://backend:9000"),
        ]))
        .unwrap();
        assert!(!cfg.ml_enabled);
        assert!((cfg.initial_complexity_threshold - 7.25).abs() < f64::EPSILON);
        assert_eq!(cfg.cache_ttl_seconds, 60);
        assert_eq!(cfg.remote_timeout_ms, 500);
        assert!(!cfg.adaptive_threshold_enabled);
        assert_eq!(cfg.remote_base_url.as_deref(), Some("http://backend:9000"));
    }

    #[test]
    fn test_empty_remote_url_override_clears() {
        let mut cfg = RouterConfig {
            remote_base_url: Some("http://x".into()),
            ..RouterConfig::default()
        };
        cfg.apply_overrides(lookup(&[(ENV_REMOTE_URL, "")])).unwrap();
        assert!(cfg.remote_base_url.is_none());
    }

    #[test]
    fn test_bad_override_names_the_variable() {
        let mut cfg = RouterConfig::default();
        let err = cfg
            .apply_overrides(lookup(&[(ENV_THRESHOLD, "high")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_THRESHOLD));
        let err = cfg
            .apply_overrides(lookup(&[(ENV_ML_ENABLED, "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { .. }));
    }

    #[test]
    fn test_export_schema_produces_valid_json() {
        let schema = export_schema().unwrap();
        let value: serde_json::Value = serde_json::from_str(&schema).unwrap();
        assert!(value["properties"]["initial_complexity_threshold"].is_object());
    }
}
