//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`RouterConfig`] that cannot
//! be expressed through the type system alone (range checks, cross-field
//! invariants).
//!
//! ## Guarantees
//! - Every validation rule has at least one test that triggers it
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value
//!
//! ## NOT Responsible For
//! - Parsing TOML (that belongs to `loader`)
//! - File I/O (that belongs to `loader`)

use super::RouterConfig;
use crate::routing::config as adaptive;
use crate::routing::scorer::MAX_SCORE;

/// Errors arising from configuration parsing, validation, or I/O.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Field path or environment variable name.
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl From<ConfigError> for crate::RouterError {
    fn from(e: ConfigError) -> Self {
        crate::RouterError::Config(e.to_string())
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.into(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Validate all semantic constraints on a [`RouterConfig`].
///
/// Collects every violation before returning so the caller sees the full
/// scope of issues at once.
///
/// # Returns
///
/// - `Ok(())` if all constraints pass.
/// - `Err(Vec<ConfigError>)` with every violation found.
///
/// # Panics
///
/// This function never panics.
pub fn validate(config: &RouterConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Threshold ────────────────────────────────────────────────────
    let threshold = config.initial_complexity_threshold;
    if !(0.0..=MAX_SCORE).contains(&threshold) {
        errors.push(invalid(
            "initial_complexity_threshold",
            threshold,
            "must be between 0.0 and 10.0",
        ));
    } else if config.adaptive_threshold_enabled
        && config.adaptive.enabled
        && !(config.adaptive.min_threshold..=config.adaptive.max_threshold).contains(&threshold)
    {
        errors.push(invalid(
            "initial_complexity_threshold",
            threshold,
            "must lie within [adaptive.min_threshold, adaptive.max_threshold]",
        ));
    }

    // ── Timing ───────────────────────────────────────────────────────
    if config.cache_ttl_seconds == 0 {
        errors.push(invalid("cache_ttl_seconds", 0, "must be at least 1 second"));
    }

    if config.remote_timeout_ms == 0 {
        errors.push(invalid("remote_timeout_ms", 0, "must be at least 1ms"));
    }

    // ── Capacities ───────────────────────────────────────────────────
    if config.telemetry_capacity == 0 {
        errors.push(invalid("telemetry_capacity", 0, "must be at least 1"));
    }

    // ── Feedback floor ───────────────────────────────────────────────
    if !(0.0..=1.0).contains(&config.implicit_feedback_floor) {
        errors.push(invalid(
            "implicit_feedback_floor",
            config.implicit_feedback_floor,
            "must be between 0.0 and 1.0",
        ));
    }

    // ── Remote URL ───────────────────────────────────────────────────
    if let Some(url) = &config.remote_base_url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            errors.push(invalid(
                "remote_base_url",
                url,
                "must start with http:// or https://",
            ));
        }
    }

    // ── Weights ──────────────────────────────────────────────────────
    let w = &config.weights;
    for (field, value) in [
        ("weights.statistical_term", w.statistical_term),
        ("weights.parameter", w.parameter),
        ("weights.temporal_forecast", w.temporal_forecast),
        ("weights.spatial_relationship", w.spatial_relationship),
    ] {
        if value < 0.0 || !value.is_finite() {
            errors.push(invalid(field, value, "must be a non-negative number"));
        }
    }
    if !(0.0..=MAX_SCORE).contains(&w.advanced_cutoff) {
        errors.push(invalid(
            "weights.advanced_cutoff",
            w.advanced_cutoff,
            "must be between 0.0 and 10.0",
        ));
    }

    // ── Adaptive controller ──────────────────────────────────────────
    errors.extend(
        adaptive::validate(&config.adaptive)
            .into_iter()
            .map(ConfigError::Validation),
    );

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
