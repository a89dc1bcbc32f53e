//! # hybrid-query-router
//!
//! Routes geospatial analysis queries between a fast in-process rule engine
//! and a slower remote statistical/ML backend.
//!
//! ## Architecture
//!
//! ```text
//! process(text, ctx)
//!   → Query (normalize + fingerprint)
//!   → CacheStore::get ── hit ──────────────────────────────► result (cache-hit)
//!   → ComplexityScorer::score
//!   → score < threshold ? RuleEngine : RemoteAnalysisClient
//!        └─ one-shot fallback to the other path on failure
//!   → CacheStore::put (write-through) → TelemetryCollector::record
//!
//! ThresholdController (interval task): drain telemetry → bounded delta
//!   → atomic swap of ThresholdConfig
//! ```

// ── Lint policy ───────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod analysis;
pub mod cache;
pub mod config;
pub mod metrics;
pub mod query;
pub mod remote;
pub mod routing;
pub mod rules;
pub mod telemetry;

// Re-exports for convenience
pub use analysis::{AnalysisResult, Cacheability, Fidelity};
pub use cache::{CacheLookup, CacheStore};
pub use config::RouterConfig;
pub use query::{Fingerprint, Query, QueryContext};
pub use remote::{
    AnalysisTransport, HttpTransport, RemoteAnalysisClient, RemoteFailure, ScriptedTransport,
};
pub use routing::{
    AdaptiveConfig, Adjustment, ComplexityScore, ComplexityScorer, ProcessOutcome, QueryRouter,
    RoutePath, RoutingDecision, ServedBy, ThresholdConfig, ThresholdController, ThresholdHandle,
    WeightTable, WindowStats,
};
pub use rules::{PatternRuleEngine, RuleEngine, Unsupported};
pub use telemetry::{FeedbackSignal, Outcome, TelemetryCollector, TelemetryEvent};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"`: structured JSON output for log aggregators
/// - anything else (including unset): human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`RouterError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Panics
///
/// This function never panics.
pub fn init_tracing() -> Result<(), RouterError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| RouterError::Other(format!("tracing init failed: {e}")))
}

/// Caller-visible router errors.
///
/// Lower layers return their own structured errors
/// ([`RemoteFailure`], [`Unsupported`]); only the router decides which of
/// them become one of these variants. Raw transport or deserialization
/// errors never appear here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// The query text is empty or otherwise malformed. Never retried.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Neither the remote path nor the rule engine could answer.
    #[error("analysis unavailable: {reason}")]
    AnalysisUnavailable {
        /// Short, user-presentable explanation.
        reason: String,
    },

    /// The caller cancelled the request while it was in flight.
    #[error("request cancelled")]
    Cancelled,

    /// A configuration value is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}

impl RouterError {
    /// Build an [`RouterError::AnalysisUnavailable`] from any displayable reason.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::AnalysisUnavailable {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display_includes_message() {
        let err = RouterError::Config("remote_timeout_ms must be > 0".to_string());
        assert!(err.to_string().contains("remote_timeout_ms must be > 0"));
    }

    #[test]
    fn test_unavailable_helper_sets_reason() {
        let err = RouterError::unavailable("backend down");
        assert_eq!(
            err,
            RouterError::AnalysisUnavailable {
                reason: "backend down".to_string()
            }
        );
        assert!(err.to_string().contains("backend down"));
    }

    #[test]
    fn test_init_tracing_second_call_returns_err() {
        // First call may succeed or fail depending on test execution order.
        let _ = init_tracing();
        let result = init_tracing();
        assert!(result.is_err(), "double init must return Err, not panic");
    }
}
