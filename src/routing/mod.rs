//! # Stage: Query Routing
//!
//! ## Responsibility
//! Decide, per query, whether the in-process rule engine or the remote
//! statistical backend answers it, and keep the decision threshold tuned
//! from observed outcomes.
//!
//! ## Guarantees
//! - Deterministic: the same query text always produces the same complexity
//!   score and, for a given threshold snapshot, the same first path.
//! - Snapshot-consistent: each decision holds the [`ThresholdConfig`] it was
//!   made with; the controller publishes replacements by atomic swap.
//! - Bounded: the threshold never leaves `[min_threshold, max_threshold]`
//!   and the cache TTL never leaves `[ttl_min_secs, ttl_max_secs]`.
//! - One-shot fallback: each path is attempted at most once per request.
//!
//! ## NOT Responsible For
//! - Transport details of the remote backend (see [`crate::remote`])
//! - Rule definitions (see [`crate::rules`])

pub mod config;
pub mod controller;
pub mod router;
pub mod scorer;
pub mod threshold;

pub use config::AdaptiveConfig;
pub use controller::{Adjustment, ThresholdController, WindowStats};
pub use router::{
    ProcessOutcome, QueryRouter, RoutePath, RoutingDecision, ServedBy,
    DEFAULT_IMPLICIT_FEEDBACK_FLOOR,
};
pub use scorer::{ComplexityScore, ComplexityScorer, ScoreBreakdown, WeightTable};
pub use threshold::{ThresholdConfig, ThresholdHandle};
