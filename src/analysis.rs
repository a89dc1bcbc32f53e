//! Analysis result payloads shared by both execution paths.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How faithfully a result answers the question that was asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fidelity {
    /// The path that produced it was the intended one for the query.
    Full,
    /// A lower-fidelity approximation (e.g. rule-based answer to a
    /// statistical question after the remote path failed).
    Degraded,
}

/// Whether a result may be written to the shared cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cacheability {
    /// Same query and context always yields the same answer.
    Deterministic,
    /// Sampling or time-dependent output; must not be cached.
    NonDeterministic,
    /// Depends on per-user session state; must not be shared.
    SessionSpecific,
}

impl Cacheability {
    /// Return `true` if results with this marker may be cached.
    pub fn is_cacheable(self) -> bool {
        matches!(self, Self::Deterministic)
    }
}

/// A computed answer to a [`Query`](crate::Query).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Opaque result body handed to the rendering layer.
    pub payload: Value,
    /// Producer's confidence in the answer, `0.0..=1.0`.
    pub confidence: f64,
    /// Fidelity relative to the query's intent.
    pub fidelity: Fidelity,
    /// Caching policy for this result.
    pub cacheability: Cacheability,
    /// Backend-supplied model information (remote path only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_metadata: Option<Value>,
}

impl AnalysisResult {
    /// A deterministic, full-fidelity result with the given payload.
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            confidence: 1.0,
            fidelity: Fidelity::Full,
            cacheability: Cacheability::Deterministic,
            model_metadata: None,
        }
    }

    /// Set the confidence, clamped to `0.0..=1.0`.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Set the fidelity marker.
    pub fn with_fidelity(mut self, fidelity: Fidelity) -> Self {
        self.fidelity = fidelity;
        self
    }

    /// Set the caching policy.
    pub fn with_cacheability(mut self, cacheability: Cacheability) -> Self {
        self.cacheability = cacheability;
        self
    }

    /// Attach backend model metadata.
    pub fn with_model_metadata(mut self, metadata: Value) -> Self {
        self.model_metadata = Some(metadata);
        self
    }
}
